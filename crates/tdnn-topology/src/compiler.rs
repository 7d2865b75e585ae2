//! 層ごとのトポロジ生成
//!
//! 入力層 → LDA（`L0`）の後、隠れ層ごとに
//! プーリング → スプライス → affine + 非線形 + 正規化 → 出力ブランチ
//! を積み、1 層分をそれぞれ `layer<N>.config` として書き出す。
//! 層 N の config には N 層目で新たに追加したノードだけが入る。

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::context::{ContextWindow, ModelContext};
use crate::descriptor::{self, Descriptor};
use crate::emitter::{ArtifactKind, ArtifactSink};
use crate::error::{TopologyError, TopologyResult};
use crate::layers::{self, OutputHead};
use crate::options::TdnnConfig;
use crate::pooling::{self, FilterDesign, FilterTaps};
use crate::splice::is_identity_group;
use crate::unit::LayerUnit;

/// LDA 変換行列（外部で書き出される）
pub const LDA_MATRIX_FILE: &str = "lda.mat";
/// presoftmax prior scale ベクトル（外部で書き出される）
pub const PRIOR_SCALE_FILE: &str = "presoftmax_prior_scale.vec";

const INIT_HEADER: [&str; 2] = [
    "# Config file for initializing neural network prior to",
    "# preconditioning matrix computation",
];

/// 生成結果
#[derive(Debug, Clone, PartialEq)]
pub struct CompileReport {
    /// vars に書き出したコンテキスト
    pub context: ModelContext,
    /// 平滑化層ごとのフィルタ係数（書き出しは呼び出し側）
    pub filter_taps: Vec<FilterTaps>,
}

/// 検証済み設定からアーティファクト列を生成する
pub struct LayerCompiler<'a> {
    config: &'a TdnnConfig,
    config_dir: PathBuf,
    filter_design: Option<&'a dyn FilterDesign>,
}

impl<'a> LayerCompiler<'a> {
    /// `config_dir` は config 内で参照する数値ファイル（`lda.mat` など）の置き場所
    pub fn new(config: &'a TdnnConfig, config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config,
            config_dir: config_dir.into(),
            filter_design: None,
        }
    }

    /// low-pass / weighted-average プーリング用のフィルタ設計を注入する
    #[must_use]
    pub fn with_filter_design(mut self, design: &'a dyn FilterDesign) -> Self {
        self.filter_design = Some(design);
        self
    }

    /// 全アーティファクトを `sink` に書き出す
    ///
    /// 書き出し順は `init.config`、`layer1.config` ..、`vars`。
    /// 途中でエラーになった場合、それまでに書き出した分はそのまま残る。
    pub fn compile<S: ArtifactSink + ?Sized>(&self, sink: &mut S) -> TopologyResult<CompileReport> {
        let config = self.config;
        let schedule = &config.schedule;
        let num_layers = schedule.num_hidden_layers();

        let mut unit = LayerUnit::new();
        let input = layers::input_layer(
            &mut unit,
            config.feat_dim,
            schedule.group(0),
            config.ivector_dim,
        );
        self.write_init(&unit, &input, sink)?;

        let lda = self.config_dir.join(LDA_MATRIX_FILE);
        let mut prev = layers::fixed_affine_layer(&mut unit, "L0", &input, &lda)?;

        // 1 層目のスプライスは入力層と LDA で済んでいるので、ループ内では [0] として扱う
        if !is_identity_group(schedule.group(0)) {
            warn!(
                "first splice group {:?} is applied before LDA; hidden layer 0 uses [0] \
                 and its context is only counted once in the schedule totals",
                schedule.group(0)
            );
        }

        let mut pooling_context = ContextWindow::ZERO;
        let mut filter_taps = Vec::new();
        for i in 0..num_layers {
            let group: &[i32] = if i == 0 { &[0] } else { schedule.group(i) };

            let layer_input = if is_identity_group(group) {
                debug!("layer {i}: no splicing");
                prev.clone()
            } else {
                let pooled = pooling::apply_pooling(
                    &mut unit,
                    i,
                    &prev,
                    &config.pooling,
                    &self.config_dir,
                    self.filter_design,
                )?;
                if let Some(pooled) = pooled {
                    pooling_context = pooling_context.extend(pooled.context);
                    filter_taps.extend(pooled.taps);
                    prev = pooled.output;
                }
                self.splice_input(&mut unit, i, &prev, group)?
            };

            let target_rms = if i + 1 == num_layers {
                config.final_layer_normalize_target
            } else {
                1.0
            };
            prev = layers::hidden_layer(
                &mut unit,
                &format!("Tdnn_{i}"),
                &layer_input,
                &config.nonlinearity,
                target_rms,
            )?;
            self.output_heads(&mut unit, &prev)?;

            let (artifact, next) = unit.finish();
            sink.write_config(ArtifactKind::Layer(i + 1), &artifact)?;
            unit = next;
        }

        let window = ContextWindow::new(schedule.left_context(), schedule.right_context());
        let context = ModelContext::new(pooling_context.extend(window), num_layers);
        sink.write_context(&context)?;
        info!(
            "model_left_context={} model_right_context={} num_hidden_layers={}",
            context.left_context, context.right_context, context.num_hidden_layers
        );

        Ok(CompileReport { context, filter_taps })
    }

    /// 入力層だけのネットワーク（前処理行列推定用）
    fn write_init<S: ArtifactSink + ?Sized>(
        &self,
        unit: &LayerUnit,
        input: &Descriptor,
        sink: &mut S,
    ) -> TopologyResult<()> {
        let mut init = unit.clone();
        init.add_output_node("output", input)?;
        let (artifact, _) = init.finish();
        sink.write_config(ArtifactKind::Init, &artifact.with_header(INIT_HEADER))
    }

    /// グループ `group` で `prev` をスプライスした層入力を作る
    fn splice_input(
        &self,
        unit: &mut LayerUnit,
        layer_index: usize,
        prev: &Descriptor,
        group: &[i32],
    ) -> TopologyResult<Descriptor> {
        let zero_index = group.iter().position(|&k| k == 0);
        let reduced = match self.config.subset_dim {
            None => None,
            Some(_) if zero_index.is_none() => {
                return Err(TopologyError::config(format!(
                    "subset dimension selection requires a zero offset in the splice group \
                     (layer {layer_index}: {group:?})"
                )));
            }
            Some(subset_dim) => {
                let name = format!("Tdnn_input_{layer_index}");
                let range = Descriptor::dim_range(name, prev, 0, subset_dim)?;
                unit.add_dim_range_node(&range)?;
                Some(range)
            }
        };

        let spliced = descriptor::splice(prev, reduced.as_ref(), group, zero_index);
        debug!("layer {layer_index}: splice {group:?} -> {spliced} (dim {})", spliced.dim());
        Ok(spliced)
    }

    /// 主出力と（必要なら）cross-entropy 補助出力
    fn output_heads(&self, unit: &mut LayerUnit, trunk: &Descriptor) -> TopologyResult<()> {
        let config = self.config;
        let prior_scale = self.config_dir.join(PRIOR_SCALE_FILE);
        let prior_scale = config.use_presoftmax_prior_scale.then_some(prior_scale);
        let primary = OutputHead {
            prefix: "Final",
            output_name: "output",
            prior_scale: prior_scale.as_deref(),
            log_softmax: config.include_log_softmax,
        };
        layers::final_layer(unit, trunk, config.num_targets, &primary)?;

        if config.xent_regularize != 0.0 {
            let xent = OutputHead {
                prefix: "Final-xent",
                output_name: "output-xent",
                log_softmax: true,
                ..primary
            };
            layers::final_layer(unit, trunk, config.num_targets, &xent)?;
        }
        Ok(())
    }
}
