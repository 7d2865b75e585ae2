//! make_tdnn_configs - TDNN の層ごとの nnet3 config を生成する
//!
//! 使用例:
//! ```bash
//! make_tdnn_configs --feat-dim 40 --num-targets 2000 \
//!     --splice-indexes "-2,-1,0,1,2 -1,0,1 0" --relu-dim 850 exp/tdnn/configs
//! ```
//!
//! `--config` で TOML ファイルを指定した場合、ファイルの値を読み込んだ上で
//! コマンドラインで明示したフラグが上書きする。

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use log::info;

use tdnn_topology::{ConfigEmitter, LayerCompiler, PoolKind, TopologyOptions};

#[derive(Parser, Debug)]
#[command(author, version, about = "Writes config files for TDNN creation and training")]
struct Cli {
    /// オプションを記述した TOML ファイル（キーはフラグ名と同じ kebab-case）
    #[arg(long)]
    config: Option<PathBuf>,

    /// 生特徴量の次元
    #[arg(long)]
    feat_dim: Option<i64>,

    /// i-vector の次元（0 なら使わない）
    #[arg(long)]
    ivector_dim: Option<i64>,

    /// 出力ターゲット数
    #[arg(long)]
    num_targets: Option<i64>,

    /// 層ごとのスプライスインデックス（例: "-3,-2,-1,0,1,2,3 -3,0,3 0"）
    #[arg(long, allow_hyphen_values = true)]
    splice_indexes: Option<String>,

    /// 最終層に log-softmax を付けるか
    #[arg(long, action = clap::ArgAction::Set)]
    include_log_softmax: Option<bool>,

    /// 非 0 なら cross-entropy 補助出力を追加する
    #[arg(long)]
    xent_regularize: Option<f64>,

    /// 最終隠れ層の NormalizeComponent の target-rms
    #[arg(long)]
    final_layer_normalize_target: Option<f64>,

    /// 非 0 オフセットへ送る部分次元
    #[arg(long)]
    subset_dim: Option<i64>,

    #[arg(long)]
    pnorm_input_dim: Option<i64>,

    #[arg(long)]
    pnorm_output_dim: Option<i64>,

    /// ReLU の次元（p-norm と排他）
    #[arg(long)]
    relu_dim: Option<i64>,

    /// none / low-pass / weighted-average / per-dim-weighted-average
    #[arg(long)]
    pool_type: Option<PoolKind>,

    /// プーリング窓幅（奇数）
    #[arg(long)]
    pool_window: Option<i64>,

    /// 低域通過フィルタのカットオフ（ナイキスト周波数 = 1.0）
    #[arg(long)]
    pool_lpfilter_width: Option<f64>,

    /// presoftmax prior scale を付けるか
    #[arg(long, action = clap::ArgAction::Set)]
    use_presoftmax_prior_scale: Option<bool>,

    /// config を書き出すディレクトリ
    config_dir: PathBuf,
}

impl Cli {
    /// TOML（または既定値）に明示フラグを上書きする
    fn into_options(self) -> Result<(TopologyOptions, PathBuf)> {
        let mut options = match &self.config {
            Some(path) => TopologyOptions::load(path)
                .with_context(|| format!("failed to load options from {}", path.display()))?,
            None => TopologyOptions::default(),
        };

        if self.feat_dim.is_some() {
            options.feat_dim = self.feat_dim;
        }
        if let Some(v) = self.ivector_dim {
            options.ivector_dim = v;
        }
        if self.num_targets.is_some() {
            options.num_targets = self.num_targets;
        }
        if self.splice_indexes.is_some() {
            options.splice_indexes = self.splice_indexes;
        }
        if let Some(v) = self.include_log_softmax {
            options.include_log_softmax = v;
        }
        if let Some(v) = self.xent_regularize {
            options.xent_regularize = v;
        }
        if let Some(v) = self.final_layer_normalize_target {
            options.final_layer_normalize_target = v;
        }
        if let Some(v) = self.subset_dim {
            options.subset_dim = v;
        }
        if self.pnorm_input_dim.is_some() {
            options.pnorm_input_dim = self.pnorm_input_dim;
        }
        if self.pnorm_output_dim.is_some() {
            options.pnorm_output_dim = self.pnorm_output_dim;
        }
        if self.relu_dim.is_some() {
            options.relu_dim = self.relu_dim;
        }
        if let Some(v) = self.pool_type {
            options.pool_type = v;
        }
        if self.pool_window.is_some() {
            options.pool_window = self.pool_window;
        }
        if self.pool_lpfilter_width.is_some() {
            options.pool_lpfilter_width = self.pool_lpfilter_width;
        }
        if let Some(v) = self.use_presoftmax_prior_scale {
            options.use_presoftmax_prior_scale = v;
        }

        Ok((options, self.config_dir))
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    info!("{}", std::env::args().collect::<Vec<_>>().join(" "));

    let cli = Cli::parse();
    let (options, config_dir) = cli.into_options()?;
    let config = options.validate().context("invalid options")?;

    let mut emitter = ConfigEmitter::create(&config_dir)
        .with_context(|| format!("failed to create {}", config_dir.display()))?;
    let report = LayerCompiler::new(&config, &config_dir)
        .compile(&mut emitter)
        .with_context(|| format!("failed to generate configs in {}", config_dir.display()))?;

    info!(
        "generated {} layer configs in {} (left context {}, right context {})",
        report.context.num_hidden_layers,
        config_dir.display(),
        report.context.left_context,
        report.context.right_context
    );
    Ok(())
}
