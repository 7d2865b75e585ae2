//! スプライス前の時間方向プーリング
//!
//! - `low-pass` / `weighted-average`: 対称窓を連結し、1 本の畳み込みで平滑化する。
//!   係数は外部のフィルタ設計機能 ([`FilterDesign`]) から受け取る。
//!   `weighted-average` は係数を学習可能にし、`low-pass` は固定する。
//! - `per-dim-weighted-average`: 対称窓を連結して特徴量ごとに並べ替え、
//!   特徴量ごとに独立な affine（ブロック対角）で 1 値に縮約する。
//!
//! どの変換も窓幅の半分だけ左右のコンテキストを追加する。

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::debug;
use serde::Deserialize;

use crate::context::ContextWindow;
use crate::descriptor::{Descriptor, symmetric_window};
use crate::error::{TopologyError, TopologyResult};
use crate::layers;
use crate::unit::LayerUnit;

/// プーリングの種類
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PoolKind {
    #[default]
    None,
    LowPass,
    WeightedAverage,
    PerDimWeightedAverage,
}

impl PoolKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::LowPass => "low-pass",
            Self::WeightedAverage => "weighted-average",
            Self::PerDimWeightedAverage => "per-dim-weighted-average",
        }
    }

    /// 畳み込み平滑化を使う種類か
    pub fn uses_filter(&self) -> bool {
        matches!(self, Self::LowPass | Self::WeightedAverage)
    }
}

impl fmt::Display for PoolKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolKind {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Self::None),
            "low-pass" => Ok(Self::LowPass),
            "weighted-average" => Ok(Self::WeightedAverage),
            "per-dim-weighted-average" => Ok(Self::PerDimWeightedAverage),
            _ => Err(TopologyError::validation(format!(
                "unknown pool type '{s}' (expected none, low-pass, weighted-average \
                 or per-dim-weighted-average)"
            ))),
        }
    }
}

/// プーリング設定
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PoolingSpec {
    pub kind: PoolKind,
    /// 窓幅（奇数）
    pub window: Option<usize>,
    /// 低域通過フィルタのカットオフ
    pub cutoff: Option<f64>,
}

/// 低域通過 FIR フィルタの係数設計
///
/// `num_taps` 本のタップを、ナイキスト周波数を 1.0 とした正規化カットオフ `cutoff` で設計する。
/// 純粋関数であることを期待する（同じ入力には同じ係数）。
pub trait FilterDesign {
    fn lowpass_taps(&self, num_taps: usize, cutoff: f64) -> Vec<f64>;
}

impl<F> FilterDesign for F
where
    F: Fn(usize, f64) -> Vec<f64>,
{
    fn lowpass_taps(&self, num_taps: usize, cutoff: f64) -> Vec<f64> {
        self(num_taps, cutoff)
    }
}

/// 畳み込み平滑化層が参照するフィルタ係数ファイル
///
/// 数値ファイルへの書き出しは呼び出し側の責務。
#[derive(Debug, Clone, PartialEq)]
pub struct FilterTaps {
    /// config から `matrix=` で参照されるパス
    pub path: PathBuf,
    /// 設計されたタップ係数
    pub coefficients: Vec<f64>,
}

impl FilterTaps {
    /// 畳み込みコンポーネントが読む 1 行（タップ + バイアス 0）
    pub fn matrix_row(&self) -> Vec<f64> {
        let mut row = self.coefficients.clone();
        row.push(0.0);
        row
    }
}

/// プーリング適用結果
#[derive(Debug, Clone)]
pub struct Pooled {
    pub output: Descriptor,
    pub context: ContextWindow,
    pub taps: Option<FilterTaps>,
}

/// `spec` に従って `input` をプーリングする
///
/// `PoolKind::None` なら `None` を返す。
pub fn apply_pooling(
    unit: &mut LayerUnit,
    layer_index: usize,
    input: &Descriptor,
    spec: &PoolingSpec,
    config_dir: &Path,
    filter_design: Option<&dyn FilterDesign>,
) -> TopologyResult<Option<Pooled>> {
    if spec.kind == PoolKind::None {
        return Ok(None);
    }
    let window = spec.window.ok_or_else(|| {
        TopologyError::config(format!(
            "pooling type was specified as {}, this requires specification of the pool-window",
            spec.kind
        ))
    })?;
    if window.is_multiple_of(2) {
        return Err(TopologyError::validation(format!("pool-window has to be odd, got {window}")));
    }

    let pooled = match spec.kind {
        PoolKind::None => return Ok(None),
        PoolKind::LowPass | PoolKind::WeightedAverage => {
            let cutoff = spec.cutoff.ok_or_else(|| {
                TopologyError::config(format!(
                    "pool type {} requires pool-lpfilter-width",
                    spec.kind
                ))
            })?;
            let design = filter_design.ok_or_else(|| TopologyError::MissingDependency {
                capability: "a low-pass FIR filter designer",
                purpose: format!("{} pooling", spec.kind),
                hint: "Supply a FilterDesign implementation (e.g. a Hamming-window FIR designer) \
                       through LayerCompiler::with_filter_design.",
            })?;
            let name = format!("Tdnn_input_smoother_{layer_index}");
            let path = config_dir.join(format!("{name}.txt"));
            low_pass(unit, &name, input, spec.kind, window, cutoff, path, design)?
        }
        PoolKind::PerDimWeightedAverage => {
            let name = format!("Tdnn_input_PDA_{layer_index}");
            per_dim_weighted_average(unit, &name, input, window)?
        }
    };
    debug!(
        "layer {layer_index}: {} pooling over {window} frames -> {} (dim {})",
        spec.kind,
        pooled.output,
        pooled.output.dim()
    );
    Ok(Some(pooled))
}

#[allow(clippy::too_many_arguments)]
fn low_pass(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    kind: PoolKind,
    window: usize,
    cutoff: f64,
    path: PathBuf,
    design: &dyn FilterDesign,
) -> TopologyResult<Pooled> {
    let coefficients = design.lowpass_taps(window, cutoff);
    if coefficients.len() != window {
        return Err(TopologyError::DimensionMismatch {
            expected: window,
            actual: coefficients.len(),
        });
    }

    let half = (window - 1) / 2;
    let spliced = symmetric_window(input, half);
    let updatable = kind == PoolKind::WeightedAverage;
    let node =
        layers::smoothing_convolution_layer(unit, name, &spliced, window, &path, updatable)?;
    let output = pooled_output(&node, kind, window, spliced)?;

    Ok(Pooled {
        output,
        context: ContextWindow::symmetric(half),
        taps: Some(FilterTaps { path, coefficients }),
    })
}

fn per_dim_weighted_average(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    window: usize,
) -> TopologyResult<Pooled> {
    let half = (window - 1) / 2;
    let spliced = symmetric_window(input, half);

    let num_feats = input.dim();
    let column_map = feature_major_column_map(num_feats, window);
    let permuted = layers::permute_layer(unit, name, &spliced, &column_map)?;
    let node = layers::block_affine_layer(unit, name, &permuted, num_feats, num_feats)?;
    let output = pooled_output(&node, PoolKind::PerDimWeightedAverage, window, spliced)?;

    Ok(Pooled {
        output,
        context: ContextWindow::symmetric(half),
        taps: None,
    })
}

/// 出力ノード `node` を、窓 `spliced` をプーリングした descriptor として包む
fn pooled_output(
    node: &Descriptor,
    kind: PoolKind,
    window: usize,
    spliced: Descriptor,
) -> TopologyResult<Descriptor> {
    let name = node
        .node_name()
        .ok_or_else(|| TopologyError::config(format!("pooling output '{node}' is not a node")))?;
    let output = Descriptor::pooled(name, kind, window, spliced);
    output.validate()?;
    if output.dim() != node.dim() {
        return Err(TopologyError::DimensionMismatch {
            expected: node.dim(),
            actual: output.dim(),
        });
    }
    Ok(output)
}

/// 時間優先の連結 `[t0 f0..fn, t1 f0..fn, ...]` を特徴量優先に並べ替える列マップ
pub fn feature_major_column_map(num_feats: usize, num_times: usize) -> Vec<usize> {
    (0..num_feats)
        .flat_map(|i| (0..num_times).map(move |j| j * num_feats + i))
        .collect()
}
