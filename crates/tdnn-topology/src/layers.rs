//! nnet3 コンポーネント行の生成
//!
//! 各関数は `LayerUnit` にコンポーネント行とノード行を追加し、
//! 出力ノードを指す descriptor を返す。

use std::path::Path;

use crate::descriptor::Descriptor;
use crate::error::{TopologyError, TopologyResult};
use crate::options::Nonlinearity;
use crate::unit::LayerUnit;

pub const INPUT_NODE: &str = "input";
pub const IVECTOR_NODE: &str = "ivector";

/// 入力ノード（特徴量・i-vector）を宣言し、最初のスプライスを組み立てる
///
/// i-vector はオフセットに関係なく t=0 の値を連結する。
pub fn input_layer(
    unit: &mut LayerUnit,
    feat_dim: usize,
    splice: &[i32],
    ivector_dim: usize,
) -> Descriptor {
    unit.add_input_node(INPUT_NODE, feat_dim);
    let input = Descriptor::node(INPUT_NODE, feat_dim);
    let mut parts: Vec<_> = splice.iter().map(|&k| Descriptor::offset(&input, k)).collect();
    if ivector_dim > 0 {
        unit.add_input_node(IVECTOR_NODE, ivector_dim);
        parts.push(Descriptor::replace_index(IVECTOR_NODE, ivector_dim, 0));
    }
    Descriptor::append(parts)
}

/// 固定 affine（LDA 等）
pub fn fixed_affine_layer(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    matrix: &Path,
) -> TopologyResult<Descriptor> {
    let node = format!("{name}-fixaffine");
    unit.add_component(format!(
        "component name={node} type=FixedAffineComponent matrix={}",
        matrix.display()
    ));
    unit.add_component_node(&node, &node, input)?;
    Ok(Descriptor::node(node, input.dim()))
}

/// 学習可能な affine（`<name>-affine`）
pub fn affine_layer(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    output_dim: usize,
    options: &str,
) -> TopologyResult<Descriptor> {
    let node = format!("{name}-affine");
    unit.add_component(format!(
        "component name={node} type=NaturalGradientAffineComponent \
         input-dim={} output-dim={output_dim} {options}",
        input.dim()
    ));
    unit.add_component_node(&node, &node, input)?;
    Ok(Descriptor::node(node, output_dim))
}

/// 隠れ層: affine → 非線形関数 → NormalizeComponent
pub fn hidden_layer(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    nonlinearity: &Nonlinearity,
    target_rms: f64,
) -> TopologyResult<Descriptor> {
    let affine = format!("{name}_affine");
    let renorm = format!("{name}_renorm");
    let output_dim = nonlinearity.output_dim();

    unit.add_component(format!(
        "component name={affine} type=NaturalGradientAffineComponent \
         input-dim={} output-dim={} bias-stddev=0",
        input.dim(),
        nonlinearity.input_dim()
    ));
    let nonlin = match *nonlinearity {
        Nonlinearity::RectifiedLinear { dim } => {
            let node = format!("{name}_relu");
            unit.add_component(format!(
                "component name={node} type=RectifiedLinearComponent dim={dim}"
            ));
            node
        }
        Nonlinearity::Pnorm {
            input_dim,
            output_dim,
        } => {
            let node = format!("{name}_pnorm");
            unit.add_component(format!(
                "component name={node} type=PnormComponent \
                 input-dim={input_dim} output-dim={output_dim}"
            ));
            node
        }
    };
    unit.add_component(format!(
        "component name={renorm} type=NormalizeComponent dim={output_dim} target-rms={}",
        format_float(target_rms)
    ));

    unit.add_component_node(&affine, &affine, input)?;
    let affine_out = Descriptor::node(&affine, nonlinearity.input_dim());
    unit.add_component_node(&nonlin, &nonlin, &affine_out)?;
    let nonlin_out = Descriptor::node(&nonlin, output_dim);
    unit.add_component_node(&renorm, &renorm, &nonlin_out)?;
    Ok(Descriptor::node(renorm, output_dim))
}

/// 出力ブランチの設定
#[derive(Debug, Clone, Copy)]
pub struct OutputHead<'a> {
    /// ノード名の接頭辞（`Final` / `Final-xent`）
    pub prefix: &'a str,
    /// `output-node` の名前（`output` / `output-xent`）
    pub output_name: &'a str,
    /// presoftmax prior scale のベクトルファイル
    pub prior_scale: Option<&'a Path>,
    pub log_softmax: bool,
}

/// 出力ブランチ: affine → (fixed-scale) → (log-softmax) → output-node
///
/// prior scale は log-softmax を付けるときだけ挿入する。
pub fn final_layer(
    unit: &mut LayerUnit,
    input: &Descriptor,
    num_targets: usize,
    head: &OutputHead<'_>,
) -> TopologyResult<Descriptor> {
    let prefix = head.prefix;
    let options = "param-stddev=0 bias-stddev=0";
    let mut prev = affine_layer(unit, prefix, input, num_targets, options)?;

    if head.log_softmax {
        if let Some(scales) = head.prior_scale {
            let node = format!("{prefix}-fixed-scale");
            unit.add_component(format!(
                "component name={node} type=FixedScaleComponent scales={}",
                scales.display()
            ));
            unit.add_component_node(&node, &node, &prev)?;
            prev = Descriptor::node(node, num_targets);
        }
        let node = format!("{prefix}-log-softmax");
        unit.add_component(format!(
            "component name={node} type=LogSoftmaxComponent dim={num_targets}"
        ));
        unit.add_component_node(&node, &node, &prev)?;
        prev = Descriptor::node(node, num_targets);
    }

    unit.add_output_node(head.output_name, &prev)?;
    Ok(prev)
}

/// 時間方向の平滑化畳み込み
///
/// 入力は `frames` フレームを連結した `Append`。x 方向 = 時間、y 方向 = 特徴量として、
/// フィルタ 1 本で全フレームを畳み込むので出力次元は 1 フレーム分の特徴量次元になる。
pub fn smoothing_convolution_layer(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    frames: usize,
    filter_file: &Path,
    updatable: bool,
) -> TopologyResult<Descriptor> {
    let conv = ConvolutionShape::temporal(input.dim(), frames)?;
    let component = format!("{name}_conv");
    let node = format!("{name}_conv_t");
    unit.add_component(format!(
        "component name={component} type=ConvolutionComponent \
         input-x-dim={} input-y-dim={} input-z-dim={} \
         filt-x-dim={} filt-y-dim={} filt-x-step={} filt-y-step={} \
         input-vectorization-order=zyx matrix={} is-updatable={updatable}",
        conv.input_x,
        conv.input_y,
        conv.input_z,
        conv.filt_x,
        conv.filt_y,
        conv.step_x,
        conv.step_y,
        filter_file.display()
    ));
    unit.add_component_node(&node, &component, input)?;
    Ok(Descriptor::node(node, conv.output_dim()))
}

/// 畳み込みの形状（フィルタ 1 本）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConvolutionShape {
    input_x: usize,
    input_y: usize,
    input_z: usize,
    filt_x: usize,
    filt_y: usize,
    step_x: usize,
    step_y: usize,
}

impl ConvolutionShape {
    /// 時間 `frames` x 特徴量 `input_dim / frames` の入力全体を時間方向に畳み込む形状
    fn temporal(input_dim: usize, frames: usize) -> TopologyResult<Self> {
        if frames == 0 || !input_dim.is_multiple_of(frames) {
            return Err(TopologyError::DimensionMismatch {
                expected: frames * (input_dim / frames.max(1)),
                actual: input_dim,
            });
        }
        Ok(Self {
            input_x: frames,
            input_y: input_dim / frames,
            input_z: 1,
            filt_x: frames,
            filt_y: 1,
            step_x: 1,
            step_y: 1,
        })
    }

    fn output_dim(&self) -> usize {
        let x_steps = 1 + (self.input_x - self.filt_x) / self.step_x;
        let y_steps = 1 + (self.input_y - self.filt_y) / self.step_y;
        x_steps * y_steps
    }
}

/// 列の並べ替え（`<name>-permute`）
pub fn permute_layer(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    column_map: &[usize],
) -> TopologyResult<Descriptor> {
    if column_map.len() != input.dim() {
        return Err(TopologyError::DimensionMismatch {
            expected: input.dim(),
            actual: column_map.len(),
        });
    }
    let node = format!("{name}-permute");
    let columns: Vec<String> = column_map.iter().map(usize::to_string).collect();
    unit.add_component(format!(
        "component name={node} type=PermuteComponent column-map={}",
        columns.join(",")
    ));
    unit.add_component_node(&node, &node, input)?;
    Ok(Descriptor::node(node, input.dim()))
}

/// ブロック対角 affine（`<name>-block-affine`）
pub fn block_affine_layer(
    unit: &mut LayerUnit,
    name: &str,
    input: &Descriptor,
    output_dim: usize,
    num_blocks: usize,
) -> TopologyResult<Descriptor> {
    if num_blocks == 0
        || !input.dim().is_multiple_of(num_blocks)
        || !output_dim.is_multiple_of(num_blocks)
    {
        return Err(TopologyError::DimensionMismatch {
            expected: num_blocks,
            actual: input.dim(),
        });
    }
    let node = format!("{name}-block-affine");
    unit.add_component(format!(
        "component name={node} type=BlockAffineComponent \
         input-dim={} output-dim={output_dim} num-blocks={num_blocks}",
        input.dim()
    ));
    unit.add_component_node(&node, &node, input)?;
    Ok(Descriptor::node(node, output_dim))
}

/// config に書く浮動小数点表記
///
/// 整数値でも小数点以下 1 桁を残す（`1.0`, `0.5`）。
pub fn format_float(value: f64) -> String {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{value:.1}")
    } else {
        format!("{value}")
    }
}
