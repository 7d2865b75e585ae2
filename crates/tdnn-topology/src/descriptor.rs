//! nnet3 の入力 descriptor
//!
//! ノードの入力を、既に宣言されたノードの出力から組み立てる式。
//! 文字列と次元の組ではなく型付きの木として保持し、次元は構造から導出する。
//! 一度作った descriptor は変更せず、変換のたびに新しい値を作る。

use std::fmt;

use crate::error::{TopologyError, TopologyResult};
use crate::pooling::PoolKind;

/// 入力 descriptor
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Descriptor {
    /// 宣言済みノードの出力をそのまま参照する
    Node { name: String, dim: usize },
    /// 時間方向にずらして参照する
    Offset { input: Box<Descriptor>, offset: i32 },
    /// 特徴量方向に連結する（引数順を保持する）
    Append(Vec<Descriptor>),
    /// 時刻インデックスを固定して参照する（i-vector 用）
    ReplaceIndex { name: String, dim: usize, time: i32 },
    /// `dim-range-node` による連続部分次元の切り出し
    DimRange {
        name: String,
        input: Box<Descriptor>,
        offset: usize,
        dim: usize,
    },
    /// プーリング（畳み込み平滑化 / 次元別加重平均）ノードの出力
    Pooled {
        name: String,
        kind: PoolKind,
        window: usize,
        input: Box<Descriptor>,
    },
}

impl Descriptor {
    pub fn node(name: impl Into<String>, dim: usize) -> Self {
        Self::Node {
            name: name.into(),
            dim,
        }
    }

    /// `input` を `offset` フレームずらす
    ///
    /// `offset == 0` のときはシフトノードを作らず `input` を返す。
    pub fn offset(input: &Descriptor, offset: i32) -> Self {
        if offset == 0 {
            input.clone()
        } else {
            Self::Offset {
                input: Box::new(input.clone()),
                offset,
            }
        }
    }

    /// 特徴量方向の連結
    ///
    /// 要素が 1 つだけのときは連結せずその要素を返す。
    pub fn append(mut parts: Vec<Descriptor>) -> Self {
        if parts.len() == 1 {
            parts.remove(0)
        } else {
            Self::Append(parts)
        }
    }

    pub fn replace_index(name: impl Into<String>, dim: usize, time: i32) -> Self {
        Self::ReplaceIndex {
            name: name.into(),
            dim,
            time,
        }
    }

    /// `input` の `[offset, offset + dim)` を切り出す
    ///
    /// `dim-range-node` は単一ノードしか入力に取れないため、`input` はノード参照である必要がある。
    pub fn dim_range(
        name: impl Into<String>,
        input: &Descriptor,
        offset: usize,
        dim: usize,
    ) -> TopologyResult<Self> {
        if input.node_name().is_none() {
            return Err(TopologyError::config(format!(
                "dim-range source must be a plain node reference, got '{input}'"
            )));
        }
        let range = Self::DimRange {
            name: name.into(),
            input: Box::new(input.clone()),
            offset,
            dim,
        };
        range.validate()?;
        Ok(range)
    }

    /// `window` フレームを連結した `input`（`Append`）をプーリングした出力
    pub fn pooled(
        name: impl Into<String>,
        kind: PoolKind,
        window: usize,
        input: Descriptor,
    ) -> Self {
        Self::Pooled {
            name: name.into(),
            kind,
            window,
            input: Box::new(input),
        }
    }

    /// 構造から導出した出力次元
    pub fn dim(&self) -> usize {
        match self {
            Self::Node { dim, .. }
            | Self::ReplaceIndex { dim, .. }
            | Self::DimRange { dim, .. } => *dim,
            Self::Offset { input, .. } => input.dim(),
            Self::Append(parts) => parts.iter().map(Descriptor::dim).sum(),
            Self::Pooled { window, input, .. } => input.dim() / window,
        }
    }

    /// 単一ノードとして参照できる場合はそのノード名
    pub fn node_name(&self) -> Option<&str> {
        match self {
            Self::Node { name, .. } | Self::DimRange { name, .. } | Self::Pooled { name, .. } => {
                Some(name)
            }
            _ => None,
        }
    }

    /// 式が直接参照しているノード名を出現順に列挙する
    ///
    /// `DimRange` / `Pooled` はそれ自体がノードなので、その名前だけを返す。
    pub fn referenced_nodes(&self) -> Vec<&str> {
        let mut out = Vec::new();
        self.collect_references(&mut out);
        out
    }

    fn collect_references<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Node { name, .. }
            | Self::ReplaceIndex { name, .. }
            | Self::DimRange { name, .. }
            | Self::Pooled { name, .. } => out.push(name),
            Self::Offset { input, .. } => input.collect_references(out),
            Self::Append(parts) => {
                for part in parts {
                    part.collect_references(out);
                }
            }
        }
    }

    /// 木全体の構造検査
    ///
    /// - 次元は正
    /// - `Append` は空でない
    /// - `DimRange` は入力次元の範囲内
    /// - `Pooled` の入力次元は窓幅で割り切れる
    pub fn validate(&self) -> TopologyResult<()> {
        match self {
            Self::Node { dim, .. } | Self::ReplaceIndex { dim, .. } => positive(*dim),
            Self::Offset { input, .. } => input.validate(),
            Self::Append(parts) => {
                if parts.is_empty() {
                    return Err(TopologyError::config("Append requires at least one input"));
                }
                parts.iter().try_for_each(Descriptor::validate)
            }
            Self::DimRange { input, offset, dim, .. } => {
                input.validate()?;
                positive(*dim)?;
                if offset + dim > input.dim() {
                    return Err(TopologyError::DimensionMismatch {
                        expected: input.dim(),
                        actual: offset + dim,
                    });
                }
                Ok(())
            }
            Self::Pooled { window, input, .. } => {
                input.validate()?;
                positive(*window)?;
                if !input.dim().is_multiple_of(*window) {
                    return Err(TopologyError::DimensionMismatch {
                        expected: input.dim() - input.dim() % window,
                        actual: input.dim(),
                    });
                }
                Ok(())
            }
        }
    }
}

fn positive(dim: usize) -> TopologyResult<()> {
    if dim == 0 {
        return Err(TopologyError::validation("descriptor dimension must be positive"));
    }
    Ok(())
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node { name, .. } | Self::DimRange { name, .. } | Self::Pooled { name, .. } => {
                f.write_str(name)
            }
            Self::Offset { input, offset: 0 } => write!(f, "{input}"),
            Self::Offset { input, offset } => write!(f, "Offset({input}, {offset})"),
            Self::Append(parts) => {
                f.write_str("Append(")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{part}")?;
                }
                f.write_str(")")
            }
            Self::ReplaceIndex { name, time, .. } => {
                write!(f, "ReplaceIndex({name}, t, {time})")
            }
        }
    }
}

/// `prev` をグループ `group` のオフセットで連結したスプライス入力
///
/// `zero_index` の要素には常に `prev`（全次元）を使う。それ以外のオフセットには
/// `reduced` があればそれを、無ければ `prev` をずらして使う。
pub fn splice(
    prev: &Descriptor,
    reduced: Option<&Descriptor>,
    group: &[i32],
    zero_index: Option<usize>,
) -> Descriptor {
    let shifted_source = reduced.unwrap_or(prev);
    let parts = group
        .iter()
        .enumerate()
        .map(|(j, &k)| {
            if Some(j) == zero_index {
                prev.clone()
            } else {
                Descriptor::offset(shifted_source, k)
            }
        })
        .collect();
    Descriptor::append(parts)
}

/// `input` を `-half..=half` の全フレームで連結した対称窓
pub fn symmetric_window(input: &Descriptor, half: usize) -> Descriptor {
    let half = half as i32;
    let parts = (-half..=half).map(|k| Descriptor::offset(input, k)).collect();
    Descriptor::append(parts)
}
