//! 時間コンテキストの集計

use std::ops::Add;

/// 出力 1 フレームの計算に必要な過去 (left) / 未来 (right) フレーム数
///
/// 層を追加するたびに単調非減少で積み上がる。
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextWindow {
    pub left: usize,
    pub right: usize,
}

impl ContextWindow {
    pub const ZERO: Self = Self { left: 0, right: 0 };

    pub const fn new(left: usize, right: usize) -> Self {
        Self { left, right }
    }

    /// 奇数幅 `2 * half + 1` の対称窓が追加するコンテキスト
    pub const fn symmetric(half: usize) -> Self {
        Self {
            left: half,
            right: half,
        }
    }

    /// `other` を積み上げた新しい値を返す
    #[must_use]
    pub const fn extend(self, other: ContextWindow) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl Add for ContextWindow {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        self.extend(rhs)
    }
}

/// 生成完了時に vars へ書き出すモデル全体のコンテキスト
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModelContext {
    pub left_context: usize,
    pub right_context: usize,
    pub num_hidden_layers: usize,
}

impl ModelContext {
    pub fn new(window: ContextWindow, num_hidden_layers: usize) -> Self {
        Self {
            left_context: window.left,
            right_context: window.right,
            num_hidden_layers,
        }
    }
}
