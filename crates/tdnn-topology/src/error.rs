//! トポロジ生成のエラー型
//!
//! 生成は一発勝負で、どのエラーも即座に生成全体を中断する。
//! 書き出し済みのアーティファクトは削除しない。

use std::path::PathBuf;

/// トポロジ生成中のエラー
#[derive(thiserror::Error, Debug)]
pub enum TopologyError {
    /// splice-indexes 文字列の書式不正（空グループ・未ソート・整数以外）
    #[error("invalid splice-indexes group '{group}' in '{input}': {reason}")]
    Format {
        group: String,
        input: String,
        reason: String,
    },

    /// 両立しないオプションの組み合わせ
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 次元などの値域違反
    #[error("invalid value: {0}")]
    Validation(String),

    /// 任意依存の数値計算機能（フィルタ設計）が使えない
    #[error("{capability} is required for {purpose} but is not available. {hint}")]
    MissingDependency {
        capability: &'static str,
        purpose: String,
        hint: &'static str,
    },

    /// descriptor が未宣言のノードを参照している
    #[error("descriptor references undeclared node '{node}'")]
    DanglingReference { node: String },

    /// descriptor の構造上の次元とコンポーネントの宣言が食い違う
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// vars ファイルの書式不正
    #[error("malformed vars file: {0}")]
    Metadata(String),

    /// オプションファイルの読み込み・アーティファクト書き出しの失敗
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl TopologyError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

/// トポロジ生成の Result 型
pub type TopologyResult<T> = Result<T, TopologyError>;
