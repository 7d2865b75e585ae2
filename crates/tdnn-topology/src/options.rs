//! 生成オプションと検証
//!
//! `TopologyOptions` は未検証の入力（CLI フラグ / TOML ファイル）をそのまま受ける。
//! 負値も受け取れるよう整数は符号付きで持ち、`validate` で検証済みの `TdnnConfig` にする。

use std::path::Path;

use serde::Deserialize;

use crate::error::{TopologyError, TopologyResult};
use crate::pooling::{PoolKind, PoolingSpec};
use crate::splice::SpliceSchedule;

/// 未検証の生成オプション
///
/// TOML ではキーを kebab-case で書く（例: `feat-dim = 40`）。
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct TopologyOptions {
    /// 生特徴量の次元（例: 13, 40）
    pub feat_dim: Option<i64>,
    /// i-vector の次元（0 なら i-vector 入力なし）
    pub ivector_dim: i64,
    /// 出力ターゲット数（pdf 数）
    pub num_targets: Option<i64>,
    /// 層ごとのスプライスインデックス（例: `"-2,-1,0,1,2 -1,0,1 0"`）
    pub splice_indexes: Option<String>,
    /// 最終 log-softmax を付けるか
    pub include_log_softmax: bool,
    /// 非 0 なら cross-entropy 正則化用の補助出力を追加する
    pub xent_regularize: f64,
    /// 最終隠れ層の NormalizeComponent の target-rms
    pub final_layer_normalize_target: f64,
    /// 非 0 オフセットへ送る部分次元（0 なら全次元）
    pub subset_dim: i64,
    pub pnorm_input_dim: Option<i64>,
    pub pnorm_output_dim: Option<i64>,
    pub relu_dim: Option<i64>,
    pub pool_type: PoolKind,
    /// プーリング窓幅（奇数）
    pub pool_window: Option<i64>,
    /// 低域通過フィルタのカットオフ（ナイキスト周波数 = 1.0 とした正規化値）
    pub pool_lpfilter_width: Option<f64>,
    /// presoftmax prior scale を付けるか
    pub use_presoftmax_prior_scale: bool,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            feat_dim: None,
            ivector_dim: 0,
            num_targets: None,
            splice_indexes: None,
            include_log_softmax: true,
            xent_regularize: 0.0,
            final_layer_normalize_target: 1.0,
            subset_dim: 0,
            pnorm_input_dim: None,
            pnorm_output_dim: None,
            relu_dim: None,
            pool_type: PoolKind::None,
            pool_window: None,
            pool_lpfilter_width: None,
            use_presoftmax_prior_scale: true,
        }
    }
}

impl TopologyOptions {
    /// TOML 文字列から読み込む
    pub fn from_toml_str(text: &str) -> TopologyResult<Self> {
        toml::from_str(text)
            .map_err(|e| TopologyError::config(format!("failed to parse options: {e}")))
    }

    /// TOML ファイルから読み込む
    pub fn load<P: AsRef<Path>>(path: P) -> TopologyResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| TopologyError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// 値域と組み合わせを検証して `TdnnConfig` を作る
    pub fn validate(&self) -> TopologyResult<TdnnConfig> {
        let feat_dim = required_positive("feat-dim", self.feat_dim)?;
        let num_targets = required_positive("num-targets", self.num_targets)?;
        let ivector_dim = non_negative("ivector-dim", self.ivector_dim)?;
        let subset_dim = non_negative("subset-dim", self.subset_dim)?;

        let splice = self
            .splice_indexes
            .as_deref()
            .ok_or_else(|| TopologyError::validation("splice-indexes is required"))?;
        let schedule = SpliceSchedule::parse(splice)?;

        let window = match self.pool_window {
            None => None,
            Some(w) if w <= 0 => {
                return Err(TopologyError::validation(format!(
                    "pool-window has to be positive, got {w}"
                )));
            }
            Some(w) if w % 2 == 0 => {
                return Err(TopologyError::validation(format!(
                    "pool-window has to be odd, got {w}"
                )));
            }
            Some(w) => Some(w as usize),
        };
        if let Some(cutoff) = self.pool_lpfilter_width
            && !(cutoff > 0.0 && cutoff < 1.0)
        {
            return Err(TopologyError::validation(format!(
                "pool-lpfilter-width has to be in (0, 1), got {cutoff}"
            )));
        }
        if self.pool_type.uses_filter() && self.pool_lpfilter_width.is_none() {
            return Err(TopologyError::config(format!(
                "pool-type {} requires pool-lpfilter-width",
                self.pool_type
            )));
        }

        Ok(TdnnConfig {
            feat_dim,
            ivector_dim,
            num_targets,
            schedule,
            nonlinearity: self.nonlinearity()?,
            subset_dim: (subset_dim > 0).then_some(subset_dim),
            pooling: PoolingSpec {
                kind: self.pool_type,
                window,
                cutoff: self.pool_lpfilter_width,
            },
            use_presoftmax_prior_scale: self.use_presoftmax_prior_scale,
            final_layer_normalize_target: self.final_layer_normalize_target,
            include_log_softmax: self.include_log_softmax,
            xent_regularize: self.xent_regularize,
        })
    }

    fn nonlinearity(&self) -> TopologyResult<Nonlinearity> {
        if let Some(dim) = self.relu_dim {
            if self.pnorm_input_dim.is_some() || self.pnorm_output_dim.is_some() {
                return Err(TopologyError::config(
                    "relu-dim is not compatible with pnorm-input-dim or pnorm-output-dim",
                ));
            }
            let dim = required_positive("relu-dim", Some(dim))?;
            return Ok(Nonlinearity::RectifiedLinear { dim });
        }

        let pnorm = (self.pnorm_input_dim, self.pnorm_output_dim);
        let (Some(input_dim), Some(output_dim)) = pnorm else {
            return Err(TopologyError::config(
                "relu-dim not set, so expected pnorm-input-dim and pnorm-output-dim to be provided",
            ));
        };
        let input_dim = required_positive("pnorm-input-dim", Some(input_dim))?;
        let output_dim = required_positive("pnorm-output-dim", Some(output_dim))?;
        if !input_dim.is_multiple_of(output_dim) {
            return Err(TopologyError::validation(format!(
                "pnorm-input-dim {input_dim} is not a multiple of pnorm-output-dim {output_dim}"
            )));
        }
        Ok(Nonlinearity::Pnorm {
            input_dim,
            output_dim,
        })
    }
}

fn required_positive(name: &str, value: Option<i64>) -> TopologyResult<usize> {
    match value {
        None => Err(TopologyError::validation(format!("{name} is required"))),
        Some(v) if v <= 0 => Err(TopologyError::validation(format!(
            "{name} has to be positive, got {v}"
        ))),
        Some(v) => Ok(v as usize),
    }
}

fn non_negative(name: &str, value: i64) -> TopologyResult<usize> {
    if value < 0 {
        return Err(TopologyError::validation(format!(
            "{name} has to be non-negative, got {value}"
        )));
    }
    Ok(value as usize)
}

/// 隠れ層の非線形関数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nonlinearity {
    /// ReLU（入出力同次元）
    RectifiedLinear { dim: usize },
    /// p-norm（`input_dim` を `output_dim` グループに縮約）
    Pnorm { input_dim: usize, output_dim: usize },
}

impl Nonlinearity {
    /// affine 出力 = 非線形関数の入力次元
    pub fn input_dim(&self) -> usize {
        match *self {
            Self::RectifiedLinear { dim } => dim,
            Self::Pnorm { input_dim, .. } => input_dim,
        }
    }

    pub fn output_dim(&self) -> usize {
        match *self {
            Self::RectifiedLinear { dim } => dim,
            Self::Pnorm { output_dim, .. } => output_dim,
        }
    }
}

/// 検証済みの生成設定
#[derive(Debug, Clone, PartialEq)]
pub struct TdnnConfig {
    pub feat_dim: usize,
    pub ivector_dim: usize,
    pub num_targets: usize,
    pub schedule: SpliceSchedule,
    pub nonlinearity: Nonlinearity,
    /// 非 0 オフセット用の部分次元（`None` なら全次元）
    pub subset_dim: Option<usize>,
    pub pooling: PoolingSpec,
    pub use_presoftmax_prior_scale: bool,
    pub final_layer_normalize_target: f64,
    pub include_log_softmax: bool,
    pub xent_regularize: f64,
}
