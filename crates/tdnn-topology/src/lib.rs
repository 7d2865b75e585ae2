//! TDNN トポロジ生成
//!
//! スプライススケジュールと層設定から、層ごとの学習（layer-wise discriminative training）
//! 用の nnet3 config 群を生成する。
//!
//! ```no_run
//! use tdnn_topology::{ConfigEmitter, LayerCompiler, TopologyOptions};
//!
//! let options = TopologyOptions {
//!     feat_dim: Some(40),
//!     num_targets: Some(2000),
//!     splice_indexes: Some("-2,-1,0,1,2 -1,0,1 0".to_string()),
//!     relu_dim: Some(850),
//!     ..TopologyOptions::default()
//! };
//! let config = options.validate()?;
//! let mut emitter = ConfigEmitter::create("exp/tdnn/configs")?;
//! let report = LayerCompiler::new(&config, "exp/tdnn/configs").compile(&mut emitter)?;
//! assert_eq!(report.context.num_hidden_layers, 3);
//! # Ok::<(), tdnn_topology::TopologyError>(())
//! ```

pub mod compiler;
pub mod context;
pub mod descriptor;
pub mod emitter;
pub mod error;
pub mod layers;
pub mod options;
pub mod pooling;
pub mod splice;
pub mod unit;

pub use compiler::{CompileReport, LayerCompiler};
pub use context::{ContextWindow, ModelContext};
pub use descriptor::Descriptor;
pub use emitter::{ArtifactKind, ArtifactSink, ConfigEmitter, MemorySink, read_model_context};
pub use error::{TopologyError, TopologyResult};
pub use options::{Nonlinearity, TdnnConfig, TopologyOptions};
pub use pooling::{FilterDesign, FilterTaps, PoolKind, PoolingSpec};
pub use splice::SpliceSchedule;
pub use unit::{ConfigArtifact, LayerUnit};
