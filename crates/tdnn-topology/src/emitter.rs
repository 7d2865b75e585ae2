//! アーティファクトの書き出し
//!
//! 出力ディレクトリの構成:
//! - `init.config`: 前処理行列推定用（出力ブランチなし）
//! - `layer<N>.config`: N 層目で新たに追加されたノードのみ
//! - `vars`: モデル全体のコンテキスト

use std::fmt;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use log::info;

use crate::context::ModelContext;
use crate::error::{TopologyError, TopologyResult};
use crate::unit::ConfigArtifact;

pub const VARS_FILE: &str = "vars";

/// config アーティファクトの種類
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Init,
    /// 1 始まりの層番号
    Layer(usize),
}

impl ArtifactKind {
    pub fn file_name(&self) -> String {
        match self {
            Self::Init => "init.config".to_string(),
            Self::Layer(n) => format!("layer{n}.config"),
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.file_name())
    }
}

/// コンパイラがアーティファクトを流し込む先
pub trait ArtifactSink {
    fn write_config(&mut self, kind: ArtifactKind, artifact: &ConfigArtifact) -> TopologyResult<()>;
    fn write_context(&mut self, context: &ModelContext) -> TopologyResult<()>;
}

/// 出力ディレクトリへ書き出す sink
#[derive(Debug)]
pub struct ConfigEmitter {
    dir: PathBuf,
}

impl ConfigEmitter {
    /// 出力ディレクトリを（無ければ）作成する
    pub fn create<P: AsRef<Path>>(dir: P) -> TopologyResult<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir).map_err(|source| TopologyError::Io {
            path: dir.clone(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_file(&self, name: &str, contents: &str) -> TopologyResult<PathBuf> {
        let path = self.dir.join(name);
        let io_err = |source| TopologyError::Io {
            path: path.clone(),
            source,
        };
        let file = File::create(&path).map_err(io_err)?;
        let mut writer = BufWriter::new(file);
        writer.write_all(contents.as_bytes()).map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        Ok(path)
    }
}

impl ArtifactSink for ConfigEmitter {
    fn write_config(
        &mut self,
        kind: ArtifactKind,
        artifact: &ConfigArtifact,
    ) -> TopologyResult<()> {
        let path = self.write_file(&kind.file_name(), &artifact.render())?;
        info!(
            "wrote {} ({} components, {} nodes)",
            path.display(),
            artifact.components.len(),
            artifact.component_nodes.len()
        );
        Ok(())
    }

    fn write_context(&mut self, context: &ModelContext) -> TopologyResult<()> {
        let path = self.write_file(VARS_FILE, &context.to_string())?;
        info!("wrote {}", path.display());
        Ok(())
    }
}

/// メモリ上に保持する sink（dry-run・検査用）
#[derive(Debug, Default)]
pub struct MemorySink {
    pub configs: Vec<(ArtifactKind, ConfigArtifact)>,
    pub context: Option<ModelContext>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(&self, kind: ArtifactKind) -> Option<&ConfigArtifact> {
        self.configs.iter().find(|(k, _)| *k == kind).map(|(_, artifact)| artifact)
    }
}

impl ArtifactSink for MemorySink {
    fn write_config(
        &mut self,
        kind: ArtifactKind,
        artifact: &ConfigArtifact,
    ) -> TopologyResult<()> {
        self.configs.push((kind, artifact.clone()));
        Ok(())
    }

    fn write_context(&mut self, context: &ModelContext) -> TopologyResult<()> {
        self.context = Some(*context);
        Ok(())
    }
}

impl fmt::Display for ModelContext {
    /// vars ファイルの書式（3 行）
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "model_left_context={}", self.left_context)?;
        writeln!(f, "model_right_context={}", self.right_context)?;
        writeln!(f, "num_hidden_layers={}", self.num_hidden_layers)
    }
}

impl FromStr for ModelContext {
    type Err = TopologyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut left = None;
        let mut right = None;
        let mut layers = None;
        for (line_no, line) in s.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let line_no = line_no + 1;
            let (key, value) = line.split_once('=').ok_or_else(|| {
                TopologyError::Metadata(format!("line {line_no}: expected key=value"))
            })?;
            let value = value.trim().parse::<usize>().map_err(|e| {
                TopologyError::Metadata(format!("line {line_no}: invalid value '{value}' ({e})"))
            })?;
            match key.trim() {
                "model_left_context" => left = Some(value),
                "model_right_context" => right = Some(value),
                "num_hidden_layers" => layers = Some(value),
                other => {
                    return Err(TopologyError::Metadata(format!(
                        "line {line_no}: unknown key '{other}'"
                    )));
                }
            }
        }
        let missing = |key: &str| TopologyError::Metadata(format!("missing {key}"));
        Ok(Self {
            left_context: left.ok_or_else(|| missing("model_left_context"))?,
            right_context: right.ok_or_else(|| missing("model_right_context"))?,
            num_hidden_layers: layers.ok_or_else(|| missing("num_hidden_layers"))?,
        })
    }
}

/// 出力ディレクトリの vars を読み戻す
pub fn read_model_context<P: AsRef<Path>>(dir: P) -> TopologyResult<ModelContext> {
    let path = dir.as_ref().join(VARS_FILE);
    let text = fs::read_to_string(&path).map_err(|source| TopologyError::Io { path, source })?;
    text.parse()
}
