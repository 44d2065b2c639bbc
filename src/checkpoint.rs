//! Checkpoint layout resolution.
//!
//! A checkpoint root looks like:
//!
//! ```text
//! {root}/
//! ├── HeartMuLa-oss-{version}/   sequence model
//! ├── HeartCodec-oss/            codec model
//! ├── tokenizer.json
//! └── gen_config.json
//! ```

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use crate::{Error, Result};

/// Directory name prefix of the sequence model checkpoint.
pub const SEQUENCE_MODEL_PREFIX: &str = "HeartMuLa-oss-";
/// Directory name of the codec model checkpoint.
pub const CODEC_MODEL_DIR: &str = "HeartCodec-oss";
pub const TOKENIZER_FILE: &str = "tokenizer.json";
pub const GEN_CONFIG_FILE: &str = "gen_config.json";

/// Validated paths of every artifact a pipeline needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointPaths {
    pub sequence_model: PathBuf,
    pub codec_model: PathBuf,
    pub tokenizer: PathBuf,
    pub gen_config: PathBuf,
}

impl CheckpointPaths {
    /// Compute the expected layout for `version` under `root` and check it exists.
    ///
    /// Fails with [`Error::MissingArtifact`] naming the first absent path.
    pub fn resolve(root: impl AsRef<Path>, version: &str) -> Result<Self> {
        let root = root.as_ref();
        let version = normalize_version(version)?;

        let paths = Self {
            sequence_model: root.join(format!("{SEQUENCE_MODEL_PREFIX}{version}")),
            codec_model: root.join(CODEC_MODEL_DIR),
            tokenizer: root.join(TOKENIZER_FILE),
            gen_config: root.join(GEN_CONFIG_FILE),
        };

        require(&paths.sequence_model, "sequence model checkpoint", Path::exists)?;
        require(&paths.codec_model, "codec model checkpoint", Path::exists)?;
        require(&paths.tokenizer, "tokenizer", Path::is_file)?;
        require(&paths.gen_config, "generation config", Path::is_file)?;

        tracing::debug!(?paths, "resolved checkpoint layout");
        Ok(paths)
    }
}

fn require(path: &Path, artifact: &'static str, present: fn(&Path) -> bool) -> Result<()> {
    if present(path) {
        Ok(())
    } else {
        Err(Error::MissingArtifact {
            artifact,
            path: path.to_path_buf(),
        })
    }
}

/// Strip whitespace and an optional `HeartMuLa-oss-` prefix (any case).
///
/// `"HeartMuLa-oss-3B"` and `" 3B "` both become `"3B"`.
pub fn normalize_version(version: &str) -> Result<&str> {
    let trimmed = version.trim();
    let prefix_len = SEQUENCE_MODEL_PREFIX.len();
    let stripped = match trimmed.get(..prefix_len) {
        Some(head) if head.eq_ignore_ascii_case(SEQUENCE_MODEL_PREFIX) => &trimmed[prefix_len..],
        _ => trimmed,
    };
    if stripped.is_empty() {
        return Err(Error::Config(format!(
            "model version must not be empty (got {version:?})"
        )));
    }
    Ok(stripped)
}

/// Default time a catalog listing stays valid.
pub const CATALOG_TTL: Duration = Duration::from_secs(60);

/// Cached listing of the entries installed under a checkpoint root.
///
/// Scanning is cheap but callers (task dashboards) ask often, so the
/// listing is reused for `ttl` unless [`invalidate`](Self::invalidate)
/// is called after installing or removing a checkpoint.
pub struct CheckpointCatalog {
    root: PathBuf,
    ttl: Duration,
    cached: Mutex<Option<(Vec<String>, Instant)>>,
}

impl CheckpointCatalog {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self::with_ttl(root, CATALOG_TTL)
    }

    pub fn with_ttl(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
            cached: Mutex::new(None),
        }
    }

    /// Sorted names of non-hidden sub-directories of the root.
    ///
    /// A missing root yields an empty list.
    pub fn entries(&self) -> Result<Vec<String>> {
        let mut cached = self
            .cached
            .lock()
            .map_err(|_| Error::Config("checkpoint catalog lock poisoned".into()))?;
        if let Some((names, at)) = cached.as_ref()
            && at.elapsed() < self.ttl
        {
            return Ok(names.clone());
        }
        let names = scan_dirs(&self.root)?;
        *cached = Some((names.clone(), Instant::now()));
        Ok(names)
    }

    /// Versions of the sequence model that are installed, e.g. `["3B", "7B"]`.
    pub fn versions(&self) -> Result<Vec<String>> {
        Ok(self
            .entries()?
            .iter()
            .filter_map(|name| name.strip_prefix(SEQUENCE_MODEL_PREFIX))
            .filter(|version| !version.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Drop the cached listing so the next call rescans the root.
    pub fn invalidate(&self) {
        if let Ok(mut cached) = self.cached.lock() {
            *cached = None;
        }
    }
}

fn scan_dirs(root: &Path) -> Result<Vec<String>> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in std::fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !name.starts_with('.') {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}
