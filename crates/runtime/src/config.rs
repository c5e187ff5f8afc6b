//! VM options.
//!
//! Tunable knobs for a VM instance: the initial GC threshold, the GC
//! kill switch, instruction tracing, and the bytecode dump. Options
//! come from an optional TOML file and can be overridden with
//! environment variables (`CRISPY_GC_THRESHOLD`, `CRISPY_DISABLE_GC`).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::warn;

use crispy_core::INITIAL_GC_THRESHOLD;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct VmOptions {
    /// Bytes of live allocations before the first collection runs.
    pub gc_threshold: usize,
    /// Never collect. Useful when chasing GC bugs.
    pub disable_gc: bool,
    /// Print every executed instruction to stderr.
    pub trace_execution: bool,
    /// Print the disassembly of each compiled unit to stderr.
    pub dump_bytecode: bool,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            gc_threshold: INITIAL_GC_THRESHOLD,
            disable_gc: false,
            trace_execution: false,
            dump_bytecode: false,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read options file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("could not parse options file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl VmOptions {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Options from an optional file, with environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut options = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        options.apply_env();
        Ok(options)
    }

    pub fn apply_env(&mut self) {
        if let Ok(value) = std::env::var("CRISPY_GC_THRESHOLD") {
            match value.parse() {
                Ok(threshold) => self.gc_threshold = threshold,
                Err(_) => warn!("ignoring unparsable CRISPY_GC_THRESHOLD={value}"),
            }
        }
        if let Ok(value) = std::env::var("CRISPY_DISABLE_GC") {
            self.disable_gc = matches!(value.as_str(), "1" | "true" | "yes");
        }
    }
}
