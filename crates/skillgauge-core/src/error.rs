//! Error types for skillgauge core operations

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while loading the scenario catalog or skill manifest.
#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid YAML in {}: {source}", path.display())]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("domain file '{file}' is missing a file-level 'target_skill'")]
    MissingTargetSkill { file: String },

    #[error("skill '{name}' not found in manifest")]
    UnknownSkill { name: String },

    #[error("skill file not found: {}", path.display())]
    SkillFileMissing { path: PathBuf },
}

/// Errors for core library operations.
///
/// Request-time validation failures ([`CoreError::InvalidRequest`],
/// [`CoreError::UnknownDomains`]) are raised before a run exists; the
/// remaining variants surface defects on the persistence path.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Catalog(#[from] CatalogError),

    #[error("report persistence failed: {0}")]
    Persistence(#[from] std::io::Error),

    #[error("invalid run request: {0}")]
    InvalidRequest(String),

    #[error("unknown domains: {}", .0.join(", "))]
    UnknownDomains(Vec<String>),

    #[error("run '{0}' not found")]
    RunNotFound(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
