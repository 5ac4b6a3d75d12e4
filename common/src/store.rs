use std::fmt;
use std::sync::Arc;

use serde_json::error::Category;

use crate::config::Configuration;
use crate::sun::SunTimeTable;
use crate::version::Version;

/// The two uploadable artifacts the store manages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Config,
    SunTimes,
}

impl ArtifactKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Config => "configuration",
            Self::SunTimes => "sun-time table",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct PersistError(pub String);

/// Durable storage seam. Called during commit, before the in-memory swap;
/// a failure leaves the previously active document in place.
pub trait Persister {
    fn persist(&mut self, kind: ArtifactKind, bytes: &[u8]) -> Result<(), PersistError>;
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("malformed JSON: {0}")]
    Parse(String),
    #[error("missing or unparseable version: {0:?}")]
    Version(String),
    #[error("incompatible version {staged}: active document is {active} and major.minor must match")]
    IncompatibleVersion { active: Version, staged: Version },
    #[error("active {0} has no valid version; all uploads are blocked until it is repaired out of band")]
    ConfigCorrupt(ArtifactKind),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("persist failed: {0}")]
    Persist(#[from] PersistError),
}

#[derive(Debug, Clone, PartialEq)]
enum StagedArtifact {
    Config(Configuration),
    SunTimes(SunTimeTable),
}

/// A parsed, version-gated, validated candidate awaiting commit.
#[derive(Debug, Clone, PartialEq)]
pub struct StagedDocument {
    kind: ArtifactKind,
    artifact: StagedArtifact,
}

impl StagedDocument {
    pub fn kind(&self) -> ArtifactKind {
        self.kind
    }
}

/// Exclusive owner of the active configuration and sun-time table.
///
/// Readers take `Arc` snapshots; the only way a new document becomes active
/// is a successful `commit`, which persists first and swaps second, so a
/// persist failure never leaves a half-applied document behind.
#[derive(Debug)]
pub struct ConfigStore<P> {
    active: Arc<Configuration>,
    sun: Arc<SunTimeTable>,
    persister: P,
}

impl<P: Persister> ConfigStore<P> {
    pub fn new(config: Configuration, sun: SunTimeTable, persister: P) -> Self {
        Self {
            active: Arc::new(config),
            sun: Arc::new(sun),
            persister,
        }
    }

    /// Snapshot of the active configuration. Immutable once handed out;
    /// commits produce a new instance rather than mutating in place.
    pub fn active(&self) -> Arc<Configuration> {
        Arc::clone(&self.active)
    }

    pub fn sun_times(&self) -> Arc<SunTimeTable> {
        Arc::clone(&self.sun)
    }

    /// Parses and validates an uploaded byte buffer as a staging candidate.
    ///
    /// The gate is fail-closed: while the active counterpart document's own
    /// version is unparseable, every upload of that kind is rejected with
    /// `ConfigCorrupt` regardless of payload.
    pub fn stage(&self, bytes: &[u8], kind: ArtifactKind) -> Result<StagedDocument, ConfigError> {
        let active = self.active_version(kind)?;

        let artifact = match kind {
            ArtifactKind::Config => {
                let mut config: Configuration =
                    serde_json::from_slice(bytes).map_err(classify_json_error)?;
                check_version_gate(active, &config.version)?;
                config
                    .validate()
                    .map_err(|err| ConfigError::Validation(err.to_string()))?;
                StagedArtifact::Config(config)
            }
            ArtifactKind::SunTimes => {
                let table: SunTimeTable =
                    serde_json::from_slice(bytes).map_err(classify_json_error)?;
                check_version_gate(active, &table.version)?;
                StagedArtifact::SunTimes(table)
            }
        };

        Ok(StagedDocument { kind, artifact })
    }

    /// Atomically adopts a staged document: persist the normalized form,
    /// then swap it in. On `PersistError` the old document stays active.
    pub fn commit(&mut self, staged: StagedDocument) -> Result<(), ConfigError> {
        let bytes = match &staged.artifact {
            StagedArtifact::Config(config) => serde_json::to_vec_pretty(config),
            StagedArtifact::SunTimes(table) => serde_json::to_vec_pretty(table),
        }
        .map_err(|err| PersistError(err.to_string()))?;

        self.persister.persist(staged.kind, &bytes)?;

        match staged.artifact {
            StagedArtifact::Config(config) => self.active = Arc::new(config),
            StagedArtifact::SunTimes(table) => self.sun = Arc::new(table),
        }
        Ok(())
    }

    fn active_version(&self, kind: ArtifactKind) -> Result<Version, ConfigError> {
        let raw = match kind {
            ArtifactKind::Config => &self.active.version,
            ArtifactKind::SunTimes => &self.sun.version,
        };
        raw.parse().map_err(|_| ConfigError::ConfigCorrupt(kind))
    }
}

fn check_version_gate(active: Version, staged_raw: &str) -> Result<(), ConfigError> {
    let staged: Version = staged_raw
        .parse()
        .map_err(|_| ConfigError::Version(staged_raw.to_string()))?;
    if !active.compatible_with(staged) {
        return Err(ConfigError::IncompatibleVersion { active, staged });
    }
    Ok(())
}

fn classify_json_error(err: serde_json::Error) -> ConfigError {
    match err.classify() {
        Category::Data => ConfigError::Validation(err.to_string()),
        Category::Syntax | Category::Eof | Category::Io => ConfigError::Parse(err.to_string()),
    }
}
