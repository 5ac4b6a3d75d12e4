pub mod config;
pub mod engine;
pub mod resolve;
pub mod store;
pub mod sun;
pub mod time;
pub mod topics;
pub mod types;
pub mod upload;
pub mod version;

/// Version written into freshly created artifacts when nothing is on disk.
pub const DEFAULT_ARTIFACT_VERSION: &str = "1.0.0";

pub use config::{Channel, Configuration, TimeWindow, ValidationErrors};
pub use engine::{AppliedDuty, DutyChange, ScheduleEngine};
pub use resolve::{resolve, ResolveError, ResolvedChannel};
pub use store::{ArtifactKind, ConfigError, ConfigStore, PersistError, Persister, StagedDocument};
pub use sun::{SunTimeTable, SunTimes};
pub use time::{ClockTime, TimeMarker};
pub use topics::*;
pub use types::{ChannelStatus, DutyChangePayload, SystemStatus};
pub use upload::{UploadError, UploadReceiver, UploadSession, DEFAULT_UPLOAD_CEILING};
pub use version::Version;
