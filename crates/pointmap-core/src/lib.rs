//! Core of the BMS point mapper.
//!
//! Takes raw Building-Management-System point lists (`CHWRT`,
//! `AHU-1_SaTemp`, ...) and maps every point to a canonical EnOS path with a
//! confidence score, tracking the completion state of each device instance
//! and the progress of each submitted batch.
//!
//! ```text
//! raw points -> normalizer -> validator -> oracle adapter -> engine -> progress
//! ```
//!
//! Persistence and the oracle are collaborators behind the
//! [`MappingStore`] and [`MappingOracle`] traits.

pub mod config;
pub mod engine;
pub mod error;
pub mod model;
pub mod normalizer;
pub mod oracle;
pub mod progress;
pub mod store;
pub mod validator;

pub use config::MapperConfig;
pub use engine::{BatchHandle, MappingEngine};
pub use error::{MapperError, Result};
pub use model::{
    DeviceGroup, DeviceInstance, InstanceStatus, MappingRecord, RawPoint, ResolvedPoint, SourceId,
};
pub use oracle::{
    Candidate, ChainedOracle, MappingOracle, MappingRule, OracleAdapter, OracleError,
    OraclePoint, OracleRequest, OracleResponse, RuleOracle, StaticOracle,
};
#[cfg(feature = "http")]
pub use oracle::{HttpOracle, HttpOracleConfig};
pub use progress::{BatchStats, BatchStatus, BatchTracker, ProgressRegistry, TaskStatusReport};
pub use store::{MappingStore, MemoryStore};
pub use validator::{ValidationIssue, Validator};

/// Re-exports commonly used types.
pub mod prelude {
    pub use crate::config::{defaults, env_vars, MapperConfig};
    pub use crate::engine::{BatchHandle, MappingEngine};
    pub use crate::error::{MapperError, Result};
    pub use crate::model::{DeviceInstance, InstanceStatus, MappingRecord, RawPoint, SourceId};
    pub use crate::oracle::{Candidate, MappingOracle, OracleError, RuleOracle, StaticOracle};
    pub use crate::progress::{BatchStatus, TaskStatusReport};
    pub use crate::store::{MappingStore, MemoryStore};
}
