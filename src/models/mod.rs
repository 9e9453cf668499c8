//! # Data Models
//!
//! Replication sets, the persisted job record, and the SeaORM entity backing
//! the key/value state table.

use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

pub mod job;
pub mod replication_set;
pub mod state_entry;

pub use job::{Job, JobContext, JobStatus, PullContext, PushContext, Step, StepOutcome};
pub use replication_set::{ReplicationSet, SetType};
pub use state_entry::Entity as StateEntry;

/// Basic service information response
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ServiceInfo {
    /// The name of the service
    pub service: String,
    /// The version of the service
    pub version: String,
}

impl Default for ServiceInfo {
    fn default() -> Self {
        Self {
            service: "sitesync".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Generate a lowercase alphanumeric token used for job ids, artifact tokens
/// and archive batch names.
pub fn random_token(len: usize) -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(|c| char::from(c).to_ascii_lowercase())
        .collect()
}
