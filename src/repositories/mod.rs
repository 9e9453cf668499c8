//! # Repository Layer
//!
//! Persistence over the `sitesync_state` key/value table: the job slot and
//! the agent's staged artifacts.

pub mod artifact;
pub mod job;
pub mod state_store;

pub use artifact::{Artifact, ArtifactRepository};
pub use job::JobRepository;
pub use state_store::{StateStore, StoreError, Versioned};
