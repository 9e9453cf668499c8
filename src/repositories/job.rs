//! # Job Repository
//!
//! The single persisted job slot.

use std::sync::Arc;

use sea_orm::DatabaseConnection;

use super::state_store::{StateStore, StoreError, Versioned};
use crate::models::Job;

/// Key of the job slot.
pub const JOB_KEY: &str = "job.current";

/// Repository for the current job.
#[derive(Debug, Clone)]
pub struct JobRepository {
    store: StateStore,
}

impl JobRepository {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self {
            store: StateStore::new(db),
        }
    }

    /// Current job and the version it was read at.
    pub async fn load(&self) -> Result<Option<Versioned<Job>>, StoreError> {
        self.store.get(JOB_KEY).await
    }

    /// Store `job` as the current job, replacing any previous one.
    pub async fn replace(&self, job: &Job) -> Result<i64, StoreError> {
        self.store.put(JOB_KEY, job, None).await
    }

    /// Persist `job` if nobody else saved since `version` was read.
    pub async fn save(&self, job: &Job, version: i64) -> Result<i64, StoreError> {
        self.store.compare_and_set(JOB_KEY, version, job, None).await
    }
}
