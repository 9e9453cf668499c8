//! # Artifact Repository
//!
//! Token-keyed, expiring records of files the agent staged for download: one
//! SQL dump or an ordered list of archive parts.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};

use super::state_store::{StateStore, StoreError};
use crate::models::random_token;

const ARTIFACT_PREFIX: &str = "artifact.";

/// A staged file set.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Artifact {
    Sql { path: PathBuf, size: u64 },
    Media { archives: Vec<PathBuf> },
}

impl Artifact {
    pub fn files(&self) -> Vec<&Path> {
        match self {
            Artifact::Sql { path, .. } => vec![path.as_path()],
            Artifact::Media { archives } => archives.iter().map(PathBuf::as_path).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArtifactRepository {
    store: StateStore,
    ttl: Duration,
}

fn key(token: &str) -> String {
    format!("{ARTIFACT_PREFIX}{token}")
}

impl ArtifactRepository {
    pub fn new(db: Arc<DatabaseConnection>, ttl: Duration) -> Self {
        Self {
            store: StateStore::new(db),
            ttl,
        }
    }

    /// Record `artifact` under a fresh token.
    pub async fn stage(&self, artifact: &Artifact) -> Result<String, StoreError> {
        let token = random_token(32);
        self.stage_with_token(&token, artifact).await?;
        Ok(token)
    }

    /// Record `artifact` under a caller-chosen token.
    pub async fn stage_with_token(&self, token: &str, artifact: &Artifact) -> Result<(), StoreError> {
        self.store.put(&key(token), artifact, Some(self.ttl)).await?;
        tracing::debug!(token = %token, files = artifact.files().len(), "Staged artifact");
        Ok(())
    }

    /// Live artifact for `token`; unknown and expired tokens read as `None`.
    pub async fn get(&self, token: &str) -> Result<Option<Artifact>, StoreError> {
        Ok(self.store.get(&key(token)).await?.map(|v| v.value))
    }

    /// Forget `token` and delete its files.
    pub async fn consume(&self, token: &str) -> Result<(), StoreError> {
        if let Some(artifact) = self.get(token).await? {
            remove_files(&artifact).await;
        }
        self.store.delete(&key(token)).await?;
        Ok(())
    }

    /// Forget `token` without touching its files.
    pub async fn forget(&self, token: &str) -> Result<(), StoreError> {
        self.store.delete(&key(token)).await?;
        Ok(())
    }

    /// Drop expired artifacts and their files. Returns how many were purged.
    pub async fn purge_expired(&self) -> Result<usize, StoreError> {
        let expired = self.store.purge_expired(ARTIFACT_PREFIX).await?;
        for entry in &expired {
            match serde_json::from_str::<Artifact>(&entry.value) {
                Ok(artifact) => remove_files(&artifact).await,
                Err(err) => tracing::warn!(key = %entry.key, error = %err, "Unreadable expired artifact"),
            }
        }
        Ok(expired.len())
    }
}

async fn remove_files(artifact: &Artifact) {
    for file in artifact.files() {
        match tokio::fs::remove_file(file).await {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %file.display(), error = %err, "Failed to remove artifact file");
            }
        }
    }
}
