//! # State Store
//!
//! Versioned key/value records in `sitesync_state`. Values are JSON text;
//! every compare-and-set bumps the version so concurrent writers detect each
//! other instead of silently overwriting.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, Set,
    sea_query::{Expr, OnConflict},
};
use serde::{Serialize, de::DeserializeOwned};
use thiserror::Error;

use crate::models::state_entry::{self, ActiveModel, Entity, Model};
use crate::replication::db_error_text;

/// Errors raised by the state store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("{0}")]
    Database(String),
    #[error("state entry '{key}' was modified concurrently")]
    Conflict { key: String },
    #[error("state entry '{key}' could not be (de)serialized: {message}")]
    Serde { key: String, message: String },
}

impl From<sea_orm::DbErr> for StoreError {
    fn from(error: sea_orm::DbErr) -> Self {
        StoreError::Database(db_error_text(&error))
    }
}

/// A decoded value and the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub value: T,
    pub version: i64,
}

/// Repository over the `sitesync_state` table.
#[derive(Debug, Clone)]
pub struct StateStore {
    db: Arc<DatabaseConnection>,
}

impl StateStore {
    pub fn new(db: Arc<DatabaseConnection>) -> Self {
        Self { db }
    }

    fn encode<T: Serialize>(key: &str, value: &T) -> Result<String, StoreError> {
        serde_json::to_string(value).map_err(|err| StoreError::Serde {
            key: key.to_string(),
            message: err.to_string(),
        })
    }

    fn expiry(ttl: Option<Duration>) -> Option<chrono::DateTime<Utc>> {
        ttl.and_then(|ttl| chrono::Duration::from_std(ttl).ok())
            .map(|ttl| Utc::now() + ttl)
    }

    /// Raw record, ignoring expired entries.
    pub async fn get_entry(&self, key: &str) -> Result<Option<Model>, StoreError> {
        let entry = Entity::find_by_id(key.to_string()).one(&*self.db).await?;
        Ok(entry.filter(|entry| !entry.is_expired(Utc::now())))
    }

    /// Decoded value and version; expired entries read as absent.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<Versioned<T>>, StoreError> {
        let Some(entry) = self.get_entry(key).await? else {
            return Ok(None);
        };
        let value = serde_json::from_str(&entry.value).map_err(|err| StoreError::Serde {
            key: key.to_string(),
            message: err.to_string(),
        })?;
        Ok(Some(Versioned {
            value,
            version: entry.version,
        }))
    }

    /// Overwrite `key` unconditionally. A new key starts at version 1; an
    /// existing key keeps counting up so readers of the old value cannot
    /// compare-and-set over the new one. Returns the stored version.
    pub async fn put<T: Serialize>(
        &self,
        key: &str,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let record = ActiveModel {
            key: Set(key.to_string()),
            value: Set(Self::encode(key, value)?),
            version: Set(1),
            expires_at: Set(Self::expiry(ttl)),
            updated_at: Set(Utc::now()),
        };

        Entity::insert(record)
            .on_conflict(
                OnConflict::column(state_entry::Column::Key)
                    .update_columns([
                        state_entry::Column::Value,
                        state_entry::Column::ExpiresAt,
                        state_entry::Column::UpdatedAt,
                    ])
                    .value(
                        state_entry::Column::Version,
                        Expr::col(state_entry::Column::Version).add(1),
                    )
                    .to_owned(),
            )
            .exec_without_returning(&*self.db)
            .await?;

        let stored = Entity::find_by_id(key.to_string()).one(&*self.db).await?;
        Ok(stored.map(|entry| entry.version).unwrap_or(1))
    }

    /// Replace `key` only if it is still at `expected_version`.
    /// Returns the new version.
    pub async fn compare_and_set<T: Serialize>(
        &self,
        key: &str,
        expected_version: i64,
        value: &T,
        ttl: Option<Duration>,
    ) -> Result<i64, StoreError> {
        let next_version = expected_version + 1;
        let result = Entity::update_many()
            .col_expr(state_entry::Column::Value, Expr::value(Self::encode(key, value)?))
            .col_expr(state_entry::Column::Version, Expr::value(next_version))
            .col_expr(state_entry::Column::ExpiresAt, Expr::value(Self::expiry(ttl)))
            .col_expr(state_entry::Column::UpdatedAt, Expr::value(Utc::now()))
            .filter(state_entry::Column::Key.eq(key))
            .filter(state_entry::Column::Version.eq(expected_version))
            .exec(&*self.db)
            .await?;

        if result.rows_affected == 0 {
            tracing::warn!(key = %key, expected_version, "Compare-and-set lost a race");
            return Err(StoreError::Conflict {
                key: key.to_string(),
            });
        }
        Ok(next_version)
    }

    /// Delete `key`. Returns whether a record existed.
    pub async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let result = Entity::delete_by_id(key.to_string())
            .exec(&*self.db)
            .await?;
        Ok(result.rows_affected > 0)
    }

    /// Remove expired records under `prefix` and return them.
    pub async fn purge_expired(&self, prefix: &str) -> Result<Vec<Model>, StoreError> {
        let now = Utc::now();
        let expired = Entity::find()
            .filter(state_entry::Column::Key.starts_with(prefix))
            .filter(state_entry::Column::ExpiresAt.lte(now))
            .all(&*self.db)
            .await?;

        if !expired.is_empty() {
            Entity::delete_many()
                .filter(state_entry::Column::Key.is_in(expired.iter().map(|e| e.key.clone())))
                .exec(&*self.db)
                .await?;
            tracing::debug!(prefix = %prefix, purged = expired.len(), "Purged expired state entries");
        }

        Ok(expired)
    }
}
