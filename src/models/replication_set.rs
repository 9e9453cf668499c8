//! Replication set definitions.
//!
//! A replication set is a named, read-only description of one sync direction:
//! which tables move, which strings are rewritten on the way, and whether the
//! upload directory travels along.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::config::ConfigError;
use crate::replication::Substitutions;

/// Direction of a replication set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SetType {
    /// Copy the remote site into the local one
    Pull,
    /// Copy the local site into the remote one
    Push,
}

impl SetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SetType::Pull => "pull",
            SetType::Push => "push",
        }
    }
}

impl std::fmt::Display for SetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named configuration for one direction of sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationSet {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub set_type: SetType,
    /// Ordered table names; empty means every table.
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub search: Vec<String>,
    #[serde(default)]
    pub replace: Vec<String>,
    /// Tables eligible for search/replace; empty means every exported table.
    #[serde(default)]
    pub search_only_tables: Vec<String>,
    /// Rows of `*options` tables whose key starts with this prefix are not exported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_option_prefix: Option<String>,
    #[serde(default)]
    pub include_media: bool,
    #[serde(default = "default_media_chunk_mb")]
    pub media_chunk_mb: u32,
    #[serde(default = "default_temp_prefix")]
    pub temp_prefix: String,
    #[serde(default = "default_backup_prefix")]
    pub backup_prefix: String,
    #[serde(default = "default_auto_cleanup")]
    pub auto_cleanup: bool,
}

impl ReplicationSet {
    /// Create a set with default prefixes and media settings.
    pub fn new(id: impl Into<String>, name: impl Into<String>, set_type: SetType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            set_type,
            tables: Vec::new(),
            search: Vec::new(),
            replace: Vec::new(),
            search_only_tables: Vec::new(),
            exclude_option_prefix: None,
            include_media: false,
            media_chunk_mb: default_media_chunk_mb(),
            temp_prefix: default_temp_prefix(),
            backup_prefix: default_backup_prefix(),
            auto_cleanup: default_auto_cleanup(),
        }
    }

    /// Pairwise substitutions; unpaired entries are dropped.
    pub fn substitutions(&self) -> Substitutions {
        Substitutions::new(&self.search, &self.replace)
    }

    /// Validate the set's own invariants.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidReplicationSet {
            id: self.id.clone(),
            reason: reason.to_string(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("id must not be empty"));
        }
        if self.temp_prefix.is_empty() || self.backup_prefix.is_empty() {
            return Err(invalid("temp_prefix and backup_prefix must not be empty"));
        }
        if self.temp_prefix == self.backup_prefix {
            return Err(invalid("temp_prefix and backup_prefix must differ"));
        }
        if self.media_chunk_mb == 0 {
            return Err(invalid("media_chunk_mb must be positive"));
        }
        if self.tables.iter().any(|t| t.is_empty() || t.contains('`')) {
            return Err(invalid("table names must be non-empty and must not contain backticks"));
        }

        Ok(())
    }
}

fn default_media_chunk_mb() -> u32 {
    50
}

fn default_temp_prefix() -> String {
    "sstmp_".to_string()
}

fn default_backup_prefix() -> String {
    "ssbak_".to_string()
}

fn default_auto_cleanup() -> bool {
    true
}
