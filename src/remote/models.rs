//! Wire types of the agent protocol, shared by the client and the agent handlers.

use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::models::ReplicationSet;

/// Generic `{success, message}` reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct OperationResponse {
    pub success: bool,
    #[serde(default)]
    pub message: String,
}

impl OperationResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

/// `GET /status`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct StatusResponse {
    pub success: bool,
    pub service: String,
    pub version: String,
    /// Whether the maintenance marker is present on the agent's site
    pub maintenance: bool,
}

/// `POST /replication/export`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExportRequest {
    #[serde(default)]
    pub set_name: String,
    /// Empty means every table
    #[serde(default)]
    pub tables: Vec<String>,
    #[serde(default)]
    pub search: Vec<String>,
    #[serde(default)]
    pub replace: Vec<String>,
    #[serde(default)]
    pub search_only_tables: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exclude_option_prefix: Option<String>,
    /// Table prefixes left out of an "all tables" export
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub skip_prefixes: Vec<String>,
}

impl ExportRequest {
    /// Export envelope carrying the set's tables and substitutions.
    pub fn for_set(set: &ReplicationSet) -> Self {
        Self {
            set_name: set.id.clone(),
            tables: set.tables.clone(),
            search: set.search.clone(),
            replace: set.replace.clone(),
            search_only_tables: set.search_only_tables.clone(),
            exclude_option_prefix: set.exclude_option_prefix.clone(),
            skip_prefixes: vec![set.temp_prefix.clone(), set.backup_prefix.clone()],
        }
    }

    /// Verbatim snapshot of the set's tables, with no substitution.
    pub fn backup_of(set: &ReplicationSet) -> Self {
        Self {
            set_name: set.id.clone(),
            tables: set.tables.clone(),
            skip_prefixes: vec![set.temp_prefix.clone(), set.backup_prefix.clone()],
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ExportResponse {
    pub success: bool,
    pub download_token: String,
    /// Dump size in bytes
    pub size: u64,
}

/// `POST /replication/import`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct ImportRequest {
    #[serde(default)]
    pub set_name: String,
    #[serde(default)]
    pub tables: Vec<String>,
    pub sql: String,
    /// `base64` or absent for raw SQL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encoding: Option<String>,
    #[serde(default)]
    pub skip_rename: bool,
    #[serde(default)]
    pub temp_prefix: String,
}

/// `POST /media/export`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MediaExportRequest {
    pub max_mb: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MediaExportResponse {
    pub success: bool,
    pub token: String,
    pub parts: u32,
}

/// `POST /maintenance`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

/// `POST /replication/swap` and `POST /replication/cleanup`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct SwapRequest {
    /// Empty means every table with a staged (or, for cleanup, any leftover) copy
    #[serde(default)]
    pub tables: Vec<String>,
    pub temp_prefix: String,
    pub backup_prefix: String,
    /// Also swap (or clean up) the staged upload directory
    #[serde(default)]
    pub swap_uploads: bool,
    /// Upload directory suffix chosen by the caller
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
}

/// `GET /replication/download`
#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
pub struct DownloadQuery {
    pub token: String,
}

/// `GET /media/download`
#[derive(Debug, Clone, Serialize, Deserialize, IntoParams)]
pub struct MediaPartQuery {
    pub token: String,
    /// 1-based part index
    pub part: u32,
}

/// `POST /media/import`
#[derive(Debug, Clone, Default, Serialize, Deserialize, IntoParams)]
pub struct MediaImportQuery {
    /// Batch token of the uploaded part, used for logging only
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub part: Option<u32>,
    /// Upload directory suffix; the part is extracted into `upload_tmp[_<suffix>]`
    #[serde(default)]
    pub suffix: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::SetType;

    #[test]
    fn export_envelope_carries_substitutions() {
        let mut set = ReplicationSet::new("prod", "Prod", SetType::Pull);
        set.tables = vec!["wp_posts".into()];
        set.search = vec!["http://old.local".into()];
        set.replace = vec!["https://prod.example".into()];

        let request = ExportRequest::for_set(&set);
        assert_eq!(request.set_name, "prod");
        assert_eq!(request.search, set.search);
        assert_eq!(request.skip_prefixes, vec!["sstmp_", "ssbak_"]);

        let backup = ExportRequest::backup_of(&set);
        assert!(backup.search.is_empty());
        assert_eq!(backup.tables, set.tables);
    }

    #[test]
    fn import_request_defaults() {
        let request: ImportRequest = serde_json::from_str(r#"{"sql":"SELECT 1;"}"#).unwrap();
        assert!(!request.skip_rename);
        assert!(request.temp_prefix.is_empty());
        assert!(request.encoding.is_none());
    }
}
