//! # Table and Directory Swap
//!
//! Moves staged resources into place and removes leftovers:
//!
//! - tables: `<temp_prefix><table>` becomes `<table>`, the previous live table
//!   is kept as `<backup_prefix><table>`
//! - uploads: `upload_tmp[_<suffix>]` becomes the live directory, the previous
//!   one is kept as `upload_bak[_<suffix>]`
//! - the maintenance marker file
//!
//! Swaps are sequences of independent drop/rename operations. They are not
//! atomic: a crash between two operations can leave a table or directory
//! missing until the next successful swap or a manual restore from the backup
//! copy.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::replication::{ReplicationError, SqlAccessor};

/// Staged upload directory name, before the optional suffix.
pub const UPLOAD_TMP_DIR: &str = "upload_tmp";
/// Backed-up upload directory name, before the optional suffix.
pub const UPLOAD_BAK_DIR: &str = "upload_bak";

/// Errors raised while swapping or cleaning up staged resources.
#[derive(Debug, Error)]
pub enum SwapError {
    #[error("{0}")]
    Database(String),
    #[error("staged upload directory {} does not exist", .0.display())]
    MissingStaging(PathBuf),
    #[error("{context}: {source}")]
    Io {
        context: String,
        source: std::io::Error,
    },
    #[error("filesystem task failed: {0}")]
    Task(String),
}

impl From<ReplicationError> for SwapError {
    fn from(error: ReplicationError) -> Self {
        SwapError::Database(error.to_string())
    }
}

impl SwapError {
    fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        SwapError::Io {
            context: context.into(),
            source,
        }
    }
}

/// Tables that currently have a staged counterpart.
pub async fn staged_tables<A>(db: &A, temp_prefix: &str) -> Result<Vec<String>, SwapError>
where
    A: SqlAccessor + ?Sized,
{
    if temp_prefix.is_empty() {
        return Ok(Vec::new());
    }
    Ok(db
        .list_tables()
        .await?
        .into_iter()
        .filter_map(|name| name.strip_prefix(temp_prefix).map(str::to_string))
        .filter(|name| !name.is_empty())
        .collect())
}

/// Swap staged tables into place.
///
/// For each table with a staged copy: drop the old backup, rename the live
/// table to the backup name (when it exists), then rename the staged table to
/// the live name. Tables without a staged copy are left untouched. An empty
/// `tables` list means every table that currently has a staged copy.
/// Returns the tables that were swapped.
pub async fn swap_tables<A>(
    db: &A,
    tables: &[String],
    temp_prefix: &str,
    backup_prefix: &str,
) -> Result<Vec<String>, SwapError>
where
    A: SqlAccessor + ?Sized,
{
    let dialect = db.dialect();
    let tables = if tables.is_empty() {
        staged_tables(db, temp_prefix).await?
    } else {
        tables.to_vec()
    };

    let mut swapped = Vec::new();
    for table in tables {
        let staged = format!("{temp_prefix}{table}");
        if !db.table_exists(&staged).await? {
            tracing::debug!(table = %table, "No staged table; leaving live table untouched");
            continue;
        }

        let backup = format!("{backup_prefix}{table}");
        db.execute(&dialect.drop_table_sql(&backup)).await?;
        if db.table_exists(&table).await? {
            db.execute(&dialect.rename_table_sql(&table, &backup)).await?;
        }
        db.execute(&dialect.rename_table_sql(&staged, &table)).await?;

        tracing::info!(table = %table, backup = %backup, "Swapped staged table into place");
        swapped.push(table);
    }

    Ok(swapped)
}

/// Drop leftover staged and backup tables. Safe to call repeatedly.
///
/// An empty `tables` list means every table carrying either prefix.
/// Returns the number of drop statements issued.
pub async fn cleanup_tables<A>(
    db: &A,
    tables: &[String],
    temp_prefix: &str,
    backup_prefix: &str,
) -> Result<usize, SwapError>
where
    A: SqlAccessor + ?Sized,
{
    let dialect = db.dialect();
    let targets: Vec<String> = if tables.is_empty() {
        db.list_tables()
            .await?
            .into_iter()
            .filter(|name| {
                (!temp_prefix.is_empty() && name.starts_with(temp_prefix))
                    || (!backup_prefix.is_empty() && name.starts_with(backup_prefix))
            })
            .collect()
    } else {
        tables
            .iter()
            .flat_map(|table| {
                [
                    format!("{temp_prefix}{table}"),
                    format!("{backup_prefix}{table}"),
                ]
            })
            .collect()
    };

    for target in &targets {
        db.execute(&dialect.drop_table_sql(target)).await?;
    }

    tracing::info!(dropped = targets.len(), "Cleaned up staged and backup tables");
    Ok(targets.len())
}

/// Staged and backup directories for a live upload directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadDirs {
    pub tmp: PathBuf,
    pub bak: PathBuf,
}

/// Sibling staging/backup directories for `live`, optionally suffixed.
///
/// Only ASCII alphanumerics, `-` and `_` of the suffix are kept so a
/// caller-supplied suffix can never escape the parent directory.
pub fn upload_dirs(live: &Path, suffix: Option<&str>) -> UploadDirs {
    let parent = live
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let suffix: String = suffix
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();
    let name = |base: &str| {
        if suffix.is_empty() {
            base.to_string()
        } else {
            format!("{base}_{suffix}")
        }
    };

    UploadDirs {
        tmp: parent.join(name(UPLOAD_TMP_DIR)),
        bak: parent.join(name(UPLOAD_BAK_DIR)),
    }
}

/// Replace `live` with `tmp`, keeping the previous contents in `bak`.
pub async fn swap_uploads(tmp: &Path, bak: &Path, live: &Path) -> Result<(), SwapError> {
    let (tmp, bak, live) = (tmp.to_path_buf(), bak.to_path_buf(), live.to_path_buf());
    tokio::task::spawn_blocking(move || swap_uploads_blocking(&tmp, &bak, &live))
        .await
        .map_err(|err| SwapError::Task(err.to_string()))?
}

fn swap_uploads_blocking(tmp: &Path, bak: &Path, live: &Path) -> Result<(), SwapError> {
    if !tmp.is_dir() {
        return Err(SwapError::MissingStaging(tmp.to_path_buf()));
    }
    remove_dir_if_present(bak)?;
    if live.exists() {
        std::fs::rename(live, bak)
            .map_err(|err| SwapError::io(format!("moving {} aside", live.display()), err))?;
    }
    std::fs::rename(tmp, live)
        .map_err(|err| SwapError::io(format!("moving {} into place", tmp.display()), err))?;

    tracing::info!(live = %live.display(), backup = %bak.display(), "Swapped staged uploads into place");
    Ok(())
}

/// Remove the staged and backup upload directories if present.
pub async fn cleanup_uploads(tmp: &Path, bak: &Path) -> Result<(), SwapError> {
    let (tmp, bak) = (tmp.to_path_buf(), bak.to_path_buf());
    tokio::task::spawn_blocking(move || {
        remove_dir_if_present(&tmp)?;
        remove_dir_if_present(&bak)
    })
    .await
    .map_err(|err| SwapError::Task(err.to_string()))?
}

fn remove_dir_if_present(path: &Path) -> Result<(), SwapError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(SwapError::io(format!("removing {}", path.display()), err)),
    }
}

/// Write or remove the maintenance marker. The marker holds the Unix
/// timestamp at which maintenance started.
pub async fn set_maintenance(marker: &Path, enabled: bool) -> Result<(), SwapError> {
    if enabled {
        if let Some(parent) = marker.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| SwapError::io(format!("creating {}", parent.display()), err))?;
        }
        let stamp = chrono::Utc::now().timestamp().to_string();
        tokio::fs::write(marker, stamp)
            .await
            .map_err(|err| SwapError::io(format!("writing {}", marker.display()), err))?;
        tracing::info!(marker = %marker.display(), "Maintenance mode enabled");
    } else {
        match tokio::fs::remove_file(marker).await {
            Ok(()) => tracing::info!(marker = %marker.display(), "Maintenance mode disabled"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                return Err(SwapError::io(format!("removing {}", marker.display()), err));
            }
        }
    }
    Ok(())
}

/// Whether the maintenance marker is present.
pub async fn maintenance_enabled(marker: &Path) -> bool {
    tokio::fs::try_exists(marker).await.unwrap_or(false)
}
