//! Pull and push step implementations.
//!
//! Local steps call the replication engine, archiver and swap component
//! directly; remote steps go through the signed [`RemoteClient`].

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose};
use metrics::counter;
use tracing::{debug, info};

use super::StepRunner;
use crate::config::AppConfig;
use crate::error::SyncError;
use crate::media;
use crate::models::{Job, JobContext, PullContext, PushContext, SetType, Step, StepOutcome};
use crate::remote::{ExportRequest, ImportRequest, RemoteClient, SwapRequest};
use crate::replication::{self, ExportOptions, ImportOptions, SiteDatabase};
use crate::swap::{self, UploadDirs, upload_dirs};

/// Runs every pull and push step against the local site and the configured remote.
pub struct SyncStepRunner {
    config: Arc<AppConfig>,
    site: SiteDatabase,
    remote: Option<RemoteClient>,
}

impl SyncStepRunner {
    /// Build a runner. Missing remote settings are reported when a remote
    /// step runs, not here.
    pub fn new(config: Arc<AppConfig>, site: SiteDatabase) -> Result<Self, SyncError> {
        let remote = match config.remote.require() {
            Ok(settings) => Some(RemoteClient::new(settings)?),
            Err(err) => {
                debug!(error = %err, "Remote agent not configured");
                None
            }
        };
        Ok(Self {
            config,
            site,
            remote,
        })
    }

    fn remote(&self) -> Result<&RemoteClient, SyncError> {
        match &self.remote {
            Some(client) => Ok(client),
            None => {
                // Surface the precise configuration problem.
                self.config.remote.require()?;
                Err(SyncError::Configuration(
                    "remote agent is not configured".to_string(),
                ))
            }
        }
    }

    fn staging_file(&self, name: &str) -> PathBuf {
        self.config.staging_dir.join(name)
    }

    fn upload_dirs(&self, job: &Job) -> UploadDirs {
        upload_dirs(&self.config.uploads_dir, Some(job.upload_suffix()))
    }

    fn swap_request(&self, job: &Job, media_parts: u32) -> SwapRequest {
        SwapRequest {
            tables: job.set.tables.clone(),
            temp_prefix: job.set.temp_prefix.clone(),
            backup_prefix: job.set.backup_prefix.clone(),
            swap_uploads: media_parts > 0,
            suffix: Some(job.upload_suffix().to_string()),
        }
    }

    async fn run_pull(&self, job: &mut Job, step: Step) -> Result<StepOutcome, SyncError> {
        let mut ctx = pull_context(job)?.clone();
        let outcome = match step {
            Step::MaintenanceOnLocal => {
                swap::set_maintenance(&self.config.maintenance_file, true).await?;
                StepOutcome::Advance("Maintenance mode enabled locally".to_string())
            }
            Step::DbExportRemote => {
                let response = self
                    .remote()?
                    .export_database(&ExportRequest::for_set(&job.set))
                    .await?;
                ctx.db_token = Some(response.download_token);
                StepOutcome::Advance(format!("Remote database exported ({} bytes)", response.size))
            }
            Step::DbDownloadRemote => {
                let token = ctx
                    .db_token
                    .clone()
                    .ok_or_else(|| SyncError::State("no database download token".to_string()))?;
                let dest = self.staging_file(&format!("{}_pull.sql", job.id));
                let size = self.remote()?.download_database(&token, &dest).await?;
                if job.dry_run {
                    remove_staging_file(&dest).await;
                    StepOutcome::Advance(format!("Downloaded database dump ({size} bytes, dry run, discarded)"))
                } else {
                    ctx.db_file = Some(dest);
                    StepOutcome::Advance(format!("Downloaded database dump ({size} bytes)"))
                }
            }
            Step::DbImportLocal => {
                let path = ctx
                    .db_file
                    .take()
                    .ok_or_else(|| SyncError::State("no downloaded database dump".to_string()))?;
                let script = tokio::fs::read_to_string(&path).await?;
                let options = ImportOptions {
                    tables: job.set.tables.clone(),
                    temp_prefix: job.set.temp_prefix.clone(),
                    skip_rename: true,
                };
                let result = replication::import(&self.site, &script, &options).await;
                remove_staging_file(&path).await;
                let imported = result?;
                StepOutcome::Advance(format!(
                    "Imported {} statements into {} staged tables",
                    imported.statements,
                    imported.staged_tables.len()
                ))
            }
            Step::MediaExportRemote => {
                if !job.set.include_media {
                    ctx.media_parts = 0;
                    StepOutcome::Advance("Media not included in this set".to_string())
                } else {
                    let response = self.remote()?.export_media(job.set.media_chunk_mb).await?;
                    ctx.media_token = Some(response.token);
                    ctx.media_parts = response.parts;
                    ctx.media_part = 1;
                    StepOutcome::Advance(format!("Remote media archived into {} parts", response.parts))
                }
            }
            Step::MediaDownloadRemote => self.download_media_part(job, &mut ctx).await?,
            Step::SwapLocal => {
                let swapped = swap::swap_tables(
                    &self.site,
                    &job.set.tables,
                    &job.set.temp_prefix,
                    &job.set.backup_prefix,
                )
                .await?;
                if ctx.media_parts > 0 {
                    let dirs = self.upload_dirs(job);
                    swap::swap_uploads(&dirs.tmp, &dirs.bak, &self.config.uploads_dir).await?;
                    StepOutcome::Advance(format!("Swapped {} tables and uploads", swapped.len()))
                } else {
                    StepOutcome::Advance(format!("Swapped {} tables", swapped.len()))
                }
            }
            Step::CleanupLocal => {
                if !job.set.auto_cleanup {
                    StepOutcome::Advance("Cleanup skipped (auto cleanup disabled)".to_string())
                } else {
                    let dropped = swap::cleanup_tables(
                        &self.site,
                        &job.set.tables,
                        &job.set.temp_prefix,
                        &job.set.backup_prefix,
                    )
                    .await?;
                    if ctx.media_parts > 0 {
                        let dirs = self.upload_dirs(job);
                        swap::cleanup_uploads(&dirs.tmp, &dirs.bak).await?;
                    }
                    StepOutcome::Advance(format!("Cleaned up ({dropped} drop statements)"))
                }
            }
            Step::MaintenanceOffLocal => {
                swap::set_maintenance(&self.config.maintenance_file, false).await?;
                StepOutcome::Advance("Maintenance mode disabled locally".to_string())
            }
            other => return Err(wrong_direction(other, SetType::Pull)),
        };

        job.context = JobContext::Pull(ctx);
        Ok(outcome)
    }

    /// One part per tick while parts remain; the tick after the last part advances.
    async fn download_media_part(
        &self,
        job: &Job,
        ctx: &mut PullContext,
    ) -> Result<StepOutcome, SyncError> {
        let token = match ctx.media_token.clone() {
            Some(token) if ctx.media_parts > 0 => token,
            _ => return Ok(StepOutcome::Advance("No media to download".to_string())),
        };
        let part = ctx.media_part.max(1);
        if part > ctx.media_parts {
            return Ok(StepOutcome::Advance(format!(
                "Downloaded all {} media parts",
                ctx.media_parts
            )));
        }

        let archive = self.staging_file(&format!("{token}_part{part}.zip"));
        let size = self.remote()?.download_media(&token, part, &archive).await?;
        if !job.dry_run {
            let extracted = media::extract_archive(&archive, &self.upload_dirs(job).tmp).await;
            remove_staging_file(&archive).await;
            extracted?;
        } else {
            remove_staging_file(&archive).await;
        }

        ctx.media_part = part + 1;
        counter!("sitesync_media_parts_transferred_total", "direction" => "download").increment(1);
        info!(job_id = %job.id, part, parts = ctx.media_parts, size, "Downloaded media part");
        Ok(StepOutcome::Repeat {
            message: format!("Downloaded media part {part} of {}", ctx.media_parts),
            fraction: f64::from(part) / f64::from(ctx.media_parts),
        })
    }

    async fn run_push(&self, job: &mut Job, step: Step) -> Result<StepOutcome, SyncError> {
        let mut ctx = push_context(job)?.clone();
        let outcome = match step {
            Step::PrePullBackup => {
                let remote = self.remote()?;
                let response = remote
                    .export_database(&ExportRequest::backup_of(&job.set))
                    .await?;
                let dest = self.config.backup_dir.join(format!(
                    "{}_{}_{}.sql",
                    job.set.id,
                    chrono::Utc::now().format("%Y%m%d%H%M%S"),
                    job.id
                ));
                let size = remote
                    .download_database(&response.download_token, &dest)
                    .await?;
                let message = format!("Backed up remote database to {} ({size} bytes)", dest.display());
                ctx.backup_file = Some(dest);
                StepOutcome::Advance(message)
            }
            Step::MaintenanceOnRemote => {
                self.remote()?.set_maintenance(true).await?;
                StepOutcome::Advance("Maintenance mode enabled on remote".to_string())
            }
            Step::DbExportLocal => {
                let script = replication::export(&self.site, &ExportOptions::for_set(&job.set)).await?;
                if job.dry_run {
                    StepOutcome::Advance(format!(
                        "Exported local database ({} bytes, dry run, discarded)",
                        script.len()
                    ))
                } else {
                    let dest = self.staging_file(&format!("{}_push.sql", job.id));
                    tokio::fs::create_dir_all(&self.config.staging_dir).await?;
                    tokio::fs::write(&dest, script.as_bytes()).await?;
                    ctx.db_file = Some(dest);
                    StepOutcome::Advance(format!("Exported local database ({} bytes)", script.len()))
                }
            }
            Step::DbImportRemote => {
                let path = ctx
                    .db_file
                    .take()
                    .ok_or_else(|| SyncError::State("no exported database dump".to_string()))?;
                let script = tokio::fs::read(&path).await?;
                let request = ImportRequest {
                    set_name: job.set.id.clone(),
                    tables: job.set.tables.clone(),
                    sql: general_purpose::STANDARD.encode(&script),
                    encoding: Some("base64".to_string()),
                    skip_rename: true,
                    temp_prefix: job.set.temp_prefix.clone(),
                };
                let result = self.remote()?.import_database(&request).await;
                remove_staging_file(&path).await;
                let response = result?;
                StepOutcome::Advance(if response.message.is_empty() {
                    "Remote import finished".to_string()
                } else {
                    response.message
                })
            }
            Step::MediaUploadRemote => self.upload_media_part(job, &mut ctx).await?,
            Step::SwapRemote => {
                let response = self
                    .remote()?
                    .swap(&self.swap_request(job, ctx.media_parts))
                    .await?;
                StepOutcome::Advance(non_empty_or(response.message, "Remote swap finished"))
            }
            Step::CleanupRemote => {
                if !job.set.auto_cleanup {
                    StepOutcome::Advance("Cleanup skipped (auto cleanup disabled)".to_string())
                } else {
                    let response = self
                        .remote()?
                        .cleanup(&self.swap_request(job, ctx.media_parts))
                        .await?;
                    StepOutcome::Advance(non_empty_or(response.message, "Remote cleanup finished"))
                }
            }
            Step::MaintenanceOffRemote => {
                self.remote()?.set_maintenance(false).await?;
                StepOutcome::Advance("Maintenance mode disabled on remote".to_string())
            }
            other => return Err(wrong_direction(other, SetType::Push)),
        };

        job.context = JobContext::Push(ctx);
        Ok(outcome)
    }

    /// First entry archives the uploads; each later tick sends one part.
    async fn upload_media_part(
        &self,
        job: &Job,
        ctx: &mut PushContext,
    ) -> Result<StepOutcome, SyncError> {
        if !job.set.include_media {
            return Ok(StepOutcome::Advance("Media not included in this set".to_string()));
        }

        if !ctx.archives_created {
            let batch = media::create_archives(
                &self.config.uploads_dir,
                &self.config.staging_dir,
                job.set.media_chunk_mb,
            )
            .await?;
            ctx.archives_created = true;
            ctx.media_parts = batch.parts();
            ctx.media_part = 1;
            ctx.media_token = Some(batch.token);
            ctx.media_archives = batch.archives;

            if ctx.media_parts == 0 {
                return Ok(StepOutcome::Advance("No media to upload".to_string()));
            }
            return Ok(StepOutcome::Repeat {
                message: format!("Created {} media archives", ctx.media_parts),
                fraction: 0.0,
            });
        }

        let part = ctx.media_part.max(1);
        if part > ctx.media_parts {
            ctx.media_archives.clear();
            return Ok(StepOutcome::Advance(format!(
                "Uploaded all {} media parts",
                ctx.media_parts
            )));
        }

        let index = usize::try_from(part - 1).unwrap_or(usize::MAX);
        let archive = ctx
            .media_archives
            .get(index)
            .cloned()
            .ok_or_else(|| SyncError::State(format!("media part {part} is missing")))?;
        let token = ctx.media_token.clone().unwrap_or_default();
        let bytes = tokio::fs::read(&archive).await?;
        self.remote()?
            .import_media(&token, part, job.upload_suffix(), bytes)
            .await?;
        remove_staging_file(&archive).await;

        ctx.media_part = part + 1;
        counter!("sitesync_media_parts_transferred_total", "direction" => "upload").increment(1);
        info!(job_id = %job.id, part, parts = ctx.media_parts, "Uploaded media part");
        Ok(StepOutcome::Repeat {
            message: format!("Uploaded media part {part} of {}", ctx.media_parts),
            fraction: f64::from(part) / f64::from(ctx.media_parts),
        })
    }
}

#[async_trait]
impl StepRunner for SyncStepRunner {
    async fn run(&self, job: &mut Job, step: Step) -> Result<StepOutcome, SyncError> {
        debug!(job_id = %job.id, step = %step, "Running step");
        match job.job_type {
            SetType::Pull => self.run_pull(job, step).await,
            SetType::Push => self.run_push(job, step).await,
        }
    }

    /// Lift maintenance mode on the side the job switched it on.
    async fn compensate(&self, job: &Job) -> Result<(), SyncError> {
        if job.dry_run {
            return Ok(());
        }
        match job.job_type {
            SetType::Pull => swap::set_maintenance(&self.config.maintenance_file, false).await?,
            SetType::Push => {
                self.remote()?.set_maintenance(false).await?;
            }
        }
        info!(job_id = %job.id, "Lifted maintenance mode after stop");
        Ok(())
    }
}

fn pull_context(job: &Job) -> Result<&PullContext, SyncError> {
    match &job.context {
        JobContext::Pull(ctx) => Ok(ctx),
        JobContext::Push(_) => Err(SyncError::State("pull job carries a push context".to_string())),
    }
}

fn push_context(job: &Job) -> Result<&PushContext, SyncError> {
    match &job.context {
        JobContext::Push(ctx) => Ok(ctx),
        JobContext::Pull(_) => Err(SyncError::State("push job carries a pull context".to_string())),
    }
}

fn wrong_direction(step: Step, set_type: SetType) -> SyncError {
    SyncError::State(format!("step {step} is not part of a {set_type} job"))
}

fn non_empty_or(message: String, fallback: &str) -> String {
    if message.is_empty() {
        fallback.to_string()
    } else {
        message
    }
}

async fn remove_staging_file(path: &std::path::Path) {
    if let Err(err) = tokio::fs::remove_file(path).await {
        debug!(path = %path.display(), error = %err, "Could not remove staging file");
    }
}
