//! Job model
//!
//! A job is one run of a replication set's workflow: an ordered list of named
//! steps fixed at creation, a cursor into that list, and a typed hand-off
//! context carried between steps. The record is persisted after every tick so
//! the workflow resumes across independent invocations.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::random_token;
use super::replication_set::{ReplicationSet, SetType};

/// Upper bound reported while a step is repeating over media parts.
pub const REPEAT_PROGRESS_CAP: u8 = 95;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Running,
    Stopped,
    Error,
    Done,
}

impl JobStatus {
    /// No further steps execute once a job leaves `running`.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, JobStatus::Running)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Running => "running",
            JobStatus::Stopped => "stopped",
            JobStatus::Error => "error",
            JobStatus::Done => "done",
        }
    }
}

/// Named unit of work in a job's workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum Step {
    MaintenanceOnLocal,
    DbExportRemote,
    DbDownloadRemote,
    DbImportLocal,
    MediaExportRemote,
    MediaDownloadRemote,
    SwapLocal,
    CleanupLocal,
    MaintenanceOffLocal,
    PrePullBackup,
    MaintenanceOnRemote,
    DbExportLocal,
    DbImportRemote,
    MediaUploadRemote,
    SwapRemote,
    CleanupRemote,
    MaintenanceOffRemote,
}

pub const PULL_STEPS: [Step; 9] = [
    Step::MaintenanceOnLocal,
    Step::DbExportRemote,
    Step::DbDownloadRemote,
    Step::DbImportLocal,
    Step::MediaExportRemote,
    Step::MediaDownloadRemote,
    Step::SwapLocal,
    Step::CleanupLocal,
    Step::MaintenanceOffLocal,
];

pub const PUSH_STEPS: [Step; 8] = [
    Step::PrePullBackup,
    Step::MaintenanceOnRemote,
    Step::DbExportLocal,
    Step::DbImportRemote,
    Step::MediaUploadRemote,
    Step::SwapRemote,
    Step::CleanupRemote,
    Step::MaintenanceOffRemote,
];

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::MaintenanceOnLocal => "maintenance-on-local",
            Step::DbExportRemote => "db-export-remote",
            Step::DbDownloadRemote => "db-download-remote",
            Step::DbImportLocal => "db-import-local",
            Step::MediaExportRemote => "media-export-remote",
            Step::MediaDownloadRemote => "media-download-remote",
            Step::SwapLocal => "swap-local",
            Step::CleanupLocal => "cleanup-local",
            Step::MaintenanceOffLocal => "maintenance-off-local",
            Step::PrePullBackup => "pre-pull-backup",
            Step::MaintenanceOnRemote => "maintenance-on-remote",
            Step::DbExportLocal => "db-export-local",
            Step::DbImportRemote => "db-import-remote",
            Step::MediaUploadRemote => "media-upload-remote",
            Step::SwapRemote => "swap-remote",
            Step::CleanupRemote => "cleanup-remote",
            Step::MaintenanceOffRemote => "maintenance-off-remote",
        }
    }

    /// Steps that permanently change destination state and become no-ops in a dry run.
    pub fn skipped_in_dry_run(&self) -> bool {
        matches!(
            self,
            Step::MaintenanceOnLocal
                | Step::MaintenanceOffLocal
                | Step::MaintenanceOnRemote
                | Step::MaintenanceOffRemote
                | Step::DbImportLocal
                | Step::DbImportRemote
                | Step::MediaUploadRemote
                | Step::SwapLocal
                | Step::SwapRemote
                | Step::CleanupLocal
                | Step::CleanupRemote
        )
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered step catalogue for a direction.
pub fn steps_for(set_type: SetType) -> Vec<Step> {
    match set_type {
        SetType::Pull => PULL_STEPS.to_vec(),
        SetType::Push => PUSH_STEPS.to_vec(),
    }
}

/// Hand-off data for pull jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PullContext {
    /// Remote artifact token for the SQL dump
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_token: Option<String>,
    /// Local path of the downloaded dump
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_file: Option<PathBuf>,
    /// Remote artifact token for the media archive batch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_token: Option<String>,
    /// Next 1-based part to download
    #[serde(default)]
    pub media_part: u32,
    #[serde(default)]
    pub media_parts: u32,
}

/// Hand-off data for push jobs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PushContext {
    /// Local copy of the remote database taken before overwriting it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub db_file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_token: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_archives: Vec<PathBuf>,
    #[serde(default)]
    pub archives_created: bool,
    /// Next 1-based part to upload
    #[serde(default)]
    pub media_part: u32,
    #[serde(default)]
    pub media_parts: u32,
}

/// Typed per-direction context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum JobContext {
    Pull(PullContext),
    Push(PushContext),
}

impl JobContext {
    pub fn for_type(set_type: SetType) -> Self {
        match set_type {
            SetType::Pull => JobContext::Pull(PullContext::default()),
            SetType::Push => JobContext::Push(PushContext::default()),
        }
    }

    /// Number of media parts the job moved (or will move).
    pub fn media_parts(&self) -> u32 {
        match self {
            JobContext::Pull(ctx) => ctx.media_parts,
            JobContext::Push(ctx) => ctx.media_parts,
        }
    }
}

/// Result of running a single step.
#[derive(Debug, Clone, PartialEq)]
pub enum StepOutcome {
    /// Step finished; move the cursor forward.
    Advance(String),
    /// Step made bounded progress and must run again on the next tick.
    /// `fraction` is the share of the step completed so far (0.0..=1.0).
    Repeat { message: String, fraction: f64 },
    /// Step failed; the job halts in `error`.
    Failed(String),
}

/// One in-flight or completed synchronization run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    /// Frozen copy of the set at creation time
    pub set: ReplicationSet,
    #[serde(rename = "type")]
    pub job_type: SetType,
    pub steps: Vec<Step>,
    pub step_index: usize,
    pub progress: u8,
    pub status: JobStatus,
    pub dry_run: bool,
    pub context: JobContext,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a job for `set` with the direction's fixed step catalogue.
    pub fn new(set: ReplicationSet, dry_run: bool) -> Self {
        let steps = steps_for(set.set_type);
        Self::with_steps(set, steps, dry_run)
    }

    /// Create a job with an explicit step list.
    pub fn with_steps(set: ReplicationSet, steps: Vec<Step>, dry_run: bool) -> Self {
        let now = Utc::now();
        Self {
            id: random_token(16),
            job_type: set.set_type,
            context: JobContext::for_type(set.set_type),
            set,
            steps,
            step_index: 0,
            progress: 0,
            status: JobStatus::Running,
            dry_run,
            message: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Suffix used for this job's staged and backed-up upload directories.
    pub fn upload_suffix(&self) -> &str {
        &self.id
    }

    pub fn current_step(&self) -> Option<Step> {
        self.steps.get(self.step_index).copied()
    }

    /// Mark the job done when the cursor ran past the last step.
    /// Returns true when the job is (now) done.
    pub fn finish_if_exhausted(&mut self) -> bool {
        if self.step_index >= self.steps.len() {
            self.status = JobStatus::Done;
            self.progress = 100;
            self.updated_at = Utc::now();
            return true;
        }
        false
    }

    /// Apply a step outcome to the cursor, progress and status.
    /// Returns the message to report for this tick.
    pub fn apply(&mut self, outcome: StepOutcome) -> String {
        self.updated_at = Utc::now();
        let message = match outcome {
            StepOutcome::Failed(message) => {
                self.status = JobStatus::Error;
                message
            }
            StepOutcome::Repeat { message, fraction } => {
                let position = self.step_index as f64 + fraction.clamp(0.0, 1.0);
                self.progress = progress_for(position, self.steps.len()).min(REPEAT_PROGRESS_CAP);
                self.status = JobStatus::Running;
                message
            }
            StepOutcome::Advance(message) => {
                self.step_index += 1;
                self.progress = progress_for(self.step_index as f64, self.steps.len());
                self.status = if self.step_index >= self.steps.len() {
                    JobStatus::Done
                } else {
                    JobStatus::Running
                };
                message
            }
        };
        self.message = Some(message.clone());
        message
    }

    /// Flip a running job to `stopped`. Terminal jobs are left untouched.
    pub fn stop(&mut self) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = JobStatus::Stopped;
        self.message = Some("Job stopped".to_string());
        self.updated_at = Utc::now();
        true
    }
}

fn progress_for(position: f64, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((position / total as f64) * 100.0).round().clamp(0.0, 100.0) as u8
}
