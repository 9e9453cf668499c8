//! # Job Orchestrator
//!
//! Drives the single persisted job one step per [`JobOrchestrator::tick`].
//! Each tick loads the job, runs exactly one step through a [`StepRunner`],
//! applies the outcome and saves with compare-and-set. Nothing runs between
//! ticks; callers decide when the next one happens.
//!
//! Ticks against the same job must be serialized by the caller. Two ticks
//! racing on one version will not both be saved (the loser gets a State
//! error), but both may already have executed their step.

pub mod steps;

use async_trait::async_trait;
use metrics::counter;
use tracing::{info, instrument, warn};

use crate::error::SyncError;
use crate::models::{Job, JobStatus, ReplicationSet, Step, StepOutcome};
use crate::repositories::JobRepository;

pub use steps::SyncStepRunner;

/// Executes the named steps of a job.
#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Run `step` for `job`, updating its context in place. An `Err` halts
    /// the job in `error` with the error's message.
    async fn run(&self, job: &mut Job, step: Step) -> Result<StepOutcome, SyncError>;

    /// Best-effort undo after an operator stop, such as lifting maintenance mode.
    async fn compensate(&self, _job: &Job) -> Result<(), SyncError> {
        Ok(())
    }
}

/// Result of one tick.
#[derive(Debug, Clone)]
pub struct TickReport {
    pub job: Job,
    pub message: String,
    /// The step that ran, if any
    pub executed: Option<Step>,
}

pub struct JobOrchestrator<R> {
    jobs: JobRepository,
    runner: R,
}

impl<R: StepRunner> JobOrchestrator<R> {
    pub fn new(jobs: JobRepository, runner: R) -> Self {
        Self { jobs, runner }
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Create a job for `set`, replacing whatever job was stored before.
    #[instrument(skip(self, set), fields(set_id = %set.id, set_type = %set.set_type))]
    pub async fn create_job(&self, set: &ReplicationSet, dry_run: bool) -> Result<Job, SyncError> {
        set.validate()?;
        let job = Job::new(set.clone(), dry_run);
        self.jobs.replace(&job).await?;

        counter!("sitesync_jobs_created_total", "type" => set.set_type.as_str()).increment(1);
        info!(job_id = %job.id, steps = job.steps.len(), dry_run, "Created job");
        Ok(job)
    }

    /// Current job, if any.
    pub async fn status(&self) -> Result<Option<Job>, SyncError> {
        Ok(self.jobs.load().await?.map(|stored| stored.value))
    }

    /// Execute the step under the cursor and persist the result.
    ///
    /// A job whose cursor is past the last step is marked done without side
    /// effects. Stopped, failed and finished jobs are returned unchanged.
    #[instrument(skip(self))]
    pub async fn tick(&self) -> Result<TickReport, SyncError> {
        let stored = self
            .jobs
            .load()
            .await?
            .ok_or_else(|| SyncError::State("no job has been created".to_string()))?;
        let (mut job, version) = (stored.value, stored.version);

        if job.status.is_terminal() {
            let message = job
                .message
                .clone()
                .unwrap_or_else(|| format!("Job is {}", job.status.as_str()));
            return Ok(TickReport {
                job,
                message,
                executed: None,
            });
        }

        let Some(step) = job.current_step() else {
            job.finish_if_exhausted();
            let message = "Job complete".to_string();
            job.message = Some(message.clone());
            self.jobs.save(&job, version).await?;
            return Ok(TickReport {
                job,
                message,
                executed: None,
            });
        };

        let outcome = if job.dry_run && step.skipped_in_dry_run() {
            StepOutcome::Advance(format!("Skipped {step} (dry run)"))
        } else {
            match self.runner.run(&mut job, step).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    warn!(job_id = %job.id, step = %step, kind = err.kind(), error = %err, "Step failed");
                    StepOutcome::Failed(err.to_string())
                }
            }
        };

        let label = match &outcome {
            StepOutcome::Advance(_) => "advance",
            StepOutcome::Repeat { .. } => "repeat",
            StepOutcome::Failed(_) => "failed",
        };
        let message = job.apply(outcome);
        self.jobs.save(&job, version).await?;

        counter!("sitesync_job_ticks_total", "outcome" => label).increment(1);
        info!(
            job_id = %job.id,
            step = %step,
            outcome = label,
            progress = job.progress,
            status = job.status.as_str(),
            "Tick finished"
        );

        Ok(TickReport {
            job,
            message,
            executed: Some(step),
        })
    }

    /// Tick until the job leaves `running` or `max_ticks` ticks have run,
    /// handing every report to `on_tick` as it arrives.
    pub async fn run_to_completion<F>(
        &self,
        max_ticks: usize,
        mut on_tick: F,
    ) -> Result<TickReport, SyncError>
    where
        F: FnMut(&TickReport),
    {
        let mut report = self.tick().await?;
        on_tick(&report);
        let mut ticks = 1;
        while report.job.status == JobStatus::Running && ticks < max_ticks {
            report = self.tick().await?;
            on_tick(&report);
            ticks += 1;
        }
        Ok(report)
    }

    /// Flip a running job to `stopped`. No compensation is attempted.
    pub async fn stop(&self) -> Result<Job, SyncError> {
        let stored = self
            .jobs
            .load()
            .await?
            .ok_or_else(|| SyncError::State("no job has been created".to_string()))?;
        let (mut job, version) = (stored.value, stored.version);

        if job.stop() {
            self.jobs.save(&job, version).await?;
            counter!("sitesync_jobs_stopped_total").increment(1);
            info!(job_id = %job.id, step_index = job.step_index, "Stopped job");
        }
        Ok(job)
    }

    /// Stop the job, then run the runner's best-effort compensation.
    /// Compensation failures are logged, not returned.
    pub async fn stop_and_compensate(&self) -> Result<Job, SyncError> {
        let job = self.stop().await?;
        if job.status != JobStatus::Stopped {
            return Ok(job);
        }
        if let Err(err) = self.runner.compensate(&job).await {
            warn!(job_id = %job.id, error = %err, "Compensation after stop failed");
        }
        Ok(job)
    }
}
