//! Durable workflow steps and periodic jobs.
//!
//! A [`WorkflowRun`] is identified by a workflow name and a run key. Each
//! named step stores its JSON output in `workflow_steps` once it succeeds;
//! replaying the run returns the stored output instead of running the step
//! again. Failed steps store nothing and run again on replay.

use chrono::Utc;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, instrument};

use crate::db::transaction::UnitOfWork;
use crate::errors::ServiceError;
use crate::repositories::NewWorkflowStep;
use crate::services::maintenance_notifications::MaintenanceNotificationService;

#[derive(Clone)]
pub struct WorkflowRun {
    uow: Arc<dyn UnitOfWork>,
    workflow: String,
    run_key: String,
}

impl WorkflowRun {
    pub fn new(
        uow: Arc<dyn UnitOfWork>,
        workflow: impl Into<String>,
        run_key: impl Into<String>,
    ) -> Self {
        Self {
            uow,
            workflow: workflow.into(),
            run_key: run_key.into(),
        }
    }

    pub fn workflow(&self) -> &str {
        &self.workflow
    }

    pub fn run_key(&self) -> &str {
        &self.run_key
    }

    /// Runs `f` unless step `name` already completed in this run, in which
    /// case its stored output is returned.
    #[instrument(skip(self, f), fields(workflow = %self.workflow, run_key = %self.run_key))]
    pub async fn step<T, F, Fut>(&self, name: &str, f: F) -> Result<T, ServiceError>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let workflow = self.workflow.clone();
        let run_key = self.run_key.clone();
        let step = name.to_string();
        let saved = self
            .uow
            .execute(|tx| async move { tx.find_workflow_step(&workflow, &run_key, &step).await })
            .await?;
        if let Some(saved) = saved {
            debug!(step = name, "Step already completed, replaying stored output");
            return Ok(serde_json::from_str(&saved.output)?);
        }

        let output = f().await?;

        let record = NewWorkflowStep {
            workflow: self.workflow.clone(),
            run_key: self.run_key.clone(),
            step: name.to_string(),
            output: serde_json::to_string(&output)?,
            completed_at: Utc::now(),
        };
        self.uow
            .execute(|tx| async move { tx.save_workflow_step(record).await })
            .await?;
        debug!(step = name, "Step completed");
        Ok(output)
    }

    /// Name of the most recently completed step of this run.
    pub async fn last_completed_step(&self) -> Result<Option<String>, ServiceError> {
        let workflow = self.workflow.clone();
        let run_key = self.run_key.clone();
        let last = self
            .uow
            .execute(|tx| async move { tx.last_completed_step(&workflow, &run_key).await })
            .await?;
        Ok(last.map(|s| s.step))
    }
}

/// Spawns a task that runs the maintenance notification generator every
/// `every`. Errors are logged and the schedule keeps going.
pub fn spawn_maintenance_scheduler(
    service: MaintenanceNotificationService,
    every: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = every.as_secs(), "Maintenance scheduler started");
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match service.generate(Utc::now()).await {
                Ok(report) => info!(
                    created = report.created,
                    skipped = report.skipped_duplicates,
                    failed = report.failed,
                    "Maintenance scan finished"
                ),
                Err(e) => error!(error = %e, "Maintenance scan failed"),
            }
        }
    })
}
