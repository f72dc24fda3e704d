use crate::error::{BridgeError, Result};
use crate::models::PromoteJob;
use crate::services::dispatcher::LambdaDispatcher;
use crate::services::records::{Attacher, RecordRegistry};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};

/// Runs dispatches for promote jobs until shutdown.
pub struct PromoteWorker {
    dispatcher: Arc<LambdaDispatcher>,
    records: RecordRegistry,
    jobs: mpsc::Receiver<PromoteJob>,
    shutdown: watch::Receiver<bool>,
}

/// What happened to one job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Dispatched,
    /// The attachment no longer holds the job's file
    Stale,
    Failed,
}

impl PromoteWorker {
    pub fn new(
        dispatcher: Arc<LambdaDispatcher>,
        records: RecordRegistry,
        jobs: mpsc::Receiver<PromoteJob>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            dispatcher,
            records,
            jobs,
            shutdown,
        }
    }

    pub async fn run(mut self) {
        tracing::info!("🚀 Promote worker started");

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    tracing::info!("🛑 Promote worker shutting down");
                    break;
                }
                job = self.jobs.recv() => match job {
                    Some(job) => {
                        self.process(&job).await;
                    }
                    None => {
                        tracing::info!("🛑 Promote queue closed");
                        break;
                    }
                }
            }
        }
    }

    pub async fn process(&self, job: &PromoteJob) -> JobOutcome {
        match self.dispatch(job).await {
            Ok(()) => JobOutcome::Dispatched,
            Err(BridgeError::AttachmentChanged) => {
                tracing::info!(
                    "⏭️ Skipping stale promote job for {} {} ({})",
                    job.record_type,
                    job.record_id,
                    job.name
                );
                JobOutcome::Stale
            }
            Err(e) => {
                tracing::error!(
                    "❌ Promote job for {} {} ({}) failed: {}",
                    job.record_type,
                    job.record_id,
                    job.name,
                    e
                );
                JobOutcome::Failed
            }
        }
    }

    async fn dispatch(&self, job: &PromoteJob) -> Result<()> {
        let mut attacher = Attacher::retrieve(
            &self.records,
            &job.record_type,
            &job.record_id,
            &job.name,
            &job.file_data,
        )
        .await?;
        let context = attacher.context(self.dispatcher.uploader());
        self.dispatcher.dispatch(&mut attacher, &context).await?;
        Ok(())
    }
}
