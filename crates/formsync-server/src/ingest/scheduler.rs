//! Background poll loop
//!
//! Runs a cycle on every tick of a fixed interval until the shutdown token is
//! cancelled. Cancellation is only observed between cycles, so an open batch
//! always finishes with a commit or a rollback.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::config::IngestConfig;
use super::models::CycleOutcome;
use super::pipeline::IngestionPipeline;

/// Periodic ingestion scheduler
pub struct IngestScheduler {
    pipeline: Arc<IngestionPipeline>,
    interval: Duration,
    initial_delay: Duration,
    shutdown: CancellationToken,
}

impl IngestScheduler {
    /// Create a scheduler using the configured poll interval and initial delay
    pub fn new(
        pipeline: Arc<IngestionPipeline>,
        config: &IngestConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self::with_timing(pipeline, config.poll_interval(), config.initial_delay(), shutdown)
    }

    pub fn with_timing(
        pipeline: Arc<IngestionPipeline>,
        interval: Duration,
        initial_delay: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            pipeline,
            interval,
            initial_delay,
            shutdown,
        }
    }

    /// Spawn the loop onto the runtime
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    pub async fn run(self) {
        info!(
            interval_secs = self.interval.as_secs(),
            initial_delay_secs = self.initial_delay.as_secs(),
            "Ingestion scheduler started"
        );

        tokio::select! {
            _ = self.shutdown.cancelled() => {
                info!("Ingestion scheduler stopped before first poll");
                return;
            }
            _ = tokio::time::sleep(self.initial_delay) => {}
        }

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            self.poll_once().await;
        }

        info!("Ingestion scheduler stopped");
    }

    async fn poll_once(&self) {
        match self.pipeline.run_cycle().await {
            Ok(report) => match &report.outcome {
                CycleOutcome::Empty => {},
                CycleOutcome::Committed => info!(
                    rows_read = report.rows_read,
                    inserted = report.inserted,
                    skipped = report.skipped,
                    cleared = report.cleared,
                    "Ingestion cycle committed"
                ),
                CycleOutcome::RolledBack { error } => warn!(
                    rows_read = report.rows_read,
                    error = %error,
                    "Ingestion cycle rolled back; rows stay in the source for the next poll"
                ),
            },
            Err(e) => error!(error = %e, "Ingestion cycle failed"),
        }
    }
}
