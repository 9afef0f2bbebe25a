//! Polling monitor: dispatches pending instances and reaps stale ones.
//!
//! A single background loop polls the store for pending instances, hands
//! each to the engine (the engine's running set makes duplicate polls
//! harmless), then force-fails running instances whose executor evidently
//! died. The loop never exits on error; a failed cycle logs and backs off.

use std::sync::Arc;
use std::time::Duration;

use lexflow_types::config::EngineConfig;
use lexflow_types::error::RepositoryError;
use lexflow_types::workflow::{InstanceFilter, SortOrder, WorkflowStatus};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::repository::workflow::WorkflowRepository;

use super::engine::ExecutionEngine;

#[derive(Debug, Clone, Copy)]
pub struct MonitorConfig {
    pub poll_interval: Duration,
    /// Sleep after a failed cycle instead of `poll_interval`.
    pub error_backoff: Duration,
    /// Maximum pending instances dispatched per cycle.
    pub batch_size: u32,
    /// Running instances older than this get force-failed.
    pub stale_after: chrono::Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(10),
            error_backoff: Duration::from_secs(30),
            batch_size: 10,
            stale_after: chrono::Duration::hours(24),
        }
    }
}

impl From<&EngineConfig> for MonitorConfig {
    fn from(config: &EngineConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            error_backoff: Duration::from_secs(config.error_backoff_secs),
            batch_size: config.batch_size,
            stale_after: chrono::Duration::hours(i64::from(config.stale_after_hours)),
        }
    }
}

pub struct WorkflowMonitor<R: WorkflowRepository> {
    engine: Arc<ExecutionEngine<R>>,
    config: MonitorConfig,
}

impl<R: WorkflowRepository + 'static> WorkflowMonitor<R> {
    pub fn new(engine: Arc<ExecutionEngine<R>>, config: MonitorConfig) -> Self {
        Self { engine, config }
    }

    /// Run the monitor loop until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) {
        info!(
            poll_interval_secs = self.config.poll_interval.as_secs(),
            batch_size = self.config.batch_size,
            "workflow monitor started"
        );

        loop {
            let sleep_for = match self.cycle().await {
                Ok(()) => self.config.poll_interval,
                Err(err) => {
                    error!(error = %err, "workflow monitor cycle failed");
                    self.config.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("workflow monitor shutting down");
                    return;
                }
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// One poll cycle: dispatch a batch of pending instances, then reap
    /// stale running ones.
    pub async fn cycle(&self) -> Result<(), RepositoryError> {
        let pending = self
            .engine
            .repository()
            .search_instances(&InstanceFilter {
                status: Some(WorkflowStatus::Pending),
                limit: self.config.batch_size,
                // Oldest first so a backlog drains in arrival order.
                sort: SortOrder::Asc,
                ..Default::default()
            })
            .await?;

        for instance in &pending {
            if self.engine.spawn(instance.id) {
                info!(instance_id = %instance.id, workflow = %instance.workflow_name, "dispatched pending workflow");
            }
        }

        let reaped = self
            .engine
            .repository()
            .mark_stale_as_failed(self.config.stale_after)
            .await?;
        if reaped > 0 {
            info!(count = reaped, "reaped stale workflow instances");
        }

        Ok(())
    }
}
