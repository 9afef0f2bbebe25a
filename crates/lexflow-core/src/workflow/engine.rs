//! Sequential workflow executor.
//!
//! Drives one instance at a time through its snapshotted steps: mark running,
//! dispatch to the operator for the step's type, persist the audit row, merge
//! the output into the context, repeat. Failure is fail-fast; cancellation is
//! cooperative and honored at step boundaries.
//!
//! The engine keeps an in-process running set (`DashMap` of cancellation
//! tokens) so a dispatcher polling faster than instances finish never starts
//! the same instance twice. Single-process deployment is assumed; there is no
//! cross-process lease.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use dashmap::DashMap;
use lexflow_types::error::{OperatorError, RepositoryError};
use lexflow_types::event::WorkflowEvent;
use lexflow_types::workflow::{
    InstanceUpdate, JsonMap, StepUpdate, WorkflowInstance, WorkflowStatus, WorkflowStep,
};
use serde_json::json;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::event::bus::EventBus;
use crate::repository::workflow::WorkflowRepository;

use super::context::merge_output;
use super::operator::OperatorRegistry;
use super::retry::RetryPolicy;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow instance {0} not found")]
    InstanceNotFound(Uuid),

    #[error(transparent)]
    Repository(#[from] RepositoryError),
}

/// Outcome of one step after retries are exhausted.
enum StepOutcome {
    Completed(JsonMap),
    Failed(String),
}

pub struct ExecutionEngine<R: WorkflowRepository> {
    repo: Arc<R>,
    registry: Arc<OperatorRegistry>,
    events: EventBus,
    /// Cancellation tokens keyed by instance id; presence means "executing".
    running: DashMap<Uuid, CancellationToken>,
}

impl<R: WorkflowRepository + 'static> ExecutionEngine<R> {
    pub fn new(repo: Arc<R>, registry: Arc<OperatorRegistry>, events: EventBus) -> Self {
        Self {
            repo,
            registry,
            events,
            running: DashMap::new(),
        }
    }

    pub fn repository(&self) -> &Arc<R> {
        &self.repo
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Whether the instance is currently executing in this process.
    pub fn is_running(&self, instance_id: &Uuid) -> bool {
        self.running.contains_key(instance_id)
    }

    /// Start executing an instance on a background task.
    ///
    /// Returns false without side effects when the instance is already
    /// executing here; the polling dispatcher relies on this to make repeated
    /// polls of the same pending batch harmless.
    pub fn spawn(self: &Arc<Self>, instance_id: Uuid) -> bool {
        let token = CancellationToken::new();
        match self.running.entry(instance_id) {
            dashmap::mapref::entry::Entry::Occupied(_) => return false,
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                entry.insert(token.clone());
            }
        }

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(err) = engine.execute(instance_id, token).await {
                error!(instance_id = %instance_id, error = %err, "workflow execution error");
            }
            engine.running.remove(&instance_id);
        });
        true
    }

    /// Request cooperative cancellation of an instance running in this
    /// process. Takes effect at the next step boundary. Returns false when
    /// the instance is not executing here.
    pub fn cancel(&self, instance_id: &Uuid) -> bool {
        match self.running.get(instance_id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Execute an instance to a terminal status.
    ///
    /// Returns `Ok(true)` on completion, `Ok(false)` when the run stopped
    /// early (failed step, cancellation, refused dispatch). Repository errors
    /// mark the instance failed best-effort before propagating.
    pub async fn execute(
        &self,
        instance_id: Uuid,
        token: CancellationToken,
    ) -> Result<bool, EngineError> {
        match self.run(instance_id, token).await {
            Ok(completed) => Ok(completed),
            Err(err) => {
                self.mark_failed(instance_id, None, &format!("execution error: {err}"))
                    .await;
                Err(err)
            }
        }
    }

    async fn run(
        &self,
        instance_id: Uuid,
        token: CancellationToken,
    ) -> Result<bool, EngineError> {
        let instance = self
            .repo
            .get_instance(&instance_id)
            .await?
            .ok_or(EngineError::InstanceNotFound(instance_id))?;

        if instance.status != WorkflowStatus::Pending {
            warn!(
                instance_id = %instance_id,
                status = instance.status.as_str(),
                "refusing to execute non-pending instance"
            );
            return Ok(false);
        }

        let started = Instant::now();
        self.repo
            .update_instance(
                &instance_id,
                &InstanceUpdate {
                    status: Some(WorkflowStatus::Running),
                    started_at: Some(Utc::now()),
                    ..Default::default()
                },
            )
            .await?;
        self.events.publish(WorkflowEvent::InstanceStarted {
            instance_id,
            workflow_name: instance.workflow_name.clone(),
            trigger_type: instance.trigger_type.as_str().to_string(),
        });
        info!(
            instance_id = %instance_id,
            workflow = %instance.workflow_name,
            "workflow started"
        );

        let steps = self.repo.get_steps(&instance_id).await?;
        if steps.is_empty() {
            self.mark_failed(instance_id, Some(&instance), "workflow has no steps")
                .await;
            return Ok(false);
        }
        let total_steps = steps.len() as u32;

        let mut context = instance.input_data.clone();

        for step in &steps {
            // Cancellation checkpoint: an in-process cancel() or an external
            // status write both stop the run before the next step starts.
            match self.cancellation_state(&instance_id, &token).await? {
                CancelState::Continue => {}
                CancelState::TokenCancelled => {
                    self.repo
                        .update_instance(
                            &instance_id,
                            &InstanceUpdate::status(WorkflowStatus::Cancelled),
                        )
                        .await?;
                    self.events.publish(WorkflowEvent::InstanceCancelled {
                        instance_id,
                        workflow_name: instance.workflow_name.clone(),
                    });
                    info!(instance_id = %instance_id, "workflow cancelled");
                    return Ok(false);
                }
                CancelState::ExternallyCancelled => {
                    self.events.publish(WorkflowEvent::InstanceCancelled {
                        instance_id,
                        workflow_name: instance.workflow_name.clone(),
                    });
                    info!(instance_id = %instance_id, "workflow cancelled externally");
                    return Ok(false);
                }
                CancelState::Interrupted(status) => {
                    info!(
                        instance_id = %instance_id,
                        status = status.as_str(),
                        "workflow interrupted externally, stopping"
                    );
                    return Ok(false);
                }
            }

            match self.run_step(&instance, step, &context).await? {
                StepOutcome::Completed(output) => {
                    self.repo
                        .update_instance(
                            &instance_id,
                            &InstanceUpdate {
                                current_step: Some(step.step_number),
                                current_step_name: Some(step.step_name.clone()),
                                progress_percentage: Some(WorkflowInstance::progress_for(
                                    step.step_number,
                                    total_steps,
                                )),
                                ..Default::default()
                            },
                        )
                        .await?;
                    merge_output(&mut context, &output);
                }
                StepOutcome::Failed(step_error) => {
                    let message = format!(
                        "step {} ({}) failed: {}",
                        step.step_number, step.step_name, step_error
                    );
                    self.mark_failed(instance_id, Some(&instance), &message).await;
                    return Ok(false);
                }
            }
        }

        self.repo
            .update_instance(
                &instance_id,
                &InstanceUpdate {
                    status: Some(WorkflowStatus::Completed),
                    progress_percentage: Some(100.0),
                    output_data: Some(context),
                    ..Default::default()
                },
            )
            .await?;
        self.events.publish(WorkflowEvent::InstanceCompleted {
            instance_id,
            workflow_name: instance.workflow_name.clone(),
            duration_ms: started.elapsed().as_millis() as u64,
            steps_completed: total_steps,
        });
        info!(
            instance_id = %instance_id,
            workflow = %instance.workflow_name,
            "workflow completed"
        );
        Ok(true)
    }

    /// Run one step: persist the running transition with a context snapshot,
    /// dispatch with retries, persist the terminal step row.
    async fn run_step(
        &self,
        instance: &WorkflowInstance,
        step: &WorkflowStep,
        context: &JsonMap,
    ) -> Result<StepOutcome, EngineError> {
        let instance_id = instance.id;
        self.repo
            .update_step(
                &instance_id,
                step.step_number,
                &StepUpdate {
                    status: Some(WorkflowStatus::Running),
                    started_at: Some(Utc::now()),
                    input_data: Some(context.clone()),
                    ..Default::default()
                },
            )
            .await?;
        self.events.publish(WorkflowEvent::StepStarted {
            instance_id,
            step_number: step.step_number,
            step_name: step.step_name.clone(),
            progress_percentage: WorkflowInstance::progress_for(
                step.step_number,
                instance.total_steps,
            ),
        });
        info!(
            instance_id = %instance_id,
            step = step.step_number,
            step_name = %step.step_name,
            step_type = %step.step_type,
            "executing step"
        );

        let started = Instant::now();
        let policy = RetryPolicy::new(instance.retry_attempts);
        let mut attempt = 1u32;
        let result = loop {
            match self.dispatch(step, context).await {
                Ok(output) => break Ok(output),
                Err(err) if policy.should_retry(attempt) => {
                    warn!(
                        instance_id = %instance_id,
                        step = step.step_number,
                        attempt,
                        error = %err,
                        "step attempt failed, retrying"
                    );
                    self.events.publish(WorkflowEvent::StepFailed {
                        instance_id,
                        step_number: step.step_number,
                        step_name: step.step_name.clone(),
                        error: err.to_string(),
                        will_retry: true,
                    });
                    tokio::time::sleep(policy.backoff_delay(attempt)).await;
                    attempt += 1;
                }
                Err(err) => break Err(err),
            }
        };

        match result {
            Ok(output) => {
                let elapsed = started.elapsed();
                self.repo
                    .update_step(
                        &instance_id,
                        step.step_number,
                        &StepUpdate {
                            status: Some(WorkflowStatus::Completed),
                            completed_at: Some(Utc::now()),
                            output_data: Some(output.clone()),
                            execution_time_seconds: Some(elapsed.as_secs_f64()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.events.publish(WorkflowEvent::StepCompleted {
                    instance_id,
                    step_number: step.step_number,
                    step_name: step.step_name.clone(),
                    duration_ms: elapsed.as_millis() as u64,
                });
                Ok(StepOutcome::Completed(output))
            }
            Err(err) => {
                let message = err.to_string();
                self.repo
                    .update_step(
                        &instance_id,
                        step.step_number,
                        &StepUpdate {
                            status: Some(WorkflowStatus::Failed),
                            error_message: Some(message.clone()),
                            completed_at: Some(Utc::now()),
                            ..Default::default()
                        },
                    )
                    .await?;
                self.events.publish(WorkflowEvent::StepFailed {
                    instance_id,
                    step_number: step.step_number,
                    step_name: step.step_name.clone(),
                    error: message.clone(),
                    will_retry: false,
                });
                Ok(StepOutcome::Failed(message))
            }
        }
    }

    /// Dispatch on the step's type. A type with no registered operator is
    /// skipped rather than failed, so definitions written for a newer engine
    /// still run to completion.
    async fn dispatch(
        &self,
        step: &WorkflowStep,
        context: &JsonMap,
    ) -> Result<JsonMap, OperatorError> {
        match self.registry.get(&step.step_type) {
            Some(operator) => operator.execute(&step.parameters, context).await,
            None => {
                warn!(step_type = %step.step_type, "unknown step type, skipping");
                let mut output = JsonMap::new();
                output.insert("status".to_string(), json!("skipped"));
                output.insert(
                    "message".to_string(),
                    json!(format!("unknown step type: {}", step.step_type)),
                );
                Ok(output)
            }
        }
    }

    async fn cancellation_state(
        &self,
        instance_id: &Uuid,
        token: &CancellationToken,
    ) -> Result<CancelState, RepositoryError> {
        if token.is_cancelled() {
            return Ok(CancelState::TokenCancelled);
        }
        // Re-read from the store so cancellations written by other callers
        // (API, operators console) take effect at the next boundary.
        let status = self
            .repo
            .get_instance(instance_id)
            .await?
            .map(|i| i.status);
        Ok(match status {
            Some(WorkflowStatus::Cancelled) => CancelState::ExternallyCancelled,
            Some(WorkflowStatus::Running) => CancelState::Continue,
            Some(other) => CancelState::Interrupted(other),
            None => CancelState::Interrupted(WorkflowStatus::Failed),
        })
    }

    /// Best-effort failure marking; storage errors here are logged, not
    /// propagated, so the original failure is what callers see.
    async fn mark_failed(
        &self,
        instance_id: Uuid,
        instance: Option<&WorkflowInstance>,
        message: &str,
    ) {
        if let Err(err) = self
            .repo
            .update_instance(&instance_id, &InstanceUpdate::failed(message))
            .await
        {
            error!(
                instance_id = %instance_id,
                error = %err,
                "failed to mark workflow instance as failed"
            );
        }
        self.events.publish(WorkflowEvent::InstanceFailed {
            instance_id,
            workflow_name: instance
                .map(|i| i.workflow_name.clone())
                .unwrap_or_default(),
            error: message.to_string(),
        });
        error!(instance_id = %instance_id, error = message, "workflow failed");
    }
}

/// What the pre-step checkpoint observed.
enum CancelState {
    Continue,
    TokenCancelled,
    ExternallyCancelled,
    /// Some other external status write (paused, or a concurrent terminal
    /// transition). The run stops without touching the stored status.
    Interrupted(WorkflowStatus),
}
