//! Workflow lifecycle events.
//!
//! Published on the in-process event bus as each instance and step changes
//! state. Delivery is best-effort: no subscribers is fine, and a slow
//! subscriber never blocks execution.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    InstanceStarted {
        instance_id: Uuid,
        workflow_name: String,
        trigger_type: String,
    },
    StepStarted {
        instance_id: Uuid,
        step_number: u32,
        step_name: String,
        progress_percentage: f64,
    },
    StepCompleted {
        instance_id: Uuid,
        step_number: u32,
        step_name: String,
        duration_ms: u64,
    },
    StepFailed {
        instance_id: Uuid,
        step_number: u32,
        step_name: String,
        error: String,
        will_retry: bool,
    },
    InstanceCompleted {
        instance_id: Uuid,
        workflow_name: String,
        duration_ms: u64,
        steps_completed: u32,
    },
    InstanceFailed {
        instance_id: Uuid,
        workflow_name: String,
        error: String,
    },
    InstanceCancelled {
        instance_id: Uuid,
        workflow_name: String,
    },
}

impl WorkflowEvent {
    /// The instance this event belongs to.
    pub fn instance_id(&self) -> Uuid {
        match self {
            Self::InstanceStarted { instance_id, .. }
            | Self::StepStarted { instance_id, .. }
            | Self::StepCompleted { instance_id, .. }
            | Self::StepFailed { instance_id, .. }
            | Self::InstanceCompleted { instance_id, .. }
            | Self::InstanceFailed { instance_id, .. }
            | Self::InstanceCancelled { instance_id, .. } => *instance_id,
        }
    }
}
