//! Workflow domain types: definitions, instances, and per-step audit records.
//!
//! A [`WorkflowDefinition`] is a declarative template. Starting one produces a
//! [`WorkflowInstance`] plus one [`WorkflowStep`] row per step, all snapshotted
//! at creation time so that later edits to the definition never affect runs
//! already in flight.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// JSON object used for workflow inputs, outputs, and step parameters.
pub type JsonMap = serde_json::Map<String, Value>;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Lifecycle status shared by instances and steps.
///
/// `Paused` and `Cancelled` are only ever written by external callers; the
/// engine itself moves instances along `Pending -> Running -> Completed/Failed`
/// and honors a cancellation request at the next step boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Stable snake_case form, matching the serde representation. Used as the
    /// storage encoding.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Parse the storage encoding back into a status.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "running" => Some(Self::Running),
            "paused" => Some(Self::Paused),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }
}

/// How an instance was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Manual,
    Scheduled,
    Event,
}

impl TriggerType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::Scheduled => "scheduled",
            Self::Event => "event",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(Self::Manual),
            "scheduled" => Some(Self::Scheduled),
            "event" => Some(Self::Event),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

/// One step of a workflow definition.
///
/// `depends_on` and `parallel_group` are carried through to the per-instance
/// step rows but execution is strictly sequential; they exist so definitions
/// authored for a richer scheduler round-trip unchanged.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepSpec {
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default = "default_step_type")]
    pub step_type: String,
    #[serde(default)]
    pub operator: String,
    #[serde(default)]
    pub parameters: JsonMap,
    #[serde(default)]
    pub depends_on: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
}

fn default_step_type() -> String {
    "generic".to_string()
}

/// Declarative workflow template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: Uuid,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub version: String,
    /// Free-form category, e.g. "ediscovery" or "privilege_review".
    pub workflow_type: String,
    pub steps: Vec<StepSpec>,
    /// Documentation-grade JSON-schema hints. Not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_schema: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_schema: Option<Value>,
    #[serde(default = "default_timeout_minutes")]
    pub default_timeout_minutes: u32,
    /// Per-step retry budget, snapshotted onto each instance at start.
    #[serde(default)]
    pub retry_attempts: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_timeout_minutes() -> u32 {
    60
}

fn default_true() -> bool {
    true
}

impl WorkflowDefinition {
    /// Create a new active definition with fresh id and timestamps.
    pub fn new(
        name: impl Into<String>,
        version: impl Into<String>,
        workflow_type: impl Into<String>,
        steps: Vec<StepSpec>,
        created_by: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            name: name.into(),
            description: None,
            version: version.into(),
            workflow_type: workflow_type.into(),
            steps,
            input_schema: None,
            output_schema: None,
            default_timeout_minutes: default_timeout_minutes(),
            retry_attempts: 0,
            tags: Vec::new(),
            is_active: true,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Structural validation: non-empty name and version, and every
    /// `depends_on` entry referencing an earlier (1-based) step.
    ///
    /// A definition with zero steps is valid here; starting it fails at
    /// execution time instead.
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("workflow name must not be empty".to_string());
        }
        if self.version.trim().is_empty() {
            return Err("workflow version must not be empty".to_string());
        }
        for (idx, step) in self.steps.iter().enumerate() {
            let own_number = (idx + 1) as u32;
            for dep in &step.depends_on {
                if *dep == 0 || *dep >= own_number {
                    return Err(format!(
                        "step {} depends on step {}, which is not an earlier step",
                        own_number, dep
                    ));
                }
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Instances
// ---------------------------------------------------------------------------

/// A single run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub definition_id: Uuid,
    /// Name and version captured from the definition at start time.
    pub workflow_name: String,
    pub workflow_version: String,
    /// Legal-matter correlation handles. Opaque to the engine.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub triggered_by: String,
    pub trigger_type: TriggerType,
    pub status: WorkflowStatus,
    /// 1-based number of the most recently started step; 0 before any step.
    pub current_step: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step_name: Option<String>,
    pub total_steps: u32,
    /// `current_step / total_steps * 100`, monotonically non-decreasing.
    pub progress_percentage: f64,
    /// Retry budget per step, snapshotted from the definition.
    pub retry_attempts: u32,
    pub input_data: JsonMap,
    pub output_data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,
}

impl WorkflowInstance {
    /// Progress for having started step `n` of `total`, as a percentage.
    pub fn progress_for(step_number: u32, total_steps: u32) -> f64 {
        if total_steps == 0 {
            return 0.0;
        }
        f64::from(step_number) / f64::from(total_steps) * 100.0
    }
}

/// Per-instance audit record for one step, snapshotted from the definition's
/// [`StepSpec`] when the instance is created. `step_number` is 1-based.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: Uuid,
    pub instance_id: Uuid,
    pub step_number: u32,
    pub step_name: String,
    pub step_type: String,
    pub operator_name: String,
    pub parameters: JsonMap,
    pub depends_on_steps: Vec<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parallel_group: Option<String>,
    pub status: WorkflowStatus,
    /// Context snapshot taken just before the operator ran.
    pub input_data: JsonMap,
    pub output_data: JsonMap,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_seconds: Option<f64>,
}

impl WorkflowStep {
    /// Build the pending step row for `spec` at 1-based position `step_number`.
    /// Empty names default to `"Step {n}"`.
    pub fn from_spec(instance_id: Uuid, step_number: u32, spec: &StepSpec) -> Self {
        let step_name = if spec.name.trim().is_empty() {
            format!("Step {step_number}")
        } else {
            spec.name.clone()
        };
        Self {
            id: Uuid::now_v7(),
            instance_id,
            step_number,
            step_name,
            step_type: spec.step_type.clone(),
            operator_name: spec.operator.clone(),
            parameters: spec.parameters.clone(),
            depends_on_steps: spec.depends_on.clone(),
            parallel_group: spec.parallel_group.clone(),
            status: WorkflowStatus::Pending,
            input_data: JsonMap::new(),
            output_data: JsonMap::new(),
            error_message: None,
            started_at: None,
            completed_at: None,
            execution_time_seconds: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Requests, filters, and partial updates
// ---------------------------------------------------------------------------

/// Request to start a new instance of a definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartInstanceRequest {
    pub definition_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub batch_id: Option<String>,
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub input_data: JsonMap,
}

/// Sort direction for instance searches (always over `created_at`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Asc,
    Desc,
}

/// Search filter for workflow instances. All criteria are optional and
/// combine with AND.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_from: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_to: Option<DateTime<Utc>>,
    #[serde(default)]
    pub offset: u32,
    #[serde(default = "default_limit")]
    pub limit: u32,
    #[serde(default = "default_sort")]
    pub sort: SortOrder,
}

fn default_limit() -> u32 {
    50
}

fn default_sort() -> SortOrder {
    SortOrder::Desc
}

impl Default for InstanceFilter {
    fn default() -> Self {
        Self {
            case_id: None,
            status: None,
            triggered_by: None,
            created_from: None,
            created_to: None,
            offset: 0,
            limit: default_limit(),
            sort: default_sort(),
        }
    }
}

impl InstanceFilter {
    /// Filter matching only instances with the given status.
    pub fn with_status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }
}

/// Partial update for a workflow instance. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InstanceUpdate {
    pub status: Option<WorkflowStatus>,
    pub current_step: Option<u32>,
    pub current_step_name: Option<String>,
    pub progress_percentage: Option<f64>,
    pub output_data: Option<JsonMap>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

impl InstanceUpdate {
    pub fn status(status: WorkflowStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// Patch that marks an instance failed with the given message.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: Some(WorkflowStatus::Failed),
            error_message: Some(message.into()),
            ..Self::default()
        }
    }
}

/// Partial update for a step row. `None` fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StepUpdate {
    pub status: Option<WorkflowStatus>,
    pub input_data: Option<JsonMap>,
    pub output_data: Option<JsonMap>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub execution_time_seconds: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(name: &str, step_type: &str) -> StepSpec {
        StepSpec {
            name: name.to_string(),
            step_type: step_type.to_string(),
            operator: "TestOperator".to_string(),
            parameters: JsonMap::new(),
            depends_on: Vec::new(),
            parallel_group: None,
        }
    }

    #[test]
    fn status_roundtrips_snake_case() {
        let json = serde_json::to_string(&WorkflowStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
        let back: WorkflowStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(back, WorkflowStatus::Cancelled);
        assert_eq!(WorkflowStatus::parse("running"), Some(WorkflowStatus::Running));
        assert_eq!(WorkflowStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Pending.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
    }

    #[test]
    fn step_spec_defaults_from_json() {
        let spec: StepSpec = serde_json::from_value(json!({
            "name": "Privilege Classification",
            "operator": "LLMOperator"
        }))
        .unwrap();
        assert_eq!(spec.step_type, "generic");
        assert!(spec.parameters.is_empty());
        assert!(spec.depends_on.is_empty());
    }

    #[test]
    fn definition_validate_rejects_forward_dependency() {
        let mut def = WorkflowDefinition::new(
            "Review",
            "1.0",
            "ediscovery",
            vec![spec("Extract", "document_extraction"), spec("Summarize", "ai_analysis")],
            "tester",
        );
        def.steps[0].depends_on = vec![2];
        let err = def.validate().unwrap_err();
        assert!(err.contains("step 1"));

        def.steps[0].depends_on = Vec::new();
        def.steps[1].depends_on = vec![1];
        assert!(def.validate().is_ok());
    }

    #[test]
    fn definition_validate_rejects_blank_name() {
        let def = WorkflowDefinition::new("  ", "1.0", "ediscovery", Vec::new(), "tester");
        assert!(def.validate().is_err());
    }

    #[test]
    fn step_from_spec_defaults_blank_name() {
        let instance_id = Uuid::now_v7();
        let step = WorkflowStep::from_spec(instance_id, 3, &spec("", "validation"));
        assert_eq!(step.step_name, "Step 3");
        assert_eq!(step.step_number, 3);
        assert_eq!(step.status, WorkflowStatus::Pending);
    }

    #[test]
    fn progress_arithmetic() {
        assert_eq!(WorkflowInstance::progress_for(0, 5), 0.0);
        assert_eq!(WorkflowInstance::progress_for(2, 5), 40.0);
        assert_eq!(WorkflowInstance::progress_for(5, 5), 100.0);
        assert_eq!(WorkflowInstance::progress_for(1, 0), 0.0);
    }

    #[test]
    fn instance_filter_defaults() {
        let filter: InstanceFilter = serde_json::from_value(json!({})).unwrap();
        assert_eq!(filter.limit, 50);
        assert_eq!(filter.offset, 0);
        assert_eq!(filter.sort, SortOrder::Desc);
    }
}
