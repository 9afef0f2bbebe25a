//! In-memory workflow repository backed by `DashMap`.
//!
//! Used by the engine test-suite and by embedded deployments that do not
//! need durability. Semantics match `SqliteWorkflowRepository` in
//! `lexflow-infra`, including terminal-status stamping and the stale reaper.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use lexflow_types::error::RepositoryError;
use lexflow_types::workflow::{
    InstanceFilter, InstanceUpdate, SortOrder, StartInstanceRequest, StepUpdate,
    WorkflowDefinition, WorkflowInstance, WorkflowStatus, WorkflowStep,
};
use uuid::Uuid;

use super::workflow::WorkflowRepository;

/// DashMap-backed store. Step rows are kept per instance, already ordered.
#[derive(Debug, Default)]
pub struct MemoryWorkflowRepository {
    definitions: DashMap<Uuid, WorkflowDefinition>,
    instances: DashMap<Uuid, WorkflowInstance>,
    steps: DashMap<Uuid, Vec<WorkflowStep>>,
}

impl MemoryWorkflowRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Apply a partial patch, stamping `completed_at` / `execution_time_seconds`
/// on the first transition into a terminal status.
fn apply_instance_update(instance: &mut WorkflowInstance, update: &InstanceUpdate) {
    if let Some(status) = update.status {
        instance.status = status;
        if status.is_terminal() && instance.completed_at.is_none() {
            let now = Utc::now();
            instance.completed_at = Some(now);
            if let Some(started) = instance.started_at {
                instance.execution_time_seconds =
                    Some((now - started).num_milliseconds() as f64 / 1000.0);
            }
        }
    }
    if let Some(current_step) = update.current_step {
        instance.current_step = current_step;
    }
    if let Some(name) = &update.current_step_name {
        instance.current_step_name = Some(name.clone());
    }
    if let Some(progress) = update.progress_percentage {
        instance.progress_percentage = progress;
    }
    if let Some(output) = &update.output_data {
        instance.output_data = output.clone();
    }
    if let Some(error) = &update.error_message {
        instance.error_message = Some(error.clone());
    }
    if let Some(started_at) = update.started_at {
        instance.started_at = Some(started_at);
    }
}

fn apply_step_update(step: &mut WorkflowStep, update: &StepUpdate) {
    if let Some(status) = update.status {
        step.status = status;
    }
    if let Some(input) = &update.input_data {
        step.input_data = input.clone();
    }
    if let Some(output) = &update.output_data {
        step.output_data = output.clone();
    }
    if let Some(error) = &update.error_message {
        step.error_message = Some(error.clone());
    }
    if let Some(started_at) = update.started_at {
        step.started_at = Some(started_at);
    }
    if let Some(completed_at) = update.completed_at {
        step.completed_at = Some(completed_at);
    }
    if let Some(secs) = update.execution_time_seconds {
        step.execution_time_seconds = Some(secs);
    }
}

impl WorkflowRepository for MemoryWorkflowRepository {
    async fn save_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<(), RepositoryError> {
        self.definitions.insert(definition.id, definition.clone());
        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        Ok(self.definitions.get(id).map(|entry| entry.clone()))
    }

    async fn list_definitions(
        &self,
        workflow_type: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let mut definitions: Vec<WorkflowDefinition> = self
            .definitions
            .iter()
            .filter(|entry| entry.is_active)
            .filter(|entry| workflow_type.is_none_or(|wt| entry.workflow_type == wt))
            .map(|entry| entry.clone())
            .collect();
        definitions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(definitions)
    }

    async fn deactivate_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        match self.definitions.get_mut(id) {
            Some(mut entry) => {
                entry.is_active = false;
                entry.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn create_instance(
        &self,
        request: &StartInstanceRequest,
        triggered_by: &str,
    ) -> Result<WorkflowInstance, RepositoryError> {
        let definition = self
            .definitions
            .get(&request.definition_id)
            .map(|entry| entry.clone())
            .ok_or(RepositoryError::DefinitionNotFound)?;
        if !definition.is_active {
            return Err(RepositoryError::DefinitionInactive);
        }

        let instance_id = Uuid::now_v7();
        let steps: Vec<WorkflowStep> = definition
            .steps
            .iter()
            .enumerate()
            .map(|(idx, spec)| WorkflowStep::from_spec(instance_id, (idx + 1) as u32, spec))
            .collect();

        let instance = WorkflowInstance {
            id: instance_id,
            definition_id: definition.id,
            workflow_name: definition.name.clone(),
            workflow_version: definition.version.clone(),
            case_id: request.case_id.clone(),
            batch_id: request.batch_id.clone(),
            triggered_by: triggered_by.to_string(),
            trigger_type: request.trigger_type,
            status: WorkflowStatus::Pending,
            current_step: 0,
            current_step_name: None,
            total_steps: steps.len() as u32,
            progress_percentage: 0.0,
            retry_attempts: definition.retry_attempts,
            input_data: request.input_data.clone(),
            output_data: lexflow_types::workflow::JsonMap::new(),
            error_message: None,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            execution_time_seconds: None,
        };

        self.instances.insert(instance_id, instance.clone());
        self.steps.insert(instance_id, steps);
        Ok(instance)
    }

    async fn get_instance(&self, id: &Uuid) -> Result<Option<WorkflowInstance>, RepositoryError> {
        Ok(self.instances.get(id).map(|entry| entry.clone()))
    }

    async fn search_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let mut matches: Vec<WorkflowInstance> = self
            .instances
            .iter()
            .filter(|entry| {
                filter
                    .case_id
                    .as_deref()
                    .is_none_or(|c| entry.case_id.as_deref() == Some(c))
                    && filter.status.is_none_or(|s| entry.status == s)
                    && filter
                        .triggered_by
                        .as_deref()
                        .is_none_or(|t| entry.triggered_by == t)
                    && filter.created_from.is_none_or(|from| entry.created_at >= from)
                    && filter.created_to.is_none_or(|to| entry.created_at <= to)
            })
            .map(|entry| entry.clone())
            .collect();

        match filter.sort {
            SortOrder::Asc => matches.sort_by(|a, b| a.created_at.cmp(&b.created_at)),
            SortOrder::Desc => matches.sort_by(|a, b| b.created_at.cmp(&a.created_at)),
        }

        Ok(matches
            .into_iter()
            .skip(filter.offset as usize)
            .take(filter.limit as usize)
            .collect())
    }

    async fn update_instance(
        &self,
        id: &Uuid,
        update: &InstanceUpdate,
    ) -> Result<WorkflowInstance, RepositoryError> {
        let mut entry = self.instances.get_mut(id).ok_or(RepositoryError::NotFound)?;
        apply_instance_update(&mut entry, update);
        Ok(entry.clone())
    }

    async fn get_steps(&self, instance_id: &Uuid) -> Result<Vec<WorkflowStep>, RepositoryError> {
        Ok(self
            .steps
            .get(instance_id)
            .map(|entry| entry.clone())
            .unwrap_or_default())
    }

    async fn update_step(
        &self,
        instance_id: &Uuid,
        step_number: u32,
        update: &StepUpdate,
    ) -> Result<WorkflowStep, RepositoryError> {
        let mut entry = self
            .steps
            .get_mut(instance_id)
            .ok_or(RepositoryError::NotFound)?;
        let step = entry
            .iter_mut()
            .find(|s| s.step_number == step_number)
            .ok_or(RepositoryError::NotFound)?;
        apply_step_update(step, update);
        Ok(step.clone())
    }

    async fn list_running_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        Ok(self
            .instances
            .iter()
            .filter(|entry| entry.status == WorkflowStatus::Running)
            .map(|entry| entry.clone())
            .collect())
    }

    async fn mark_stale_as_failed(&self, older_than: Duration) -> Result<u64, RepositoryError> {
        let cutoff = Utc::now() - older_than;
        let message = format!("workflow timed out after {} hours", older_than.num_hours());
        let mut reaped = 0u64;
        for mut entry in self.instances.iter_mut() {
            if entry.status == WorkflowStatus::Running
                && entry.started_at.is_some_and(|started| started < cutoff)
            {
                apply_instance_update(
                    &mut entry,
                    &InstanceUpdate::failed(message.clone()),
                );
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}
