//! Storage trait for workflow definitions, instances, and step rows.
//!
//! Uses RPITIT (return-position `impl Trait` in traits) for async methods,
//! consistent with the project's Rust 2024 edition approach. Implementations:
//! [`MemoryWorkflowRepository`](super::MemoryWorkflowRepository) in this
//! crate, `SqliteWorkflowRepository` in `lexflow-infra`.

use chrono::Duration;
use lexflow_types::error::RepositoryError;
use lexflow_types::workflow::{
    InstanceFilter, InstanceUpdate, StartInstanceRequest, StepUpdate, WorkflowDefinition,
    WorkflowInstance, WorkflowStep,
};
use uuid::Uuid;

pub trait WorkflowRepository: Send + Sync {
    // -- definitions --------------------------------------------------------

    /// Persist a workflow definition (insert or replace by id).
    fn save_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowDefinition>, RepositoryError>> + Send;

    /// List active definitions, optionally filtered by workflow type.
    fn list_definitions(
        &self,
        workflow_type: Option<&str>,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowDefinition>, RepositoryError>> + Send;

    /// Soft-delete: mark the definition inactive so no new instances start
    /// from it. Returns false when the definition does not exist.
    fn deactivate_definition(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<bool, RepositoryError>> + Send;

    // -- instances ----------------------------------------------------------

    /// Create a pending instance from an active definition, snapshotting
    /// name, version, step rows, and the retry budget. Fails with
    /// [`RepositoryError::DefinitionNotFound`] / `DefinitionInactive` when
    /// the definition is missing or retired.
    fn create_instance(
        &self,
        request: &StartInstanceRequest,
        triggered_by: &str,
    ) -> impl std::future::Future<Output = Result<WorkflowInstance, RepositoryError>> + Send;

    fn get_instance(
        &self,
        id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowInstance>, RepositoryError>> + Send;

    /// Filtered, paginated instance search ordered by `created_at`.
    fn search_instances(
        &self,
        filter: &InstanceFilter,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// Apply a partial update and return the updated instance.
    ///
    /// When the patch moves the instance to a terminal status and
    /// `completed_at` is unset, the store stamps it and computes
    /// `execution_time_seconds` from `started_at`.
    fn update_instance(
        &self,
        id: &Uuid,
        update: &InstanceUpdate,
    ) -> impl std::future::Future<Output = Result<WorkflowInstance, RepositoryError>> + Send;

    // -- steps --------------------------------------------------------------

    /// All step rows for an instance, ordered by step number.
    fn get_steps(
        &self,
        instance_id: &Uuid,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowStep>, RepositoryError>> + Send;

    fn update_step(
        &self,
        instance_id: &Uuid,
        step_number: u32,
        update: &StepUpdate,
    ) -> impl std::future::Future<Output = Result<WorkflowStep, RepositoryError>> + Send;

    // -- maintenance --------------------------------------------------------

    fn list_running_instances(
        &self,
    ) -> impl std::future::Future<Output = Result<Vec<WorkflowInstance>, RepositoryError>> + Send;

    /// Force-fail running instances whose `started_at` is older than the
    /// cutoff (crashed executor, lost task). Returns the number of instances
    /// reaped.
    fn mark_stale_as_failed(
        &self,
        older_than: Duration,
    ) -> impl std::future::Future<Output = Result<u64, RepositoryError>> + Send;
}
