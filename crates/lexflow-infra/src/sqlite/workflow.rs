//! SQLite workflow repository implementation.
//!
//! Implements `WorkflowRepository` from `lexflow-core` using sqlx with split
//! read/write pools. Definitions are stored as JSON blobs with indexed
//! columns for listing; instances and step rows are full column tables so
//! the monitor can query them by status without JSON parsing.

use chrono::{DateTime, Duration, Utc};
use lexflow_core::repository::workflow::WorkflowRepository;
use lexflow_types::error::RepositoryError;
use lexflow_types::workflow::{
    InstanceFilter, InstanceUpdate, JsonMap, SortOrder, StartInstanceRequest, StepUpdate,
    TriggerType, WorkflowDefinition, WorkflowInstance, WorkflowStatus, WorkflowStep,
};
use sqlx::Row;
use uuid::Uuid;

use super::pool::DatabasePool;

/// SQLite-backed implementation of `WorkflowRepository`.
pub struct SqliteWorkflowRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowRepository {
    /// Create a new repository backed by the given database pool.
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

// ---------------------------------------------------------------------------
// Internal row types
// ---------------------------------------------------------------------------

struct DefinitionRow {
    definition: String,
}

impl DefinitionRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            definition: row.try_get("definition")?,
        })
    }

    fn into_definition(self) -> Result<WorkflowDefinition, RepositoryError> {
        serde_json::from_str(&self.definition)
            .map_err(|e| RepositoryError::Query(format!("invalid workflow definition JSON: {e}")))
    }
}

struct InstanceRow {
    id: String,
    definition_id: String,
    workflow_name: String,
    workflow_version: String,
    case_id: Option<String>,
    batch_id: Option<String>,
    triggered_by: String,
    trigger_type: String,
    status: String,
    current_step: i64,
    current_step_name: Option<String>,
    total_steps: i64,
    progress_percentage: f64,
    retry_attempts: i64,
    input_data: String,
    output_data: String,
    error_message: Option<String>,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    execution_time_seconds: Option<f64>,
}

impl InstanceRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            definition_id: row.try_get("definition_id")?,
            workflow_name: row.try_get("workflow_name")?,
            workflow_version: row.try_get("workflow_version")?,
            case_id: row.try_get("case_id")?,
            batch_id: row.try_get("batch_id")?,
            triggered_by: row.try_get("triggered_by")?,
            trigger_type: row.try_get("trigger_type")?,
            status: row.try_get("status")?,
            current_step: row.try_get("current_step")?,
            current_step_name: row.try_get("current_step_name")?,
            total_steps: row.try_get("total_steps")?,
            progress_percentage: row.try_get("progress_percentage")?,
            retry_attempts: row.try_get("retry_attempts")?,
            input_data: row.try_get("input_data")?,
            output_data: row.try_get("output_data")?,
            error_message: row.try_get("error_message")?,
            created_at: row.try_get("created_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            execution_time_seconds: row.try_get("execution_time_seconds")?,
        })
    }

    fn into_instance(self) -> Result<WorkflowInstance, RepositoryError> {
        Ok(WorkflowInstance {
            id: parse_uuid(&self.id)?,
            definition_id: parse_uuid(&self.definition_id)?,
            workflow_name: self.workflow_name,
            workflow_version: self.workflow_version,
            case_id: self.case_id,
            batch_id: self.batch_id,
            triggered_by: self.triggered_by,
            trigger_type: parse_trigger_type(&self.trigger_type)?,
            status: parse_status(&self.status)?,
            current_step: self.current_step as u32,
            current_step_name: self.current_step_name,
            total_steps: self.total_steps as u32,
            progress_percentage: self.progress_percentage,
            retry_attempts: self.retry_attempts as u32,
            input_data: parse_json_map(&self.input_data, "input_data")?,
            output_data: parse_json_map(&self.output_data, "output_data")?,
            error_message: self.error_message,
            created_at: parse_datetime(&self.created_at)?,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            execution_time_seconds: self.execution_time_seconds,
        })
    }
}

struct StepRow {
    id: String,
    instance_id: String,
    step_number: i64,
    step_name: String,
    step_type: String,
    operator_name: String,
    parameters: String,
    depends_on_steps: String,
    parallel_group: Option<String>,
    status: String,
    input_data: String,
    output_data: String,
    error_message: Option<String>,
    started_at: Option<String>,
    completed_at: Option<String>,
    execution_time_seconds: Option<f64>,
}

impl StepRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            instance_id: row.try_get("instance_id")?,
            step_number: row.try_get("step_number")?,
            step_name: row.try_get("step_name")?,
            step_type: row.try_get("step_type")?,
            operator_name: row.try_get("operator_name")?,
            parameters: row.try_get("parameters")?,
            depends_on_steps: row.try_get("depends_on_steps")?,
            parallel_group: row.try_get("parallel_group")?,
            status: row.try_get("status")?,
            input_data: row.try_get("input_data")?,
            output_data: row.try_get("output_data")?,
            error_message: row.try_get("error_message")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            execution_time_seconds: row.try_get("execution_time_seconds")?,
        })
    }

    fn into_step(self) -> Result<WorkflowStep, RepositoryError> {
        let depends_on_steps: Vec<u32> = serde_json::from_str(&self.depends_on_steps)
            .map_err(|e| RepositoryError::Query(format!("invalid depends_on_steps: {e}")))?;
        Ok(WorkflowStep {
            id: parse_uuid(&self.id)?,
            instance_id: parse_uuid(&self.instance_id)?,
            step_number: self.step_number as u32,
            step_name: self.step_name,
            step_type: self.step_type,
            operator_name: self.operator_name,
            parameters: parse_json_map(&self.parameters, "parameters")?,
            depends_on_steps,
            parallel_group: self.parallel_group,
            status: parse_status(&self.status)?,
            input_data: parse_json_map(&self.input_data, "input_data")?,
            output_data: parse_json_map(&self.output_data, "output_data")?,
            error_message: self.error_message,
            started_at: self.started_at.as_deref().map(parse_datetime).transpose()?,
            completed_at: self
                .completed_at
                .as_deref()
                .map(parse_datetime)
                .transpose()?,
            execution_time_seconds: self.execution_time_seconds,
        })
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn parse_uuid(s: &str) -> Result<Uuid, RepositoryError> {
    s.parse::<Uuid>()
        .map_err(|e| RepositoryError::Query(format!("invalid UUID: {e}")))
}

fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

fn parse_status(s: &str) -> Result<WorkflowStatus, RepositoryError> {
    WorkflowStatus::parse(s)
        .ok_or_else(|| RepositoryError::Query(format!("invalid workflow status: {s}")))
}

fn parse_trigger_type(s: &str) -> Result<TriggerType, RepositoryError> {
    TriggerType::parse(s)
        .ok_or_else(|| RepositoryError::Query(format!("invalid trigger type: {s}")))
}

fn parse_json_map(s: &str, field: &str) -> Result<JsonMap, RepositoryError> {
    serde_json::from_str(s).map_err(|e| RepositoryError::Query(format!("invalid {field}: {e}")))
}

fn to_json_string<T: serde::Serialize>(value: &T) -> Result<String, RepositoryError> {
    serde_json::to_string(value).map_err(|e| RepositoryError::Query(e.to_string()))
}

// ---------------------------------------------------------------------------
// WorkflowRepository impl
// ---------------------------------------------------------------------------

impl WorkflowRepository for SqliteWorkflowRepository {
    async fn save_definition(
        &self,
        definition: &WorkflowDefinition,
    ) -> Result<(), RepositoryError> {
        let definition_json = to_json_string(definition)?;

        sqlx::query(
            r#"INSERT INTO workflow_definitions
               (id, name, workflow_type, is_active, definition, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT(id) DO UPDATE SET
                 name = excluded.name,
                 workflow_type = excluded.workflow_type,
                 is_active = excluded.is_active,
                 definition = excluded.definition,
                 updated_at = excluded.updated_at"#,
        )
        .bind(definition.id.to_string())
        .bind(&definition.name)
        .bind(&definition.workflow_type)
        .bind(definition.is_active)
        .bind(&definition_json)
        .bind(format_datetime(&definition.created_at))
        .bind(format_datetime(&definition.updated_at))
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(())
    }

    async fn get_definition(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowDefinition>, RepositoryError> {
        let row = sqlx::query("SELECT definition FROM workflow_definitions WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = DefinitionRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_definition()?))
            }
            None => Ok(None),
        }
    }

    async fn list_definitions(
        &self,
        workflow_type: Option<&str>,
    ) -> Result<Vec<WorkflowDefinition>, RepositoryError> {
        let rows = match workflow_type {
            Some(wt) => {
                sqlx::query(
                    "SELECT definition FROM workflow_definitions WHERE is_active = 1 AND workflow_type = ? ORDER BY created_at ASC",
                )
                .bind(wt)
                .fetch_all(&self.pool.reader)
                .await
            }
            None => {
                sqlx::query(
                    "SELECT definition FROM workflow_definitions WHERE is_active = 1 ORDER BY created_at ASC",
                )
                .fetch_all(&self.pool.reader)
                .await
            }
        }
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut definitions = Vec::with_capacity(rows.len());
        for row in &rows {
            let r =
                DefinitionRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            definitions.push(r.into_definition()?);
        }
        Ok(definitions)
    }

    async fn deactivate_definition(&self, id: &Uuid) -> Result<bool, RepositoryError> {
        // Read-modify-write keeps the JSON blob and the indexed column in
        // agreement.
        let Some(mut definition) = self.get_definition(id).await? else {
            return Ok(false);
        };
        definition.is_active = false;
        definition.updated_at = Utc::now();
        self.save_definition(&definition).await?;
        Ok(true)
    }

    async fn create_instance(
        &self,
        request: &StartInstanceRequest,
        triggered_by: &str,
    ) -> Result<WorkflowInstance, RepositoryError> {
        let definition = self
            .get_definition(&request.definition_id)
            .await?
            .ok_or(RepositoryError::DefinitionNotFound)?;
        if !definition.is_active {
            return Err(RepositoryError::DefinitionInactive);
        }

        let instance_id = Uuid::now_v7();
        let now = Utc::now();
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
            output_data: JsonMap::new(),
            error_message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            execution_time_seconds: None,
        };

        // Instance and its step rows land atomically.
        let mut tx = self
            .pool
            .writer
            .begin()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        sqlx::query(
            r#"INSERT INTO workflow_instances
               (id, definition_id, workflow_name, workflow_version, case_id, batch_id,
                triggered_by, trigger_type, status, current_step, current_step_name,
                total_steps, progress_percentage, retry_attempts, input_data, output_data,
                error_message, created_at, started_at, completed_at, execution_time_seconds)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(instance.id.to_string())
        .bind(instance.definition_id.to_string())
        .bind(&instance.workflow_name)
        .bind(&instance.workflow_version)
        .bind(&instance.case_id)
        .bind(&instance.batch_id)
        .bind(&instance.triggered_by)
        .bind(instance.trigger_type.as_str())
        .bind(instance.status.as_str())
        .bind(instance.current_step as i64)
        .bind(&instance.current_step_name)
        .bind(instance.total_steps as i64)
        .bind(instance.progress_percentage)
        .bind(instance.retry_attempts as i64)
        .bind(to_json_string(&instance.input_data)?)
        .bind(to_json_string(&instance.output_data)?)
        .bind(&instance.error_message)
        .bind(format_datetime(&instance.created_at))
        .bind(Option::<String>::None)
        .bind(Option::<String>::None)
        .bind(Option::<f64>::None)
        .execute(&mut *tx)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        for step in &steps {
            sqlx::query(
                r#"INSERT INTO workflow_steps
                   (id, instance_id, step_number, step_name, step_type, operator_name,
                    parameters, depends_on_steps, parallel_group, status, input_data,
                    output_data, error_message, started_at, completed_at, execution_time_seconds)
                   VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            )
            .bind(step.id.to_string())
            .bind(step.instance_id.to_string())
            .bind(step.step_number as i64)
            .bind(&step.step_name)
            .bind(&step.step_type)
            .bind(&step.operator_name)
            .bind(to_json_string(&step.parameters)?)
            .bind(to_json_string(&step.depends_on_steps)?)
            .bind(&step.parallel_group)
            .bind(step.status.as_str())
            .bind(to_json_string(&step.input_data)?)
            .bind(to_json_string(&step.output_data)?)
            .bind(&step.error_message)
            .bind(Option::<String>::None)
            .bind(Option::<String>::None)
            .bind(Option::<f64>::None)
            .execute(&mut *tx)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;
        }

        tx.commit()
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(instance)
    }

    async fn get_instance(
        &self,
        id: &Uuid,
    ) -> Result<Option<WorkflowInstance>, RepositoryError> {
        let row = sqlx::query("SELECT * FROM workflow_instances WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        match row {
            Some(row) => {
                let r = InstanceRow::from_row(&row)
                    .map_err(|e| RepositoryError::Query(e.to_string()))?;
                Ok(Some(r.into_instance()?))
            }
            None => Ok(None),
        }
    }

    async fn search_instances(
        &self,
        filter: &InstanceFilter,
    ) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        // NULL-bound criteria collapse to no-ops, so one statement covers
        // every filter combination.
        let order = match filter.sort {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        };
        let query = format!(
            r#"SELECT * FROM workflow_instances
               WHERE (?1 IS NULL OR case_id = ?1)
                 AND (?2 IS NULL OR status = ?2)
                 AND (?3 IS NULL OR triggered_by = ?3)
                 AND (?4 IS NULL OR created_at >= ?4)
                 AND (?5 IS NULL OR created_at <= ?5)
               ORDER BY created_at {order}
               LIMIT ?6 OFFSET ?7"#
        );

        let rows = sqlx::query(&query)
            .bind(&filter.case_id)
            .bind(filter.status.map(|s| s.as_str()))
            .bind(&filter.triggered_by)
            .bind(filter.created_from.as_ref().map(format_datetime))
            .bind(filter.created_to.as_ref().map(format_datetime))
            .bind(filter.limit as i64)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let r =
                InstanceRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            instances.push(r.into_instance()?);
        }
        Ok(instances)
    }

    async fn update_instance(
        &self,
        id: &Uuid,
        update: &InstanceUpdate,
    ) -> Result<WorkflowInstance, RepositoryError> {
        let output_data = update
            .output_data
            .as_ref()
            .map(to_json_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE workflow_instances SET
                 status = COALESCE(?, status),
                 current_step = COALESCE(?, current_step),
                 current_step_name = COALESCE(?, current_step_name),
                 progress_percentage = COALESCE(?, progress_percentage),
                 output_data = COALESCE(?, output_data),
                 error_message = COALESCE(?, error_message),
                 started_at = COALESCE(?, started_at)
               WHERE id = ?"#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.current_step.map(|s| s as i64))
        .bind(&update.current_step_name)
        .bind(update.progress_percentage)
        .bind(&output_data)
        .bind(&update.error_message)
        .bind(update.started_at.as_ref().map(format_datetime))
        .bind(id.to_string())
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        // First transition into a terminal status stamps completion timing.
        if update.status.is_some_and(|s| s.is_terminal()) {
            let current = self
                .get_instance(id)
                .await?
                .ok_or(RepositoryError::NotFound)?;
            if current.completed_at.is_none() {
                let now = Utc::now();
                let execution_time = current
                    .started_at
                    .map(|started| (now - started).num_milliseconds() as f64 / 1000.0);
                sqlx::query(
                    "UPDATE workflow_instances SET completed_at = ?, execution_time_seconds = ? WHERE id = ?",
                )
                .bind(format_datetime(&now))
                .bind(execution_time)
                .bind(id.to_string())
                .execute(&self.pool.writer)
                .await
                .map_err(|e| RepositoryError::Query(e.to_string()))?;
            }
        }

        self.get_instance(id).await?.ok_or(RepositoryError::NotFound)
    }

    async fn get_steps(&self, instance_id: &Uuid) -> Result<Vec<WorkflowStep>, RepositoryError> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_steps WHERE instance_id = ? ORDER BY step_number ASC",
        )
        .bind(instance_id.to_string())
        .fetch_all(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut steps = Vec::with_capacity(rows.len());
        for row in &rows {
            let r = StepRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            steps.push(r.into_step()?);
        }
        Ok(steps)
    }

    async fn update_step(
        &self,
        instance_id: &Uuid,
        step_number: u32,
        update: &StepUpdate,
    ) -> Result<WorkflowStep, RepositoryError> {
        let input_data = update.input_data.as_ref().map(to_json_string).transpose()?;
        let output_data = update
            .output_data
            .as_ref()
            .map(to_json_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE workflow_steps SET
                 status = COALESCE(?, status),
                 input_data = COALESCE(?, input_data),
                 output_data = COALESCE(?, output_data),
                 error_message = COALESCE(?, error_message),
                 started_at = COALESCE(?, started_at),
                 completed_at = COALESCE(?, completed_at),
                 execution_time_seconds = COALESCE(?, execution_time_seconds)
               WHERE instance_id = ? AND step_number = ?"#,
        )
        .bind(update.status.map(|s| s.as_str()))
        .bind(&input_data)
        .bind(&output_data)
        .bind(&update.error_message)
        .bind(update.started_at.as_ref().map(format_datetime))
        .bind(update.completed_at.as_ref().map(format_datetime))
        .bind(update.execution_time_seconds)
        .bind(instance_id.to_string())
        .bind(step_number as i64)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound);
        }

        let row = sqlx::query(
            "SELECT * FROM workflow_steps WHERE instance_id = ? AND step_number = ?",
        )
        .bind(instance_id.to_string())
        .bind(step_number as i64)
        .fetch_one(&self.pool.reader)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        StepRow::from_row(&row)
            .map_err(|e| RepositoryError::Query(e.to_string()))?
            .into_step()
    }

    async fn list_running_instances(&self) -> Result<Vec<WorkflowInstance>, RepositoryError> {
        let rows = sqlx::query("SELECT * FROM workflow_instances WHERE status = 'running'")
            .fetch_all(&self.pool.reader)
            .await
            .map_err(|e| RepositoryError::Query(e.to_string()))?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            let r =
                InstanceRow::from_row(row).map_err(|e| RepositoryError::Query(e.to_string()))?;
            instances.push(r.into_instance()?);
        }
        Ok(instances)
    }

    async fn mark_stale_as_failed(&self, older_than: Duration) -> Result<u64, RepositoryError> {
        let now = Utc::now();
        let cutoff = format_datetime(&(now - older_than));
        let message = format!("workflow timed out after {} hours", older_than.num_hours());

        let result = sqlx::query(
            r#"UPDATE workflow_instances
               SET status = 'failed', error_message = ?, completed_at = ?
               WHERE status = 'running' AND started_at IS NOT NULL AND started_at < ?"#,
        )
        .bind(&message)
        .bind(format_datetime(&now))
        .bind(&cutoff)
        .execute(&self.pool.writer)
        .await
        .map_err(|e| RepositoryError::Query(e.to_string()))?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lexflow_types::workflow::StepSpec;
    use serde_json::json;

    async fn test_repo() -> (SqliteWorkflowRepository, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("workflows.db");
        let url = format!("sqlite://{}?mode=rwc", db_path.display());
        let pool = DatabasePool::new(&url).await.unwrap();
        (SqliteWorkflowRepository::new(pool), dir)
    }

    fn sample_definition() -> WorkflowDefinition {
        let mut definition = WorkflowDefinition::new(
            "eDiscovery Document Analysis",
            "1.0",
            "ediscovery",
            vec![
                StepSpec {
                    name: "Document Extraction".to_string(),
                    step_type: "document_extraction".to_string(),
                    operator: "DocumentExtractor".to_string(),
                    parameters: JsonMap::new(),
                    depends_on: Vec::new(),
                    parallel_group: None,
                },
                StepSpec {
                    name: "AI Summarization".to_string(),
                    step_type: "ai_analysis".to_string(),
                    operator: "LLMOperator".to_string(),
                    parameters: serde_json::from_value(json!({"operation": "summarize"}))
                        .unwrap(),
                    depends_on: vec![1],
                    parallel_group: None,
                },
            ],
            "admin@firm.com",
        );
        definition.retry_attempts = 2;
        definition.tags = vec!["ediscovery".to_string(), "ai".to_string()];
        definition
    }

    fn start_request(definition_id: Uuid) -> StartInstanceRequest {
        StartInstanceRequest {
            definition_id,
            case_id: Some("CASE-001".to_string()),
            batch_id: Some("BATCH-7".to_string()),
            trigger_type: TriggerType::Manual,
            input_data: serde_json::from_value(json!({"text": "memo body"})).unwrap(),
        }
    }

    #[tokio::test]
    async fn definition_roundtrip_and_deactivation() {
        let (repo, _dir) = test_repo().await;
        let definition = sample_definition();
        repo.save_definition(&definition).await.unwrap();

        let loaded = repo.get_definition(&definition.id).await.unwrap().unwrap();
        assert_eq!(loaded.name, definition.name);
        assert_eq!(loaded.steps.len(), 2);
        assert_eq!(loaded.retry_attempts, 2);
        assert_eq!(loaded.steps[1].depends_on, vec![1]);

        assert_eq!(repo.list_definitions(None).await.unwrap().len(), 1);
        assert_eq!(
            repo.list_definitions(Some("ediscovery")).await.unwrap().len(),
            1
        );
        assert!(repo.list_definitions(Some("other")).await.unwrap().is_empty());

        assert!(repo.deactivate_definition(&definition.id).await.unwrap());
        assert!(repo.list_definitions(None).await.unwrap().is_empty());
        // The blob agrees with the indexed column.
        let loaded = repo.get_definition(&definition.id).await.unwrap().unwrap();
        assert!(!loaded.is_active);

        assert!(!repo.deactivate_definition(&Uuid::now_v7()).await.unwrap());
    }

    #[tokio::test]
    async fn create_instance_snapshots_definition_and_steps() {
        let (repo, _dir) = test_repo().await;
        let definition = sample_definition();
        repo.save_definition(&definition).await.unwrap();

        let instance = repo
            .create_instance(&start_request(definition.id), "analyst@firm.com")
            .await
            .unwrap();
        assert_eq!(instance.status, WorkflowStatus::Pending);
        assert_eq!(instance.total_steps, 2);
        assert_eq!(instance.retry_attempts, 2);

        let loaded = repo.get_instance(&instance.id).await.unwrap().unwrap();
        assert_eq!(loaded.workflow_name, definition.name);
        assert_eq!(loaded.case_id.as_deref(), Some("CASE-001"));
        assert_eq!(loaded.input_data["text"], "memo body");
        assert_eq!(loaded.trigger_type, TriggerType::Manual);

        let steps = repo.get_steps(&instance.id).await.unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].step_number, 1);
        assert_eq!(steps[1].step_type, "ai_analysis");
        assert_eq!(steps[1].parameters["operation"], "summarize");
        assert_eq!(steps[1].depends_on_steps, vec![1]);
    }

    #[tokio::test]
    async fn create_instance_rejects_missing_and_inactive() {
        let (repo, _dir) = test_repo().await;
        let missing = repo
            .create_instance(&start_request(Uuid::now_v7()), "tester")
            .await;
        assert!(matches!(missing, Err(RepositoryError::DefinitionNotFound)));

        let definition = sample_definition();
        repo.save_definition(&definition).await.unwrap();
        repo.deactivate_definition(&definition.id).await.unwrap();
        let inactive = repo
            .create_instance(&start_request(definition.id), "tester")
            .await;
        assert!(matches!(inactive, Err(RepositoryError::DefinitionInactive)));
    }

    #[tokio::test]
    async fn update_instance_patches_and_stamps_terminal() {
        let (repo, _dir) = test_repo().await;
        let definition = sample_definition();
        repo.save_definition(&definition).await.unwrap();
        let instance = repo
            .create_instance(&start_request(definition.id), "tester")
            .await
            .unwrap();

        let running = repo
            .update_instance(
                &instance.id,
                &InstanceUpdate {
                    status: Some(WorkflowStatus::Running),
                    started_at: Some(Utc::now() - Duration::seconds(3)),
                    current_step: Some(1),
                    current_step_name: Some("Document Extraction".to_string()),
                    progress_percentage: Some(50.0),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(running.status, WorkflowStatus::Running);
        assert_eq!(running.progress_percentage, 50.0);
        assert!(running.completed_at.is_none());

        let done = repo
            .update_instance(
                &instance.id,
                &InstanceUpdate::status(WorkflowStatus::Completed),
            )
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
        assert!(done.execution_time_seconds.unwrap() >= 3.0);
        // Unpatched fields survive.
        assert_eq!(done.current_step, 1);

        let missing = repo
            .update_instance(&Uuid::now_v7(), &InstanceUpdate::default())
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn update_step_patches_row() {
        let (repo, _dir) = test_repo().await;
        let definition = sample_definition();
        repo.save_definition(&definition).await.unwrap();
        let instance = repo
            .create_instance(&start_request(definition.id), "tester")
            .await
            .unwrap();

        let output: JsonMap = serde_json::from_value(json!({"summary": "short"})).unwrap();
        let step = repo
            .update_step(
                &instance.id,
                2,
                &StepUpdate {
                    status: Some(WorkflowStatus::Completed),
                    output_data: Some(output),
                    completed_at: Some(Utc::now()),
                    execution_time_seconds: Some(1.25),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(step.step_number, 2);
        assert_eq!(step.status, WorkflowStatus::Completed);
        assert_eq!(step.output_data["summary"], "short");
        assert_eq!(step.execution_time_seconds, Some(1.25));

        let missing = repo
            .update_step(&instance.id, 9, &StepUpdate::default())
            .await;
        assert!(matches!(missing, Err(RepositoryError::NotFound)));
    }

    #[tokio::test]
    async fn search_filters_sorts_and_paginates() {
        let (repo, _dir) = test_repo().await;
        let definition = sample_definition();
        repo.save_definition(&definition).await.unwrap();

        for user in ["alice", "alice", "bob"] {
            repo.create_instance(&start_request(definition.id), user)
                .await
                .unwrap();
        }

        let by_user = repo
            .search_instances(&InstanceFilter {
                triggered_by: Some("alice".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(by_user.len(), 2);

        let by_status = repo
            .search_instances(&InstanceFilter::with_status(WorkflowStatus::Pending))
            .await
            .unwrap();
        assert_eq!(by_status.len(), 3);
        assert!(
            repo.search_instances(&InstanceFilter::with_status(WorkflowStatus::Running))
                .await
                .unwrap()
                .is_empty()
        );

        let ascending = repo
            .search_instances(&InstanceFilter {
                sort: SortOrder::Asc,
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(ascending.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        let page = repo
            .search_instances(&InstanceFilter {
                offset: 2,
                limit: 10,
                ..Default::default()
            })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }

    #[tokio::test]
    async fn stale_reaper_bulk_fails_old_running() {
        let (repo, _dir) = test_repo().await;
        let definition = sample_definition();
        repo.save_definition(&definition).await.unwrap();

        let stale = repo
            .create_instance(&start_request(definition.id), "tester")
            .await
            .unwrap();
        repo.update_instance(
            &stale.id,
            &InstanceUpdate {
                status: Some(WorkflowStatus::Running),
                started_at: Some(Utc::now() - Duration::hours(30)),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        let fresh = repo
            .create_instance(&start_request(definition.id), "tester")
            .await
            .unwrap();
        repo.update_instance(
            &fresh.id,
            &InstanceUpdate {
                status: Some(WorkflowStatus::Running),
                started_at: Some(Utc::now()),
                ..Default::default()
            },
        )
        .await
        .unwrap();

        assert_eq!(repo.list_running_instances().await.unwrap().len(), 2);

        let reaped = repo.mark_stale_as_failed(Duration::hours(24)).await.unwrap();
        assert_eq!(reaped, 1);

        let failed = repo.get_instance(&stale.id).await.unwrap().unwrap();
        assert_eq!(failed.status, WorkflowStatus::Failed);
        assert!(failed.error_message.unwrap().contains("24 hours"));
        assert!(failed.completed_at.is_some());

        assert_eq!(repo.list_running_instances().await.unwrap().len(), 1);
    }
}
