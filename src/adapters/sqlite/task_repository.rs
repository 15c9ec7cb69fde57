//! SQLite implementation of [`TaskRepository`].

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{CoordinationPoint, Task, TaskPriority, TaskStatus};
use crate::domain::ports::{TaskFilter, TaskRepository};

#[derive(Clone)]
pub struct SqliteTaskRepository {
    pool: SqlitePool,
}

impl SqliteTaskRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    async fn load_dependencies(&self, task: &mut Task) -> DomainResult<()> {
        let deps: Vec<(String,)> =
            sqlx::query_as("SELECT depends_on_id FROM task_dependencies WHERE task_id = ?")
                .bind(task.id.to_string())
                .fetch_all(&self.pool)
                .await?;

        task.dependencies = deps
            .into_iter()
            .filter_map(|(id,)| Uuid::parse_str(&id).ok())
            .collect();
        Ok(())
    }

    async fn insert_dependencies(&self, task: &Task) -> DomainResult<()> {
        for dep in &task.dependencies {
            sqlx::query(
                "INSERT OR IGNORE INTO task_dependencies (task_id, depends_on_id) VALUES (?, ?)",
            )
            .bind(task.id.to_string())
            .bind(dep.to_string())
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[async_trait]
impl TaskRepository for SqliteTaskRepository {
    async fn create(&self, task: &Task) -> DomainResult<()> {
        let caps_json = serde_json::to_string(&task.required_capabilities)?;
        let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
        let config_json = task
            .execution_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO tasks (id, ticket_id, phase, task_type, description, priority, status,
               created_at, started_at, completed_at, assigned_agent_id, sandbox_id,
               required_capabilities, retry_count, max_retries, backoff_base_seconds,
               timeout_seconds, error_message, result, execution_config, conversation_id,
               persistence_dir)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(task.id.to_string())
        .bind(task.ticket_id.to_string())
        .bind(&task.phase)
        .bind(&task.task_type)
        .bind(&task.description)
        .bind(task.priority.to_string())
        .bind(task.status.as_str())
        .bind(task.created_at.to_rfc3339())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(&task.sandbox_id)
        .bind(&caps_json)
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(task.backoff_base_seconds)
        .bind(task.timeout_seconds)
        .bind(&task.error_message)
        .bind(&result_json)
        .bind(&config_json)
        .bind(task.conversation_id.map(|id| id.to_string()))
        .bind(&task.persistence_dir)
        .execute(&self.pool)
        .await?;

        self.insert_dependencies(task).await?;
        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Task>> {
        let row: Option<TaskRow> = sqlx::query_as("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(r) => {
                let mut task: Task = r.try_into()?;
                self.load_dependencies(&mut task).await?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    async fn update(&self, task: &Task) -> DomainResult<()> {
        let caps_json = serde_json::to_string(&task.required_capabilities)?;
        let result_json = task.result.as_ref().map(serde_json::to_string).transpose()?;
        let config_json = task
            .execution_config
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let result = sqlx::query(
            r#"UPDATE tasks SET phase = ?, task_type = ?, description = ?, priority = ?,
               status = ?, started_at = ?, completed_at = ?, assigned_agent_id = ?,
               sandbox_id = ?, required_capabilities = ?, retry_count = ?, max_retries = ?,
               backoff_base_seconds = ?, timeout_seconds = ?, error_message = ?, result = ?,
               execution_config = ?, conversation_id = ?, persistence_dir = ?
               WHERE id = ?"#,
        )
        .bind(&task.phase)
        .bind(&task.task_type)
        .bind(&task.description)
        .bind(task.priority.to_string())
        .bind(task.status.as_str())
        .bind(task.started_at.map(|t| t.to_rfc3339()))
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.assigned_agent_id.map(|id| id.to_string()))
        .bind(&task.sandbox_id)
        .bind(&caps_json)
        .bind(task.retry_count as i64)
        .bind(task.max_retries as i64)
        .bind(task.backoff_base_seconds)
        .bind(task.timeout_seconds)
        .bind(&task.error_message)
        .bind(&result_json)
        .bind(&config_json)
        .bind(task.conversation_id.map(|id| id.to_string()))
        .bind(&task.persistence_dir)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("task", task.id.to_string()));
        }
        Ok(())
    }

    async fn list(&self, filter: &TaskFilter) -> DomainResult<Vec<Task>> {
        let mut sql = String::from("SELECT * FROM tasks WHERE 1=1");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(status) = filter.status {
            sql.push_str(" AND status = ?");
            bindings.push(status.as_str().to_string());
        }
        if let Some(priority) = filter.priority {
            sql.push_str(" AND priority = ?");
            bindings.push(priority.to_string());
        }
        if let Some(ticket_id) = filter.ticket_id {
            sql.push_str(" AND ticket_id = ?");
            bindings.push(ticket_id.to_string());
        }
        if let Some(phase) = &filter.phase {
            sql.push_str(" AND phase = ?");
            bindings.push(phase.clone());
        }
        if let Some(agent_id) = filter.assigned_agent_id {
            sql.push_str(" AND assigned_agent_id = ?");
            bindings.push(agent_id.to_string());
        }
        sql.push_str(" ORDER BY created_at ASC");

        let mut q = sqlx::query_as::<_, TaskRow>(&sql);
        for binding in &bindings {
            q = q.bind(binding);
        }

        let rows: Vec<TaskRow> = q.fetch_all(&self.pool).await?;
        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn list_by_ticket(&self, ticket_id: Uuid) -> DomainResult<Vec<Task>> {
        self.list(&TaskFilter { ticket_id: Some(ticket_id), ..Default::default() }).await
    }

    async fn list_by_status(&self, status: TaskStatus) -> DomainResult<Vec<Task>> {
        self.list(&TaskFilter { status: Some(status), ..Default::default() }).await
    }

    async fn get_ready_tasks(&self, limit: usize) -> DomainResult<Vec<Task>> {
        // Priority is stored as text, so the ordering ranks it explicitly
        // rather than relying on the column's collation.
        let rows: Vec<TaskRow> = sqlx::query_as(
            r#"SELECT t.* FROM tasks t WHERE t.status = 'pending'
               AND NOT EXISTS (
                   SELECT 1 FROM task_dependencies d
                   JOIN tasks dep ON dep.id = d.depends_on_id
                   WHERE d.task_id = t.id AND dep.status != 'completed'
               )
               ORDER BY CASE t.priority
                   WHEN 'critical' THEN 4
                   WHEN 'high' THEN 3
                   WHEN 'medium' THEN 2
                   ELSE 1
               END DESC, t.created_at ASC
               LIMIT ?"#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        let mut tasks = Vec::with_capacity(rows.len());
        for row in rows {
            let mut task: Task = row.try_into()?;
            self.load_dependencies(&mut task).await?;
            tasks.push(task);
        }
        Ok(tasks)
    }

    async fn try_assign(&self, task_id: Uuid, agent_id: Uuid) -> DomainResult<bool> {
        // The WHERE clause is the compare-and-set: only one concurrent caller
        // sees rows_affected == 1 for a given pending task.
        let result = sqlx::query(
            "UPDATE tasks SET status = 'assigned', assigned_agent_id = ? WHERE id = ? AND status = 'pending'",
        )
        .bind(agent_id.to_string())
        .bind(task_id.to_string())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn get_dag_tasks(&self, ticket_id: Uuid) -> DomainResult<Vec<Task>> {
        self.list_by_ticket(ticket_id).await
    }

    async fn list_active_for_agent(&self, agent_id: Uuid) -> DomainResult<Vec<Task>> {
        self.list(&TaskFilter { assigned_agent_id: Some(agent_id), ..Default::default() })
            .await
            .map(|tasks| {
                tasks
                    .into_iter()
                    .filter(|t| t.status.is_active())
                    .collect()
            })
    }

    async fn record_coordination_point(&self, point: &CoordinationPoint) -> DomainResult<()> {
        let kind_json = serde_json::to_string(&point.kind)?;
        sqlx::query(
            r"INSERT INTO coordination_points (id, kind, created_at, resolved_at, timeout_seconds)
               VALUES (?, ?, ?, ?, ?)",
        )
        .bind(point.id.to_string())
        .bind(&kind_json)
        .bind(point.created_at.to_rfc3339())
        .bind(point.resolved_at.map(|t| t.to_rfc3339()))
        .bind(point.timeout_seconds)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct TaskRow {
    id: String,
    ticket_id: String,
    phase: Option<String>,
    task_type: String,
    description: String,
    priority: String,
    status: String,
    created_at: String,
    started_at: Option<String>,
    completed_at: Option<String>,
    assigned_agent_id: Option<String>,
    sandbox_id: Option<String>,
    required_capabilities: Option<String>,
    retry_count: i64,
    max_retries: i64,
    backoff_base_seconds: f64,
    timeout_seconds: i64,
    error_message: Option<String>,
    result: Option<String>,
    execution_config: Option<String>,
    conversation_id: Option<String>,
    persistence_dir: Option<String>,
}

fn priority_from_str(s: &str) -> DomainResult<TaskPriority> {
    match s {
        "low" => Ok(TaskPriority::Low),
        "medium" => Ok(TaskPriority::Medium),
        "high" => Ok(TaskPriority::High),
        "critical" => Ok(TaskPriority::Critical),
        other => Err(CoreError::Validation(format!("invalid task priority: {other}"))),
    }
}

impl TryFrom<TaskRow> for Task {
    type Error = CoreError;

    fn try_from(row: TaskRow) -> Result<Self, Self::Error> {
        let id = super::parse_uuid(&row.id)?;
        let ticket_id = super::parse_uuid(&row.ticket_id)?;
        let status = TaskStatus::parse(&row.status)
            .ok_or_else(|| CoreError::Validation(format!("invalid task status: {}", row.status)))?;
        let priority = priority_from_str(&row.priority)?;
        let required_capabilities: HashSet<String> =
            super::parse_json_or_default(row.required_capabilities)?;
        let result = match row.result {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        };
        let execution_config = match row.execution_config {
            Some(s) => Some(serde_json::from_str(&s)?),
            None => None,
        };

        Ok(Task {
            id,
            ticket_id,
            phase: row.phase,
            task_type: row.task_type,
            description: row.description,
            priority,
            status,
            created_at: super::parse_datetime(&row.created_at)?,
            started_at: super::parse_optional_datetime(row.started_at)?,
            completed_at: super::parse_optional_datetime(row.completed_at)?,
            assigned_agent_id: super::parse_optional_uuid(row.assigned_agent_id)?,
            sandbox_id: row.sandbox_id,
            required_capabilities,
            dependencies: HashSet::new(),
            retry_count: row.retry_count as u32,
            max_retries: row.max_retries as u32,
            backoff_base_seconds: row.backoff_base_seconds,
            timeout_seconds: row.timeout_seconds,
            error_message: row.error_message,
            result,
            execution_config,
            conversation_id: super::parse_optional_uuid(row.conversation_id)?,
            persistence_dir: row.persistence_dir,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;
    use chrono::Utc;

    async fn setup() -> SqliteTaskRepository {
        let pool = create_migrated_test_pool().await.unwrap();
        SqliteTaskRepository::new(pool)
    }

    fn new_task(ticket_id: Uuid) -> Task {
        Task::new(
            Uuid::new_v4(),
            ticket_id,
            Some("build".to_string()),
            "standard",
            TaskPriority::Medium,
            "do work",
            HashSet::new(),
            HashSet::new(),
            3,
            600,
            None,
            Utc::now(),
        )
    }

    #[tokio::test]
    async fn create_and_get_round_trips() {
        let repo = setup().await;
        let task = new_task(Uuid::new_v4());
        repo.create(&task).await.unwrap();

        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Pending);
        assert_eq!(fetched.description, "do work");
    }

    #[tokio::test]
    async fn ready_tasks_exclude_unsatisfied_dependencies() {
        let repo = setup().await;
        let ticket = Uuid::new_v4();
        let dep = new_task(ticket);
        let mut main = new_task(ticket);
        main.dependencies.insert(dep.id);

        repo.create(&dep).await.unwrap();
        repo.create(&main).await.unwrap();

        let ready = repo.get_ready_tasks(10).await.unwrap();
        assert_eq!(ready.len(), 1);
        assert_eq!(ready[0].id, dep.id);
    }

    #[tokio::test]
    async fn try_assign_is_compare_and_set() {
        let repo = setup().await;
        let task = new_task(Uuid::new_v4());
        repo.create(&task).await.unwrap();

        let agent_a = Uuid::new_v4();
        let agent_b = Uuid::new_v4();

        assert!(repo.try_assign(task.id, agent_a).await.unwrap());
        assert!(!repo.try_assign(task.id, agent_b).await.unwrap());

        let fetched = repo.get(task.id).await.unwrap().unwrap();
        assert_eq!(fetched.assigned_agent_id, Some(agent_a));
    }
}
