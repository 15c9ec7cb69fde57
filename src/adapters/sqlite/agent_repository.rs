//! SQLite implementation of [`AgentRepository`].

use async_trait::async_trait;
use sqlx::SqlitePool;
use std::collections::HashSet;
use uuid::Uuid;

use crate::domain::errors::{CoreError, DomainResult};
use crate::domain::models::{Agent, AgentKind, AgentStatus, AgentStatusTransition, HealthLabel};
use crate::domain::ports::{AgentMatch, AgentRepository};

#[derive(Clone)]
pub struct SqliteAgentRepository {
    pool: SqlitePool,
}

impl SqliteAgentRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AgentRepository for SqliteAgentRepository {
    async fn create(&self, agent: &Agent) -> DomainResult<()> {
        let caps_json = serde_json::to_string(&agent.capabilities)?;
        let tags_json = serde_json::to_string(&agent.tags)?;

        sqlx::query(
            r#"INSERT INTO agents (id, kind, phase, capabilities, capacity, status, health,
               last_heartbeat, expected_next_sequence, current_sequence, consecutive_missed,
               tags, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(agent.id.to_string())
        .bind(agent.kind.as_str())
        .bind(&agent.phase)
        .bind(&caps_json)
        .bind(agent.capacity as i64)
        .bind(agent.status.as_str())
        .bind(health_as_str(agent.health))
        .bind(agent.last_heartbeat.map(|t| t.to_rfc3339()))
        .bind(agent.expected_next_sequence as i64)
        .bind(agent.current_sequence as i64)
        .bind(agent.consecutive_missed as i64)
        .bind(&tags_json)
        .bind(agent.created_at.to_rfc3339())
        .bind(agent.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: Uuid) -> DomainResult<Option<Agent>> {
        let row: Option<AgentRow> = sqlx::query_as("SELECT * FROM agents WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.map(TryInto::try_into).transpose()
    }

    async fn update(&self, agent: &Agent) -> DomainResult<()> {
        let caps_json = serde_json::to_string(&agent.capabilities)?;
        let tags_json = serde_json::to_string(&agent.tags)?;

        let result = sqlx::query(
            r#"UPDATE agents SET kind = ?, phase = ?, capabilities = ?, capacity = ?,
               status = ?, health = ?, last_heartbeat = ?, expected_next_sequence = ?,
               current_sequence = ?, consecutive_missed = ?, tags = ?, updated_at = ?
               WHERE id = ?"#,
        )
        .bind(agent.kind.as_str())
        .bind(&agent.phase)
        .bind(&caps_json)
        .bind(agent.capacity as i64)
        .bind(agent.status.as_str())
        .bind(health_as_str(agent.health))
        .bind(agent.last_heartbeat.map(|t| t.to_rfc3339()))
        .bind(agent.expected_next_sequence as i64)
        .bind(agent.current_sequence as i64)
        .bind(agent.consecutive_missed as i64)
        .bind(&tags_json)
        .bind(agent.updated_at.to_rfc3339())
        .bind(agent.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(CoreError::not_found("agent", agent.id.to_string()));
        }
        Ok(())
    }

    async fn list_operational(&self) -> DomainResult<Vec<Agent>> {
        let rows: Vec<AgentRow> = sqlx::query_as(
            "SELECT * FROM agents WHERE status IN ('IDLE', 'RUNNING', 'DEGRADED')",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn find_best_fit(
        &self,
        required_caps: &HashSet<String>,
        phase: Option<&str>,
        kind: Option<AgentKind>,
    ) -> DomainResult<Option<AgentMatch>> {
        let candidates = self.search(required_caps, phase, kind, usize::MAX).await?;
        Ok(candidates.into_iter().find(|m| m.score >= 0.5))
    }

    async fn search(
        &self,
        required_caps: &HashSet<String>,
        phase: Option<&str>,
        kind: Option<AgentKind>,
        limit: usize,
    ) -> DomainResult<Vec<AgentMatch>> {
        let mut sql = String::from("SELECT * FROM agents WHERE status = 'IDLE'");
        let mut bindings: Vec<String> = Vec::new();

        if let Some(phase) = phase {
            sql.push_str(" AND phase = ?");
            bindings.push(phase.to_string());
        }
        if let Some(kind) = kind {
            sql.push_str(" AND kind = ?");
            bindings.push(kind.as_str().to_string());
        }

        let mut q = sqlx::query_as::<_, AgentRow>(&sql);
        for binding in &bindings {
            q = q.bind(binding);
        }
        let rows: Vec<AgentRow> = q.fetch_all(&self.pool).await?;

        let mut matches = Vec::with_capacity(rows.len());
        for row in rows {
            let agent: Agent = row.try_into()?;
            let score = agent.capability_match_score(required_caps);
            let current_load = self.current_load(agent.id).await?;
            let lifetime_assignments = self.lifetime_assignments(agent.id).await?;
            matches.push(AgentMatch { agent, score, current_load, lifetime_assignments });
        }

        matches.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.current_load.cmp(&b.current_load))
                .then(a.lifetime_assignments.cmp(&b.lifetime_assignments))
        });
        matches.truncate(limit);
        Ok(matches)
    }

    async fn record_transition(&self, transition: &AgentStatusTransition) -> DomainResult<()> {
        let metadata_json = serde_json::to_string(&transition.metadata)?;

        sqlx::query(
            r#"INSERT INTO agent_status_transitions
               (id, agent_id, from_status, to_status, reason, triggered_by, task_id, metadata, at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
        )
        .bind(transition.id.to_string())
        .bind(transition.agent_id.to_string())
        .bind(transition.from.as_str())
        .bind(transition.to.as_str())
        .bind(&transition.reason)
        .bind(&transition.triggered_by)
        .bind(transition.task_id.map(|id| id.to_string()))
        .bind(&metadata_json)
        .bind(transition.at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn transition_history(
        &self,
        agent_id: Uuid,
        limit: usize,
    ) -> DomainResult<Vec<AgentStatusTransition>> {
        let rows: Vec<TransitionRow> = sqlx::query_as(
            "SELECT * FROM agent_status_transitions WHERE agent_id = ? ORDER BY at DESC LIMIT ?",
        )
        .bind(agent_id.to_string())
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    async fn current_load(&self, agent_id: Uuid) -> DomainResult<u32> {
        let result: (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tasks WHERE assigned_agent_id = ? AND status IN ('assigned', 'running')",
        )
        .bind(agent_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(result.0 as u32)
    }

    async fn lifetime_assignments(&self, agent_id: Uuid) -> DomainResult<u64> {
        let result: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM tasks WHERE assigned_agent_id = ?")
                .bind(agent_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(result.0 as u64)
    }
}

fn health_as_str(health: HealthLabel) -> &'static str {
    match health {
        HealthLabel::Healthy => "healthy",
        HealthLabel::Degraded => "degraded",
        HealthLabel::Stale => "stale",
        HealthLabel::Unresponsive => "unresponsive",
        HealthLabel::Quarantined => "quarantined",
    }
}

fn health_from_str(s: &str) -> DomainResult<HealthLabel> {
    match s {
        "healthy" => Ok(HealthLabel::Healthy),
        "degraded" => Ok(HealthLabel::Degraded),
        "stale" => Ok(HealthLabel::Stale),
        "unresponsive" => Ok(HealthLabel::Unresponsive),
        "quarantined" => Ok(HealthLabel::Quarantined),
        other => Err(CoreError::Validation(format!("invalid health label: {other}"))),
    }
}

fn kind_from_str(s: &str) -> DomainResult<AgentKind> {
    match s {
        "worker" => Ok(AgentKind::Worker),
        "monitor" => Ok(AgentKind::Monitor),
        "watchdog" => Ok(AgentKind::Watchdog),
        "guardian" => Ok(AgentKind::Guardian),
        "validator" => Ok(AgentKind::Validator),
        "diagnostic" => Ok(AgentKind::Diagnostic),
        other => Err(CoreError::Validation(format!("invalid agent kind: {other}"))),
    }
}

#[derive(sqlx::FromRow)]
struct AgentRow {
    id: String,
    kind: String,
    phase: Option<String>,
    capabilities: Option<String>,
    capacity: i64,
    status: String,
    health: String,
    last_heartbeat: Option<String>,
    expected_next_sequence: i64,
    current_sequence: i64,
    consecutive_missed: i64,
    tags: Option<String>,
    created_at: String,
    updated_at: String,
}

impl TryFrom<AgentRow> for Agent {
    type Error = CoreError;

    fn try_from(row: AgentRow) -> Result<Self, Self::Error> {
        let id = super::parse_uuid(&row.id)?;
        let kind = kind_from_str(&row.kind)?;
        let status = AgentStatus::parse(&row.status)
            .ok_or_else(|| CoreError::Validation(format!("invalid agent status: {}", row.status)))?;
        let health = health_from_str(&row.health)?;
        let capabilities: HashSet<String> = super::parse_json_or_default(row.capabilities)?;
        let tags: Vec<String> = super::parse_json_or_default(row.tags)?;
        let last_heartbeat = super::parse_optional_datetime(row.last_heartbeat)?;
        let created_at = super::parse_datetime(&row.created_at)?;
        let updated_at = super::parse_datetime(&row.updated_at)?;

        Ok(Agent {
            id,
            kind,
            phase: row.phase,
            capabilities,
            capacity: row.capacity as u32,
            status,
            health,
            last_heartbeat,
            expected_next_sequence: row.expected_next_sequence as u64,
            current_sequence: row.current_sequence as u64,
            consecutive_missed: row.consecutive_missed as u32,
            tags,
            created_at,
            updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransitionRow {
    id: String,
    agent_id: String,
    from_status: String,
    to_status: String,
    reason: String,
    triggered_by: String,
    task_id: Option<String>,
    metadata: Option<String>,
    at: String,
}

impl TryFrom<TransitionRow> for AgentStatusTransition {
    type Error = CoreError;

    fn try_from(row: TransitionRow) -> Result<Self, Self::Error> {
        Ok(AgentStatusTransition {
            id: super::parse_uuid(&row.id)?,
            agent_id: super::parse_uuid(&row.agent_id)?,
            from: AgentStatus::parse(&row.from_status)
                .ok_or_else(|| CoreError::Validation("invalid from_status".to_string()))?,
            to: AgentStatus::parse(&row.to_status)
                .ok_or_else(|| CoreError::Validation("invalid to_status".to_string()))?,
            reason: row.reason,
            triggered_by: row.triggered_by,
            task_id: super::parse_optional_uuid(row.task_id)?,
            metadata: super::parse_json_value(row.metadata)?,
            at: super::parse_datetime(&row.at)?,
        })
    }
}
