//! SQLite implementation of [`GuardianRepository`].

use async_trait::async_trait;
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::domain::errors::DomainResult;
use crate::domain::models::{AuthorityLevel, GuardianAction, InterventionRecord, RestartAttempt};
use crate::domain::ports::{CooldownState, GuardianRepository};

use super::parse_datetime;

#[derive(Clone)]
pub struct SqliteGuardianRepository {
    pool: SqlitePool,
}

impl SqliteGuardianRepository {
    #[must_use]
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl GuardianRepository for SqliteGuardianRepository {
    async fn cooldown(&self, agent_id: Uuid) -> DomainResult<Option<CooldownState>> {
        let row: Option<(String, i64)> =
            sqlx::query_as("SELECT until, attempt_count FROM cooldowns WHERE agent_id = ?")
                .bind(agent_id.to_string())
                .fetch_optional(&self.pool)
                .await?;
        row.map(|(until, attempt_count)| {
            Ok(CooldownState { until: parse_datetime(&until)?, attempt_count: attempt_count as u32 })
        })
        .transpose()
    }

    async fn start_cooldown(&self, agent_id: Uuid, until: chrono::DateTime<chrono::Utc>) -> DomainResult<u32> {
        sqlx::query(
            r"INSERT INTO cooldowns (agent_id, until, attempt_count) VALUES (?, ?, 1)
               ON CONFLICT(agent_id) DO UPDATE SET until = excluded.until, attempt_count = attempt_count + 1",
        )
        .bind(agent_id.to_string())
        .bind(until.to_rfc3339())
        .execute(&self.pool)
        .await?;

        let (attempt_count,): (i64,) =
            sqlx::query_as("SELECT attempt_count FROM cooldowns WHERE agent_id = ?")
                .bind(agent_id.to_string())
                .fetch_one(&self.pool)
                .await?;
        Ok(attempt_count as u32)
    }

    async fn record_restart(&self, attempt: &RestartAttempt) -> DomainResult<()> {
        let reassigned_json = serde_json::to_string(&attempt.reassigned_task_ids)?;
        sqlx::query(
            r"INSERT INTO restart_attempts (id, failed_agent_id, replacement_agent_id, reason,
               reassigned_task_ids, initiated_at, authority_level, forced)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(attempt.id.to_string())
        .bind(attempt.failed_agent_id.to_string())
        .bind(attempt.replacement_agent_id.map(|id| id.to_string()))
        .bind(&attempt.reason)
        .bind(reassigned_json)
        .bind(attempt.initiated_at.to_rfc3339())
        .bind(authority_as_str(attempt.authority_level))
        .bind(attempt.forced)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_intervention(&self, record: &InterventionRecord) -> DomainResult<()> {
        sqlx::query(
            r"INSERT INTO intervention_records (id, agent_id, task_id, message, routed_to_sandbox,
               delivered, recorded_at) VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(record.agent_id.to_string())
        .bind(record.task_id.to_string())
        .bind(&record.message)
        .bind(record.routed_to_sandbox)
        .bind(record.delivered)
        .bind(record.recorded_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_action(&self, action: &GuardianAction) -> DomainResult<()> {
        let before_json = action.before.as_ref().map(serde_json::to_string).transpose()?;
        let after_json = action.after.as_ref().map(serde_json::to_string).transpose()?;
        sqlx::query(
            r"INSERT INTO guardian_actions (id, action_type, target, reason, initiated_by,
               authority_level, before_json, after_json, executed_at, reverted_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(action.id.to_string())
        .bind(&action.action_type)
        .bind(action.target.to_string())
        .bind(&action.reason)
        .bind(&action.initiated_by)
        .bind(authority_as_str(action.authority_level))
        .bind(&before_json)
        .bind(&after_json)
        .bind(action.executed_at.to_rfc3339())
        .bind(action.reverted_at.map(|t| t.to_rfc3339()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

const fn authority_as_str(level: AuthorityLevel) -> &'static str {
    match level {
        AuthorityLevel::Worker => "worker",
        AuthorityLevel::Watchdog => "watchdog",
        AuthorityLevel::Monitor => "monitor",
        AuthorityLevel::Guardian => "guardian",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::sqlite::create_migrated_test_pool;

    #[tokio::test]
    async fn cooldown_roundtrips_and_increments_attempt_count() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteGuardianRepository::new(pool);
        let agent_id = Uuid::new_v4();

        assert!(repo.cooldown(agent_id).await.unwrap().is_none());

        let until = chrono::Utc::now() + chrono::Duration::seconds(60);
        let count = repo.start_cooldown(agent_id, until).await.unwrap();
        assert_eq!(count, 1);

        let count = repo.start_cooldown(agent_id, until).await.unwrap();
        assert_eq!(count, 2);

        let state = repo.cooldown(agent_id).await.unwrap().unwrap();
        assert_eq!(state.attempt_count, 2);
    }

    #[tokio::test]
    async fn record_restart_and_intervention_persist() {
        let pool = create_migrated_test_pool().await.unwrap();
        let repo = SqliteGuardianRepository::new(pool);

        let attempt = RestartAttempt {
            id: Uuid::new_v4(),
            failed_agent_id: Uuid::new_v4(),
            replacement_agent_id: Some(Uuid::new_v4()),
            reason: "unresponsive".to_string(),
            reassigned_task_ids: vec![Uuid::new_v4()],
            initiated_at: chrono::Utc::now(),
            authority_level: AuthorityLevel::Monitor,
            forced: false,
        };
        repo.record_restart(&attempt).await.unwrap();

        let record = InterventionRecord {
            id: Uuid::new_v4(),
            agent_id: Uuid::new_v4(),
            task_id: Uuid::new_v4(),
            message: "focus".to_string(),
            routed_to_sandbox: true,
            delivered: true,
            recorded_at: chrono::Utc::now(),
        };
        repo.record_intervention(&record).await.unwrap();
    }
}
