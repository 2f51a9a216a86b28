//! Postgres-backed implementation of the store traits.

use async_trait::async_trait;
use sqlx::PgPool;

use crate::models::{
    CallHistory, CallOutcome, CallTerminated, Campaign, CampaignStatus, Contact, ContactStatus,
    UserSettings,
};

use super::{CallHistoryStore, CampaignContactTally, CampaignStore, StoreError, UserSettingsStore};

const CAMPAIGN_COLUMNS: &str = r#"
    id, user_id, type as "campaign_type", agent_ref, status,
    scheduled_date, scheduled_time, end_time, timezone,
    outbound_provider, outbound_from_phone,
    completed_calls, successful_calls, failed_calls,
    started_at, completed_at, last_processed_at, paused_reason
"#;

const CONTACT_COLUMNS: &str = r#"
    id, campaign_id, name, phone_number, call_status,
    engine_call_id, call_history_id, called_at, call_duration, call_notes
"#;

#[derive(Clone)]
pub struct PostgresCampaignStore {
    pool: PgPool,
}

impl PostgresCampaignStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CampaignStore for PostgresCampaignStore {
    async fn get_campaign(&self, campaign_id: i64) -> Result<Option<Campaign>, StoreError> {
        let sql = format!("SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE id = $1");
        Ok(sqlx::query_as::<_, Campaign>(&sql)
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn list_outbound_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, StoreError> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE type = 'outbound' AND status = $1 ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Campaign>(&sql)
            .bind(status)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn list_active_outbound_for_user(&self, user_id: i64) -> Result<Vec<Campaign>, StoreError> {
        let sql = format!(
            "SELECT {CAMPAIGN_COLUMNS} FROM campaigns WHERE type = 'outbound' AND status = 'active' AND user_id = $1 ORDER BY id"
        );
        Ok(sqlx::query_as::<_, Campaign>(&sql)
            .bind(user_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn set_campaign_status(
        &self,
        campaign_id: i64,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        sqlx::query("UPDATE campaigns SET status = $2, last_processed_at = NOW() WHERE id = $1")
            .bind(campaign_id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn start_campaign(&self, campaign_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE campaigns
            SET status = 'active', paused_reason = NULL,
                started_at = COALESCE(started_at, NOW()), last_processed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn park_campaign(&self, campaign_id: i64, reason: &str) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE campaigns
            SET status = 'paused-time-window', paused_reason = $2, last_processed_at = NOW()
            WHERE id = $1
            ",
        )
        .bind(campaign_id)
        .bind(reason)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_campaign(&self, campaign_id: i64) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE campaigns SET status = 'completed', completed_at = NOW(), last_processed_at = NOW() WHERE id = $1",
        )
        .bind(campaign_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn claim_pending_contact(&self, campaign_id: i64) -> Result<Option<Contact>, StoreError> {
        let sql = format!(
            r#"
            WITH next AS (
                SELECT id FROM contacts
                WHERE campaign_id = $1 AND call_status = 'pending'
                ORDER BY id ASC
                FOR UPDATE SKIP LOCKED
                LIMIT 1
            )
            UPDATE contacts
            SET call_status = 'in-progress', called_at = NOW()
            WHERE id IN (SELECT id FROM next)
            RETURNING {CONTACT_COLUMNS}
            "#
        );
        Ok(sqlx::query_as::<_, Contact>(&sql)
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_contact(&self, contact_id: i64) -> Result<Option<Contact>, StoreError> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1");
        Ok(sqlx::query_as::<_, Contact>(&sql)
            .bind(contact_id)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn count_pending_contacts(&self, campaign_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM contacts WHERE campaign_id = $1 AND call_status = 'pending'",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_in_progress_contacts(&self, campaign_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM contacts WHERE campaign_id = $1 AND call_status = 'in-progress'",
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn count_in_progress_for_user(&self, user_id: i64) -> Result<i64, StoreError> {
        let (count,): (i64,) = sqlx::query_as(
            r"
            SELECT COUNT(*) FROM contacts c
            JOIN campaigns camp ON camp.id = c.campaign_id
            WHERE camp.user_id = $1 AND camp.status = 'active' AND camp.type = 'outbound'
              AND c.call_status = 'in-progress'
            ",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    async fn set_contact_engine_call_id(
        &self,
        contact_id: i64,
        engine_call_id: &str,
        call_history_id: &str,
    ) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE contacts SET engine_call_id = $2, call_history_id = $3 WHERE id = $1",
        )
        .bind(contact_id)
        .bind(engine_call_id)
        .bind(call_history_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_contact(&self, contact_id: i64, notes: &str) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE contacts SET call_status = 'failed', call_notes = $2 WHERE id = $1",
        )
        .bind(contact_id)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_contact(
        &self,
        contact_id: i64,
        status: ContactStatus,
        call_duration: Option<i32>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE contacts
            SET call_status = $2, call_duration = $3, call_notes = $4
            WHERE id = $1
            ",
        )
        .bind(contact_id)
        .bind(status)
        .bind(call_duration)
        .bind(notes)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn reset_in_progress_for_user(&self, user_id: i64, notes: &str) -> Result<i64, StoreError> {
        let rows = sqlx::query(
            r"
            UPDATE contacts c
            SET call_status = 'failed', call_notes = $2
            FROM campaigns camp
            WHERE c.campaign_id = camp.id
              AND camp.user_id = $1 AND camp.type = 'outbound'
              AND c.call_status = 'in-progress'
            ",
        )
        .bind(user_id)
        .bind(notes)
        .execute(&self.pool)
        .await?
        .rows_affected();
        Ok(rows as i64)
    }

    async fn pending_contacts_summary(
        &self,
        user_id: i64,
    ) -> Result<Vec<CampaignContactTally>, StoreError> {
        #[derive(sqlx::FromRow)]
        struct Row {
            campaign_id: i64,
            status: CampaignStatus,
            pending: i64,
            completed: i64,
            failed: i64,
        }

        let rows: Vec<Row> = sqlx::query_as(
            r"
            SELECT
                camp.id AS campaign_id,
                camp.status,
                COUNT(*) FILTER (WHERE c.call_status = 'pending') AS pending,
                COUNT(*) FILTER (WHERE c.call_status = 'completed') AS completed,
                COUNT(*) FILTER (WHERE c.call_status IN ('failed', 'no-answer')) AS failed
            FROM campaigns camp
            LEFT JOIN contacts c ON c.campaign_id = camp.id
            WHERE camp.user_id = $1 AND camp.type = 'outbound'
            GROUP BY camp.id, camp.status
            ORDER BY camp.id
            ",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| CampaignContactTally {
                campaign_id: r.campaign_id,
                status: r.status,
                pending: r.pending,
                completed: r.completed,
                failed: r.failed,
            })
            .collect())
    }

    async fn increment_campaign_totals(
        &self,
        campaign_id: i64,
        outcome: CallOutcome,
    ) -> Result<(), StoreError> {
        let successful = i32::from(matches!(outcome, CallOutcome::Completed));
        let failed = i32::from(!matches!(outcome, CallOutcome::Completed));
        sqlx::query(
            r"
            UPDATE campaigns
            SET completed_calls = completed_calls + 1,
                successful_calls = successful_calls + $2,
                failed_calls = failed_calls + $3
            WHERE id = $1
            ",
        )
        .bind(campaign_id)
        .bind(successful)
        .bind(failed)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct PostgresCallHistoryStore {
    pool: PgPool,
}

impl PostgresCallHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CallHistoryStore for PostgresCallHistoryStore {
    async fn create(&self, history: &CallHistory) -> Result<(), StoreError> {
        sqlx::query(
            r"
            INSERT INTO call_history (
                call_id, user_id, agent_id, campaign_id, contact_id,
                customer_name, customer_phone, status, joined_at, created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(&history.call_id)
        .bind(history.user_id)
        .bind(&history.agent_id)
        .bind(history.campaign_id)
        .bind(history.contact_id)
        .bind(&history.customer_name)
        .bind(&history.customer_phone)
        .bind(history.status)
        .bind(history.joined_at)
        .bind(history.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_by_call_id(&self, call_id: &str) -> Result<Option<CallHistory>, StoreError> {
        Ok(sqlx::query_as::<_, CallHistory>(
            r"
            SELECT call_id, user_id, agent_id, campaign_id, contact_id,
                   customer_name, customer_phone, status, joined_at, ended_at,
                   duration_seconds, end_reason, billed_duration, summary,
                   short_summary, recording_url, created_at
            FROM call_history
            WHERE call_id = $1
            ",
        )
        .bind(call_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn update_terminal(
        &self,
        call_id: &str,
        outcome: &CallTerminated,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r"
            UPDATE call_history
            SET status = $2, ended_at = $3, duration_seconds = $4, end_reason = $5,
                billed_duration = $6, summary = $7, short_summary = $8, recording_url = $9
            WHERE call_id = $1
            ",
        )
        .bind(call_id)
        .bind(outcome.outcome.history_status())
        .bind(ended_at)
        .bind(outcome.duration_seconds)
        .bind(&outcome.end_reason)
        .bind(billed_duration(outcome.duration_seconds))
        .bind(&outcome.summary)
        .bind(&outcome.short_summary)
        .bind(&outcome.recording_url)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// §4.5 step 2: telephony-style per-minute billing, rounded up to the next
/// whole minute whenever any duration elapsed (170s -> 180s, not 170s).
fn billed_duration(duration_seconds: Option<i32>) -> Option<i32> {
    duration_seconds.map(|d| if d > 0 { ((d + 59) / 60) * 60 } else { 0 })
}

#[derive(Clone)]
pub struct PostgresUserSettingsStore {
    pool: PgPool,
}

impl PostgresUserSettingsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserSettingsStore for PostgresUserSettingsStore {
    async fn get(&self, user_id: i64) -> Result<UserSettings, StoreError> {
        let settings = sqlx::query_as::<_, UserSettings>(
            "SELECT user_id, max_concurrent_calls, telephony_providers FROM user_settings WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(settings.unwrap_or(UserSettings {
            user_id,
            ..UserSettings::default()
        }))
    }
}
