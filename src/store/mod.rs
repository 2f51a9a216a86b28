//! Durable-store contracts (§6).
//!
//! The scheduler core depends only on these traits; `postgres` is the
//! concrete sqlx-backed implementation, `fake` an in-memory one used by
//! tests. Both honor the same atomic-claim contract in `CampaignStore::claim_pending_contact`.

pub mod fake;
pub mod postgres;

use async_trait::async_trait;

use crate::models::{CallHistory, CallOutcome, Campaign, CampaignStatus, Contact, UserSettings};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("campaign {0} not found")]
    CampaignNotFound(i64),
    #[error("contact {0} not found")]
    ContactNotFound(i64),
}

/// Everything the core needs from the campaign/contact durable store.
///
/// Contacts are modeled as their own table keyed by `(campaign_id, id)`
/// rather than as an embedded array — a legal variant per the source's own
/// design notes, chosen here because it turns the atomic claim in §4.2 into
/// a single `UPDATE ... FOR UPDATE SKIP LOCKED ... RETURNING` statement.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn get_campaign(&self, campaign_id: i64) -> Result<Option<Campaign>, StoreError>;

    async fn list_outbound_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, StoreError>;

    async fn list_active_outbound_for_user(&self, user_id: i64) -> Result<Vec<Campaign>, StoreError>;

    async fn set_campaign_status(
        &self,
        campaign_id: i64,
        status: CampaignStatus,
    ) -> Result<(), StoreError>;

    /// Marks a campaign active: `status`, `startedAt`, clears `pausedReason`.
    async fn start_campaign(&self, campaign_id: i64) -> Result<(), StoreError>;

    /// Parks a campaign with `status = paused-time-window` and a reason.
    async fn park_campaign(&self, campaign_id: i64, reason: &str) -> Result<(), StoreError>;

    /// Marks a campaign `completed` with `completedAt = now`.
    async fn complete_campaign(&self, campaign_id: i64) -> Result<(), StoreError>;

    /// The single atomic `pending -> in-progress` transition (§4.2). Returns
    /// the mutated Contact, or `None` if the campaign has no pending Contact.
    async fn claim_pending_contact(&self, campaign_id: i64) -> Result<Option<Contact>, StoreError>;

    async fn get_contact(&self, contact_id: i64) -> Result<Option<Contact>, StoreError>;

    async fn count_pending_contacts(&self, campaign_id: i64) -> Result<i64, StoreError>;

    async fn count_in_progress_contacts(&self, campaign_id: i64) -> Result<i64, StoreError>;

    /// Sum of `in-progress` Contacts across every `active` outbound campaign
    /// owned by `user_id` — used to rebuild `UserBudget` on first touch.
    async fn count_in_progress_for_user(&self, user_id: i64) -> Result<i64, StoreError>;

    async fn set_contact_engine_call_id(
        &self,
        contact_id: i64,
        engine_call_id: &str,
        call_history_id: &str,
    ) -> Result<(), StoreError>;

    async fn fail_contact(&self, contact_id: i64, notes: &str) -> Result<(), StoreError>;

    async fn complete_contact(
        &self,
        contact_id: i64,
        status: crate::models::ContactStatus,
        call_duration: Option<i32>,
        notes: Option<&str>,
    ) -> Result<(), StoreError>;

    /// Resets every `in-progress` Contact across the user's outbound
    /// campaigns to `failed` (admin §4.8 `resetUserCallState`). Returns the
    /// number of Contacts touched.
    async fn reset_in_progress_for_user(&self, user_id: i64, notes: &str) -> Result<i64, StoreError>;

    async fn pending_contacts_summary(
        &self,
        user_id: i64,
    ) -> Result<Vec<CampaignContactTally>, StoreError>;

    /// Increment-style update to a campaign's running totals (§6), applied
    /// once per terminal webhook from `WebhookReducer::reduce` rather than
    /// read-modify-written, so concurrent terminations on the same campaign
    /// never clobber each other.
    async fn increment_campaign_totals(
        &self,
        campaign_id: i64,
        outcome: CallOutcome,
    ) -> Result<(), StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct CampaignContactTally {
    #[serde(rename = "campaignId")]
    pub campaign_id: i64,
    pub status: CampaignStatus,
    pub pending: i64,
    pub completed: i64,
    pub failed: i64,
}

#[async_trait]
pub trait CallHistoryStore: Send + Sync {
    async fn create(&self, history: &CallHistory) -> Result<(), StoreError>;

    async fn get_by_call_id(&self, call_id: &str) -> Result<Option<CallHistory>, StoreError>;

    async fn update_terminal(
        &self,
        call_id: &str,
        outcome: &crate::models::CallTerminated,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
pub trait UserSettingsStore: Send + Sync {
    async fn get(&self, user_id: i64) -> Result<UserSettings, StoreError>;
}
