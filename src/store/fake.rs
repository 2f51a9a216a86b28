//! In-memory fakes of the store traits, for tests.
//!
//! The teacher crate has no live-database test harness either — its own
//! tests (`storage::tests`, `sip::recording_integration_tests`) all run
//! against pure in-memory structures — so these fakes follow the same
//! precedent rather than requiring a live Postgres instance.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::models::{
    CallHistory, CallOutcome, CallTerminated, Campaign, CampaignStatus, Contact, ContactStatus,
    UserSettings,
};

use super::{CallHistoryStore, CampaignContactTally, CampaignStore, StoreError, UserSettingsStore};

#[derive(Default)]
pub struct FakeCampaignStore {
    campaigns: RwLock<HashMap<i64, Campaign>>,
    contacts: RwLock<HashMap<i64, Contact>>,
    next_contact_id: AtomicI64,
}

impl FakeCampaignStore {
    pub fn new() -> Self {
        Self {
            next_contact_id: AtomicI64::new(1),
            ..Default::default()
        }
    }

    pub async fn insert_campaign(&self, campaign: Campaign) {
        self.campaigns.write().await.insert(campaign.id, campaign);
    }

    pub async fn insert_contact(&self, mut contact: Contact) -> i64 {
        if contact.id == 0 {
            contact.id = self.next_contact_id.fetch_add(1, Ordering::SeqCst);
        }
        let id = contact.id;
        self.contacts.write().await.insert(id, contact);
        id
    }

    pub async fn contacts_for(&self, campaign_id: i64) -> Vec<Contact> {
        let mut v: Vec<Contact> = self
            .contacts
            .read()
            .await
            .values()
            .filter(|c| c.campaign_id == campaign_id)
            .cloned()
            .collect();
        v.sort_by_key(|c| c.id);
        v
    }
}

#[async_trait]
impl CampaignStore for FakeCampaignStore {
    async fn get_campaign(&self, campaign_id: i64) -> Result<Option<Campaign>, StoreError> {
        Ok(self.campaigns.read().await.get(&campaign_id).cloned())
    }

    async fn list_outbound_by_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, StoreError> {
        Ok(self
            .campaigns
            .read()
            .await
            .values()
            .filter(|c| c.is_outbound() && c.status == status)
            .cloned()
            .collect())
    }

    async fn list_active_outbound_for_user(&self, user_id: i64) -> Result<Vec<Campaign>, StoreError> {
        Ok(self
            .campaigns
            .read()
            .await
            .values()
            .filter(|c| c.is_outbound() && c.status == CampaignStatus::Active && c.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn set_campaign_status(
        &self,
        campaign_id: i64,
        status: CampaignStatus,
    ) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        campaign.status = status;
        campaign.last_processed_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn start_campaign(&self, campaign_id: i64) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        campaign.status = CampaignStatus::Active;
        campaign.paused_reason = None;
        if campaign.started_at.is_none() {
            campaign.started_at = Some(chrono::Utc::now());
        }
        campaign.last_processed_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn park_campaign(&self, campaign_id: i64, reason: &str) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        campaign.status = CampaignStatus::PausedTimeWindow;
        campaign.paused_reason = Some(reason.to_string());
        campaign.last_processed_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn complete_campaign(&self, campaign_id: i64) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        campaign.status = CampaignStatus::Completed;
        campaign.completed_at = Some(chrono::Utc::now());
        campaign.last_processed_at = Some(chrono::Utc::now());
        Ok(())
    }

    async fn claim_pending_contact(&self, campaign_id: i64) -> Result<Option<Contact>, StoreError> {
        let mut contacts = self.contacts.write().await;
        let mut candidates: Vec<i64> = contacts
            .values()
            .filter(|c| c.campaign_id == campaign_id && c.call_status == ContactStatus::Pending)
            .map(|c| c.id)
            .collect();
        candidates.sort_unstable();
        let Some(id) = candidates.into_iter().next() else {
            return Ok(None);
        };
        let contact = contacts.get_mut(&id).expect("candidate id must exist");
        contact.call_status = ContactStatus::InProgress;
        contact.called_at = Some(chrono::Utc::now());
        Ok(Some(contact.clone()))
    }

    async fn get_contact(&self, contact_id: i64) -> Result<Option<Contact>, StoreError> {
        Ok(self.contacts.read().await.get(&contact_id).cloned())
    }

    async fn count_pending_contacts(&self, campaign_id: i64) -> Result<i64, StoreError> {
        Ok(self
            .contacts
            .read()
            .await
            .values()
            .filter(|c| c.campaign_id == campaign_id && c.call_status == ContactStatus::Pending)
            .count() as i64)
    }

    async fn count_in_progress_contacts(&self, campaign_id: i64) -> Result<i64, StoreError> {
        Ok(self
            .contacts
            .read()
            .await
            .values()
            .filter(|c| c.campaign_id == campaign_id && c.call_status == ContactStatus::InProgress)
            .count() as i64)
    }

    async fn count_in_progress_for_user(&self, user_id: i64) -> Result<i64, StoreError> {
        let campaigns = self.campaigns.read().await;
        let active_campaign_ids: std::collections::HashSet<i64> = campaigns
            .values()
            .filter(|c| c.user_id == user_id && c.is_outbound() && c.status == CampaignStatus::Active)
            .map(|c| c.id)
            .collect();
        Ok(self
            .contacts
            .read()
            .await
            .values()
            .filter(|c| {
                active_campaign_ids.contains(&c.campaign_id)
                    && c.call_status == ContactStatus::InProgress
            })
            .count() as i64)
    }

    async fn set_contact_engine_call_id(
        &self,
        contact_id: i64,
        engine_call_id: &str,
        call_history_id: &str,
    ) -> Result<(), StoreError> {
        let mut contacts = self.contacts.write().await;
        let contact = contacts
            .get_mut(&contact_id)
            .ok_or(StoreError::ContactNotFound(contact_id))?;
        contact.engine_call_id = Some(engine_call_id.to_string());
        contact.call_history_id = Some(call_history_id.to_string());
        Ok(())
    }

    async fn fail_contact(&self, contact_id: i64, notes: &str) -> Result<(), StoreError> {
        let mut contacts = self.contacts.write().await;
        let contact = contacts
            .get_mut(&contact_id)
            .ok_or(StoreError::ContactNotFound(contact_id))?;
        contact.call_status = ContactStatus::Failed;
        contact.call_notes = Some(notes.to_string());
        Ok(())
    }

    async fn complete_contact(
        &self,
        contact_id: i64,
        status: ContactStatus,
        call_duration: Option<i32>,
        notes: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut contacts = self.contacts.write().await;
        let contact = contacts
            .get_mut(&contact_id)
            .ok_or(StoreError::ContactNotFound(contact_id))?;
        contact.call_status = status;
        contact.call_duration = call_duration;
        contact.call_notes = notes.map(str::to_string);
        Ok(())
    }

    async fn reset_in_progress_for_user(&self, user_id: i64, notes: &str) -> Result<i64, StoreError> {
        let campaigns = self.campaigns.read().await;
        let user_campaign_ids: std::collections::HashSet<i64> = campaigns
            .values()
            .filter(|c| c.user_id == user_id && c.is_outbound())
            .map(|c| c.id)
            .collect();
        drop(campaigns);

        let mut contacts = self.contacts.write().await;
        let mut count = 0;
        for contact in contacts.values_mut() {
            if user_campaign_ids.contains(&contact.campaign_id)
                && contact.call_status == ContactStatus::InProgress
            {
                contact.call_status = ContactStatus::Failed;
                contact.call_notes = Some(notes.to_string());
                count += 1;
            }
        }
        Ok(count)
    }

    async fn pending_contacts_summary(
        &self,
        user_id: i64,
    ) -> Result<Vec<CampaignContactTally>, StoreError> {
        let campaigns = self.campaigns.read().await;
        let contacts = self.contacts.read().await;
        let mut out = Vec::new();
        for campaign in campaigns.values().filter(|c| c.user_id == user_id && c.is_outbound()) {
            let campaign_contacts: Vec<&Contact> = contacts
                .values()
                .filter(|c| c.campaign_id == campaign.id)
                .collect();
            out.push(CampaignContactTally {
                campaign_id: campaign.id,
                status: campaign.status,
                pending: campaign_contacts
                    .iter()
                    .filter(|c| c.call_status == ContactStatus::Pending)
                    .count() as i64,
                completed: campaign_contacts
                    .iter()
                    .filter(|c| c.call_status == ContactStatus::Completed)
                    .count() as i64,
                failed: campaign_contacts
                    .iter()
                    .filter(|c| {
                        matches!(
                            c.call_status,
                            ContactStatus::Failed | ContactStatus::NoAnswer
                        )
                    })
                    .count() as i64,
            });
        }
        out.sort_by_key(|t| t.campaign_id);
        Ok(out)
    }

    async fn increment_campaign_totals(
        &self,
        campaign_id: i64,
        outcome: CallOutcome,
    ) -> Result<(), StoreError> {
        let mut campaigns = self.campaigns.write().await;
        let campaign = campaigns
            .get_mut(&campaign_id)
            .ok_or(StoreError::CampaignNotFound(campaign_id))?;
        campaign.completed_calls += 1;
        match outcome {
            CallOutcome::Completed => campaign.successful_calls += 1,
            CallOutcome::Failed | CallOutcome::NoAnswer => campaign.failed_calls += 1,
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeCallHistoryStore {
    rows: RwLock<HashMap<String, CallHistory>>,
}

impl FakeCallHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, call_id: &str) -> Option<CallHistory> {
        self.rows.read().await.get(call_id).cloned()
    }
}

#[async_trait]
impl CallHistoryStore for FakeCallHistoryStore {
    async fn create(&self, history: &CallHistory) -> Result<(), StoreError> {
        self.rows
            .write()
            .await
            .insert(history.call_id.clone(), history.clone());
        Ok(())
    }

    async fn get_by_call_id(&self, call_id: &str) -> Result<Option<CallHistory>, StoreError> {
        Ok(self.rows.read().await.get(call_id).cloned())
    }

    async fn update_terminal(
        &self,
        call_id: &str,
        outcome: &CallTerminated,
        ended_at: chrono::DateTime<chrono::Utc>,
    ) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        let Some(row) = rows.get_mut(call_id) else {
            tracing::warn!(call_id, "unknown call id in webhook, no-op");
            return Ok(());
        };
        row.status = outcome.outcome.history_status();
        row.ended_at = Some(ended_at);
        row.duration_seconds = outcome.duration_seconds;
        row.end_reason = outcome.end_reason.clone();
        row.billed_duration = outcome
            .duration_seconds
            .map(|d| if d > 0 { ((d + 59) / 60) * 60 } else { 0 });
        row.summary = outcome.summary.clone();
        row.short_summary = outcome.short_summary.clone();
        row.recording_url = outcome.recording_url.clone();
        Ok(())
    }
}

pub struct FakeUserSettingsStore {
    settings: RwLock<HashMap<i64, UserSettings>>,
}

impl FakeUserSettingsStore {
    pub fn new() -> Self {
        Self {
            settings: RwLock::new(HashMap::new()),
        }
    }

    pub async fn set(&self, settings: UserSettings) {
        self.settings.write().await.insert(settings.user_id, settings);
    }
}

impl Default for FakeUserSettingsStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserSettingsStore for FakeUserSettingsStore {
    async fn get(&self, user_id: i64) -> Result<UserSettings, StoreError> {
        Ok(self
            .settings
            .read()
            .await
            .get(&user_id)
            .cloned()
            .unwrap_or(UserSettings {
                user_id,
                ..UserSettings::default()
            }))
    }
}
