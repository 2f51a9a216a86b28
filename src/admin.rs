//! Administrative operations (§4.8). Thin wrappers over the durable store
//! and the in-memory registries; the HTTP layer in `http` is the actual
//! system boundary these are called from.

use std::sync::Arc;

use thiserror::Error;

use crate::budget::{ActiveCallRecord, UserBudgetRegistry};
use crate::call_initiator::CallInitiator;
use crate::claimer::ContactClaimer;
use crate::models::{Campaign, CampaignStatus};
use crate::scheduler_loop::SchedulerLoop;
use crate::store::{CampaignContactTally, CampaignStore, StoreError};
use crate::time_window;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("campaign {0} not found")]
    CampaignNotFound(i64),
    #[error("campaign {0} is not in a startable state")]
    NotStartable(i64),
    #[error("campaign {0} is not paused or parked")]
    NotResumable(i64),
    #[error("campaign {0} has no pending contact to dial")]
    NoPendingContact(i64),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub struct AdminOps {
    campaign_store: Arc<dyn CampaignStore>,
    budget: Arc<UserBudgetRegistry>,
    scheduler: Arc<SchedulerLoop>,
    claimer: Arc<ContactClaimer>,
    call_initiator: Arc<CallInitiator>,
}

impl AdminOps {
    pub fn new(
        campaign_store: Arc<dyn CampaignStore>,
        budget: Arc<UserBudgetRegistry>,
        scheduler: Arc<SchedulerLoop>,
        claimer: Arc<ContactClaimer>,
        call_initiator: Arc<CallInitiator>,
    ) -> Self {
        Self {
            campaign_store,
            budget,
            scheduler,
            claimer,
            call_initiator,
        }
    }

    pub async fn get_campaign_state(&self, campaign_id: i64) -> Result<Campaign, AdminError> {
        self.load(campaign_id).await
    }

    /// Read-only introspection backing `GET /campaigns/call-state`.
    pub async fn get_call_state(&self, user_id: i64) -> Vec<ActiveCallRecord> {
        self.budget.active_calls_for_user(user_id).await
    }

    /// `POST /campaigns/:id/generate-instant-call`: claims one pending
    /// Contact and runs a single `CallInitiator` invocation immediately,
    /// bypassing the scheduler tick. Still subject to the user budget —
    /// `CallInitiator::initiate` fails the Contact if the budget is
    /// exhausted at acquire time only in the sense that `acquire` itself
    /// never blocks; callers that want backpressure should check
    /// `available` first.
    pub async fn generate_instant_call(&self, campaign_id: i64) -> Result<(), AdminError> {
        let campaign = self.load(campaign_id).await?;
        let contact = self
            .claimer
            .claim_pending_contact(campaign_id)
            .await
            .ok_or(AdminError::NoPendingContact(campaign_id))?;
        self.call_initiator.initiate(&campaign, contact).await;
        Ok(())
    }

    async fn load(&self, campaign_id: i64) -> Result<Campaign, AdminError> {
        self.campaign_store
            .get_campaign(campaign_id)
            .await?
            .ok_or(AdminError::CampaignNotFound(campaign_id))
    }

    pub async fn start_now(&self, campaign_id: i64) -> Result<(), AdminError> {
        let campaign = self.load(campaign_id).await?;
        if !matches!(campaign.status, CampaignStatus::Scheduled | CampaignStatus::Draft) {
            return Err(AdminError::NotStartable(campaign_id));
        }
        self.campaign_store.start_campaign(campaign_id).await?;
        self.budget.mark_campaign_active(campaign.user_id, campaign_id).await;
        self.scheduler.process_user_calls(campaign.user_id).await;
        Ok(())
    }

    /// In-flight calls are not cancelled — they terminate naturally through
    /// the webhook path, releasing their slots (§4.8).
    pub async fn pause(&self, campaign_id: i64) -> Result<(), AdminError> {
        let campaign = self.load(campaign_id).await?;
        self.campaign_store
            .set_campaign_status(campaign_id, CampaignStatus::Paused)
            .await?;
        self.budget.mark_campaign_inactive(campaign.user_id, campaign_id).await;
        Ok(())
    }

    pub async fn resume(&self, campaign_id: i64) -> Result<(), AdminError> {
        let campaign = self.load(campaign_id).await?;
        if !matches!(
            campaign.status,
            CampaignStatus::Paused | CampaignStatus::PausedTimeWindow
        ) {
            return Err(AdminError::NotResumable(campaign_id));
        }
        self.campaign_store.start_campaign(campaign_id).await?;
        self.budget.mark_campaign_active(campaign.user_id, campaign_id).await;
        self.scheduler.process_user_calls(campaign.user_id).await;
        Ok(())
    }

    /// Used when webhook loss has stuck a user's budget counter. Returns
    /// the number of Contacts reset to `failed`.
    pub async fn reset_user_call_state(&self, user_id: i64) -> Result<i64, AdminError> {
        self.budget.reset_user(user_id).await;
        let count = self
            .campaign_store
            .reset_in_progress_for_user(user_id, "reset due to manual state clear")
            .await?;
        Ok(count)
    }

    pub async fn get_resumable_campaigns(
        &self,
        user_id: i64,
    ) -> Result<Vec<ResumableCampaign>, AdminError> {
        let campaigns = self
            .campaign_store
            .list_outbound_by_status(CampaignStatus::PausedTimeWindow)
            .await?;

        let mut out = Vec::new();
        for campaign in campaigns {
            if campaign.user_id != user_id {
                continue;
            }
            let pending = self.campaign_store.count_pending_contacts(campaign.id).await?;
            if pending == 0 {
                continue;
            }
            let window_open = campaign
                .schedule()
                .map(|s| time_window::can_resume_in_window(&s, chrono::Utc::now()))
                .unwrap_or(false);
            out.push(ResumableCampaign {
                campaign_id: campaign.id,
                pending_contacts: pending,
                window_open,
            });
        }
        Ok(out)
    }

    pub async fn get_pending_contacts_summary(
        &self,
        user_id: i64,
    ) -> Result<Vec<CampaignContactTally>, AdminError> {
        Ok(self.campaign_store.pending_contacts_summary(user_id).await?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct ResumableCampaign {
    pub campaign_id: i64,
    pub pending_contacts: i64,
    pub window_open: bool,
}
