//! StaleCallReaper (§4.6): fails calls whose engine webhook never arrived.

use std::sync::Arc;

use chrono::Duration;

use crate::budget::UserBudgetRegistry;
use crate::store::CampaignStore;

pub const DEFAULT_STALE_THRESHOLD_SECS: i64 = 15 * 60;

pub struct StaleCallReaper {
    campaign_store: Arc<dyn CampaignStore>,
    budget: Arc<UserBudgetRegistry>,
    wake: Arc<dyn Fn(i64) + Send + Sync>,
    threshold: Duration,
}

impl StaleCallReaper {
    pub fn new(
        campaign_store: Arc<dyn CampaignStore>,
        budget: Arc<UserBudgetRegistry>,
        wake: Arc<dyn Fn(i64) + Send + Sync>,
        threshold_secs: i64,
    ) -> Self {
        Self {
            campaign_store,
            budget,
            wake,
            threshold: Duration::seconds(threshold_secs),
        }
    }

    /// Invoked at the start of every scheduler tick (§4.7 step 1).
    pub async fn reap(&self) {
        let stale = self.budget.stale_active_calls(self.threshold).await;
        for (key, record) in stale {
            tracing::warn!(
                contact_id = record.contact_id,
                campaign_id = record.campaign_id,
                "reaping stale call, no terminal webhook within threshold"
            );

            self.budget.remove_active_call(&key).await;
            self.budget.release(record.user_id, self.campaign_store.as_ref()).await;

            if let Err(e) = self
                .campaign_store
                .fail_contact(record.contact_id, "call timed out")
                .await
            {
                tracing::error!(contact_id = record.contact_id, error = %e, "failed to fail stale contact");
            }

            (self.wake)(record.user_id);
        }
    }
}
