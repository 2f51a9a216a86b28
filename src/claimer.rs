//! ContactClaimer (§4.2): the only legal entry into dialing.

use std::sync::Arc;
use std::time::Duration;

use crate::models::Contact;
use crate::store::{CampaignStore, StoreError};

const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF: Duration = Duration::from_millis(50);

pub struct ContactClaimer {
    store: Arc<dyn CampaignStore>,
}

impl ContactClaimer {
    pub fn new(store: Arc<dyn CampaignStore>) -> Self {
        Self { store }
    }

    /// Attempts the atomic `pending -> in-progress` transition, retrying a
    /// bounded number of times on a store-reported conflict before yielding
    /// to the caller so it can try the next campaign.
    pub async fn claim_pending_contact(&self, campaign_id: i64) -> Option<Contact> {
        let mut attempt = 0;
        loop {
            match self.store.claim_pending_contact(campaign_id).await {
                Ok(contact) => return contact,
                Err(StoreError::Database(e)) if attempt < MAX_RETRIES => {
                    attempt += 1;
                    tracing::warn!(campaign_id, attempt, error = %e, "claim conflict, retrying");
                    tokio::time::sleep(RETRY_BACKOFF).await;
                }
                Err(e) => {
                    tracing::error!(campaign_id, error = %e, "claim failed, yielding");
                    return None;
                }
            }
        }
    }
}
