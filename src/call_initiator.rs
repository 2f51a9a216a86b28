//! CallInitiator (§4.4): turns a claimed Contact into a real call, or fails it.

use std::collections::HashMap;
use std::sync::Arc;

use crate::budget::{pending_key, ActiveCallRecord, UserBudgetRegistry};
use crate::models::{CallHistory, CallHistoryStatus, Campaign, Contact};
use crate::store::{CallHistoryStore, CampaignStore};
use crate::telephony::TelephonyRegistry;
use crate::voice_engine::{CallMedium, CreateCallRequest, VoiceEngineClient};

const DEFAULT_MAX_CALL_DURATION_SECS: i32 = 600;

pub struct CallInitiator {
    campaign_store: Arc<dyn CampaignStore>,
    call_history_store: Arc<dyn CallHistoryStore>,
    budget: Arc<UserBudgetRegistry>,
    voice_engine: Arc<dyn VoiceEngineClient>,
    telephony: Arc<TelephonyRegistry>,
    max_call_duration_secs: i32,
}

impl CallInitiator {
    pub fn new(
        campaign_store: Arc<dyn CampaignStore>,
        call_history_store: Arc<dyn CallHistoryStore>,
        budget: Arc<UserBudgetRegistry>,
        voice_engine: Arc<dyn VoiceEngineClient>,
        telephony: Arc<TelephonyRegistry>,
    ) -> Self {
        Self {
            campaign_store,
            call_history_store,
            budget,
            voice_engine,
            telephony,
            max_call_duration_secs: DEFAULT_MAX_CALL_DURATION_SECS,
        }
    }

    pub fn with_max_call_duration_secs(mut self, secs: i32) -> Self {
        self.max_call_duration_secs = secs;
        self
    }

    /// Drives a claimed Contact through the ordered §4.4 steps. Always
    /// terminates the Contact one way or another; never leaves it
    /// `in-progress` on a code path that returns.
    pub async fn initiate(&self, campaign: &Campaign, contact: Contact) {
        let contact_id = contact.id;
        let campaign_id = campaign.id;
        let user_id = campaign.user_id;

        // Step 1: validate the campaign carries an outbound medium, that the
        // owning user has credentials for that provider, and that an agent
        // is configured. Actual credential and agent *management* stay the
        // collaborators' concern (UserSettingsStore/voice engine); this is
        // just the narrow existence check §4.4 step 1 asks this crate to do
        // before it ever touches the budget.
        let Some(medium) = campaign.outbound_medium() else {
            self.fail(contact_id, "campaign has no outbound medium configured").await;
            return;
        };

        if campaign.agent_ref.trim().is_empty() {
            self.fail(contact_id, "campaign has no agent configured").await;
            return;
        }

        let settings = match self.budget.user_settings(user_id).await {
            Ok(settings) => settings,
            Err(e) => {
                tracing::error!(campaign_id, contact_id, error = %e, "failed to load user settings");
                self.fail(contact_id, "internal error loading user settings").await;
                return;
            }
        };
        if !settings.telephony_providers.iter().any(|p| p == &medium.provider) {
            self.fail(
                contact_id,
                &format!("no telephony credentials configured for provider '{}'", medium.provider),
            )
            .await;
            return;
        }

        // Step 2: acquire a budget slot and insert the synthetic record
        // *before* the billable engine call, per §4.4's ordering guarantee.
        if let Err(e) = self.budget.acquire(user_id, self.campaign_store.as_ref()).await {
            tracing::error!(campaign_id, contact_id, error = %e, "failed to acquire budget slot");
            self.fail(contact_id, "internal error acquiring budget slot").await;
            return;
        }

        let synthetic_key = pending_key(campaign_id, contact_id);
        self.budget
            .insert_active_call(
                synthetic_key.clone(),
                ActiveCallRecord {
                    contact_id,
                    campaign_id,
                    user_id,
                    started_at: chrono::Utc::now(),
                },
            )
            .await;

        // Step 3: ask the engine to allocate a session.
        let mut correlation_tags = HashMap::new();
        correlation_tags.insert("campaignId".to_string(), campaign_id.to_string());
        correlation_tags.insert("contactId".to_string(), contact_id.to_string());

        let request = CreateCallRequest {
            medium: CallMedium {
                provider: medium.provider.clone(),
                incoming: true,
            },
            max_duration_secs: self.max_call_duration_secs,
            recording_enabled: true,
            correlation_tags,
        };

        let created = match self.voice_engine.create_call(&campaign.agent_ref, request).await {
            Ok(response) => response,
            Err(e) => {
                tracing::warn!(campaign_id, contact_id, error = %e, "voice engine create_call failed");
                self.unwind(user_id, &synthetic_key, contact_id, &format!("voice engine error: {e}"))
                    .await;
                return;
            }
        };

        // Step 4: rekey the ActiveCallRecord, persist CallHistory, update
        // the Contact, then ask the telephony provider to dial in.
        self.budget
            .rekey_active_call(&synthetic_key, created.engine_call_id.clone())
            .await;

        let mut metadata_tags = HashMap::new();
        metadata_tags.insert("campaignId".to_string(), campaign_id.to_string());
        metadata_tags.insert("contactId".to_string(), contact_id.to_string());

        let call_history_id = created.engine_call_id.clone();
        let history = CallHistory {
            call_id: call_history_id.clone(),
            user_id,
            agent_id: campaign.agent_ref.clone(),
            campaign_id,
            contact_id,
            customer_name: contact.name.clone(),
            customer_phone: contact.phone_number.clone(),
            status: CallHistoryStatus::InProgress,
            joined_at: None,
            ended_at: None,
            duration_seconds: None,
            end_reason: None,
            billed_duration: None,
            summary: None,
            short_summary: None,
            recording_url: None,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = self.call_history_store.create(&history).await {
            tracing::error!(campaign_id, contact_id, error = %e, "failed to persist call history");
            self.unwind(
                user_id,
                &created.engine_call_id,
                contact_id,
                "internal error persisting call history",
            )
            .await;
            return;
        }

        if let Err(e) = self
            .campaign_store
            .set_contact_engine_call_id(contact_id, &created.engine_call_id, &call_history_id)
            .await
        {
            tracing::error!(campaign_id, contact_id, error = %e, "failed to stamp engine call id on contact");
        }

        if let Err(e) = self
            .telephony
            .bridge(
                &medium.provider,
                &medium.from_phone,
                &contact.phone_number,
                &created.join_url,
                &metadata_tags,
            )
            .await
        {
            tracing::warn!(campaign_id, contact_id, error = %e, "telephony bridge failed");
            self.unwind(
                user_id,
                &created.engine_call_id,
                contact_id,
                &format!("telephony bridge error: {e}"),
            )
            .await;
        }
    }

    /// Step 5: release the slot, drop the record, fail the Contact.
    async fn unwind(&self, user_id: i64, active_call_key: &str, contact_id: i64, notes: &str) {
        self.budget.remove_active_call(active_call_key).await;
        self.budget.release(user_id, self.campaign_store.as_ref()).await;
        self.fail(contact_id, notes).await;
    }

    async fn fail(&self, contact_id: i64, notes: &str) {
        if let Err(e) = self.campaign_store.fail_contact(contact_id, notes).await {
            tracing::error!(contact_id, error = %e, "failed to mark contact failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CampaignStatus, CampaignType, ContactStatus, UserSettings};
    use crate::store::fake::{FakeCallHistoryStore, FakeCampaignStore, FakeUserSettingsStore};
    use crate::telephony::{BridgeResult, TelephonyClient, TelephonyError};
    use crate::voice_engine::{CallDetails, CreateCallResponse, VoiceEngineError};

    struct FakeVoiceEngine {
        fail: bool,
    }

    #[async_trait::async_trait]
    impl VoiceEngineClient for FakeVoiceEngine {
        async fn create_call(
            &self,
            _agent_id: &str,
            _request: CreateCallRequest,
        ) -> Result<CreateCallResponse, VoiceEngineError> {
            if self.fail {
                return Err(VoiceEngineError::Api {
                    status: 500,
                    message: "engine unavailable".into(),
                });
            }
            Ok(CreateCallResponse {
                engine_call_id: "EC1".into(),
                join_url: "https://join.example/EC1".into(),
            })
        }

        async fn get_call_details(&self, _engine_call_id: &str) -> Result<CallDetails, VoiceEngineError> {
            unimplemented!("not exercised by CallInitiator")
        }

        async fn create_webhook(
            &self,
            _url: &str,
            _events: &[&str],
            _agent_id: Option<&str>,
            _secret: Option<&str>,
        ) -> Result<String, VoiceEngineError> {
            unimplemented!("not exercised by CallInitiator")
        }

        async fn delete_webhook(&self, _webhook_id: &str) -> Result<(), VoiceEngineError> {
            unimplemented!("not exercised by CallInitiator")
        }
    }

    struct FakeTelephony;

    #[async_trait::async_trait]
    impl TelephonyClient for FakeTelephony {
        async fn bridge(
            &self,
            _from_phone: &str,
            _to_phone: &str,
            _join_url: &str,
            _correlation_tags: &HashMap<String, String>,
        ) -> Result<BridgeResult, TelephonyError> {
            Ok(BridgeResult {
                provider_call_id: "PC1".into(),
            })
        }
    }

    fn campaign() -> Campaign {
        Campaign {
            id: 1,
            user_id: 1,
            campaign_type: CampaignType::Outbound,
            agent_ref: "agent-1".into(),
            status: CampaignStatus::Active,
            scheduled_date: None,
            scheduled_time: None,
            end_time: None,
            timezone: None,
            outbound_provider: Some("telnyx".into()),
            outbound_from_phone: Some("+15550000000".into()),
            completed_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            started_at: None,
            completed_at: None,
            last_processed_at: None,
            paused_reason: None,
        }
    }

    fn contact() -> Contact {
        Contact {
            id: 1,
            campaign_id: 1,
            name: "Alice".into(),
            phone_number: "+15551000000".into(),
            call_status: ContactStatus::InProgress,
            engine_call_id: None,
            call_history_id: None,
            called_at: Some(chrono::Utc::now()),
            call_duration: None,
            call_notes: None,
        }
    }

    async fn initiator(
        fail_engine: bool,
        telephony_providers: Vec<String>,
    ) -> (Arc<FakeCampaignStore>, Arc<FakeCallHistoryStore>, CallInitiator) {
        let campaign_store = Arc::new(FakeCampaignStore::new());
        campaign_store.insert_campaign(campaign()).await;
        campaign_store.insert_contact(contact()).await;

        let call_history_store = Arc::new(FakeCallHistoryStore::new());

        let settings = Arc::new(FakeUserSettingsStore::new());
        settings
            .set(UserSettings {
                user_id: 1,
                max_concurrent_calls: 1,
                telephony_providers,
            })
            .await;
        let budget = Arc::new(UserBudgetRegistry::new(settings));

        let voice_engine = Arc::new(FakeVoiceEngine { fail: fail_engine });
        let mut registry = TelephonyRegistry::new();
        registry.register("telnyx", Box::new(FakeTelephony));

        let initiator = CallInitiator::new(
            campaign_store.clone(),
            call_history_store.clone(),
            budget,
            voice_engine,
            Arc::new(registry),
        );
        (campaign_store, call_history_store, initiator)
    }

    #[tokio::test]
    async fn missing_provider_credentials_fails_contact_without_touching_budget() {
        let (campaign_store, call_history_store, initiator) = initiator(false, Vec::new()).await;

        initiator.initiate(&campaign(), contact()).await;

        let contact = campaign_store.get_contact(1).await.unwrap().unwrap();
        assert_eq!(contact.call_status, ContactStatus::Failed);
        assert!(contact.call_notes.unwrap().contains("telnyx"));
        assert!(call_history_store.get("EC1").await.is_none());
    }

    #[tokio::test]
    async fn happy_path_creates_call_history_and_bridges() {
        let (campaign_store, call_history_store, initiator) =
            initiator(false, vec!["telnyx".into()]).await;

        initiator.initiate(&campaign(), contact()).await;

        let contact = campaign_store.get_contact(1).await.unwrap().unwrap();
        assert_eq!(contact.engine_call_id.as_deref(), Some("EC1"));
        assert!(call_history_store.get("EC1").await.is_some());
    }

    #[tokio::test]
    async fn voice_engine_failure_unwinds_budget_and_fails_contact() {
        let (campaign_store, call_history_store, initiator) =
            initiator(true, vec!["telnyx".into()]).await;

        initiator.initiate(&campaign(), contact()).await;

        let contact = campaign_store.get_contact(1).await.unwrap().unwrap();
        assert_eq!(contact.call_status, ContactStatus::Failed);
        assert!(call_history_store.get("EC1").await.is_none());
    }
}
