//! WebhookReducer (§4.5): normalizes four mixed-shape webhook sources onto
//! one `CallTerminated` event and applies the resulting state transitions.

use std::sync::Arc;
use std::time::Duration;

use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;

use crate::budget::UserBudgetRegistry;
use crate::models::{CallOutcome, CallTerminated};
use crate::store::{CallHistoryStore, CampaignStore};

type HmacSha256 = Hmac<Sha256>;

/// Roughly the delay §4.5 step 6 asks for ("a short (≈1 s) delayed wake").
const REDIAL_WAKE_DELAY: Duration = Duration::from_secs(1);

// --- Source payload shapes (§9: discriminated sum type per source) ---

#[derive(Debug, Deserialize)]
pub struct EngineWebhookPayload {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "eventType")]
    pub event_type: String,
    #[serde(rename = "endReason")]
    pub end_reason: Option<String>,
    pub joined: Option<chrono::DateTime<chrono::Utc>>,
    pub ended: Option<chrono::DateTime<chrono::Utc>>,
    pub summary: Option<String>,
    #[serde(rename = "shortSummary")]
    pub short_summary: Option<String>,
    #[serde(rename = "recordingUrl")]
    pub recording_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TelephonyWebhookQuery {
    #[serde(rename = "campaignId")]
    pub campaign_id: i64,
    #[serde(rename = "contactId")]
    pub contact_id: i64,
    #[serde(rename = "callHistoryId")]
    pub call_history_id: String,
}

#[derive(Debug, Deserialize)]
pub struct TwilioStatusPayload {
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    #[serde(rename = "CallDuration")]
    pub call_duration: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct PlivoStatusPayload {
    #[serde(rename = "CallStatus")]
    pub call_status: String,
    pub duration: Option<i32>,
}

#[derive(Debug, Deserialize)]
pub struct TelnyxStatusPayload {
    pub event: String,
    #[serde(rename = "callDuration")]
    pub call_duration: Option<i32>,
}

/// Terminal-event normalization (§4.5 table). Non-terminal events (e.g.
/// `call.started`, `ringing`) normalize to `None` — the reducer no-ops.
pub fn normalize_engine(payload: &EngineWebhookPayload) -> Option<CallTerminated> {
    let outcome = match (payload.event_type.as_str(), payload.end_reason.as_deref()) {
        ("call.ended", Some("hangup" | "agent_hangup")) => CallOutcome::Completed,
        ("call.ended", Some("unjoined" | "timeout")) => CallOutcome::NoAnswer,
        ("call.ended", Some("connection_error" | "system_error")) => CallOutcome::Failed,
        ("call.billed", _) => return None,
        _ => return None,
    };

    let duration_seconds = match (payload.joined, payload.ended) {
        (Some(joined), Some(ended)) => Some((ended - joined).num_seconds().max(0) as i32),
        _ => None,
    };

    Some(CallTerminated {
        campaign_id: 0,
        contact_id: 0,
        engine_call_id: payload.call_id.clone(),
        outcome,
        duration_seconds,
        end_reason: payload.end_reason.clone(),
        summary: payload.summary.clone(),
        short_summary: payload.short_summary.clone(),
        recording_url: payload.recording_url.clone(),
    })
}

pub fn normalize_twilio(
    query: &TelephonyWebhookQuery,
    payload: &TwilioStatusPayload,
) -> Option<CallTerminated> {
    let outcome = match payload.call_status.as_str() {
        "completed" if payload.call_duration.unwrap_or(0) > 0 => CallOutcome::Completed,
        "busy" | "canceled" | "failed" => CallOutcome::Failed,
        "no-answer" => CallOutcome::NoAnswer,
        _ => return None,
    };
    Some(telephony_event(query, outcome, payload.call_duration, payload.call_status.clone()))
}

pub fn normalize_plivo(
    query: &TelephonyWebhookQuery,
    payload: &PlivoStatusPayload,
) -> Option<CallTerminated> {
    let outcome = match payload.call_status.as_str() {
        "completed" if payload.duration.unwrap_or(0) > 0 => CallOutcome::Completed,
        "busy" | "canceled" | "failed" | "machine" => CallOutcome::Failed,
        "no-answer" | "timeout" => CallOutcome::NoAnswer,
        _ => return None,
    };
    Some(telephony_event(query, outcome, payload.duration, payload.call_status.clone()))
}

pub fn normalize_telnyx(
    query: &TelephonyWebhookQuery,
    payload: &TelnyxStatusPayload,
) -> Option<CallTerminated> {
    let outcome = match payload.event.as_str() {
        "call.hangup" if payload.call_duration.unwrap_or(0) > 0 => CallOutcome::Completed,
        "call.hangup" => CallOutcome::NoAnswer,
        _ => return None,
    };
    Some(telephony_event(query, outcome, payload.call_duration, payload.event.clone()))
}

fn telephony_event(
    query: &TelephonyWebhookQuery,
    outcome: CallOutcome,
    duration_seconds: Option<i32>,
    end_reason: String,
) -> CallTerminated {
    CallTerminated {
        campaign_id: query.campaign_id,
        contact_id: query.contact_id,
        engine_call_id: query.call_history_id.clone(),
        outcome,
        duration_seconds,
        end_reason: Some(end_reason),
        summary: None,
        short_summary: None,
        recording_url: None,
    }
}

/// Verifies an HMAC-SHA256 signature over the raw request body (§4.5,
/// §7). Only the engine webhook carries a configured secret in this spec.
pub fn verify_signature(secret: &str, body: &[u8], signature_hex: &str) -> bool {
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    let Ok(expected) = hex::decode(signature_hex) else {
        return false;
    };
    mac.verify_slice(&expected).is_ok()
}

pub struct WebhookReducer {
    campaign_store: Arc<dyn CampaignStore>,
    call_history_store: Arc<dyn CallHistoryStore>,
    budget: Arc<UserBudgetRegistry>,
    wake: Arc<dyn Fn(i64) + Send + Sync>,
}

impl WebhookReducer {
    pub fn new(
        campaign_store: Arc<dyn CampaignStore>,
        call_history_store: Arc<dyn CallHistoryStore>,
        budget: Arc<UserBudgetRegistry>,
        wake: Arc<dyn Fn(i64) + Send + Sync>,
    ) -> Self {
        Self {
            campaign_store,
            call_history_store,
            budget,
            wake,
        }
    }

    /// Applies one normalized terminal event. Every step is idempotent on
    /// `engineCallId` (§4.5 "Idempotence") — this never errors back to the
    /// caller; a webhook handler always acknowledges success.
    pub async fn reduce(&self, event: CallTerminated) {
        let engine_call_id = event.engine_call_id.clone();

        self.budget.remove_active_call(&engine_call_id).await;

        let Ok(Some(history)) = self.call_history_store.get_by_call_id(&engine_call_id).await else {
            tracing::warn!(engine_call_id, "unknown call id in webhook, no-op");
            return;
        };

        if history.status != crate::models::CallHistoryStatus::InProgress {
            tracing::debug!(engine_call_id, "call history already terminal, no-op");
            return;
        }

        let ended_at = chrono::Utc::now();
        if let Err(e) = self
            .call_history_store
            .update_terminal(&engine_call_id, &event, ended_at)
            .await
        {
            tracing::error!(engine_call_id, error = %e, "failed to update call history");
        }

        let campaign_id = if event.campaign_id != 0 {
            event.campaign_id
        } else {
            history.campaign_id
        };
        let contact_id = if event.contact_id != 0 {
            event.contact_id
        } else {
            history.contact_id
        };

        let call_duration = event
            .duration_seconds
            .or_else(|| history.duration_seconds);

        if let Err(e) = self
            .campaign_store
            .complete_contact(
                contact_id,
                event.outcome.contact_status(),
                call_duration,
                event.end_reason.as_deref(),
            )
            .await
        {
            tracing::error!(contact_id, error = %e, "failed to update contact status");
        }

        self.budget.release(history.user_id, self.campaign_store.as_ref()).await;

        if let Err(e) = self
            .campaign_store
            .increment_campaign_totals(campaign_id, event.outcome)
            .await
        {
            tracing::error!(campaign_id, error = %e, "failed to increment campaign totals");
        }

        self.maybe_complete_campaign(campaign_id, history.user_id).await;

        let wake = self.wake.clone();
        let user_id = history.user_id;
        tokio::spawn(async move {
            tokio::time::sleep(REDIAL_WAKE_DELAY).await;
            wake(user_id);
        });
    }

    /// §4.5 step 5 / §8 property 5: completion detection.
    async fn maybe_complete_campaign(&self, campaign_id: i64, user_id: i64) {
        let pending = self.campaign_store.count_pending_contacts(campaign_id).await.unwrap_or(1);
        let in_progress = self
            .campaign_store
            .count_in_progress_contacts(campaign_id)
            .await
            .unwrap_or(1);

        if pending == 0 && in_progress == 0 {
            if let Err(e) = self.campaign_store.complete_campaign(campaign_id).await {
                tracing::error!(campaign_id, error = %e, "failed to mark campaign completed");
            }
            self.budget.mark_campaign_inactive(user_id, campaign_id).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        CallHistory, CallHistoryStatus, Campaign, CampaignStatus, CampaignType, Contact,
        ContactStatus, UserSettings,
    };
    use crate::store::fake::{FakeCallHistoryStore, FakeCampaignStore, FakeUserSettingsStore};
    use std::sync::Mutex as StdMutex;

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

    fn in_progress_contact() -> Contact {
        Contact {
            id: 1,
            campaign_id: 1,
            name: "Alice".into(),
            phone_number: "+15551000000".into(),
            call_status: ContactStatus::InProgress,
            engine_call_id: Some("EC1".into()),
            call_history_id: Some("EC1".into()),
            called_at: Some(chrono::Utc::now()),
            call_duration: None,
            call_notes: None,
        }
    }

    async fn setup() -> (
        Arc<FakeCampaignStore>,
        Arc<FakeCallHistoryStore>,
        Arc<UserBudgetRegistry>,
    ) {
        let campaign_store = Arc::new(FakeCampaignStore::new());
        campaign_store.insert_campaign(campaign()).await;
        campaign_store.insert_contact(in_progress_contact()).await;

        let history_store = Arc::new(FakeCallHistoryStore::new());
        history_store
            .create(&CallHistory {
                call_id: "EC1".into(),
                user_id: 1,
                agent_id: "agent-1".into(),
                campaign_id: 1,
                contact_id: 1,
                customer_name: "Alice".into(),
                customer_phone: "+15551000000".into(),
                status: CallHistoryStatus::InProgress,
                joined_at: Some(chrono::Utc::now() - chrono::Duration::seconds(170)),
                ended_at: None,
                duration_seconds: None,
                end_reason: None,
                billed_duration: None,
                summary: None,
                short_summary: None,
                recording_url: None,
                created_at: chrono::Utc::now(),
            })
            .await
            .unwrap();

        let settings = Arc::new(FakeUserSettingsStore::new());
        settings
            .set(UserSettings {
                user_id: 1,
                max_concurrent_calls: 1,
                telephony_providers: vec!["telnyx".into()],
            })
            .await;
        let budget = Arc::new(UserBudgetRegistry::new(settings));
        budget.acquire(1, campaign_store.as_ref()).await.unwrap();

        (campaign_store, history_store, budget)
    }

    #[tokio::test]
    async fn happy_path_completes_contact_and_history() {
        let (campaign_store, history_store, budget) = setup().await;
        let woken = Arc::new(StdMutex::new(Vec::new()));
        let woken_clone = woken.clone();

        let reducer = WebhookReducer::new(
            campaign_store.clone(),
            history_store.clone(),
            budget.clone(),
            Arc::new(move |user_id| woken_clone.lock().unwrap().push(user_id)),
        );

        reducer
            .reduce(CallTerminated {
                campaign_id: 1,
                contact_id: 1,
                engine_call_id: "EC1".into(),
                outcome: CallOutcome::Completed,
                duration_seconds: Some(170),
                end_reason: Some("hangup".into()),
                summary: None,
                short_summary: None,
                recording_url: None,
            })
            .await;

        let contact = campaign_store.get_contact(1).await.unwrap().unwrap();
        assert_eq!(contact.call_status, ContactStatus::Completed);
        assert_eq!(contact.call_duration, Some(170));

        let history = history_store.get("EC1").await.unwrap();
        assert_eq!(history.status, CallHistoryStatus::Completed);
        // 170s rounds up to 3 whole billed minutes (§8 S1).
        assert_eq!(history.billed_duration, Some(180));

        let campaign = campaign_store.get_campaign(1).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Completed);
        assert_eq!(campaign.completed_calls, 1);
        assert_eq!(campaign.successful_calls, 1);
        assert_eq!(campaign.failed_calls, 0);

        assert_eq!(budget.available(1, campaign_store.as_ref()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn failed_outcome_increments_failed_not_successful() {
        let (campaign_store, history_store, budget) = setup().await;
        let reducer = WebhookReducer::new(
            campaign_store.clone(),
            history_store,
            budget,
            Arc::new(|_| {}),
        );

        reducer
            .reduce(CallTerminated {
                campaign_id: 1,
                contact_id: 1,
                engine_call_id: "EC1".into(),
                outcome: CallOutcome::Failed,
                duration_seconds: None,
                end_reason: Some("connection_error".into()),
                summary: None,
                short_summary: None,
                recording_url: None,
            })
            .await;

        let campaign = campaign_store.get_campaign(1).await.unwrap().unwrap();
        assert_eq!(campaign.completed_calls, 1);
        assert_eq!(campaign.successful_calls, 0);
        assert_eq!(campaign.failed_calls, 1);
    }

    #[tokio::test]
    async fn duplicate_terminal_webhook_is_a_no_op() {
        let (campaign_store, history_store, budget) = setup().await;
        let reducer = WebhookReducer::new(
            campaign_store.clone(),
            history_store.clone(),
            budget.clone(),
            Arc::new(|_| {}),
        );

        let event = || CallTerminated {
            campaign_id: 1,
            contact_id: 1,
            engine_call_id: "EC1".into(),
            outcome: CallOutcome::Completed,
            duration_seconds: Some(170),
            end_reason: Some("hangup".into()),
            summary: None,
            short_summary: None,
            recording_url: None,
        };

        reducer.reduce(event()).await;
        reducer.reduce(event()).await;

        assert_eq!(budget.available(1, campaign_store.as_ref()).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn unknown_call_id_is_logged_and_ignored() {
        let (campaign_store, history_store, budget) = setup().await;
        let reducer = WebhookReducer::new(campaign_store, history_store, budget, Arc::new(|_| {}));

        reducer
            .reduce(CallTerminated {
                campaign_id: 1,
                contact_id: 1,
                engine_call_id: "unknown".into(),
                outcome: CallOutcome::Completed,
                duration_seconds: Some(10),
                end_reason: None,
                summary: None,
                short_summary: None,
                recording_url: None,
            })
            .await;
    }

    #[test]
    fn engine_payload_maps_hangup_to_completed() {
        let payload = EngineWebhookPayload {
            call_id: "EC1".into(),
            event_type: "call.ended".into(),
            end_reason: Some("hangup".into()),
            joined: None,
            ended: None,
            summary: None,
            short_summary: None,
            recording_url: None,
        };
        let event = normalize_engine(&payload).unwrap();
        assert_eq!(event.outcome, CallOutcome::Completed);
    }

    #[test]
    fn twilio_busy_maps_to_failed() {
        let query = TelephonyWebhookQuery {
            campaign_id: 1,
            contact_id: 1,
            call_history_id: "EC1".into(),
        };
        let payload = TwilioStatusPayload {
            call_status: "busy".into(),
            call_duration: None,
        };
        let event = normalize_twilio(&query, &payload).unwrap();
        assert_eq!(event.outcome, CallOutcome::Failed);
    }

    #[test]
    fn signature_verification_rejects_tampering() {
        let secret = "shh";
        let body = b"{\"callId\":\"EC1\"}";
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        let sig = hex::encode(mac.finalize().into_bytes());

        assert!(verify_signature(secret, body, &sig));
        assert!(!verify_signature(secret, b"tampered", &sig));
    }
}
