use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One row per initiated call, keyed by the voice engine's `callId`.
///
/// Created by `CallInitiator` once the voice engine returns a successful
/// call-creation response; updated by `WebhookReducer` as terminal events
/// arrive. `campaign_id`/`contact_id` are the structured form of the
/// `{campaignId, contactId}` metadata pair spec.md describes — kept as
/// indexed columns rather than buried in a JSON blob so the reducer's
/// Contact lookup (§4.5 step 3) is a direct join, not a JSON scan.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CallHistory {
    #[serde(rename = "callId")]
    pub call_id: String,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "agentId")]
    pub agent_id: String,
    #[serde(rename = "campaignId")]
    pub campaign_id: i64,
    #[serde(rename = "contactId")]
    pub contact_id: i64,
    #[serde(rename = "customerName")]
    pub customer_name: String,
    #[serde(rename = "customerPhone")]
    pub customer_phone: String,
    pub status: CallHistoryStatus,
    #[serde(rename = "joinedAt")]
    pub joined_at: Option<DateTime<Utc>>,
    #[serde(rename = "endedAt")]
    pub ended_at: Option<DateTime<Utc>>,
    #[serde(rename = "durationSeconds")]
    pub duration_seconds: Option<i32>,
    #[serde(rename = "endReason")]
    pub end_reason: Option<String>,
    #[serde(rename = "billedDuration")]
    pub billed_duration: Option<i32>,
    pub summary: Option<String>,
    #[serde(rename = "shortSummary")]
    pub short_summary: Option<String>,
    #[serde(rename = "recordingUrl")]
    pub recording_url: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "call_history_status", rename_all = "kebab-case")]
pub enum CallHistoryStatus {
    InProgress,
    Completed,
    Failed,
    NoAnswer,
}

/// The single normalized terminal event every webhook source projects onto.
/// See `webhook::normalize`.
#[derive(Debug, Clone, PartialEq)]
pub struct CallTerminated {
    pub campaign_id: i64,
    pub contact_id: i64,
    pub engine_call_id: String,
    pub outcome: CallOutcome,
    pub duration_seconds: Option<i32>,
    pub end_reason: Option<String>,
    pub summary: Option<String>,
    pub short_summary: Option<String>,
    pub recording_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallOutcome {
    Completed,
    Failed,
    NoAnswer,
}

impl CallOutcome {
    pub fn contact_status(&self) -> super::ContactStatus {
        match self {
            CallOutcome::Completed => super::ContactStatus::Completed,
            CallOutcome::Failed => super::ContactStatus::Failed,
            CallOutcome::NoAnswer => super::ContactStatus::NoAnswer,
        }
    }

    pub fn history_status(&self) -> CallHistoryStatus {
        match self {
            CallOutcome::Completed => CallHistoryStatus::Completed,
            CallOutcome::Failed => CallHistoryStatus::Failed,
            CallOutcome::NoAnswer => CallHistoryStatus::NoAnswer,
        }
    }
}
