use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One outbound dialing target inside a campaign.
///
/// `call_status` transitions only along
/// `Pending -> InProgress -> {Completed | Failed | NoAnswer}`; the only
/// legal return to `Pending` is `admin::reset_user_call_state`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Contact {
    pub id: i64,
    #[serde(rename = "campaignId")]
    pub campaign_id: i64,
    pub name: String,
    #[serde(rename = "phoneNumber")]
    pub phone_number: String,
    #[serde(rename = "callStatus")]
    pub call_status: ContactStatus,
    #[serde(rename = "engineCallId")]
    pub engine_call_id: Option<String>,
    #[serde(rename = "callHistoryId")]
    pub call_history_id: Option<String>,
    #[serde(rename = "calledAt")]
    pub called_at: Option<DateTime<Utc>>,
    #[serde(rename = "callDuration")]
    pub call_duration: Option<i32>,
    #[serde(rename = "callNotes")]
    pub call_notes: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "contact_call_status", rename_all = "kebab-case")]
pub enum ContactStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    NoAnswer,
}

impl ContactStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ContactStatus::Completed | ContactStatus::Failed | ContactStatus::NoAnswer
        )
    }
}
