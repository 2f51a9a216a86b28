use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, sqlx::FromRow)]
pub struct Campaign {
    pub id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "type")]
    pub campaign_type: CampaignType,
    #[serde(rename = "agentRef")]
    pub agent_ref: String,
    pub status: CampaignStatus,
    #[serde(rename = "scheduledDate")]
    pub scheduled_date: Option<NaiveDate>,
    #[serde(rename = "scheduledTime")]
    pub scheduled_time: Option<NaiveTime>,
    #[serde(rename = "endTime")]
    pub end_time: Option<NaiveTime>,
    pub timezone: Option<String>,
    #[serde(rename = "outboundProvider")]
    pub outbound_provider: Option<String>,
    #[serde(rename = "outboundFromPhone")]
    pub outbound_from_phone: Option<String>,
    #[serde(rename = "completedCalls")]
    pub completed_calls: i32,
    #[serde(rename = "successfulCalls")]
    pub successful_calls: i32,
    #[serde(rename = "failedCalls")]
    pub failed_calls: i32,
    #[serde(rename = "startedAt")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(rename = "completedAt")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(rename = "lastProcessedAt")]
    pub last_processed_at: Option<DateTime<Utc>>,
    #[serde(rename = "pausedReason")]
    pub paused_reason: Option<String>,
}

impl Campaign {
    /// The `(schedule, now)` input the time-window evaluator needs, or
    /// `None` when the campaign carries no schedule at all.
    pub fn schedule(&self) -> Option<super::Schedule> {
        Some(super::Schedule {
            scheduled_date: self.scheduled_date?,
            scheduled_time: self.scheduled_time?,
            end_time: self.end_time?,
            timezone: self.timezone.clone()?,
        })
    }

    pub fn outbound_medium(&self) -> Option<super::OutboundMedium> {
        Some(super::OutboundMedium {
            provider: self.outbound_provider.clone()?,
            from_phone: self.outbound_from_phone.clone()?,
        })
    }

    pub fn is_outbound(&self) -> bool {
        self.campaign_type == CampaignType::Outbound
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "campaign_type", rename_all = "lowercase")]
pub enum CampaignType {
    Outbound,
    Inbound,
    Ondemand,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, sqlx::Type)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[sqlx(type_name = "campaign_status", rename_all = "kebab-case")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Active,
    Paused,
    PausedTimeWindow,
    Completed,
}

impl CampaignStatus {
    pub fn display_name(&self) -> &str {
        match self {
            CampaignStatus::Draft => "Draft",
            CampaignStatus::Scheduled => "Scheduled",
            CampaignStatus::Active => "Active",
            CampaignStatus::Paused => "Paused",
            CampaignStatus::PausedTimeWindow => "Paused (time window)",
            CampaignStatus::Completed => "Completed",
        }
    }
}

/// A campaign's daily dialing window, in its own IANA timezone.
///
/// `end_time < scheduled_time` means the window rolls past midnight — see
/// `time_window::should_stop`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Schedule {
    #[serde(rename = "scheduledDate")]
    pub scheduled_date: NaiveDate,
    #[serde(rename = "scheduledTime")]
    pub scheduled_time: NaiveTime,
    #[serde(rename = "endTime")]
    pub end_time: NaiveTime,
    pub timezone: String,
}

/// A campaign's `(provider, fromPhone)` outbound caller-ID pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMedium {
    pub provider: String,
    #[serde(rename = "fromPhone")]
    pub from_phone: String,
}
