use serde::{Deserialize, Serialize};

/// Per-user configuration read by `UserBudget` and `CallInitiator`.
///
/// Actual credential *storage/management* lives outside this crate (spec.md
/// §1 non-goal) — `telephony_providers` is deliberately just the set of
/// provider tags the user has credentials configured for, not the
/// credentials themselves, which is the narrow read contract `CallInitiator`
/// needs to validate step 1 of §4.4.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct UserSettings {
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "maxConcurrentCalls")]
    pub max_concurrent_calls: i32,
    #[serde(rename = "telephony")]
    pub telephony_providers: Vec<String>,
}

impl Default for UserSettings {
    fn default() -> Self {
        Self {
            user_id: 0,
            max_concurrent_calls: 1,
            telephony_providers: Vec::new(),
        }
    }
}
