//! UserBudget (§4.3) and the ActiveCallRecord index (§3).
//!
//! Both maps are process-wide mutable state, generalized from the teacher's
//! `AutomationManager::campaigns: Arc<RwLock<HashMap<i64, CampaignState>>>`
//! field into the two concurrent maps this spec needs. Mutation of a single
//! `UserBudget` is serialized by that user's own `Mutex`; mutation of the
//! registries themselves (insertion of a new user/record) is serialized by
//! the outer `RwLock`, per §5's "single coarse mutex or equivalent
//! concurrent map" policy.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, MutexGuard, RwLock};

use crate::store::{StoreError, UserSettingsStore};

/// The synthetic key used between slot-acquisition and the engine returning
/// a real `callId` (§3, §4.4 step 2).
pub fn pending_key(campaign_id: i64, contact_id: i64) -> String {
    format!("pending_{campaign_id}_{contact_id}")
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ActiveCallRecord {
    #[serde(rename = "contactId")]
    pub contact_id: i64,
    #[serde(rename = "campaignId")]
    pub campaign_id: i64,
    #[serde(rename = "userId")]
    pub user_id: i64,
    #[serde(rename = "startedAt")]
    pub started_at: DateTime<Utc>,
}

struct UserBudgetState {
    active_calls: i32,
    max_concurrent_calls: i32,
    active_campaigns: std::collections::HashSet<i64>,
}

/// One user's budget. `state` (the counter, cap, and active-campaign set)
/// and `processing` (the re-entry latch) are deliberately separate mutexes:
/// `processUserCalls` holds `processing` for its whole invocation while
/// still needing to lock `state` internally via `acquire`/`release`, which
/// would deadlock against a non-reentrant mutex if the two shared one lock.
pub struct UserBudget {
    state: Mutex<UserBudgetState>,
    processing: Arc<Mutex<()>>,
}

impl UserBudget {
    fn new(max_concurrent_calls: i32) -> Self {
        Self {
            state: Mutex::new(UserBudgetState {
                active_calls: 0,
                max_concurrent_calls,
                active_campaigns: std::collections::HashSet::new(),
            }),
            processing: Arc::new(Mutex::new(())),
        }
    }

    async fn lock(&self) -> MutexGuard<'_, UserBudgetState> {
        self.state.lock().await
    }

    /// `processingLatch(userId)` (§4.3): a single-writer flag that prevents
    /// two concurrent `processUserCalls` invocations for the same user.
    /// Attempted re-entry returns `None` immediately rather than blocking.
    /// Returns an owned guard so it can outlive the `Arc<UserBudget>` lookup
    /// that produced it.
    fn try_enter_processing_owned(&self) -> Option<tokio::sync::OwnedMutexGuard<()>> {
        self.processing.clone().try_lock_owned().ok()
    }
}

/// Held for the duration of one `processUserCalls(userId)` invocation;
/// dropping it releases the latch.
pub struct ProcessingGuard {
    _guard: tokio::sync::OwnedMutexGuard<()>,
}

/// Process-wide registry of `UserBudget`s and `ActiveCallRecord`s.
pub struct UserBudgetRegistry {
    budgets: RwLock<HashMap<i64, Arc<UserBudget>>>,
    active_calls: RwLock<HashMap<String, ActiveCallRecord>>,
    settings: Arc<dyn UserSettingsStore>,
}

impl UserBudgetRegistry {
    pub fn new(settings: Arc<dyn UserSettingsStore>) -> Self {
        Self {
            budgets: RwLock::new(HashMap::new()),
            active_calls: RwLock::new(HashMap::new()),
            settings,
        }
    }

    /// Returns the user's budget, lazily constructing and rebuilding it
    /// (by summing `in-progress` Contacts, per §3/§4.3) on first touch.
    async fn get_or_init(
        &self,
        user_id: i64,
        campaign_store: &dyn crate::store::CampaignStore,
    ) -> Result<Arc<UserBudget>, StoreError> {
        if let Some(budget) = self.budgets.read().await.get(&user_id) {
            return Ok(budget.clone());
        }

        let settings = self.settings.get(user_id).await?;
        let active_calls = campaign_store.count_in_progress_for_user(user_id).await?;
        let budget = Arc::new(UserBudget::new(settings.max_concurrent_calls));
        {
            let mut state = budget.lock().await;
            state.active_calls = active_calls as i32;
        }

        let mut budgets = self.budgets.write().await;
        let budget = budgets.entry(user_id).or_insert(budget).clone();
        Ok(budget)
    }

    /// Attempts to acquire the per-user processing latch. Returns `None`
    /// immediately if another `processUserCalls` invocation is already
    /// running for this user, per §4.3's "attempted re-entry returns
    /// immediately without work".
    pub async fn try_enter_processing(
        &self,
        user_id: i64,
        campaign_store: &dyn crate::store::CampaignStore,
    ) -> Result<Option<ProcessingGuard>, StoreError> {
        let budget = self.get_or_init(user_id, campaign_store).await?;
        Ok(budget
            .try_enter_processing_owned()
            .map(|guard| ProcessingGuard { _guard: guard }))
    }

    /// Raw settings passthrough, used by `CallInitiator` to validate
    /// provider credentials before acquiring a budget slot (§4.4 step 1).
    pub async fn user_settings(&self, user_id: i64) -> Result<crate::models::UserSettings, StoreError> {
        self.settings.get(user_id).await
    }

    /// `available(userId)` (§4.3), re-reading `maxConcurrentCalls` from the
    /// store so operator changes take effect without a restart.
    pub async fn available(
        &self,
        user_id: i64,
        campaign_store: &dyn crate::store::CampaignStore,
    ) -> Result<i32, StoreError> {
        let budget = self.get_or_init(user_id, campaign_store).await?;
        let settings = self.settings.get(user_id).await?;
        let mut state = budget.lock().await;
        state.max_concurrent_calls = settings.max_concurrent_calls;
        Ok((state.max_concurrent_calls - state.active_calls).max(0))
    }

    pub async fn acquire(
        &self,
        user_id: i64,
        campaign_store: &dyn crate::store::CampaignStore,
    ) -> Result<(), StoreError> {
        let budget = self.get_or_init(user_id, campaign_store).await?;
        let mut state = budget.lock().await;
        state.active_calls += 1;
        Ok(())
    }

    /// Release is floored at zero — defensive against a duplicate webhook
    /// or reaper firing twice for the same call (§4.3, §7 duplicate-webhook).
    pub async fn release(&self, user_id: i64, campaign_store: &dyn crate::store::CampaignStore) {
        match self.get_or_init(user_id, campaign_store).await {
            Ok(budget) => {
                let mut state = budget.lock().await;
                state.active_calls = (state.active_calls - 1).max(0);
            }
            Err(e) => tracing::error!(user_id, error = %e, "failed to load budget for release"),
        }
    }

    pub async fn mark_campaign_active(&self, user_id: i64, campaign_id: i64) {
        if let Some(budget) = self.budgets.read().await.get(&user_id) {
            budget.lock().await.active_campaigns.insert(campaign_id);
        }
    }

    pub async fn mark_campaign_inactive(&self, user_id: i64, campaign_id: i64) {
        if let Some(budget) = self.budgets.read().await.get(&user_id) {
            budget.lock().await.active_campaigns.remove(&campaign_id);
        }
    }

    /// Resets a user's cached counter to zero and drops all their
    /// `ActiveCallRecord`s — used by `admin::reset_user_call_state`.
    pub async fn reset_user(&self, user_id: i64) {
        if let Some(budget) = self.budgets.read().await.get(&user_id) {
            budget.lock().await.active_calls = 0;
        }
        self.active_calls.write().await.retain(|_, r| r.user_id != user_id);
    }

    pub async fn insert_active_call(&self, key: String, record: ActiveCallRecord) {
        self.active_calls.write().await.insert(key, record);
    }

    pub async fn remove_active_call(&self, key: &str) -> Option<ActiveCallRecord> {
        self.active_calls.write().await.remove(key)
    }

    pub async fn rekey_active_call(&self, old_key: &str, new_key: String) {
        let mut calls = self.active_calls.write().await;
        if let Some(record) = calls.remove(old_key) {
            calls.insert(new_key, record);
        }
    }

    /// Read-only introspection for the admin `GET /campaigns/call-state`
    /// endpoint — every `ActiveCallRecord` currently tracked for `user_id`.
    pub async fn active_calls_for_user(&self, user_id: i64) -> Vec<ActiveCallRecord> {
        self.active_calls
            .read()
            .await
            .values()
            .filter(|r| r.user_id == user_id)
            .cloned()
            .collect()
    }

    pub async fn stale_active_calls(&self, threshold: chrono::Duration) -> Vec<(String, ActiveCallRecord)> {
        let now = Utc::now();
        self.active_calls
            .read()
            .await
            .iter()
            .filter(|(_, r)| now - r.started_at >= threshold)
            .map(|(k, r)| (k.clone(), r.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::UserSettings;
    use crate::store::fake::{FakeCampaignStore, FakeUserSettingsStore};

    #[tokio::test]
    async fn acquire_and_release_respect_cap() {
        let campaign_store = FakeCampaignStore::new();
        let settings = Arc::new(FakeUserSettingsStore::new());
        settings
            .set(UserSettings {
                user_id: 1,
                max_concurrent_calls: 2,
                telephony_providers: Vec::new(),
            })
            .await;

        let registry = UserBudgetRegistry::new(settings);
        assert_eq!(registry.available(1, &campaign_store).await.unwrap(), 2);

        registry.acquire(1, &campaign_store).await.unwrap();
        registry.acquire(1, &campaign_store).await.unwrap();
        assert_eq!(registry.available(1, &campaign_store).await.unwrap(), 0);

        registry.release(1, &campaign_store).await;
        assert_eq!(registry.available(1, &campaign_store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn release_is_floored_at_zero() {
        let campaign_store = FakeCampaignStore::new();
        let settings = Arc::new(FakeUserSettingsStore::new());
        let registry = UserBudgetRegistry::new(settings);

        registry.release(1, &campaign_store).await;
        registry.release(1, &campaign_store).await;
        assert_eq!(registry.available(1, &campaign_store).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn stale_active_calls_respects_threshold() {
        let settings = Arc::new(FakeUserSettingsStore::new());
        let registry = UserBudgetRegistry::new(settings);

        registry
            .insert_active_call(
                "EC1".to_string(),
                ActiveCallRecord {
                    contact_id: 1,
                    campaign_id: 1,
                    user_id: 1,
                    started_at: Utc::now() - chrono::Duration::minutes(20),
                },
            )
            .await;
        registry
            .insert_active_call(
                "EC2".to_string(),
                ActiveCallRecord {
                    contact_id: 2,
                    campaign_id: 1,
                    user_id: 1,
                    started_at: Utc::now(),
                },
            )
            .await;

        let stale = registry.stale_active_calls(chrono::Duration::minutes(15)).await;
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].0, "EC1");
    }
}
