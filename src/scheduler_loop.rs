//! SchedulerLoop (§4.7): the periodic tick that drives everything else.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{interval, Duration};

use crate::budget::UserBudgetRegistry;
use crate::call_initiator::CallInitiator;
use crate::claimer::ContactClaimer;
use crate::models::{CampaignStatus, CampaignType};
use crate::reaper::StaleCallReaper;
use crate::store::CampaignStore;
use crate::time_window;

pub const DEFAULT_TICK_SECS: u64 = 30;

pub struct SchedulerLoop {
    campaign_store: Arc<dyn CampaignStore>,
    budget: Arc<UserBudgetRegistry>,
    claimer: Arc<ContactClaimer>,
    call_initiator: Arc<CallInitiator>,
    reaper: Arc<StaleCallReaper>,
    shutdown: Arc<RwLock<bool>>,
    tick: Duration,
}

impl SchedulerLoop {
    pub fn new(
        campaign_store: Arc<dyn CampaignStore>,
        budget: Arc<UserBudgetRegistry>,
        claimer: Arc<ContactClaimer>,
        call_initiator: Arc<CallInitiator>,
        reaper: Arc<StaleCallReaper>,
        tick_secs: u64,
    ) -> Self {
        Self {
            campaign_store,
            budget,
            claimer,
            call_initiator,
            reaper,
            shutdown: Arc::new(RwLock::new(false)),
            tick: Duration::from_secs(tick_secs),
        }
    }

    pub async fn shutdown(&self) {
        *self.shutdown.write().await = true;
    }

    /// Runs forever (until `shutdown`), ticking on `self.tick`.
    pub async fn run(self: Arc<Self>) {
        let mut ticker = interval(self.tick);
        loop {
            ticker.tick().await;
            if *self.shutdown.read().await {
                tracing::info!("scheduler loop shutting down");
                break;
            }
            if let Err(e) = self.tick_once().await {
                tracing::error!(error = %e, "scheduler tick failed");
            }
        }
    }

    /// One tick, in the exact order §4.7 specifies.
    pub async fn tick_once(&self) -> Result<(), crate::store::StoreError> {
        // 1. Reap stale calls.
        self.reaper.reap().await;

        let mut users_to_process: HashSet<i64> = HashSet::new();

        // 2. Start due scheduled campaigns.
        for campaign in self.campaign_store.list_outbound_by_status(CampaignStatus::Scheduled).await? {
            let Some(schedule) = campaign.schedule() else {
                continue;
            };
            if time_window::should_start(&schedule, chrono::Utc::now()) {
                self.campaign_store.start_campaign(campaign.id).await?;
                self.budget.mark_campaign_active(campaign.user_id, campaign.id).await;
                users_to_process.insert(campaign.user_id);
            }
        }

        // 3. Resume parked campaigns.
        for campaign in self
            .campaign_store
            .list_outbound_by_status(CampaignStatus::PausedTimeWindow)
            .await?
        {
            let Some(schedule) = campaign.schedule() else {
                continue;
            };
            let pending = self.campaign_store.count_pending_contacts(campaign.id).await?;
            if pending > 0 && time_window::can_resume_in_window(&schedule, chrono::Utc::now()) {
                self.campaign_store.start_campaign(campaign.id).await?;
                self.budget.mark_campaign_active(campaign.user_id, campaign.id).await;
                users_to_process.insert(campaign.user_id);
            }
        }

        // 4. Stop closed windows.
        for campaign in self.campaign_store.list_outbound_by_status(CampaignStatus::Active).await? {
            let Some(schedule) = campaign.schedule() else {
                continue;
            };
            if time_window::should_stop(&schedule, chrono::Utc::now()) {
                let pending = self.campaign_store.count_pending_contacts(campaign.id).await?;
                if pending > 0 {
                    self.campaign_store.park_campaign(campaign.id, "end-time-reached").await?;
                } else {
                    self.campaign_store.complete_campaign(campaign.id).await?;
                }
                self.budget.mark_campaign_inactive(campaign.user_id, campaign.id).await;
            } else {
                users_to_process.insert(campaign.user_id);
            }
        }

        // 5. Fan out per-user processing.
        for user_id in users_to_process {
            self.process_user_calls(user_id).await;
        }

        Ok(())
    }

    /// The inner hot loop (§4.7). Round-robin across the user's active
    /// outbound campaigns, one claim per campaign per pass, until the
    /// budget is exhausted or a full pass yields no claim.
    pub async fn process_user_calls(&self, user_id: i64) {
        let Ok(Some(_latch)) = self.budget.try_enter_processing(user_id, self.campaign_store.as_ref()).await
        else {
            return;
        };

        loop {
            let available = match self.budget.available(user_id, self.campaign_store.as_ref()).await {
                Ok(n) => n,
                Err(e) => {
                    tracing::error!(user_id, error = %e, "failed to compute available budget");
                    return;
                }
            };
            if available <= 0 {
                return;
            }

            let campaigns = match self.campaign_store.list_active_outbound_for_user(user_id).await {
                Ok(c) => c,
                Err(e) => {
                    tracing::error!(user_id, error = %e, "failed to list active campaigns");
                    return;
                }
            };
            if campaigns.is_empty() {
                return;
            }

            let mut claimed_any = false;
            for campaign in &campaigns {
                if !matches!(campaign.campaign_type, CampaignType::Outbound) {
                    continue;
                }
                if self.budget.available(user_id, self.campaign_store.as_ref()).await.unwrap_or(0) <= 0 {
                    break;
                }
                if let Some(contact) = self.claimer.claim_pending_contact(campaign.id).await {
                    claimed_any = true;
                    self.call_initiator.initiate(campaign, contact).await;
                }
            }

            if !claimed_any {
                for campaign in &campaigns {
                    let pending = self.campaign_store.count_pending_contacts(campaign.id).await.unwrap_or(1);
                    let in_progress =
                        self.campaign_store.count_in_progress_contacts(campaign.id).await.unwrap_or(1);
                    if pending == 0 && in_progress == 0 {
                        if let Err(e) = self.campaign_store.complete_campaign(campaign.id).await {
                            tracing::error!(campaign_id = campaign.id, error = %e, "failed to complete drained campaign");
                        }
                        self.budget.mark_campaign_inactive(user_id, campaign.id).await;
                    }
                }
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Campaign, CampaignStatus, CampaignType, Contact, ContactStatus, UserSettings};
    use crate::store::fake::{FakeCallHistoryStore, FakeCampaignStore, FakeUserSettingsStore};
    use crate::telephony::{BridgeResult, TelephonyClient, TelephonyError};
    use crate::voice_engine::{CallDetails, CreateCallResponse, VoiceEngineClient, VoiceEngineError};
    use std::collections::HashMap as StdHashMap;

    struct FakeVoiceEngine;

    #[async_trait::async_trait]
    impl VoiceEngineClient for FakeVoiceEngine {
        async fn create_call(
            &self,
            _agent_id: &str,
            _request: crate::voice_engine::CreateCallRequest,
        ) -> Result<CreateCallResponse, VoiceEngineError> {
            Ok(CreateCallResponse {
                engine_call_id: format!("EC{}", uuid_like()),
                join_url: "https://join.example/EC".into(),
            })
        }

        async fn get_call_details(&self, _engine_call_id: &str) -> Result<CallDetails, VoiceEngineError> {
            unimplemented!("not exercised by SchedulerLoop")
        }

        async fn create_webhook(
            &self,
            _url: &str,
            _events: &[&str],
            _agent_id: Option<&str>,
            _secret: Option<&str>,
        ) -> Result<String, VoiceEngineError> {
            unimplemented!("not exercised by SchedulerLoop")
        }

        async fn delete_webhook(&self, _webhook_id: &str) -> Result<(), VoiceEngineError> {
            unimplemented!("not exercised by SchedulerLoop")
        }
    }

    /// A cheap per-call-unique suffix without reaching for a UUID crate —
    /// good enough to keep `FakeCallHistoryStore`'s call-id keys distinct
    /// across the handful of calls one test makes.
    fn uuid_like() -> i64 {
        use std::sync::atomic::{AtomicI64, Ordering};
        static COUNTER: AtomicI64 = AtomicI64::new(1);
        COUNTER.fetch_add(1, Ordering::SeqCst)
    }

    struct FakeTelephony;

    #[async_trait::async_trait]
    impl TelephonyClient for FakeTelephony {
        async fn bridge(
            &self,
            _from_phone: &str,
            _to_phone: &str,
            _join_url: &str,
            _correlation_tags: &StdHashMap<String, String>,
        ) -> Result<BridgeResult, TelephonyError> {
            Ok(BridgeResult {
                provider_call_id: "PC1".into(),
            })
        }
    }

    /// A schedule whose window opened `started_ago` in the past and closes
    /// `ends_in` from now, with the campaign's original `scheduledDate`
    /// backdated by `backdate_days` on top of that — letting a test pin down
    /// a window that's open *right now* while still simulating a campaign
    /// whose lifetime started several days ago.
    fn open_window(
        started_ago: chrono::Duration,
        ends_in: chrono::Duration,
        backdate_days: i64,
    ) -> (
        Option<chrono::NaiveDate>,
        Option<chrono::NaiveTime>,
        Option<chrono::NaiveTime>,
        Option<String>,
    ) {
        let now = chrono::Utc::now();
        let start_instant = now - started_ago;
        let end_instant = now + ends_in;
        let scheduled_date = start_instant.date_naive() - chrono::Duration::days(backdate_days);
        (
            Some(scheduled_date),
            Some(start_instant.time()),
            Some(end_instant.time()),
            Some("UTC".into()),
        )
    }

    fn campaign(id: i64, user_id: i64, status: CampaignStatus) -> Campaign {
        Campaign {
            id,
            user_id,
            campaign_type: CampaignType::Outbound,
            agent_ref: "agent-1".into(),
            status,
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

    fn pending_contact(id: i64, campaign_id: i64) -> Contact {
        Contact {
            id,
            campaign_id,
            name: "Alice".into(),
            phone_number: "+15551000000".into(),
            call_status: ContactStatus::Pending,
            engine_call_id: None,
            call_history_id: None,
            called_at: None,
            call_duration: None,
            call_notes: None,
        }
    }

    fn scheduler_loop(
        campaign_store: Arc<FakeCampaignStore>,
        call_history_store: Arc<FakeCallHistoryStore>,
        budget: Arc<UserBudgetRegistry>,
    ) -> SchedulerLoop {
        let call_initiator = Arc::new(CallInitiator::new(
            campaign_store.clone(),
            call_history_store,
            budget.clone(),
            Arc::new(FakeVoiceEngine),
            Arc::new({
                let mut registry = crate::telephony::TelephonyRegistry::new();
                registry.register("telnyx", Box::new(FakeTelephony));
                registry
            }),
        ));
        let claimer = Arc::new(ContactClaimer::new(campaign_store.clone()));
        let reaper = Arc::new(StaleCallReaper::new(
            campaign_store.clone(),
            budget.clone(),
            Arc::new(|_| {}),
            crate::reaper::DEFAULT_STALE_THRESHOLD_SECS,
        ));
        SchedulerLoop::new(campaign_store, budget, claimer, call_initiator, reaper, DEFAULT_TICK_SECS)
    }

    async fn budget_for(user_id: i64, max_concurrent_calls: i32) -> Arc<UserBudgetRegistry> {
        let settings = Arc::new(FakeUserSettingsStore::new());
        settings
            .set(UserSettings {
                user_id,
                max_concurrent_calls,
                telephony_providers: vec!["telnyx".into()],
            })
            .await;
        Arc::new(UserBudgetRegistry::new(settings))
    }

    #[tokio::test]
    async fn tick_starts_due_campaign_and_dials_it_in_the_same_tick() {
        let campaign_store = Arc::new(FakeCampaignStore::new());
        let (date, sched_time, end_time, tz) =
            open_window(chrono::Duration::minutes(1), chrono::Duration::hours(2), 0);
        let mut camp = campaign(1, 1, CampaignStatus::Scheduled);
        camp.scheduled_date = date;
        camp.scheduled_time = sched_time;
        camp.end_time = end_time;
        camp.timezone = tz;
        campaign_store.insert_campaign(camp).await;
        campaign_store.insert_contact(pending_contact(1, 1)).await;

        let call_history_store = Arc::new(FakeCallHistoryStore::new());
        let budget = budget_for(1, 1).await;
        let scheduler = scheduler_loop(campaign_store.clone(), call_history_store, budget);

        scheduler.tick_once().await.unwrap();

        let started = campaign_store.get_campaign(1).await.unwrap().unwrap();
        assert_eq!(started.status, CampaignStatus::Active);

        let contact = campaign_store.get_contact(1).await.unwrap().unwrap();
        assert!(contact.engine_call_id.is_some(), "contact should be dialed in the same tick it started");
    }

    #[tokio::test]
    async fn round_robins_claims_across_a_users_active_campaigns() {
        let campaign_store = Arc::new(FakeCampaignStore::new());
        let (date, sched_time, end_time, tz) =
            open_window(chrono::Duration::hours(1), chrono::Duration::hours(1), 0);
        for id in [1, 2] {
            let mut camp = campaign(id, 1, CampaignStatus::Active);
            camp.scheduled_date = date;
            camp.scheduled_time = sched_time;
            camp.end_time = end_time;
            camp.timezone = tz.clone();
            campaign_store.insert_campaign(camp).await;
            campaign_store.insert_contact(pending_contact(id * 10 + 1, id)).await;
            campaign_store.insert_contact(pending_contact(id * 10 + 2, id)).await;
        }

        let call_history_store = Arc::new(FakeCallHistoryStore::new());
        let budget = budget_for(1, 2).await;
        let scheduler = scheduler_loop(campaign_store.clone(), call_history_store, budget);

        scheduler.tick_once().await.unwrap();

        let camp1_pending = campaign_store.contacts_for(1).await;
        let camp2_pending = campaign_store.contacts_for(2).await;
        let camp1_claimed = camp1_pending.iter().filter(|c| c.call_status != ContactStatus::Pending).count();
        let camp2_claimed = camp2_pending.iter().filter(|c| c.call_status != ContactStatus::Pending).count();

        assert_eq!(camp1_claimed, 1, "budget should be spread across campaigns, not drained into one");
        assert_eq!(camp2_claimed, 1, "budget should be spread across campaigns, not drained into one");
    }

    #[tokio::test]
    async fn resumed_multi_day_campaign_is_not_immediately_reparked() {
        let campaign_store = Arc::new(FakeCampaignStore::new());
        let mut camp = campaign(1, 1, CampaignStatus::PausedTimeWindow);
        // Today's window opened an hour ago and closes in an hour, but the
        // campaign's original scheduledDate is backdated 5 days. The old
        // end-of-window-on-the-original-day bug would treat that day's end
        // time as permanently in the past and re-park this campaign the
        // instant it resumed.
        let (date, sched_time, end_time, tz) =
            open_window(chrono::Duration::hours(1), chrono::Duration::hours(1), 5);
        camp.scheduled_date = date;
        camp.scheduled_time = sched_time;
        camp.end_time = end_time;
        camp.timezone = tz;
        campaign_store.insert_campaign(camp).await;
        campaign_store.insert_contact(pending_contact(1, 1)).await;

        let call_history_store = Arc::new(FakeCallHistoryStore::new());
        let budget = budget_for(1, 1).await;
        let scheduler = scheduler_loop(campaign_store.clone(), call_history_store, budget);

        scheduler.tick_once().await.unwrap();

        let resumed = campaign_store.get_campaign(1).await.unwrap().unwrap();
        assert_eq!(
            resumed.status,
            CampaignStatus::Active,
            "a campaign resumed today must be measured against today's window, not the day it first started"
        );

        let contact = campaign_store.get_contact(1).await.unwrap().unwrap();
        assert!(contact.engine_call_id.is_some(), "resumed campaign should keep dialing in the same tick");
    }
}
