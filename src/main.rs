//! Campaign scheduler and call-slot orchestrator — binary entry point.
//!
//! Wires the durable store, the voice-engine/telephony HTTP clients, the
//! in-memory budget registry, the scheduler loop, and the axum HTTP
//! surface together, then runs until killed.

use std::sync::Arc;

use campaign_scheduler::admin::AdminOps;
use campaign_scheduler::budget::UserBudgetRegistry;
use campaign_scheduler::call_initiator::CallInitiator;
use campaign_scheduler::claimer::ContactClaimer;
use campaign_scheduler::config::SchedulerConfig;
use campaign_scheduler::http::{self, AppState};
use campaign_scheduler::reaper::StaleCallReaper;
use campaign_scheduler::scheduler_loop::SchedulerLoop;
use campaign_scheduler::store::postgres::{
    PostgresCallHistoryStore, PostgresCampaignStore, PostgresUserSettingsStore,
};
use campaign_scheduler::telephony::{PlivoStyleClient, TelephonyRegistry, TelnyxStyleClient, TwilioStyleClient};
use campaign_scheduler::voice_engine::HttpVoiceEngineClient;
use campaign_scheduler::webhook::WebhookReducer;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("campaign_scheduler=info".parse().unwrap()),
        )
        .init();

    dotenvy::dotenv().ok();

    let config = SchedulerConfig::from_env()?;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let campaign_store = Arc::new(PostgresCampaignStore::new(pool.clone()));
    let call_history_store = Arc::new(PostgresCallHistoryStore::new(pool.clone()));
    let user_settings_store = Arc::new(PostgresUserSettingsStore::new(pool));

    let budget = Arc::new(UserBudgetRegistry::new(user_settings_store));

    let voice_engine_api_key = std::env::var("VOICE_ENGINE_API_KEY").unwrap_or_default();
    let voice_engine_base_url = std::env::var("VOICE_ENGINE_BASE_URL")
        .unwrap_or_else(|_| "https://api.voice-engine.example".to_string());
    let voice_engine = Arc::new(HttpVoiceEngineClient::new(voice_engine_api_key, voice_engine_base_url));

    let mut telephony_registry = TelephonyRegistry::new();
    telephony_registry.register(
        "twilio",
        Box::new(TwilioStyleClient::new(
            std::env::var("TWILIO_ACCOUNT_SID").unwrap_or_default(),
            std::env::var("TWILIO_AUTH_TOKEN").unwrap_or_default(),
            config.webhook_base_url.clone(),
        )),
    );
    telephony_registry.register(
        "plivo",
        Box::new(PlivoStyleClient::new(
            std::env::var("PLIVO_AUTH_ID").unwrap_or_default(),
            std::env::var("PLIVO_AUTH_TOKEN").unwrap_or_default(),
            config.webhook_base_url.clone(),
        )),
    );
    telephony_registry.register(
        "telnyx",
        Box::new(TelnyxStyleClient::new(
            std::env::var("TELNYX_API_KEY").unwrap_or_default(),
            std::env::var("TELNYX_CONNECTION_ID").unwrap_or_default(),
            config.webhook_base_url.clone(),
        )),
    );
    let telephony_registry = Arc::new(telephony_registry);

    let call_initiator = Arc::new(
        CallInitiator::new(
            campaign_store.clone(),
            call_history_store.clone(),
            budget.clone(),
            voice_engine,
            telephony_registry,
        )
        .with_max_call_duration_secs(config.call_max_duration_secs),
    );

    let claimer = Arc::new(ContactClaimer::new(campaign_store.clone()));

    // Webhooks and the stale-call reaper both want to nudge
    // `processUserCalls` outside the regular tick cadence (§4.5 step 6's
    // "wake"). `SchedulerLoop` owns its own reaper, so a channel avoids the
    // circular `Arc` a direct callback into `SchedulerLoop` would need.
    let (wake_tx, mut wake_rx) = tokio::sync::mpsc::unbounded_channel::<i64>();

    let scheduler_loop = Arc::new(SchedulerLoop::new(
        campaign_store.clone(),
        budget.clone(),
        claimer.clone(),
        call_initiator.clone(),
        Arc::new(StaleCallReaper::new(
            campaign_store.clone(),
            budget.clone(),
            wake_handle(wake_tx.clone()),
            config.stale_call_threshold_secs,
        )),
        config.scheduler_tick_secs,
    ));

    let webhook_reducer = Arc::new(WebhookReducer::new(
        campaign_store.clone(),
        call_history_store,
        budget.clone(),
        wake_handle(wake_tx),
    ));

    let admin = Arc::new(AdminOps::new(
        campaign_store,
        budget,
        scheduler_loop.clone(),
        claimer,
        call_initiator,
    ));

    tokio::spawn(scheduler_loop.clone().run());
    tokio::spawn(async move {
        while let Some(user_id) = wake_rx.recv().await {
            scheduler_loop.process_user_calls(user_id).await;
        }
    });

    let app = http::create_router(AppState {
        admin,
        webhook: webhook_reducer,
        engine_webhook_secret: config.engine_webhook_secret,
    });

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port)).await?;
    tracing::info!(port = config.http_port, "campaign scheduler listening");
    axum::serve(listener, app).await?;

    Ok(())
}

fn wake_handle(tx: tokio::sync::mpsc::UnboundedSender<i64>) -> Arc<dyn Fn(i64) + Send + Sync> {
    Arc::new(move |user_id: i64| {
        if tx.send(user_id).is_err() {
            tracing::warn!(user_id, "wake channel closed, scheduler loop likely shut down");
        }
    })
}
