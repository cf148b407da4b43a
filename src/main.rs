//! Back office server binary.
//!
//! Wires the store, mail queue, gateway adapter and coordinator together,
//! starts the optional stale-entry sweep, and serves the HTTP API until
//! shutdown.

use raceday::auth::AuthService;
use raceday::coordinator::EntryCoordinator;
use raceday::gateway::GatewayAdapter;
use raceday::mailer::provider::HttpEmailSender;
use raceday::mailer::queue::MailQueue;
use raceday::server::state::AppState;
use raceday::store::postgres::PgEntryStore;
use raceday::store::EntryStore;
use raceday::Config;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,raceday=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    tracing::info!(
        host = %config.server.host,
        port = config.server.port,
        "starting race office server"
    );

    let store: Arc<dyn EntryStore> = Arc::new(
        PgEntryStore::connect(&config.postgres)
            .await
            .map_err(|e| anyhow::anyhow!("store init failed: {e}"))?,
    );
    tracing::info!("store connected, migrations applied");

    let sender = Arc::new(
        HttpEmailSender::new(config.email.clone())
            .map_err(|e| anyhow::anyhow!("mailer init failed: {e}"))?,
    );
    let mailer = Arc::new(MailQueue::start(sender, config.mail_queue.clone()));

    let coordinator = Arc::new(EntryCoordinator::new(
        store.clone(),
        mailer.clone(),
        GatewayAdapter::new(config.gateway.clone()),
        config.pricing,
    ));
    let auth = Arc::new(AuthService::new(
        store.clone(),
        mailer.clone(),
        config.auth.reset_base_url.clone(),
    ));

    if config.auth.admin_token.is_empty() {
        tracing::warn!("ADMIN_TOKEN is not set; admin endpoints are disabled");
    }

    if let Some(hours) = config.policy.stale_pending_max_age_hours {
        let sweep = coordinator.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(Duration::from_secs(3_600));
            loop {
                tick.tick().await;
                let cutoff = chrono::Utc::now() - chrono::Duration::hours(hours as i64);
                if let Err(error) = sweep.cancel_stale_pending(cutoff).await {
                    tracing::warn!(%error, "stale entry sweep failed");
                }
            }
        });
        tracing::info!(hours, "stale pending entry sweep enabled");
    }

    let state = AppState::new(
        coordinator,
        auth,
        store,
        mailer,
        config.auth.admin_token.clone(),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    raceday::server::serve(
        state,
        addr,
        Duration::from_secs(config.server.request_timeout),
    )
    .await
}
