mod api;
mod credentials;
mod db;
mod pipeline;
mod router;
mod state;
mod store;

use std::sync::Arc;

use anyhow::Context;
use biportal_notify::EmailNotifier;
use biportal_powerbi::PowerBiClient;
use biportal_schedule::{process_due_subscriptions, ReportExporter};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::pipeline::ReportDeliveryPipeline;
use crate::state::AppState;
use crate::store::{PgSubscriptionStore, StoreSource, SubscriptionStore};

#[derive(Parser)]
#[command(name = "biportal-server", version, about = "Recurring Power BI report delivery")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP server (default).
    Serve,
    /// Run one dispatch cycle against the configured store and exit.
    Dispatch,
}

fn load_config() -> biportal_core::Config {
    biportal_core::config::load_dotenv();
    biportal_core::Config::from_env()
}

async fn build_state(config: &biportal_core::Config) -> anyhow::Result<AppState> {
    let credential_key = credentials::load_or_generate_key(&config.dispatch.data_dir)
        .context("failed to load credential encryption key")?;

    let store: Option<Arc<dyn SubscriptionStore>> = db::init_pg_pool(&config.postgres)
        .await
        .map(|pool| Arc::new(PgSubscriptionStore::new(pool)) as Arc<dyn SubscriptionStore>);

    let exporter: Option<Arc<dyn ReportExporter>> = match &store {
        Some(store) => match EmailNotifier::from_config(&config.smtp) {
            Ok(notifier) => Some(Arc::new(ReportDeliveryPipeline::new(
                store.clone(),
                Arc::new(PowerBiClient::new(&config.powerbi)),
                Arc::new(notifier),
                credential_key,
            ))),
            Err(e) => {
                warn!(error = %e, "report delivery disabled");
                None
            }
        },
        None => None,
    };

    if config.dispatch.trigger_token.is_none() {
        warn!("DISPATCH_TRIGGER_TOKEN not set, dispatch trigger is unauthenticated");
    }

    Ok(AppState {
        store,
        exporter,
        credential_key,
        trigger_token: config.dispatch.trigger_token.clone(),
    })
}

async fn serve(config: &biportal_core::Config) -> anyhow::Result<()> {
    let state = Arc::new(build_state(config).await?);
    let app = router::build_router(state, &config.server.cors_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Server listening on http://localhost:{}", config.server.port);
    axum::serve(listener, app).await?;

    Ok(())
}

/// One cycle without HTTP, for a system cron. Fails only if the active set
/// cannot be read; per-subscription failures are reported, not fatal.
async fn dispatch_once(config: &biportal_core::Config) -> anyhow::Result<()> {
    let state = build_state(config).await?;
    let store = state
        .store
        .context("subscription store is not configured (PG_USERNAME)")?;
    let exporter = state
        .exporter
        .context("report delivery is not configured (SMTP_HOST)")?;

    let report = process_due_subscriptions(&StoreSource(store), exporter.as_ref(), chrono::Utc::now()).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let config = load_config();
    config.log_summary();

    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => serve(&config).await,
        Command::Dispatch => dispatch_once(&config).await,
    }
}
