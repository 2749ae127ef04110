use std::{sync::Arc, time::Duration};

use tokio::signal;
use tracing_subscriber::EnvFilter;

use loanpro::auth::jwt::JwtService;
use loanpro::config::AppConfig;
use loanpro::db;
use loanpro::gateways::{email_sender_from_config, sms_sender_from_config};
use loanpro::s3::build_client;
use loanpro::state::AppState;
use loanpro::storage::S3Storage;
use loanpro::Dispatcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "dispatcher",
        database_url = %config.redacted_database_url(),
        pool_size = 1,
        email_gateway_enabled = config.email_gateway_url.is_some(),
        sms_gateway_enabled = config.sms_gateway_url.is_some(),
        "loaded configuration"
    );

    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    let s3_client = build_client(&config).await?;
    let storage = Arc::new(S3Storage::new(s3_client, config.s3_bucket.clone()));
    let email = email_sender_from_config(&config);
    let sms = sms_sender_from_config(&config);
    let jwt = JwtService::from_config(&config)?;

    let state = Arc::new(AppState::new(pool, config, storage, email, sms, jwt));
    let dispatcher = Dispatcher::new(state, Duration::from_secs(2));

    tokio::select! {
        _ = dispatcher.run() => {}
        _ = signal::ctrl_c() => {
            tracing::info!("dispatcher received shutdown signal");
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}
