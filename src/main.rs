/// Lotkeeper - account management and authentication service
///
/// The account subsystem of the Lotkeeper parking platform: login with
/// progressive lockout, token-mediated registration and email flows,
/// and scheduled reconciliation of stale account state.

mod api;
mod auth;
mod config;
mod context;
mod db;
mod error;
mod jobs;
mod lifecycle;
mod login;
mod mailer;
mod password;
mod server;
mod tokens;

use config::AppConfig;
use context::AppContext;
use error::ServiceResult;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ServiceResult<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "lotkeeper=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Lotkeeper account service v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let config = AppConfig::from_env()?;

    // Create application context
    let ctx = Arc::new(AppContext::new(config).await?);

    if !ctx.mailer.is_configured() {
        tracing::warn!("Email delivery not configured; notifications will be logged and dropped");
    }

    // Start reconciliation jobs
    let scheduler = Arc::new(jobs::JobScheduler::new(Arc::clone(&ctx)));
    scheduler.start();

    // Start server
    server::serve((*ctx).clone()).await?;

    Ok(())
}
