//! slbnc - Straylight Bouncer
//!
//! Keeps IRC sessions connected on behalf of its accounts and lets any
//! number of clients share them.

use slbnc::Bouncer;
use slbnc::account::AccountStore;
use slbnc::config::{Config, LogFormat, LoggingConfig, validation};
use slbnc::network::Gateway;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    match logging.format {
        LogFormat::Pretty => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "slbnc.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        eprintln!("Failed to load config {config_path}: {e}");
        e
    })?;

    init_tracing(&config.logging);

    if let Err(errors) = validation::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        anyhow::bail!("{} configuration error(s) in {}", errors.len(), config_path);
    }

    info!(
        name = %config.bouncer.name,
        bot = %config.bouncer.bot_nick,
        version = env!("CARGO_PKG_VERSION"),
        "Starting slbnc"
    );

    let store = AccountStore::open(&config.storage.path).map_err(|e| {
        error!(path = %config.storage.path, error = %e, "Failed to open account store");
        e
    })?;

    let bouncer = Bouncer::builder(config).store(store).build();
    let loaded = bouncer.accounts().load()?;
    info!(count = loaded, "Loaded accounts");

    let gateway = Gateway::bind(std::sync::Arc::clone(&bouncer)).await?;
    let gateway_task = tokio::spawn(gateway.run());

    let shutdown = bouncer.shutdown_requested();
    let reason = tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            "Bouncer shutting down".to_string()
        }
        _ = shutdown.cancelled() => bouncer
            .shutdown_reason()
            .unwrap_or_else(|| "Bouncer shutting down".to_string()),
    };

    info!(%reason, "Shutting down");
    bouncer.shutdown(&reason).await;
    match gateway_task.await {
        Ok(Err(e)) => error!(error = %e, "Gateway exited with error"),
        Err(e) => error!(error = %e, "Gateway task panicked"),
        Ok(Ok(())) => {}
    }
    Ok(())
}
