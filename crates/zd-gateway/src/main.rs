//! zapdesk: WhatsApp multi-device gateway
//!
//! Usage:
//!   zapdesk                    - Start the gateway (HTTP API + event consumers)
//!   zapdesk --config <path>    - Start with an explicit TOML config file
//!   zapdesk --help             - Show help

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;
use zd_api::AppState;
use zd_chatwoot::IntegrationRegistry;
use zd_core::{Config, SessionService, SqliteRepository};
use zd_webhook::WebhookDispatcher;
use zd_whatsapp::{ConnectionRegistry, DaemonClientFactory};

/// Run mode
#[derive(Debug, PartialEq)]
enum RunMode {
    /// Gateway server, optionally with a config file path
    Server(Option<String>),
    Help,
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let mode = parse_args(std::env::args().skip(1))?;

    let config_path = match mode {
        RunMode::Help => {
            print_help();
            return Ok(());
        }
        RunMode::Version => {
            println!("zapdesk {}", env!("CARGO_PKG_VERSION"));
            return Ok(());
        }
        RunMode::Server(path) => path,
    };

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("info".parse()?))
        .init();

    // Load .env file
    dotenvy::dotenv().ok();

    let config = match &config_path {
        Some(path) => Config::from_toml_file(path),
        None => Config::load(),
    }
    .map_err(|e| anyhow::anyhow!("Config error: {}", e))?;

    run_server(config).await
}

/// Parse command line arguments
fn parse_args<I: Iterator<Item = String>>(mut args: I) -> anyhow::Result<RunMode> {
    let mut config_path = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" | "-c" => {
                let path = args.next().context("--config requires a path")?;
                config_path = Some(path);
            }
            "--help" | "-h" => return Ok(RunMode::Help),
            "--version" | "-v" => return Ok(RunMode::Version),
            other => anyhow::bail!("Unknown argument: {}", other),
        }
    }

    Ok(RunMode::Server(config_path))
}

/// Print help message
fn print_help() {
    println!("zapdesk - WhatsApp multi-device gateway");
    println!();
    println!("Usage:");
    println!("  zapdesk                  Start the gateway");
    println!("  zapdesk --config <path>  Use a specific TOML config file");
    println!("  zapdesk --help           Show this help message");
    println!("  zapdesk --version        Show version");
    println!();
    println!("Configuration is read from ./zapdesk.toml when present.");
    println!("Environment Variables (override the file):");
    println!("  ZD_PORT                  HTTP API port (default: 8080)");
    println!("  ZD_API_KEY               Admin API key (unset = open API)");
    println!("  ZD_ALLOWED_ORIGINS       Comma separated CORS origins");
    println!("  ZD_DB_PATH               SQLite database path");
    println!("  ZD_DAEMON_URL            WhatsApp daemon base URL");
    println!("  ZD_DAEMON_POLL_MS        Daemon event poll interval");
    println!("  ZD_WEBHOOK_TIMEOUT_SECS  Outbound webhook timeout");
    println!("  ZD_CHATWOOT_TIMEOUT_SECS Chatwoot request timeout");
    println!("  ZD_START_TIMEOUT_SECS    Connect wait before giving up");
    println!("  ZD_RESTORE_ON_BOOT       Reconnect sessions on startup (default: true)");
    println!("  RUST_LOG                 Log filter (default: info)");
}

/// Wire the services together and serve until Ctrl+C
async fn run_server(config: Config) -> anyhow::Result<()> {
    tracing::info!("Starting zapdesk...");
    tracing::info!(
        database = %config.database.path,
        daemon = %config.daemon.url,
        "Configuration loaded"
    );

    let repo = Arc::new(
        SqliteRepository::open(&config.database.path)
            .map_err(|e| anyhow::anyhow!("Failed to open database: {}", e))?,
    );
    let sessions = SessionService::new(repo.clone());

    let factory = Arc::new(
        DaemonClientFactory::new(&config.daemon)
            .map_err(|e| anyhow::anyhow!("Failed to create daemon client: {}", e))?,
    );
    let registry = ConnectionRegistry::new(
        factory,
        sessions.clone(),
        config.registry.start_timeout(),
    );

    let webhooks = Arc::new(
        WebhookDispatcher::new(repo.clone(), &config.webhook)
            .map_err(|e| anyhow::anyhow!("Failed to create webhook dispatcher: {}", e))?,
    );
    let chatwoot = Arc::new(IntegrationRegistry::new(
        repo,
        Arc::new(registry.clone()),
        &config.chatwoot,
    ));
    registry.add_sink(webhooks.clone());
    registry.add_sink(chatwoot.clone());

    webhooks
        .load_all()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load webhooks: {}", e))?;
    chatwoot
        .load_all()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to load Chatwoot integrations: {}", e))?;

    if config.registry.restore_on_boot {
        let restoring = registry.clone();
        tokio::spawn(async move {
            match restoring.restore().await {
                Ok(count) => tracing::info!(count, "Sessions restored"),
                Err(e) => tracing::error!(error = %e, "Session restore failed"),
            }
        });
    } else {
        tracing::info!("Session restore disabled");
    }

    let port = config.server.port;
    if config.server.api_key.is_none() {
        tracing::warn!("No admin API key configured, management API is open");
    }

    let state = AppState {
        config: Arc::new(config),
        sessions,
        registry: registry.clone(),
        webhooks,
        chatwoot,
    };

    tracing::info!("zapdesk initialized successfully");
    tracing::info!("Press Ctrl+C to exit");

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
        }
        tracing::info!("Shutting down...");
    };

    let served = zd_api::start_server(port, state, shutdown).await;

    // Persisted status is left as is so the next boot restores live sessions.
    registry.shutdown().await;
    tracing::info!("zapdesk stopped");

    served
}
