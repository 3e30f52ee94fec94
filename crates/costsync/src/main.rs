//! costsync - BIM quantity and cost reconciliation service

mod cli;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use costsync_core::audit::audit_exports;
use costsync_core::config::ServiceConfig;
use costsync_core::models::BimElement;
use costsync_core::CostService;
use costsync_types::SpreadsheetItem;
use costsync_web::AppState;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "costsync",
    version,
    about = "Reconcile BIM quantities with spreadsheet unit costs",
    long_about = "Joins quantity take-off elements with unit costs by EBKP code, stores the\n\
                  resulting cost elements and publishes them to the cost topic.\n\
                  \n\
                  Examples:\n\
                    costsync serve                                  # Live sync server\n\
                    costsync serve --port 9000                      # Custom port\n\
                    costsync import-qto --project \"Tower A\" qto.json\n\
                    costsync reconcile --project \"Tower A\" --items costs.json --deliver\n\
                    costsync summary --project \"Tower A\" --json\n\
                    costsync check-exports ~/Downloads topic-message\n\
                  \n\
                  Environment Variables:\n\
                    COSTSYNC_CONFIG                  # Config file path\n\
                    COSTSYNC_DATA_DIR                # Override store directory\n\
                    COSTSYNC_BROKER_URL              # Kafka REST proxy base URL\n\
                    COSTSYNC_NO_COLOR                # Disable ANSI colors"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Config file (default: <config dir>/costsync/config.toml)
    #[arg(long, global = true, env = "COSTSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Directory holding the SQLite stores
    #[arg(long, global = true, env = "COSTSYNC_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Kafka REST proxy base URL
    #[arg(long, global = true, env = "COSTSYNC_BROKER_URL")]
    broker_url: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Disable ANSI colors (log-friendly)
    #[arg(long, global = true, env = "COSTSYNC_NO_COLOR")]
    no_color: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Run the live sync server
    Serve {
        /// Listen port
        #[arg(long)]
        port: Option<u16>,
        /// Listen address
        #[arg(long)]
        host: Option<String>,
    },
    /// Reconcile one project against a spreadsheet
    Reconcile {
        /// Project name (case-insensitive)
        #[arg(long)]
        project: String,
        /// JSON array of spreadsheet items
        #[arg(long)]
        items: PathBuf,
        /// Publish staged costs to the broker
        #[arg(long)]
        deliver: bool,
    },
    /// Recompute and print a project's cost summary
    Summary {
        /// Project name (case-insensitive)
        #[arg(long)]
        project: String,
    },
    /// Seed quantity take-off elements from a JSON file
    ImportQto {
        /// Project name, created when missing
        #[arg(long)]
        project: String,
        /// JSON array of BIM elements
        file: PathBuf,
    },
    /// Audit exported broker messages
    CheckExports {
        /// Directory with exported message files
        dir: PathBuf,
        /// Case-insensitive file name fragment
        pattern: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.no_color);

    let config = load_config(&cli)?;
    run_command(cli, config).await
}

fn init_tracing(no_color: bool) {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "costsync=info,costsync_core=info,costsync_web=info,tower_http=info".into()
            }),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(!no_color)
                .with_writer(std::io::stderr),
        )
        .init();
}

/// File configuration with command-line overrides applied
fn load_config(cli: &Cli) -> Result<ServiceConfig> {
    let mut config =
        ServiceConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    if let Some(data_dir) = &cli.data_dir {
        config.store.data_dir = data_dir.clone();
    }
    if let Some(url) = &cli.broker_url {
        config.broker.rest_proxy_url = Some(url.clone());
    }
    if let Command::Serve { port, host } = &cli.command {
        if let Some(port) = port {
            config.server.port = *port;
        }
        if let Some(host) = host {
            config.server.host = host.clone();
        }
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

async fn run_command(cli: Cli, config: ServiceConfig) -> Result<()> {
    let service = Arc::new(
        CostService::from_config(&config).context("Failed to initialize cost service")?,
    );

    match cli.command {
        Command::Serve { .. } => run_serve(service, &config).await,
        Command::Reconcile {
            project,
            items,
            deliver,
        } => run_reconcile(&service, &project, &items, deliver, cli.json, cli.no_color).await,
        Command::Summary { project } => run_summary(&service, &project, cli.json).await,
        Command::ImportQto { project, file } => run_import_qto(&service, &project, &file).await,
        Command::CheckExports { dir, pattern } => {
            run_check_exports(&dir, &pattern, cli.json, cli.no_color)
        }
    }
}

async fn run_serve(service: Arc<CostService>, config: &ServiceConfig) -> Result<()> {
    service
        .start()
        .await
        .context("Document store unavailable at startup")?;

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .with_context(|| {
            format!(
                "Invalid listen address {}:{}",
                config.server.host, config.server.port
            )
        })?;

    let state = Arc::new(AppState::new(service, config.live.clone()));
    costsync_web::run(state, addr, shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server shutdown complete");
    Ok(())
}

async fn run_reconcile(
    service: &CostService,
    project: &str,
    items: &std::path::Path,
    deliver: bool,
    json: bool,
    no_color: bool,
) -> Result<()> {
    let all_items: Vec<SpreadsheetItem> = cli::load_json(items)?;
    if deliver {
        service.gateway().connect().await;
    }

    let codes = service.available_codes(Some(project)).await?;
    let matched = cli::matched_leaves(&all_items, &codes);

    let result = service
        .reconcile(project, &matched, &all_items, deliver)
        .await
        .with_context(|| format!("Reconciliation of '{}' failed", project))?;

    println!("{}", cli::format_reconciliation(&result, json, no_color));
    Ok(())
}

async fn run_summary(service: &CostService, project: &str, json: bool) -> Result<()> {
    match service.summary(project).await? {
        Some(summary) => println!("{}", cli::format_summary(&summary, json)),
        None => println!("Project '{}' not found.", project),
    }
    Ok(())
}

async fn run_import_qto(service: &CostService, project: &str, file: &std::path::Path) -> Result<()> {
    let elements: Vec<BimElement> = cli::load_json(file)?;
    let (project, count) = service.import_qto(project, elements).await?;
    println!("Imported {} elements into {} ({})", count, project.name, project.id);
    Ok(())
}

fn run_check_exports(dir: &std::path::Path, pattern: &str, json: bool, no_color: bool) -> Result<()> {
    let report = audit_exports(dir, pattern)
        .with_context(|| format!("Export audit of {} failed", dir.display()))?;
    println!("{}", cli::format_audit(&report, json, no_color));
    Ok(())
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
