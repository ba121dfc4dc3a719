//! DB Gateway MCP - Main entry point.
//!
//! Connects to one database at startup and serves its metadata and SQL
//! execution over MCP until shut down.

use clap::Parser;
use db_gateway_mcp::config::{Config, TransportMode};
use db_gateway_mcp::db::{ConnectorManager, ConnectorRegistry, redact_dsn};
use db_gateway_mcp::mcp::GatewayService;
use db_gateway_mcp::resources::ResourceTree;
use db_gateway_mcp::transport::{HttpTransport, StdioTransport, Transport};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
///
/// Logs go to stderr; stdout belongs to the stdio transport.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_usage(registry: &ConnectorRegistry) {
    eprintln!("Error: a database connection string is required.");
    eprintln!();
    eprintln!("Usage: db-gateway-mcp --dsn <connection_string> [--transport stdio|http] [--readonly]");
    eprintln!("       DSN=<connection_string> db-gateway-mcp");
    eprintln!();
    eprintln!("Supported connection strings:");
    for descriptor in registry.descriptors() {
        eprintln!("  {:<12} {}", descriptor.display_name(), descriptor.sample_dsn);
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();
    init_tracing(&config);

    if let Err(e) = config.validate() {
        eprintln!("Error: {e}");
        return ExitCode::FAILURE;
    }

    let registry = ConnectorRegistry::with_defaults();
    let Some(dsn) = config.dsn().map(str::to_owned) else {
        print_usage(&registry);
        return ExitCode::FAILURE;
    };

    info!(
        transport = %config.transport,
        readonly = config.readonly,
        "Starting DB Gateway MCP v{}",
        env!("CARGO_PKG_VERSION")
    );

    let manager = Arc::new(ConnectorManager::new(registry, config.manager_options()));

    let connector = match manager.connect(&dsn).await {
        Ok(connector) => connector,
        Err(e) => {
            error!(dsn = %redact_dsn(&dsn), error = %e, "Failed to connect");
            eprintln!("Error: {e}");
            if let Some(suggestion) = e.suggestion() {
                eprintln!("Hint: {suggestion}");
            }
            return ExitCode::FAILURE;
        }
    };

    let server_version = match connector.server_version().await {
        Ok(version) => {
            info!(database = %connector.database_type(), version = %version, "Connected");
            Some(version)
        }
        Err(e) => {
            warn!(error = %e, "Could not read server version");
            None
        }
    };

    // One-shot snapshot of the default schema; never refreshed
    let resources = Arc::new(ResourceTree::new(manager.clone()));
    resources.capture_snapshot().await;

    let mut service = GatewayService::new(manager.clone(), resources);
    if let Some(version) = server_version {
        service = service.with_server_version(version);
    }

    let result = match config.transport {
        TransportMode::Stdio => StdioTransport::new(service).run().await,
        TransportMode::Http => {
            info!(
                host = %config.host,
                port = config.port,
                endpoint = %config.endpoint,
                "Using HTTP transport"
            );
            HttpTransport::new(service, &config.host, config.port, &config.endpoint)
                .run()
                .await
        }
    };

    if let Err(e) = result {
        error!(error = %e, "Server error");
        manager.disconnect().await.ok();
        return ExitCode::FAILURE;
    }

    info!("Server shutdown complete");
    ExitCode::SUCCESS
}
