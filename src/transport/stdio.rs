//! Stdio transport for the MCP server.
//!
//! This transport uses standard input/output for communication,
//! which is the standard mode for CLI-based MCP integrations.

use crate::error::{DbError, DbResult};
use crate::mcp::GatewayService;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use tracing::{info, warn};

/// Stdio transport implementation.
///
/// Reads JSON-RPC messages from stdin and writes responses to stdout.
/// One service instance serves the whole session.
pub struct StdioTransport {
    service: GatewayService,
}

impl StdioTransport {
    pub fn new(service: GatewayService) -> Self {
        Self { service }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let manager = self.service.manager().clone();
        let running_service = self
            .service
            .clone()
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let shutdown_requested = tokio::select! {
            result = running_service.waiting() => {
                match result {
                    Ok(_quit_reason) => info!("Stdio transport completed normally"),
                    Err(e) => {
                        warn!(error = %e, "Stdio transport error");
                        manager.disconnect().await.ok();
                        return Err(DbError::internal(format!("Stdio transport error: {}", e)));
                    }
                }
                false
            }
            signal = wait_for_signal() => {
                info!(signal, "Shutdown requested (send again to force exit)");
                true
            }
        };

        if shutdown_requested {
            tokio::spawn(async {
                let signal = wait_for_signal().await;
                warn!(signal, "Second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Closing database connection");
        if let Err(e) = manager.disconnect().await {
            warn!(error = %e, "Disconnect during shutdown failed");
        }

        if shutdown_requested {
            // A pending stdin read cannot be interrupted, so leave explicitly
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
