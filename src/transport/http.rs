//! HTTP transport with Streamable HTTP support for the MCP server.
//!
//! The transport is stateless: no MCP session is kept between requests and
//! each request is served by its own [`GatewayService`] instance bound to the
//! shared connector manager, so concurrent requests never share request ids.

use crate::error::{DbError, DbResult};
use crate::mcp::GatewayService;
use crate::transport::origin::localhost_only;
use crate::transport::{Transport, wait_for_signal};
use axum::Router;
use axum::middleware::from_fn;
use rmcp::transport::streamable_http_server::{
    StreamableHttpServerConfig, StreamableHttpService, session::local::LocalSessionManager,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// Build the axum router serving MCP at `endpoint`.
pub fn build_router(service: GatewayService, endpoint: &str) -> Router {
    let mcp = StreamableHttpService::new(
        move || Ok(service.clone()),
        LocalSessionManager::default().into(),
        StreamableHttpServerConfig {
            stateful_mode: false,
            ..Default::default()
        },
    );

    let router = if endpoint == "/" {
        Router::new().fallback_service(mcp)
    } else {
        Router::new().nest_service(endpoint, mcp)
    };
    router.layer(from_fn(localhost_only))
}

/// HTTP transport implementation with Streamable HTTP support.
pub struct HttpTransport {
    service: GatewayService,
    /// Host to bind to
    host: String,
    /// Port to bind to
    port: u16,
    /// MCP endpoint path
    endpoint: String,
}

impl HttpTransport {
    pub fn new(
        service: GatewayService,
        host: impl Into<String>,
        port: u16,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            service,
            host: host.into(),
            port,
            endpoint: endpoint.into(),
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Get the MCP endpoint path.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl Transport for HttpTransport {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting MCP server with HTTP transport on {}", bind_addr);

        let app = build_router(self.service.clone(), &self.endpoint);

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available",
            )
        })?;

        info!(endpoint = %self.endpoint, "MCP endpoint ready");

        // Streaming responses may keep the server alive, so shutdown is bounded
        const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

        let shutdown_notify = Arc::new(tokio::sync::Notify::new());
        let shutdown_notify_clone = shutdown_notify.clone();

        let shutdown_signal = async move {
            let signal = wait_for_signal().await;
            info!(signal, "Shutdown requested");
            shutdown_notify_clone.notify_one();
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        tokio::select! {
            result = server => {
                match result {
                    Ok(()) => info!("HTTP server stopped"),
                    Err(e) => {
                        error!(error = %e, "HTTP server error");
                        self.service.manager().disconnect().await.ok();
                        return Err(DbError::internal(format!("HTTP server error: {}", e)));
                    }
                }
            }
            _ = async {
                shutdown_notify.notified().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for connections to close (send signal again to force exit)..."
                );

                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    signal = wait_for_signal() => {
                        warn!(signal, "Second signal, forcing immediate exit");
                    }
                }
            } => {}
        }

        info!("Closing database connection");
        if let Err(e) = self.service.manager().disconnect().await {
            warn!(error = %e, "Disconnect during shutdown failed");
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
