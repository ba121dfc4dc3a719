//! MCP transports.
//!
//! - [`StdioTransport`]: one session over stdin/stdout.
//! - [`HttpTransport`]: stateless streamable HTTP, restricted to localhost origins.
//!
//! Both stop on SIGINT or SIGTERM, close the database connection, and force
//! an exit on a second signal.

pub mod http;
pub mod origin;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use crate::error::DbResult;
use std::future::Future;
use tokio::signal;

pub trait Transport: Send + Sync {
    /// Serve until the client goes away or a shutdown signal arrives.
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn name(&self) -> &'static str;
}

/// Resolve on SIGINT or SIGTERM, returning the signal's name.
pub(crate) async fn wait_for_signal() -> &'static str {
    let interrupt = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => "SIGINT",
        _ = terminate => "SIGTERM",
    }
}
