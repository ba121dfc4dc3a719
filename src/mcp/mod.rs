//! MCP server integration module.
//!
//! This module connects the MCP protocol to the tool handler and the
//! resource tree using the rmcp framework.

pub mod response;
pub mod service;

pub use response::ResponseEnvelope;
pub use service::GatewayService;
