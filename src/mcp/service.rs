//! MCP service implementation using rmcp.
//!
//! [`GatewayService`] exposes the `execute_sql` tool and the `db://schemas`
//! resource tree. It holds only shared handles, so the HTTP transport can
//! build a fresh instance for every request.

use crate::db::ConnectorManager;
use crate::mcp::response::{JSON_MIME_TYPE, ResponseEnvelope};
use crate::resources::{ResourceTemplateDef, ResourceTree, ResourceUri};
use crate::tools::execute::{ExecuteSqlInput, ExecuteToolHandler, tool_description};
use rmcp::{
    ErrorData as McpError, RoleServer, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{
        AnnotateAble, CallToolResult, Implementation, ListResourceTemplatesResult,
        ListResourcesResult, PaginatedRequestParam, ProtocolVersion, RawResource,
        RawResourceTemplate, ReadResourceRequestParam, ReadResourceResult, Resource,
        ResourceTemplate, ServerCapabilities, ServerInfo,
    },
    service::RequestContext,
    tool, tool_handler, tool_router,
};
use std::sync::Arc;
use tracing::{debug, warn};

pub const EXECUTE_SQL_TOOL: &str = "execute_sql";

#[derive(Clone)]
pub struct GatewayService {
    /// Shared manager holding the active connector
    manager: Arc<ConnectorManager>,
    /// Shared resource tree with the startup snapshot
    resources: Arc<ResourceTree>,
    /// Reported in the server instructions
    server_version: Option<String>,
    tool_router: ToolRouter<Self>,
}

impl GatewayService {
    pub fn new(manager: Arc<ConnectorManager>, resources: Arc<ResourceTree>) -> Self {
        let mut tool_router = Self::tool_router();
        // The execute_sql description depends on the read-only flag
        if let Some(route) = tool_router.map.get_mut(EXECUTE_SQL_TOOL) {
            route.attr.description = Some(tool_description(manager.is_read_only()).into());
        }
        Self {
            manager,
            resources,
            server_version: None,
            tool_router,
        }
    }

    pub fn manager(&self) -> &Arc<ConnectorManager> {
        &self.manager
    }

    pub fn with_server_version(mut self, version: impl Into<String>) -> Self {
        self.server_version = Some(version.into());
        self
    }

    fn instructions(&self) -> String {
        let mut text = String::from(
            "Gateway to a relational database.\n\
            \n\
            ## Resources\n\
            - `db://schemas` lists schemas\n\
            - `db://schemas/{schema}/tables` and `db://schemas/{schema}/procedures` list objects\n\
            - `db://schemas/{schema}/tables/{table}` describes columns, `/indexes` lists indexes\n\
            - `db://schemas/{schema}/procedures/{procedure}` shows a routine with its definition\n\
            Concrete resources for the default schema are captured once at startup; use the templates for objects created later.\n\
            \n\
            ## Tools\n\
            - `execute_sql` runs SQL. Statements separated by semicolons share one connection.\n",
        );
        if self.manager.is_read_only() {
            text.push_str("\nRead-only mode is active: only read statements are accepted.\n");
        }
        if let Some(version) = &self.server_version {
            text.push_str(&format!("\nServer version: {version}\n"));
        }
        text
    }
}

#[tool_router]
impl GatewayService {
    #[tool(
        name = "execute_sql",
        description = "Execute SQL against the connected database."
    )]
    async fn execute_sql(
        &self,
        Parameters(input): Parameters<ExecuteSqlInput>,
    ) -> Result<CallToolResult, McpError> {
        // No connector is a server fault, not a tool failure
        self.manager.connector().await?;

        let handler = ExecuteToolHandler::new(self.manager.clone());
        let envelope = match handler.execute(input).await {
            Ok(output) => ResponseEnvelope::success(EXECUTE_SQL_TOOL, output),
            Err(e) => {
                warn!(error = %e, code = e.code(), "execute_sql failed");
                ResponseEnvelope::from_error(EXECUTE_SQL_TOOL, &e)
            }
        };
        Ok(envelope.into_tool_result())
    }
}

fn to_resource(uri: &ResourceUri) -> Resource {
    let mut resource = RawResource::new(uri.to_string(), uri.display_name());
    resource.description = Some(
        match uri {
            ResourceUri::Schemas => "All schemas in the database",
            ResourceUri::Tables { .. } => "Tables in the default schema",
            ResourceUri::Table { .. } => "Table columns in ordinal order",
            ResourceUri::TableIndexes { .. } => "Table indexes with key columns",
            ResourceUri::Procedures { .. } => "Stored procedures and functions in the default schema",
            ResourceUri::Procedure { .. } => "Routine detail with definition",
        }
        .to_string(),
    );
    resource.mime_type = Some(JSON_MIME_TYPE.to_string());
    resource.no_annotation()
}

fn to_resource_template(def: &ResourceTemplateDef) -> ResourceTemplate {
    RawResourceTemplate {
        uri_template: def.uri_template.to_string(),
        name: def.name.to_string(),
        title: None,
        description: Some(def.description.to_string()),
        mime_type: Some(JSON_MIME_TYPE.to_string()),
    }
    .no_annotation()
}

#[tool_handler]
impl ServerHandler for GatewayService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            server_info: Implementation {
                name: "db-gateway-mcp".to_owned(),
                title: Some("DB Gateway MCP".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(self.instructions()),
        }
    }

    async fn list_resources(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourcesResult, McpError> {
        let resources: Vec<Resource> = self
            .resources
            .list_resources()
            .iter()
            .map(to_resource)
            .collect();
        debug!(count = resources.len(), "Listed resources");

        Ok(ListResourcesResult {
            resources,
            next_cursor: None,
            meta: None,
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<PaginatedRequestParam>,
        _context: RequestContext<RoleServer>,
    ) -> Result<ListResourceTemplatesResult, McpError> {
        Ok(ListResourceTemplatesResult {
            resource_templates: self
                .resources
                .templates()
                .iter()
                .map(to_resource_template)
                .collect(),
            next_cursor: None,
            meta: None,
        })
    }

    async fn read_resource(
        &self,
        request: ReadResourceRequestParam,
        _context: RequestContext<RoleServer>,
    ) -> Result<ReadResourceResult, McpError> {
        let envelope = self.resources.read_uri(&request.uri).await?;
        Ok(ReadResourceResult {
            contents: vec![envelope.into_resource_contents(request.uri)],
        })
    }
}
