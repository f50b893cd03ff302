//! MCP (Model Context Protocol) server implementation.
//!
//! This module provides an MCP server that exposes the settle ledger as tools
//! for AI agent integration. The server communicates via JSON-RPC over stdio.

/// Checks if the server has been initialized and returns an error if not.
macro_rules! require_init {
    ($self:expr) => {
        if !$self.check_initialized().await {
            return Self::uninitialized();
        }
    };
}

mod mcp_utils;
mod tools;

use crate::Config;
use rmcp::handler::server::tool::ToolRouter;
use rmcp::model::{
    CallToolResult, Implementation, ProtocolVersion, ServerCapabilities, ServerInfo,
};
use rmcp::transport::stdio;
use rmcp::ErrorData as McpError;
use rmcp::{tool_handler, ServerHandler, ServiceExt};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::info;

/// The settle MCP server.
#[derive(Debug, Clone)]
pub struct SettleServer {
    initialized: Arc<Mutex<bool>>,
    config: Arc<Config>,
    tool_router: ToolRouter<SettleServer>,
}

impl SettleServer {
    /// Creates a new SettleServer with the given configuration.
    pub fn new(config: Config) -> Self {
        Self {
            initialized: Arc::new(Mutex::new(false)),
            config: Arc::new(config),
            tool_router: Self::tool_router(),
        }
    }

    async fn check_initialized(&self) -> bool {
        *self.initialized.lock().await
    }

    fn uninitialized() -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::error(vec![rmcp::model::Content::text(
            "You have not yet initialized the service. Please call initialize_service first.",
        )]))
    }
}

#[tool_handler]
impl ServerHandler for SettleServer {
    /// Returns server information sent to the MCP client during initialization.
    ///
    /// Agents tend to treat `instructions` as optional reading, so the full usage text is also
    /// returned by the `initialize_service` tool, which every other tool requires.
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "settle".into(),
                version: env!("CARGO_PKG_VERSION").into(),
                ..Default::default()
            },
            instructions: Some(include_str!("docs/INTRO.md").into()),
        }
    }
}

/// Transport type for the MCP server.
#[derive(Debug, Default)]
pub(crate) enum Io {
    #[default]
    Stdio,
    /// Mock transport for testing - holds one end of a duplex channel.
    #[cfg(test)]
    Mock(tokio::io::DuplexStream),
}

/// Runs the MCP server with stdio transport or mock transport. This function starts the MCP server
/// and blocks until the client disconnects or an error occurs.
pub(crate) async fn run_server(config: Config, io: Io) -> crate::Result<()> {
    use crate::error::{ErrorType, IntoResult};
    let server = SettleServer::new(config);
    info!("Starting MCP server...");

    let service = match io {
        Io::Stdio => server
            .serve(stdio())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))
            .pub_result(ErrorType::Service)?,
        #[cfg(test)]
        Io::Mock(stream) => server
            .serve(stream)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to start MCP server: {e}"))
            .pub_result(ErrorType::Service)?,
    };

    info!("MCP server running, waiting for requests...");

    // Runs until the client disconnects
    service
        .waiting()
        .await
        .map_err(|e| anyhow::anyhow!("MCP server error: {e}"))
        .pub_result(ErrorType::Service)?;

    info!("MCP server shut down");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test::TestEnv;
    use rmcp::model::{CallToolRequestParam, CallToolResult};
    use rmcp::service::{RoleClient, RunningService};
    use rmcp::ServiceExt;
    use serde_json::{json, Value};
    use tokio::io::duplex;

    async fn call(
        client: &RunningService<RoleClient, ()>,
        name: &'static str,
        arguments: Value,
    ) -> CallToolResult {
        let arguments = match arguments {
            Value::Object(map) => Some(map),
            _ => None,
        };
        client
            .call_tool(CallToolRequestParam {
                name: name.into(),
                arguments,
            })
            .await
            .unwrap_or_else(|e| panic!("{name} call failed: {e}"))
    }

    fn assert_ok(result: &CallToolResult, name: &str) {
        assert!(
            !result.is_error.unwrap_or(false),
            "{name} returned error: {:?}",
            result.content
        );
    }

    /// The JSON structure returned next to the message.
    fn structure(result: &CallToolResult) -> Value {
        let text = result.content[1]
            .as_text()
            .expect("the second content item should be JSON text")
            .text
            .clone();
        serde_json::from_str(&text).unwrap()
    }

    /// Integration test for the MCP server using an in-memory transport.
    #[tokio::test]
    async fn test_mcp_server_integration() {
        let (client_io, server_io) = duplex(4096);
        let env = TestEnv::new().await;
        let [ana, ben, _] = env.trip().await;
        let config = env.config();

        let server_handle =
            tokio::spawn(async move { run_server(config, Io::Mock(server_io)).await });
        let client = ().serve(client_io).await.expect("Failed to create client");

        // Tools refuse to run before initialize_service
        let early = call(&client, "balances", json!({ "group": TestEnv::TRIP })).await;
        assert_eq!(early.is_error, Some(true));

        let init = call(&client, "initialize_service", Value::Null).await;
        assert_ok(&init, "initialize_service");

        let expense = call(
            &client,
            "add_expense",
            json!({
                "group": TestEnv::TRIP,
                "amount": 30,
                "payer": "Cleo",
                "equal": ["Ana", "Cleo"],
                "category": "Taxi"
            }),
        )
        .await;
        assert_ok(&expense, "add_expense");

        let balances = call(&client, "balances", json!({ "group": TestEnv::TRIP })).await;
        assert_ok(&balances, "balances");
        let map = structure(&balances);
        assert_eq!(map[ana.to_string()], json!(45.0));
        assert_eq!(map[ben.to_string()], json!(-15.0));
        assert_eq!(map["u3"], json!(-30.0));

        let settlements = call(&client, "settlements", json!({ "group": TestEnv::TRIP })).await;
        assert_ok(&settlements, "settlements");
        let suggestions = structure(&settlements);
        assert_eq!(suggestions.as_array().unwrap().len(), 2);
        assert_eq!(suggestions[0]["from"]["name"], json!("Cleo"));
        assert_eq!(suggestions[0]["amount"], json!(30.0));

        let settle = json!({
            "group": TestEnv::TRIP,
            "from": "u3",
            "to": "u1",
            "amount": 30
        });
        let first = call(&client, "settle_debt", settle.clone()).await;
        assert_ok(&first, "settle_debt");
        assert_eq!(structure(&first)["written"], json!(true));
        let second = call(&client, "settle_debt", settle).await;
        assert_ok(&second, "settle_debt");
        assert_eq!(structure(&second)["written"], json!(false));

        let summary = call(
            &client,
            "summary",
            json!({ "group": TestEnv::TRIP, "phone": "+15550100" }),
        )
        .await;
        assert_ok(&summary, "summary");
        assert_eq!(structure(&summary)["balance"], json!(-15.0));

        let spending = call(&client, "spending", json!({ "group": TestEnv::TRIP })).await;
        assert_ok(&spending, "spending");
        assert_eq!(structure(&spending)["total"], json!(150.0));

        let invalid = call(
            &client,
            "add_expense",
            json!({
                "group": TestEnv::TRIP,
                "amount": 30,
                "payer": "Ana",
                "splits": [{ "member": "Ana", "amount": 10 }]
            }),
        )
        .await;
        assert_eq!(invalid.is_error, Some(true));

        drop(client);
        let server_result = tokio::time::timeout(std::time::Duration::from_secs(5), server_handle)
            .await
            .expect("Server timed out")
            .expect("Server task panicked");
        assert!(
            server_result.is_ok(),
            "Server returned error: {:?}",
            server_result
        );
    }

    #[tokio::test]
    async fn test_mcp_lists_tools() {
        let (client_io, server_io) = duplex(4096);
        let env = TestEnv::new().await;
        let config = env.config();
        let _server_handle =
            tokio::spawn(async move { run_server(config, Io::Mock(server_io)).await });
        let client = ().serve(client_io).await.expect("Failed to create client");

        let tools = client
            .list_tools(Default::default())
            .await
            .expect("Failed to list tools");
        let mut names: Vec<_> = tools.tools.iter().map(|t| t.name.to_string()).collect();
        names.sort();
        assert_eq!(
            names,
            [
                "add_expense",
                "balances",
                "delete_entry",
                "initialize_service",
                "settle_debt",
                "settlements",
                "spending",
                "summary",
            ]
        );
    }
}
