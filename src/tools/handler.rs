use rmcp::{
    handler::server::{router::tool::ToolRouter, tool::Parameters},
    model::*,
    tool, tool_handler, tool_router, ErrorData as McpError, ServerHandler,
};
use std::future::Future;
use std::sync::Arc;
use tracing::info;

use super::format;
use super::types::*;
use crate::executor::CommandExecutor;

#[derive(Clone)]
pub struct WinDbgToolHandler {
    #[allow(dead_code)]
    tool_router: ToolRouter<WinDbgToolHandler>,
    executor: Arc<CommandExecutor>,
}

impl WinDbgToolHandler {
    pub fn new(executor: Arc<CommandExecutor>) -> Self {
        Self {
            tool_router: Self::tool_router(),
            executor,
        }
    }

    fn text(message: String) -> Result<CallToolResult, McpError> {
        Ok(CallToolResult::success(vec![Content::text(message)]))
    }

    fn require(value: &str, what: &str) -> Result<(), McpError> {
        if value.trim().is_empty() {
            return Err(McpError::invalid_params(format!("No {} specified", what), None));
        }
        Ok(())
    }
}

#[tool_router]
impl WinDbgToolHandler {
    #[tool(description = "Execute a WinDbg command and return its output. Examples: 'k' (stack), 'r' (registers), 'lm' (modules), '!analyze -v'")]
    pub async fn execute_command(
        &self,
        Parameters(args): Parameters<ExecuteCommandArgs>,
    ) -> Result<CallToolResult, McpError> {
        Self::require(&args.command, "command")?;
        info!("execute_command: {}", args.command);

        let result = self.executor.execute_command(&args.command, args.timeout_ms).await;
        let suggestion = if result.is_communication_failure() {
            self.executor.suggest_recovery_action().await
        } else {
            None
        };
        Self::text(format::command_reply(&args.command, &result, suggestion.as_deref()))
    }

    #[tool(description = "Execute several WinDbg commands in order. Stops on connection loss, and on the first failure when stop_on_error is set")]
    pub async fn execute_sequence(
        &self,
        Parameters(args): Parameters<ExecuteSequenceArgs>,
    ) -> Result<CallToolResult, McpError> {
        if args.commands.is_empty() {
            return Err(McpError::invalid_params("No commands specified".to_string(), None));
        }
        info!("execute_sequence: {} commands", args.commands.len());

        let results = self
            .executor
            .execute_sequence(
                &args.commands,
                args.stop_on_error.unwrap_or(false),
                args.timeout_per_command_ms,
            )
            .await;
        Self::text(format::sequence_reply(&results))
    }

    #[tool(description = "Set a breakpoint at a symbol or address, with an optional condition and hit command")]
    pub async fn set_breakpoint(
        &self,
        Parameters(args): Parameters<SetBreakpointArgs>,
    ) -> Result<CallToolResult, McpError> {
        Self::require(&args.location, "breakpoint location")?;
        let command = format::breakpoint_command(
            &args.location,
            args.condition.as_deref(),
            args.command.as_deref(),
        );
        info!("set_breakpoint: {}", command);

        let result = self.executor.execute_command(&command, None).await;
        let reply = if result.success {
            format!(
                "Breakpoint set successfully at {}\n{}",
                args.location,
                result.output.trim()
            )
        } else {
            format!("Failed to set breakpoint: {}", result.error_text())
        };
        Self::text(reply)
    }

    #[tool(description = "Step over, into or out of the current call, then show the stack and registers (and locals when detailed)")]
    pub async fn step_and_analyze(
        &self,
        Parameters(args): Parameters<StepAndAnalyzeArgs>,
    ) -> Result<CallToolResult, McpError> {
        let step = args.step_type.unwrap_or_default();
        let depth = args.analysis_depth.unwrap_or_default();
        info!("step_and_analyze: {:?} {:?}", step, depth);

        let stepped = self
            .executor
            .execute_command(format::step_command(step), None)
            .await;
        if !stepped.success {
            return Self::text(format!("Step failed: {}", stepped.error_text()));
        }

        let mut sections = Vec::new();
        for command in format::step_analysis_commands(depth) {
            let result = self.executor.execute_command(command, None).await;
            if result.success && !result.output.is_empty() {
                sections.push(format!("{}:\n{}", command, result.output.trim()));
            }
        }

        Self::text(format!(
            "Step ({}) completed successfully.\n\n{}",
            step.as_str(),
            sections.join("\n\n")
        ))
    }

    #[tool(description = "Summarize the debugging context: full, stack, memory or process")]
    pub async fn analyze_context(
        &self,
        Parameters(args): Parameters<AnalyzeContextArgs>,
    ) -> Result<CallToolResult, McpError> {
        let kind = args.kind.unwrap_or_default();
        info!("analyze_context: {}", kind.as_str());

        let mut sections = Vec::new();
        for (command, label) in format::context_commands(kind) {
            let result = self.executor.execute_command(command, None).await;
            if result.success {
                sections.push(format!("{} ({}):\n{}", label, command, result.output.trim()));
            } else {
                sections.push(format!("{} ({}): Error - {}", label, command, result.error_text()));
            }
        }

        Self::text(format!(
            "Context Analysis ({}):\n\n{}",
            kind.as_str(),
            sections.join("\n\n")
        ))
    }

    #[tool(description = "Evaluate a debugger data-model expression with dx, e.g. '@$curprocess.Threads'")]
    pub async fn dx_visualization(
        &self,
        Parameters(args): Parameters<DxVisualizationArgs>,
    ) -> Result<CallToolResult, McpError> {
        Self::require(&args.expression, "expression")?;
        let options = args.options.unwrap_or_default();
        let command = format::dx_command(&args.expression, &options);
        info!("dx_visualization: {}", command);

        let result = self.executor.execute_command(&command, args.timeout_ms).await;
        let reply = if result.success {
            format!("dx Visualization ({}):\n{}", args.expression, result.output.trim())
        } else {
            format!(
                "Error executing dx command for expression '{}': {}",
                args.expression,
                result.error_text()
            )
        };
        Self::text(reply)
    }

    #[tool(description = "Load debugging symbols: 'user' for user-mode symbols only, 'all' for everything (default)")]
    pub async fn load_symbols(
        &self,
        Parameters(args): Parameters<LoadSymbolsArgs>,
    ) -> Result<CallToolResult, McpError> {
        let symbols = args.symbol_type.unwrap_or_default();
        info!("load_symbols: {}", symbols.command());

        let result = self
            .executor
            .execute_command(symbols.command(), Some(args.timeout_ms.unwrap_or(30_000)))
            .await;
        Self::text(format::symbols_reply(symbols, &result))
    }

    #[tool(description = "Report the health of the link to the WinDbg extension and suggest a recovery step if needed")]
    pub async fn connection_status(
        &self,
        Parameters(_args): Parameters<ConnectionStatusArgs>,
    ) -> Result<CallToolResult, McpError> {
        let suggestion = if self.executor.needs_recovery() {
            self.executor.suggest_recovery_action().await
        } else {
            None
        };
        let status = self.executor.status();
        let endpoint = self.executor.manager().endpoint();
        Self::text(format::status_report(&status, &endpoint, suggestion.as_deref()))
    }
}

#[tool_handler]
impl ServerHandler for WinDbgToolHandler {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2024_11_05,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation::from_build_env(),
            instructions: Some(
                "WinDbg MCP Server - run WinDbg commands through the vibedbg extension. \
                 Load the extension in WinDbg first and check it with '!vibedbg_status'. \
                 8 tools available: execute_command, execute_sequence, set_breakpoint, \
                 step_and_analyze, analyze_context, dx_visualization, load_symbols, \
                 connection_status."
                    .to_string(),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Config;
    use crate::ipc::CommunicationManager;
    use crate::testing::{MockExtension, Reply};

    fn handler(mock: &MockExtension) -> WinDbgToolHandler {
        let mut config = Config::default();
        config.retry.delay_ms = 10;
        let config = Arc::new(config);
        let manager = Arc::new(CommunicationManager::new(config.clone(), mock.connector()));
        WinDbgToolHandler::new(Arc::new(CommandExecutor::new(config, manager).unwrap()))
    }

    fn text_of(result: &CallToolResult) -> String {
        result.content[0].as_text().expect("expected text content").text.clone()
    }

    #[tokio::test]
    async fn test_execute_command_tool() {
        let mock = MockExtension::echo();
        let handler = handler(&mock);

        let result = handler
            .execute_command(Parameters(ExecuteCommandArgs {
                command: "r".to_string(),
                timeout_ms: None,
            }))
            .await
            .unwrap();
        assert_eq!(text_of(&result), "output for r");
    }

    #[tokio::test]
    async fn test_empty_command_is_invalid_params() {
        let handler = handler(&MockExtension::echo());
        let err = handler
            .execute_command(Parameters(ExecuteCommandArgs {
                command: "  ".to_string(),
                timeout_ms: None,
            }))
            .await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_set_breakpoint_tool_builds_command() {
        let mock = MockExtension::new(|_| Reply::output(""));
        let handler = handler(&mock);

        let result = handler
            .set_breakpoint(Parameters(SetBreakpointArgs {
                location: "kernel32!CreateFileW".to_string(),
                condition: None,
                command: Some("k; g".to_string()),
            }))
            .await
            .unwrap();
        assert!(text_of(&result).starts_with("Breakpoint set successfully at kernel32!CreateFileW"));
        assert_eq!(mock.requests()[0].command, "bp kernel32!CreateFileW \"k; g\"");
    }

    #[tokio::test]
    async fn test_step_and_analyze_tool() {
        let mock = MockExtension::new(|req| match req.command.as_str() {
            "t" => Reply::output(""),
            other => Reply::Output(format!("{} output", other)),
        });
        let handler = handler(&mock);

        let result = handler
            .step_and_analyze(Parameters(StepAndAnalyzeArgs {
                step_type: Some(StepType::Into),
                analysis_depth: Some(AnalysisDepth::Detailed),
            }))
            .await
            .unwrap();
        let text = text_of(&result);
        assert!(text.starts_with("Step (into) completed successfully."));
        assert!(text.contains("k:\nk output"));
        assert!(text.contains("dv:\ndv output"));
    }

    #[tokio::test]
    async fn test_connection_status_tool() {
        let mock = MockExtension::echo();
        let handler = handler(&mock);
        handler.executor.initialize().await.unwrap();

        let result = handler
            .connection_status(Parameters(ConnectionStatusArgs {}))
            .await
            .unwrap();
        let text = text_of(&result);
        assert!(text.contains("Connected: true"));
        assert!(text.contains(r"\\.\pipe\mock_extension"));
        assert!(!text.contains("Suggestion"));
    }

    #[tokio::test]
    async fn test_load_symbols_tool() {
        let mock = MockExtension::new(|req| match req.command.as_str() {
            "loadusersymbols" => Reply::output(""),
            other => Reply::Output(format!("{} done", other)),
        });
        let handler = handler(&mock);

        let result = handler
            .load_symbols(Parameters(LoadSymbolsArgs {
                symbol_type: Some(SymbolType::User),
                timeout_ms: None,
            }))
            .await
            .unwrap();
        assert_eq!(text_of(&result), "User-mode symbols loaded successfully");
        assert_eq!(mock.requests()[0].timeout_ms, 30_000);

        let result = handler
            .load_symbols(Parameters(LoadSymbolsArgs {
                symbol_type: None,
                timeout_ms: Some(5_000),
            }))
            .await
            .unwrap();
        assert_eq!(text_of(&result), "loadallsymbols done");
        assert_eq!(mock.requests()[1].command, "loadallsymbols");
        assert_eq!(mock.requests()[1].timeout_ms, 5_000);
    }
}
