//! MCP server entry point

use rmcp::{transport::stdio, ServiceExt};
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::common::{Config, Error, Result};
use crate::executor::CommandExecutor;
use crate::tools::WinDbgToolHandler;

/// Serve the tools on stdio until the client goes away
pub async fn run(config: Arc<Config>) -> Result<()> {
    info!(
        version = env!("CARGO_PKG_VERSION"),
        pipe = %config.pipe.name,
        "Starting WinDbg MCP server"
    );

    let executor = Arc::new(CommandExecutor::for_pipe(config)?);
    if let Err(e) = executor.initialize().await {
        // The extension is often loaded after the server starts
        warn!(error = %e, "WinDbg extension not reachable yet, tools will connect on first use");
    }

    let service = WinDbgToolHandler::new(executor.clone())
        .serve(stdio())
        .await
        .inspect_err(|e| error!("Serving error: {:?}", e))
        .map_err(|e| Error::Internal(format!("failed to start MCP service: {}", e)))?;

    let reason = service
        .waiting()
        .await
        .map_err(|e| Error::Internal(format!("MCP service task failed: {}", e)))?;
    info!(?reason, "MCP client disconnected");

    executor.shutdown();
    Ok(())
}
