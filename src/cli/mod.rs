//! One-shot CLI commands
//!
//! Run a single command or probe the extension, print a human-readable
//! result and exit.

use std::sync::Arc;

use crate::common::{Config, Error, Result};
use crate::executor::CommandExecutor;
use crate::ipc::{CommunicationManager, ConnectionHealth};

/// Run one command and print its output
pub async fn exec(config: Arc<Config>, command: &str, timeout_ms: Option<u64>) -> Result<()> {
    let executor = CommandExecutor::for_pipe(config)?;
    let result = executor.execute_command(command, timeout_ms).await;

    if result.success {
        executor.shutdown();
        println!("{}", result.output);
        return Ok(());
    }

    let mut message = result.error_text().to_string();
    if result.is_communication_failure() || result.indicates_connection_loss() {
        if let Some(hint) = executor.suggest_recovery_action().await {
            message.push_str("\nSuggestion: ");
            message.push_str(&hint);
        }
    }
    executor.shutdown();
    Err(Error::CommandFailed(message))
}

/// Probe the extension and print the health record
pub async fn probe(config: Arc<Config>) -> Result<()> {
    let manager = CommunicationManager::for_pipe(config);
    println!("Probing {}", manager.endpoint());

    let ok = manager.test_connection().await;
    let health = manager.connection_health();
    print_health(&health);
    manager.shutdown();

    if ok {
        Ok(())
    } else {
        Err(Error::Transport(
            health
                .last_error
                .unwrap_or_else(|| "extension did not answer the version probe".to_string()),
        ))
    }
}

fn print_health(health: &ConnectionHealth) {
    println!("  connected:            {}", health.is_connected);
    println!("  extension responsive: {}", health.extension_responsive);
    println!("  consecutive failures: {}", health.consecutive_failures);
    if let Some(error) = &health.last_error {
        println!("  last error:           {}", error);
    }
}
