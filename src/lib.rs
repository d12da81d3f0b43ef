//! WinDbg MCP bridge
//!
//! Exposes WinDbg command execution as MCP tools. Commands are validated,
//! routed, cached and sent to the vibedbg debugger extension over a pooled
//! named-pipe transport, and the extension's output is classified into
//! success or failure.

pub mod cli;
pub mod commands;
pub mod common;
pub mod executor;
pub mod ipc;
pub mod server;
pub mod testing;
pub mod tools;

// Re-export commonly used types for tests
pub use common::{Config, Error, Result};
pub use executor::{CommandExecutor, CommandResult, FailureKind};
