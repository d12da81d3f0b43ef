//! MCP tool surface over the command executor

pub mod format;
pub mod handler;
pub mod types;

pub use handler::WinDbgToolHandler;
