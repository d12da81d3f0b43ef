//! Command outcome types

use serde::Serialize;

/// Why a command did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Rejected by syntax or safety validation
    Validation,
    /// No response within the command timeout
    Timeout,
    /// Transport, protocol or extension error
    Communication,
    /// The pipe went away and a reconnect did not help
    ConnectionLost,
    /// The pipe went away and a reconnect succeeded
    Recovered,
    /// The debugger answered, but the output reports a failure
    Semantic,
    /// The command needs a break state the target is not in
    TargetRunning,
    /// Bad parameters for the command
    InvalidInput,
    Unexpected,
}

/// Outcome of one executed command
#[derive(Debug, Clone, Serialize)]
pub struct CommandResult {
    pub success: bool,
    pub output: String,
    pub error_message: Option<String>,
    pub execution_time_ms: u64,
    pub command_executed: String,
    /// Handler the router picked; `None` when the command never got routed
    pub route_used: Option<String>,
    pub cached: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl CommandResult {
    pub fn success(output: impl Into<String>, command: &str) -> Self {
        Self {
            success: true,
            output: output.into(),
            error_message: None,
            execution_time_ms: 0,
            command_executed: command.to_string(),
            route_used: None,
            cached: false,
            failure: None,
        }
    }

    pub fn failure(kind: FailureKind, message: impl Into<String>, command: &str) -> Self {
        Self {
            success: false,
            output: String::new(),
            error_message: Some(message.into()),
            execution_time_ms: 0,
            command_executed: command.to_string(),
            route_used: None,
            cached: false,
            failure: Some(kind),
        }
    }

    pub fn with_route(mut self, handler: &str) -> Self {
        self.route_used = Some(handler.to_string());
        self
    }

    pub fn with_elapsed(mut self, execution_time_ms: u64) -> Self {
        self.execution_time_ms = execution_time_ms;
        self
    }

    /// Error text, or an empty string on success
    pub fn error_text(&self) -> &str {
        self.error_message.as_deref().unwrap_or("")
    }

    /// Whether this failure means the pipe to the extension is gone.
    /// Sequences stop on these even when asked to continue past errors.
    pub fn indicates_connection_loss(&self) -> bool {
        if self.success {
            return false;
        }
        if matches!(
            self.failure,
            Some(FailureKind::ConnectionLost | FailureKind::Recovered)
        ) {
            return true;
        }
        let text = self.error_text().to_lowercase();
        ["pipe is being closed", "connection lost", "pipe connection broken"]
            .iter()
            .any(|marker| text.contains(marker))
    }

    pub fn is_communication_failure(&self) -> bool {
        self.failure == Some(FailureKind::Communication)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn failed(kind: FailureKind, message: &str) -> CommandResult {
        CommandResult::failure(kind, message, "k").with_route("analyze_stack")
    }

    #[test]
    fn test_success_shape() {
        let r = CommandResult::success("out", "k").with_elapsed(7);
        assert!(r.success);
        assert!(!r.cached);
        assert_eq!(r.execution_time_ms, 7);
        assert_eq!(r.route_used, None);
        assert_eq!(r.error_text(), "");
        assert!(!r.indicates_connection_loss());
    }

    #[test]
    fn test_connection_loss_by_kind() {
        assert!(failed(FailureKind::ConnectionLost, "x").indicates_connection_loss());
        assert!(failed(FailureKind::Recovered, "x").indicates_connection_loss());
        assert!(!failed(FailureKind::Timeout, "x").indicates_connection_loss());
    }

    #[test]
    fn test_connection_loss_by_text() {
        let r = failed(
            FailureKind::Communication,
            "Communication error: Pipe connection broken: reset",
        );
        assert!(r.indicates_connection_loss());
        assert!(r.is_communication_failure());
        assert!(!failed(FailureKind::Semantic, "Command failed: bad").indicates_connection_loss());
    }

    #[test]
    fn test_serializes_kind_snake_case() {
        let r = failed(FailureKind::TargetRunning, "Command unavailable");
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["failure"], "target_running");
        assert_eq!(json["success"], false);
        assert_eq!(json["route_used"], "analyze_stack");
    }
}
