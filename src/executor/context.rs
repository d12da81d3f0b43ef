//! Per-executor debugging context

use std::time::{SystemTime, UNIX_EPOCH};

/// A breakpoint the executor has seen being set
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KnownBreakpoint {
    /// Command that set it, e.g. `bp kernel32!CreateFileW`
    pub command: String,
    /// Where it was set, when the route captured it
    pub location: Option<String>,
}

/// State carried across commands for one executor
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub session_id: String,
    pub current_process: Option<String>,
    pub current_thread: Option<u32>,
    pub breakpoints: Vec<KnownBreakpoint>,
    pub last_command: Option<String>,
    pub last_command_time: Option<SystemTime>,
}

impl ExecutionContext {
    pub fn new() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        Self {
            session_id: format!("session_{}", secs),
            current_process: None,
            current_thread: None,
            breakpoints: Vec::new(),
            last_command: None,
            last_command_time: None,
        }
    }

    /// The part of the context that decides whether a cached result can be
    /// reused. Only user-mode, single-target debugging is supported, so the
    /// process and thread markers are all there is.
    pub fn fingerprint(&self) -> String {
        let process = self.current_process.as_deref().unwrap_or("none");
        let thread = self
            .current_thread
            .map(|t| t.to_string())
            .unwrap_or_else(|| "none".to_string());
        format!("usermode_{}_{}", process, thread)
    }

    /// Reset the markers to the current process and its first thread
    pub fn refresh(&mut self) {
        self.current_process = Some("current".to_string());
        self.current_thread = Some(0);
    }

    pub fn record_command(&mut self, command: &str) {
        self.last_command = Some(command.to_string());
        self.last_command_time = Some(SystemTime::now());
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::new()
    }
}
