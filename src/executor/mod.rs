//! Command Executor
//!
//! The single entry point for running debugger text: validate, check the
//! cache, route, dispatch under a deadline, classify the output, then
//! update the cache, the error counters and the execution context.
//!
//! Every error from the layers below is converted into a failed
//! [`CommandResult`] here. Nothing escapes as an `Err` to callers of
//! [`CommandExecutor::execute_command`].
//!
//! ```
//! # tokio_test::block_on(async {
//! use std::sync::Arc;
//! use windbg_mcp::ipc::CommunicationManager;
//! use windbg_mcp::testing::MockExtension;
//! use windbg_mcp::{CommandExecutor, Config};
//!
//! let mock = MockExtension::echo();
//! let config = Arc::new(Config::default());
//! let manager = Arc::new(CommunicationManager::new(config.clone(), mock.connector()));
//! let executor = CommandExecutor::new(config, manager)?;
//!
//! let result = executor.execute_command("lm", None).await;
//! assert!(result.success);
//! assert_eq!(result.route_used.as_deref(), Some("list_modules"));
//! # Ok::<(), windbg_mcp::Error>(())
//! # }).unwrap();
//! ```

pub mod cache;
pub mod classify;
pub mod context;
pub mod result;
pub mod router;
pub mod validator;

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

use crate::common::{Config, Error, ErrorClass, Result};
use crate::ipc::{CommunicationManager, ConnectionHealth, PoolStats};
use cache::CommandCache;
use classify::{classify_output, CommandTraits, Verdict};
pub use context::{ExecutionContext, KnownBreakpoint};
pub use result::{CommandResult, FailureKind};
pub use router::{CommandRoute, CommandRouter};
use validator::CommandValidator;

const RECOVERED_MESSAGE: &str = "Connection lost but recovered. The WinDbg extension is reconnected - please retry your command.";
const CONNECTION_LOST_MESSAGE: &str = "Connection lost to WinDbg extension. Check that WinDbg is running and the extension is loaded with '!vibedbg_status'.";

/// Breakpoint-setting verbs tracked in the context
const BREAKPOINT_SETTERS: &[&str] = &["bp", "bu", "bm", "ba"];

/// Point-in-time view of the executor
#[derive(Debug, Clone)]
pub struct ExecutorStatus {
    pub context: ExecutionContext,
    pub health: ConnectionHealth,
    pub pool: PoolStats,
    pub cache_entries: usize,
    pub consecutive_communication_errors: u32,
    pub needs_recovery: bool,
}

pub struct CommandExecutor {
    config: Arc<Config>,
    manager: Arc<CommunicationManager>,
    router: CommandRouter,
    validator: CommandValidator,
    cache: Option<CommandCache>,
    context: Mutex<ExecutionContext>,
    permits: Semaphore,
    communication_errors: AtomicU32,
}

impl CommandExecutor {
    pub fn new(config: Arc<Config>, manager: Arc<CommunicationManager>) -> Result<Self> {
        let cache = config.cache.enabled.then(|| {
            CommandCache::new(
                Duration::from_secs(config.cache.ttl_secs),
                config.cache.max_entries,
            )
        });
        Ok(Self {
            router: CommandRouter::new()?,
            validator: CommandValidator::new(config.execution.validation_enabled)?,
            cache,
            context: Mutex::new(ExecutionContext::new()),
            permits: Semaphore::new(config.execution.max_concurrent_commands.max(1)),
            communication_errors: AtomicU32::new(0),
            config,
            manager,
        })
    }

    /// Executor talking to the configured named pipe
    pub fn for_pipe(config: Arc<Config>) -> Result<Self> {
        let manager = Arc::new(CommunicationManager::for_pipe(config.clone()));
        Self::new(config, manager)
    }

    /// Probe the extension and reset the context markers
    pub async fn initialize(&self) -> Result<()> {
        tracing::info!(endpoint = %self.manager.endpoint(), "Initializing command executor");
        if !self.manager.test_connection().await {
            return Err(Error::Transport(
                "Failed to connect to WinDbg extension".to_string(),
            ));
        }
        self.context.lock().refresh();
        tracing::info!("Command executor initialized");
        Ok(())
    }

    pub fn shutdown(&self) {
        self.manager.shutdown();
        if let Some(cache) = &self.cache {
            cache.clear();
        }
    }

    /// Run one debugger command. `timeout_ms` defaults to the per-command
    /// timeout from the configuration.
    #[tracing::instrument(skip(self), fields(route))]
    pub async fn execute_command(&self, command: &str, timeout_ms: Option<u64>) -> CommandResult {
        let started = Instant::now();
        let timeout_ms = timeout_ms
            .unwrap_or_else(|| self.config.timeout_for_command(command).as_millis() as u64);
        // Queueing for a permit counts against the same deadline as the send
        let deadline = tokio::time::Instant::now() + Duration::from_millis(timeout_ms);

        if !self.validator.syntax_ok(command) {
            tracing::warn!("Rejected command with invalid syntax");
            return CommandResult::failure(FailureKind::Validation, "Invalid command syntax", command);
        }
        if !self.validator.is_safe(command) {
            tracing::warn!("Rejected unsafe command");
            return CommandResult::failure(
                FailureKind::Validation,
                "Command is not safe for execution",
                command,
            );
        }

        let traits = CommandTraits::of(command);
        let cache_key = CommandCache::key(command, &self.context.lock().fingerprint());
        if !traits.execution_control {
            if let Some(hit) = self.cache.as_ref().and_then(|c| c.get(&cache_key)) {
                tracing::debug!("Serving cached result");
                self.context.lock().record_command(command);
                return hit;
            }
        }

        let route = self.router.route(command);
        tracing::Span::current().record("route", route.handler);
        tracing::debug!(generic = route.is_generic, confidence = route.confidence, "Routed command");

        let result = match tokio::time::timeout_at(deadline, self.permits.acquire()).await {
            Ok(Ok(_permit)) => self.dispatch(command, timeout_ms, deadline).await,
            Ok(Err(_)) => CommandResult::failure(
                FailureKind::Unexpected,
                "Unexpected error: executor is shut down",
                command,
            ),
            Err(_) => {
                tracing::warn!("No execution slot freed up before the deadline");
                timed_out(command, timeout_ms)
            }
        };
        let elapsed_ms = started.elapsed().as_millis() as u64;
        let result = result.with_route(route.handler).with_elapsed(elapsed_ms);

        if result.success {
            tracing::info!(elapsed_ms, output_len = result.output.len(), "Command completed");
        } else {
            tracing::error!(elapsed_ms, error = result.error_text(), "Command failed");
        }

        self.after_execution(command, &route, &result, traits, cache_key);
        result
    }

    /// Run commands in order. Stops on the first failure when
    /// `stop_on_error` is set, and always stops once the connection is gone.
    /// The returned list holds one result per attempted command.
    pub async fn execute_sequence(
        &self,
        commands: &[String],
        stop_on_error: bool,
        timeout_ms: Option<u64>,
    ) -> Vec<CommandResult> {
        let threshold = self.config.execution.sequence_failure_threshold;
        let mut results = Vec::with_capacity(commands.len());
        let mut consecutive_failures = 0u32;

        for (i, command) in commands.iter().enumerate() {
            let result = self.execute_command(command, timeout_ms).await;
            let failed = !result.success;
            let lost = result.indicates_connection_loss();
            results.push(result);

            if !failed {
                consecutive_failures = 0;
                continue;
            }

            consecutive_failures += 1;
            if lost {
                tracing::warn!(index = i + 1, command = %command, "Connection lost, stopping sequence");
                break;
            }
            if stop_on_error {
                break;
            }
            if consecutive_failures >= threshold && i + 1 < commands.len() {
                tracing::warn!(
                    consecutive_failures,
                    "Multiple consecutive failures, consider checking debugger state"
                );
            }
        }
        results
    }

    /// Try to get out of a bad connection state. Attempts one reconnect
    /// when communication errors have piled up; otherwise returns a hint.
    pub async fn suggest_recovery_action(&self) -> Option<String> {
        let threshold = self.config.execution.max_consecutive_errors;
        if self.communication_errors.load(Ordering::SeqCst) >= threshold {
            tracing::info!("Attempting automatic recovery after consecutive errors");
            if self.manager.force_reconnect().await {
                self.communication_errors.store(0, Ordering::SeqCst);
                return Some(
                    "Connection recovered automatically. You can now retry your commands.".to_string(),
                );
            }
            return Some(
                "Multiple communication errors detected. Consider: \
                 1) Check if WinDbg is still running, \
                 2) Run '!vibedbg_status' in WinDbg to verify extension is loaded, \
                 3) Try restarting the MCP server if needed"
                    .to_string(),
            );
        }

        let health = self.manager.connection_health();
        if !health.is_connected {
            return Some(
                "Connection lost to WinDbg extension. \
                 Run '!vibedbg_status' in WinDbg to check extension status."
                    .to_string(),
            );
        }
        if health.consecutive_failures > 3 {
            return Some(
                "Multiple command failures detected. \
                 Target may not be in break state - try 'Ctrl+Break' in WinDbg to break execution."
                    .to_string(),
            );
        }
        None
    }

    pub fn is_connected(&self) -> bool {
        self.manager.connection_health().is_connected
    }

    pub fn needs_recovery(&self) -> bool {
        self.communication_errors.load(Ordering::SeqCst) >= self.config.execution.max_consecutive_errors
            || !self.is_connected()
    }

    pub fn connection_health(&self) -> ConnectionHealth {
        self.manager.connection_health()
    }

    pub fn consecutive_communication_errors(&self) -> u32 {
        self.communication_errors.load(Ordering::SeqCst)
    }

    pub fn context(&self) -> ExecutionContext {
        self.context.lock().clone()
    }

    pub fn manager(&self) -> &CommunicationManager {
        &self.manager
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn status(&self) -> ExecutorStatus {
        ExecutorStatus {
            context: self.context(),
            health: self.manager.connection_health(),
            pool: self.manager.pool_stats(),
            cache_entries: self.cache.as_ref().map_or(0, CommandCache::len),
            consecutive_communication_errors: self.consecutive_communication_errors(),
            needs_recovery: self.needs_recovery(),
        }
    }

    async fn dispatch(
        &self,
        command: &str,
        timeout_ms: u64,
        deadline: tokio::time::Instant,
    ) -> CommandResult {
        let timeout = Duration::from_millis(timeout_ms);
        let sent = tokio::time::timeout_at(deadline, self.manager.send_command(command, timeout)).await;

        match sent {
            Ok(Ok(output)) => match classify_output(command, &output) {
                Verdict::Success(output) => CommandResult::success(output, command),
                Verdict::Failure(kind, message) => CommandResult::failure(kind, message, command),
            },
            Ok(Err(e)) => self.recover_from(command, timeout_ms, e).await,
            Err(_) => timed_out(command, timeout_ms),
        }
    }

    /// Map a failed send onto a result, reconnecting first when the
    /// extension tore the pipe down
    async fn recover_from(&self, command: &str, timeout_ms: u64, error: Error) -> CommandResult {
        if error.is_pipe_closing() {
            tracing::warn!("Pipe connection lost, attempting recovery");
            return if self.manager.force_reconnect().await {
                CommandResult::failure(FailureKind::Recovered, RECOVERED_MESSAGE, command)
            } else {
                tracing::error!("Failed to reconnect to WinDbg extension");
                CommandResult::failure(FailureKind::ConnectionLost, CONNECTION_LOST_MESSAGE, command)
            };
        }

        match error.class() {
            ErrorClass::Timeout => timed_out(command, timeout_ms),
            ErrorClass::Transport | ErrorClass::Protocol | ErrorClass::Extension => {
                CommandResult::failure(
                    FailureKind::Communication,
                    format!("Communication error: {}", error),
                    command,
                )
            }
            ErrorClass::Validation => CommandResult::failure(
                FailureKind::InvalidInput,
                format!("Invalid command or parameters: {}", error),
                command,
            ),
            ErrorClass::Internal => {
                tracing::error!(error = ?error, "Unexpected error while executing command");
                CommandResult::failure(
                    FailureKind::Unexpected,
                    format!("Unexpected error: {}", error),
                    command,
                )
            }
        }
    }

    fn after_execution(
        &self,
        command: &str,
        route: &CommandRoute,
        result: &CommandResult,
        traits: CommandTraits,
        cache_key: String,
    ) {
        if let Some(cache) = &self.cache {
            if result.success && traits.execution_control {
                // Whatever the cache describes belongs to the old target state
                cache.clear();
            } else if result.success {
                cache.put(cache_key, result);
            }
        }

        if result.success {
            self.communication_errors.store(0, Ordering::SeqCst);
        } else if result.is_communication_failure() {
            let count = self.communication_errors.fetch_add(1, Ordering::SeqCst) + 1;
            if count >= self.config.execution.max_consecutive_errors {
                tracing::warn!(count, "Consecutive communication errors, recovery advised");
            }
        }

        let mut context = self.context.lock();
        if result.success {
            track_breakpoints(&mut context, command, route);
        }
        context.record_command(command);
    }
}

fn timed_out(command: &str, timeout_ms: u64) -> CommandResult {
    tracing::error!(timeout_ms, "Command timed out");
    CommandResult::failure(
        FailureKind::Timeout,
        format!("Command execution timed out after {}ms", timeout_ms),
        command,
    )
}

fn track_breakpoints(context: &mut ExecutionContext, command: &str, route: &CommandRoute) {
    let lowered = command.trim().to_lowercase();
    if lowered == "bc *" {
        context.breakpoints.clear();
        return;
    }
    let verb = lowered.split_whitespace().next().unwrap_or("");
    if BREAKPOINT_SETTERS.contains(&verb) {
        let location = route
            .param("location")
            .or_else(|| route.param("address"))
            .map(str::to_string);
        context.breakpoints.push(KnownBreakpoint {
            command: command.trim().to_string(),
            location,
        });
    }
}
