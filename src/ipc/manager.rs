//! Communication Manager
//!
//! Sends requests over pooled connections with bounded retry, invalidates
//! the whole pool when the extension tears its pipe down, and keeps a
//! rolling [`ConnectionHealth`] record.
//!
//! Lock discipline: the pool mutex and the health mutex are never held at
//! the same time, and neither is held across an await.

use parking_lot::Mutex;
use serde_json::{Map, Value};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use super::pool::{ConnectionPool, PoolStats};
use super::protocol::{self, ExtensionResponse, Request, ResponseStatus};
use super::transport::{self, Connector, PipeConnector};
use crate::common::{Config, Error, ErrorClass, Result};

/// Error-text fragments that mark a network-debugging hiccup
const NETWORK_ERROR_MARKERS: &[&str] = &[
    "network",
    "connection",
    "timeout",
    "unreachable",
    "refused",
    "error_broken_pipe",
    "error_pipe_busy",
    "error_pipe_not_connected",
    "extension not initialized",
];

/// Whether an extension error looks like a network-debugging problem
pub fn is_network_debugging_error(message: &str) -> bool {
    let lower = message.to_lowercase();
    NETWORK_ERROR_MARKERS.iter().any(|m| lower.contains(m))
}

/// Health of the link to the extension
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionHealth {
    pub is_connected: bool,
    pub last_successful_command: Option<SystemTime>,
    pub consecutive_failures: u32,
    pub target_responsive: bool,
    pub extension_responsive: bool,
    pub last_error: Option<String>,
}

impl ConnectionHealth {
    fn record_success(&mut self) {
        self.last_successful_command = Some(SystemTime::now());
        self.consecutive_failures = 0;
        self.last_error = None;
        self.extension_responsive = true;
        self.is_connected = true;
    }

    fn record_failure(&mut self, error: String) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        self.last_error = Some(error);
        self.last_successful_command = None;
    }
}

/// Decides whether a failed connection probe still means "connected".
///
/// The extension reports some benign conditions during network (kernel)
/// debugging as errors; reacting to those would make health flap.
pub trait ProbePolicy: Send + Sync + fmt::Debug {
    fn treat_as_healthy(&self, error: &Error) -> bool;
}

/// Network-debugging errors from the probe count as a live connection
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkErrorsAreHealthy;

impl ProbePolicy for NetworkErrorsAreHealthy {
    fn treat_as_healthy(&self, error: &Error) -> bool {
        matches!(error, Error::NetworkDebugging(_))
    }
}

/// Any probe error means the connection is down
#[derive(Debug, Clone, Copy, Default)]
pub struct StrictProbe;

impl ProbePolicy for StrictProbe {
    fn treat_as_healthy(&self, _error: &Error) -> bool {
        false
    }
}

/// Talks to the WinDbg extension
pub struct CommunicationManager {
    config: Arc<Config>,
    pool: ConnectionPool,
    health: Mutex<ConnectionHealth>,
    probe_policy: Box<dyn ProbePolicy>,
}

impl CommunicationManager {
    /// Create a manager over an arbitrary connector
    pub fn new(config: Arc<Config>, connector: Arc<dyn Connector>) -> Self {
        let pool = ConnectionPool::new(
            connector,
            config.pipe.max_connections,
            Duration::from_millis(config.pipe.wait_slice_ms),
        );
        let probe_policy: Box<dyn ProbePolicy> = if config.execution.assume_healthy_on_network_errors {
            Box::new(NetworkErrorsAreHealthy)
        } else {
            Box::new(StrictProbe)
        };
        Self {
            config,
            pool,
            health: Mutex::new(ConnectionHealth::default()),
            probe_policy,
        }
    }

    /// Create a manager for the configured named pipe
    pub fn for_pipe(config: Arc<Config>) -> Self {
        let connector = Arc::new(PipeConnector::from_config(&config));
        Self::new(config, connector)
    }

    /// Replace the probe policy
    pub fn with_probe_policy<P: ProbePolicy + 'static>(mut self, policy: P) -> Self {
        self.probe_policy = Box::new(policy);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run raw debugger text and return its output
    pub async fn send_command(&self, command: &str, timeout: Duration) -> Result<String> {
        tracing::debug!(command, "Sending command");
        let request = Request::command(command, timeout.as_millis() as u64);

        let result = match self.send_message(&request, timeout).await {
            Ok(response) => response_output(response),
            Err(e) => Err(e),
        };

        match &result {
            Ok(_) => self.health.lock().record_success(),
            Err(e) => {
                tracing::debug!(command, error = %e, "Command failed");
                self.health.lock().record_failure(format!("Command '{}' failed: {}", command, e));
            }
        }
        result
    }

    /// Invoke a named extension handler and return its full response
    pub async fn send_handler_command(
        &self,
        handler: &str,
        parameters: Map<String, Value>,
        timeout: Duration,
    ) -> Result<ExtensionResponse> {
        tracing::debug!(handler, "Sending handler command");
        let request = Request::handler(handler, parameters, timeout.as_millis() as u64);

        let result = match self.send_message(&request, timeout).await {
            Ok(response) if response.status == Some(ResponseStatus::Error) => {
                let message = response.error.unwrap_or_else(|| "Unknown error".to_string());
                if is_network_debugging_error(&message) {
                    Err(Error::NetworkDebugging(message))
                } else {
                    Err(Error::CommandFailed(format!("Handler '{}' failed: {}", handler, message)))
                }
            }
            other => other,
        };

        match &result {
            Ok(_) => self.health.lock().record_success(),
            Err(e) => self
                .health
                .lock()
                .record_failure(format!("Handler '{}' failed: {}", handler, e)),
        }
        result
    }

    /// Probe the extension with a `version` request
    pub async fn test_connection(&self) -> bool {
        let timeout = self.config.timeout_for_command("version");
        match self.send_handler_command("version", Map::new(), timeout).await {
            Ok(response) => {
                let responsive = response.is_success();
                let mut health = self.health.lock();
                health.extension_responsive = responsive;
                health.is_connected = responsive;
                if !responsive {
                    health.consecutive_failures = health.consecutive_failures.saturating_add(1);
                }
                responsive
            }
            Err(e) if self.probe_policy.treat_as_healthy(&e) => {
                tracing::debug!(error = %e, "Network debugging error during connection test, assuming connected");
                self.health.lock().record_success();
                true
            }
            Err(e) => {
                tracing::debug!(error = %e, "Connection test failed");
                let mut health = self.health.lock();
                health.is_connected = false;
                health.extension_responsive = false;
                false
            }
        }
    }

    /// Drop every pooled connection and re-probe from scratch
    pub async fn force_reconnect(&self) -> bool {
        tracing::info!("Forcing reconnection to WinDbg extension");
        self.pool.close_all();
        {
            let mut health = self.health.lock();
            health.consecutive_failures = 0;
            health.last_error = None;
        }
        let ok = self.test_connection().await;
        if ok {
            tracing::info!("Reconnected to WinDbg extension");
        } else {
            tracing::warn!("Reconnection to WinDbg extension failed");
        }
        ok
    }

    /// Snapshot of the health record
    pub fn connection_health(&self) -> ConnectionHealth {
        self.health.lock().clone()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn endpoint(&self) -> String {
        self.pool.endpoint()
    }

    /// Close all connections
    pub fn shutdown(&self) {
        let closed = self.pool.close_all();
        tracing::info!(closed, "Communication manager shut down");
    }

    async fn send_message(&self, request: &Request, timeout: Duration) -> Result<ExtensionResponse> {
        self.pool
            .cleanup_old(Duration::from_secs(self.config.pipe.connection_max_age_secs));

        let frame = protocol::encode(request)?;
        let attempts = self.config.send_attempts();
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.round_trip(&frame, timeout).await {
                Ok(response) => return Ok(response),
                Err(e) if !e.is_retryable() => {
                    tracing::error!(attempt, error = %e, "Non-retryable error");
                    return Err(e);
                }
                Err(e) => {
                    if e.is_pipe_closing() {
                        tracing::warn!(attempt, error = %e, "Pipe closing detected, clearing connection pool");
                        self.pool.close_all();
                    } else {
                        tracing::warn!(attempt, error = %e, "Send attempt failed");
                    }
                    if attempt < attempts {
                        tokio::time::sleep(self.config.retry_delay()).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        tracing::error!(attempts, command = request.command_text(), "All send attempts failed");
        Err(last_error.unwrap_or_else(|| Error::Transport("Failed to send message".to_string())))
    }

    async fn round_trip(&self, frame: &[u8], timeout: Duration) -> Result<ExtensionResponse> {
        let mut conn = self.pool.acquire(timeout).await?;

        let result = async {
            let stream = conn.stream()?;
            transport::write_frame(stream, frame).await?;
            let bytes = transport::read_frame(stream, self.config.pipe.buffer_size, timeout).await?;
            protocol::decode(&bytes)
        }
        .await;

        if let Err(e) = &result {
            if matches!(e.class(), ErrorClass::Transport | ErrorClass::Timeout)
                || matches!(e, Error::Decoding(_))
            {
                // The stream may hold half a frame; never hand it out again
                conn.mark_broken();
            }
        }
        result
    }
}

/// Turn a decoded response for a raw command into its output
fn response_output(response: ExtensionResponse) -> Result<String> {
    if !response.is_well_formed() {
        return Err(Error::InvalidResponse(
            "response lacks a status or the field that goes with it".to_string(),
        ));
    }
    match response.status {
        Some(ResponseStatus::Success) => Ok(response.output.unwrap_or_default()),
        _ => {
            let message = response.error.unwrap_or_else(|| "Unknown error".to_string());
            if is_network_debugging_error(&message) {
                Err(Error::NetworkDebugging(message))
            } else {
                Err(Error::CommandFailed(message))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockExtension, Reply};
    use serde_json::json;

    fn quick_config() -> Arc<Config> {
        let mut config = Config::default();
        config.retry.max_attempts = 2;
        config.retry.delay_ms = 10;
        config.pipe.wait_slice_ms = 10;
        Arc::new(config)
    }

    fn manager(mock: &MockExtension) -> CommunicationManager {
        CommunicationManager::new(quick_config(), mock.connector())
    }

    #[test]
    fn test_network_error_markers() {
        assert!(is_network_debugging_error("Network connection lost"));
        assert!(is_network_debugging_error("ERROR_PIPE_BUSY"));
        assert!(is_network_debugging_error("Extension not initialized"));
        assert!(!is_network_debugging_error("Symbol not found"));
    }

    #[tokio::test]
    async fn test_send_command_success_updates_health() {
        let mock = MockExtension::echo();
        let manager = manager(&mock);

        let output = manager.send_command("lm", Duration::from_secs(1)).await.unwrap();
        assert_eq!(output, "output for lm");

        let health = manager.connection_health();
        assert!(health.is_connected);
        assert!(health.extension_responsive);
        assert_eq!(health.consecutive_failures, 0);
        assert!(health.last_successful_command.is_some());
        assert_eq!(mock.requests()[0].timeout_ms, 1000);
    }

    #[tokio::test]
    async fn test_legacy_response_shape() {
        let mock = MockExtension::new(|_| Reply::Json(json!({"status": "success", "output": "legacy"})));
        let manager = manager(&mock);

        let output = manager.send_command("version", Duration::from_secs(1)).await.unwrap();
        assert_eq!(output, "legacy");
    }

    #[tokio::test]
    async fn test_malformed_response_is_invalid() {
        let mock = MockExtension::new(|_| Reply::Json(json!({"status": "success"})));
        let manager = manager(&mock);

        let err = manager.send_command("version", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::InvalidResponse(_)));
        assert_eq!(manager.connection_health().consecutive_failures, 1);
    }

    #[tokio::test]
    async fn test_extension_error_is_not_retried() {
        let mock = MockExtension::new(|_| Reply::error("Symbol not found"));
        let manager = manager(&mock);

        let err = manager.send_command("x foo!bar", Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, Error::CommandFailed(ref m) if m == "Symbol not found"));
        assert_eq!(mock.request_count("x foo!bar"), 1);
    }

    #[tokio::test]
    async fn test_retries_after_hangup() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let counter = calls.clone();
        let mock = MockExtension::new(move |_| {
            if counter.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                Reply::Hangup
            } else {
                Reply::output("ok")
            }
        });
        let manager = manager(&mock);

        let output = manager.send_command("r", Duration::from_secs(1)).await.unwrap();
        assert_eq!(output, "ok");
        assert_eq!(mock.request_count("r"), 2);
        assert_eq!(mock.connects(), 2);
    }

    #[tokio::test]
    async fn test_pipe_closing_clears_pool_and_retries() {
        let mock = MockExtension::echo();
        let manager = manager(&mock);

        manager.send_command("k", Duration::from_secs(1)).await.unwrap();
        assert_eq!(manager.pool_stats().open, 1);

        mock.sever();
        let output = manager.send_command("k", Duration::from_secs(1)).await.unwrap();
        assert_eq!(output, "output for k");
        assert_eq!(mock.connects(), 2);
        assert_eq!(manager.pool_stats().open, 1);
    }

    #[tokio::test]
    async fn test_exhausted_attempts_surface_last_error() {
        let mock = MockExtension::echo();
        mock.close_next_connects(10);
        let manager = manager(&mock);

        let err = manager.send_command("k", Duration::from_secs(1)).await.unwrap_err();
        assert!(err.is_pipe_closing());
        assert_eq!(mock.connects(), quick_config().send_attempts() as usize);
    }

    #[tokio::test]
    async fn test_health_counter_monotonic_then_reset() {
        let mock = MockExtension::echo();
        let manager = manager(&mock);
        mock.set_fail_connect(true);

        for expected in 1..=4 {
            assert!(manager.send_command("k", Duration::from_millis(200)).await.is_err());
            let health = manager.connection_health();
            assert_eq!(health.consecutive_failures, expected);
            assert!(health.last_error.is_some());
        }

        mock.set_fail_connect(false);
        manager.send_command("k", Duration::from_secs(1)).await.unwrap();
        assert_eq!(manager.connection_health().consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_probe_network_error_counts_as_healthy() {
        let mock = MockExtension::new(|_| Reply::error("Network connection timeout"));
        let manager = manager(&mock);

        assert!(manager.test_connection().await);
        let health = manager.connection_health();
        assert!(health.is_connected);
        assert_eq!(health.consecutive_failures, 0);
    }

    #[tokio::test]
    async fn test_strict_probe_reports_network_error() {
        let mock = MockExtension::new(|_| Reply::error("Network connection timeout"));
        let manager = manager(&mock).with_probe_policy(StrictProbe);

        assert!(!manager.test_connection().await);
        assert!(!manager.connection_health().is_connected);
    }

    #[tokio::test]
    async fn test_probe_sends_version_handler() {
        let mock = MockExtension::echo();
        let manager = manager(&mock);

        assert!(manager.test_connection().await);
        let requests = mock.requests();
        assert_eq!(requests[0].command, "version");
        assert_eq!(requests[0].timeout_ms, 10_000);
    }

    #[tokio::test]
    async fn test_force_reconnect_after_sever() {
        let mock = MockExtension::echo();
        let manager = manager(&mock);

        manager.send_command("k", Duration::from_secs(1)).await.unwrap();
        mock.set_fail_connect(true);
        mock.sever();
        assert!(manager.send_command("k", Duration::from_millis(300)).await.is_err());
        assert!(manager.connection_health().consecutive_failures > 0);

        mock.set_fail_connect(false);
        assert!(manager.force_reconnect().await);
        assert_eq!(manager.connection_health().consecutive_failures, 0);
        assert_eq!(manager.pool_stats().open, 1);
    }
}
