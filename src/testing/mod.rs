//! Scripted stand-in for the WinDbg extension
//!
//! [`MockExtension`] implements [`Connector`] over in-memory duplex streams.
//! Each connection gets a server task that reads real request frames and
//! answers through a responder closure, so the pool, the Communication
//! Manager and the executor run unmodified against it.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::DuplexStream;
use tokio::task::JoinHandle;

use crate::common::{Error, Result};
use crate::ipc::protocol::DELIMITER;
use crate::ipc::transport::{read_frame, write_frame, BoxedStream, Connector};

/// A request as the extension saw it
#[derive(Debug, Clone)]
pub struct MockRequest {
    pub command: String,
    pub parameters: Value,
    pub timeout_ms: u64,
    pub request_id: String,
}

/// What the scripted extension sends back
#[derive(Debug, Clone)]
pub enum Reply {
    /// Versioned `response` with `success: true`
    Output(String),
    /// Versioned `error` payload
    Error(String),
    /// Arbitrary JSON (e.g. the legacy flat shape), framed normally
    Json(Value),
    /// Raw bytes written as-is, no delimiter added
    Raw(Vec<u8>),
    /// Close the connection without answering
    Hangup,
    /// Wait, then send the inner reply
    Delayed(Duration, Box<Reply>),
}

impl Reply {
    pub fn output(text: &str) -> Self {
        Reply::Output(text.to_string())
    }

    pub fn error(text: &str) -> Self {
        Reply::Error(text.to_string())
    }

    pub fn delayed(delay: Duration, reply: Reply) -> Self {
        Reply::Delayed(delay, Box::new(reply))
    }
}

type Responder = dyn Fn(&MockRequest) -> Reply + Send + Sync;

struct MockState {
    responder: Box<Responder>,
    connects: AtomicUsize,
    open: AtomicUsize,
    max_open: AtomicUsize,
    fail_connect: AtomicBool,
    connect_delay_ms: AtomicU64,
    closing_connects: AtomicUsize,
    requests: Mutex<Vec<MockRequest>>,
    servers: Mutex<Vec<JoinHandle<()>>>,
}

/// In-process fake extension
#[derive(Clone)]
pub struct MockExtension {
    state: Arc<MockState>,
}

impl MockExtension {
    /// Create a mock that answers every request through `responder`
    pub fn new<F>(responder: F) -> Self
    where
        F: Fn(&MockRequest) -> Reply + Send + Sync + 'static,
    {
        Self {
            state: Arc::new(MockState {
                responder: Box::new(responder),
                connects: AtomicUsize::new(0),
                open: AtomicUsize::new(0),
                max_open: AtomicUsize::new(0),
                fail_connect: AtomicBool::new(false),
                connect_delay_ms: AtomicU64::new(0),
                closing_connects: AtomicUsize::new(0),
                requests: Mutex::new(Vec::new()),
                servers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Mock that echoes `output for <command>` to everything
    pub fn echo() -> Self {
        Self::new(|req| Reply::Output(format!("output for {}", req.command)))
    }

    /// Share this mock as a connector
    pub fn connector(&self) -> Arc<dyn Connector> {
        Arc::new(self.clone())
    }

    /// Make new connections fail as if the pipe did not exist
    pub fn set_fail_connect(&self, fail: bool) {
        self.state.fail_connect.store(fail, Ordering::SeqCst);
    }

    /// Stall every new connection, like a pipe that stays busy
    pub fn set_connect_delay(&self, delay: Duration) {
        self.state
            .connect_delay_ms
            .store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    /// The next `count` connections are already being torn down by the
    /// peer: the first write on them fails
    pub fn close_next_connects(&self, count: usize) {
        self.state.closing_connects.store(count, Ordering::SeqCst);
    }

    /// Drop every live server end, as if the extension was unloaded
    pub fn sever(&self) {
        let servers: Vec<_> = self.state.servers.lock().drain(..).collect();
        for server in servers {
            server.abort();
        }
    }

    /// Connections attempted so far
    pub fn connects(&self) -> usize {
        self.state.connects.load(Ordering::SeqCst)
    }

    /// Live server connections right now
    pub fn open_connections(&self) -> usize {
        self.state.open.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneously live connections seen
    pub fn max_open_connections(&self) -> usize {
        self.state.max_open.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order
    pub fn requests(&self) -> Vec<MockRequest> {
        self.state.requests.lock().clone()
    }

    /// Number of requests received for a command
    pub fn request_count(&self, command: &str) -> usize {
        self.state
            .requests
            .lock()
            .iter()
            .filter(|r| r.command == command)
            .count()
    }
}

/// Decrements the live-connection count however the server task ends
struct OpenGuard(Arc<MockState>);

impl Drop for OpenGuard {
    fn drop(&mut self) {
        self.0.open.fetch_sub(1, Ordering::SeqCst);
    }
}

fn envelope(payload: Value) -> Value {
    json!({
        "protocol_version": 1,
        "message_type": 2,
        "payload": payload,
    })
}

fn frame(value: &Value) -> Vec<u8> {
    let mut bytes = value.to_string().into_bytes();
    bytes.extend_from_slice(DELIMITER);
    bytes
}

fn parse_request(frame: &[u8]) -> Option<MockRequest> {
    let body = frame.strip_suffix(DELIMITER).unwrap_or(frame);
    let value: Value = serde_json::from_slice(body).ok()?;
    let payload = value.get("payload")?;
    Some(MockRequest {
        command: payload.get("command")?.as_str()?.to_string(),
        parameters: payload.get("parameters").cloned().unwrap_or(Value::Null),
        timeout_ms: payload.get("timeout_ms").and_then(Value::as_u64).unwrap_or(0),
        request_id: payload
            .get("request_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
    })
}

async fn serve(state: Arc<MockState>, mut server: DuplexStream, _open: OpenGuard) {
    loop {
        let Ok(bytes) = read_frame(&mut server, 4096, Duration::from_secs(3600)).await else {
            return;
        };
        let Some(request) = parse_request(&bytes) else {
            return;
        };
        state.requests.lock().push(request.clone());

        let mut reply = (state.responder)(&request);
        while let Reply::Delayed(delay, inner) = reply {
            tokio::time::sleep(delay).await;
            reply = *inner;
        }

        let out = match reply {
            Reply::Output(output) => frame(&envelope(json!({
                "type": "response",
                "request_id": request.request_id,
                "success": true,
                "output": output,
                "execution_time_ms": 1,
            }))),
            Reply::Error(message) => frame(&envelope(json!({
                "type": "error",
                "request_id": request.request_id,
                "error_message": message,
                "error_code": 1,
            }))),
            Reply::Json(value) => frame(&value),
            Reply::Raw(bytes) => bytes,
            Reply::Hangup | Reply::Delayed(..) => return,
        };

        if write_frame(&mut server, &out).await.is_err() {
            return;
        }
    }
}

#[async_trait]
impl Connector for MockExtension {
    async fn connect(&self) -> Result<BoxedStream> {
        let state = &self.state;
        state.connects.fetch_add(1, Ordering::SeqCst);

        let delay = state.connect_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if state.fail_connect.load(Ordering::SeqCst) {
            return Err(Error::PipeNotFound(self.endpoint()));
        }

        let (client, server) = tokio::io::duplex(64 * 1024);

        let closing = state
            .closing_connects
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if closing {
            drop(server);
            return Ok(Box::new(client));
        }

        let open = state.open.fetch_add(1, Ordering::SeqCst) + 1;
        state.max_open.fetch_max(open, Ordering::SeqCst);

        let guard = OpenGuard(state.clone());
        let task = tokio::spawn(serve(state.clone(), server, guard));
        {
            let mut servers = state.servers.lock();
            servers.retain(|s| !s.is_finished());
            servers.push(task);
        }

        Ok(Box::new(client))
    }

    fn endpoint(&self) -> String {
        r"\\.\pipe\mock_extension".to_string()
    }
}
