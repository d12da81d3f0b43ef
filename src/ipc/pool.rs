//! Bounded pool of pipe connections
//!
//! Handles are handed out under a single mutex. Callers that find the pool
//! saturated wait in short slices for a release, up to their own deadline.
//! Connecting happens outside the lock: a slot is reserved first, so the
//! capacity bound holds while the connect is in flight.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::transport::{BoxedStream, Connector};
use crate::common::{Error, Result};

/// One pooled transport handle plus its bookkeeping
struct ConnectionHandle {
    id: u64,
    /// `None` while the handle is checked out or still connecting
    stream: Option<BoxedStream>,
    created_at: Instant,
    last_used: Instant,
    in_use: bool,
    use_count: u64,
    /// Worker thread that last acquired the handle
    owner: Option<ThreadId>,
}

/// Point-in-time view of the pool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Handles currently tracked, in use or idle
    pub open: usize,
    pub in_use: usize,
    pub idle: usize,
    /// Connections opened over the pool's lifetime
    pub total_created: u64,
    pub capacity: usize,
}

/// Snapshot of one pooled handle
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: u64,
    pub age: Duration,
    pub idle_for: Duration,
    pub in_use: bool,
    pub use_count: u64,
    pub owner: Option<ThreadId>,
}

/// Bounded connection pool
pub struct ConnectionPool {
    connector: Arc<dyn Connector>,
    capacity: usize,
    wait_slice: Duration,
    handles: Mutex<Vec<ConnectionHandle>>,
    released: Notify,
    next_id: AtomicU64,
    total_created: AtomicU64,
}

impl ConnectionPool {
    pub fn new(connector: Arc<dyn Connector>, capacity: usize, wait_slice: Duration) -> Self {
        Self {
            connector,
            capacity: capacity.max(1),
            wait_slice: wait_slice.max(Duration::from_millis(1)),
            handles: Mutex::new(Vec::new()),
            released: Notify::new(),
            next_id: AtomicU64::new(1),
            total_created: AtomicU64::new(0),
        }
    }

    /// Endpoint of the underlying connector
    pub fn endpoint(&self) -> String {
        self.connector.endpoint()
    }

    /// Check out a handle, opening a new one if the pool has room.
    ///
    /// Fails with [`Error::PoolTimeout`] if nothing frees up before
    /// `timeout`. A connect failure while the pool is empty is returned
    /// straight away since no release could ever satisfy the wait.
    pub async fn acquire(&self, timeout: Duration) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + timeout;
        let owner = std::thread::current().id();

        loop {
            let reserved = {
                let mut handles = self.handles.lock();
                let now = Instant::now();

                if let Some(handle) = handles.iter_mut().find(|h| !h.in_use && h.stream.is_some()) {
                    handle.in_use = true;
                    handle.last_used = now;
                    handle.use_count += 1;
                    handle.owner = Some(owner);
                    tracing::debug!(id = handle.id, uses = handle.use_count, "Reused pooled connection");
                    return Ok(PooledConnection {
                        pool: self,
                        id: handle.id,
                        stream: handle.stream.take(),
                        broken: false,
                    });
                }

                if handles.len() < self.capacity {
                    let id = self.next_id.fetch_add(1, Ordering::Relaxed);
                    handles.push(ConnectionHandle {
                        id,
                        stream: None,
                        created_at: now,
                        last_used: now,
                        in_use: true,
                        use_count: 1,
                        owner: Some(owner),
                    });
                    Some(id)
                } else {
                    None
                }
            };

            if let Some(id) = reserved {
                let mut reservation = Reservation {
                    pool: self,
                    id,
                    committed: false,
                };
                match self.connector.connect().await {
                    Ok(stream) => {
                        reservation.committed = true;
                        self.total_created.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(id, "Created new pooled connection");
                        return Ok(PooledConnection {
                            pool: self,
                            id,
                            stream: Some(stream),
                            broken: false,
                        });
                    }
                    Err(e) => {
                        drop(reservation);
                        if self.handles.lock().is_empty() {
                            return Err(e);
                        }
                        tracing::warn!(error = %e, "Failed to create new connection, waiting for a pooled one");
                    }
                }
            }

            let now = Instant::now();
            if now >= deadline {
                return Err(Error::PoolTimeout(timeout.as_millis() as u64));
            }
            let slice = (deadline - now).min(self.wait_slice);
            let _ = tokio::time::timeout(slice, self.released.notified()).await;
        }
    }

    /// Give back a slot whose connect failed or was cancelled
    fn abandon(&self, id: u64) {
        self.handles.lock().retain(|h| h.id != id);
        tracing::debug!(id, "Released unused connection slot");
        self.released.notify_one();
    }

    fn release(&self, id: u64, stream: Option<BoxedStream>, broken: bool) {
        {
            let mut handles = self.handles.lock();
            match handles.iter().position(|h| h.id == id) {
                Some(index) if broken || stream.is_none() => {
                    handles.remove(index);
                    tracing::debug!(id, "Dropped broken connection from pool");
                }
                Some(index) => {
                    let handle = &mut handles[index];
                    handle.in_use = false;
                    handle.last_used = Instant::now();
                    handle.stream = stream;
                    tracing::trace!(id, "Released connection back to pool");
                }
                None => {
                    // Pool was cleared while this handle was checked out
                    tracing::debug!(id, "Closing detached connection");
                }
            }
        }
        self.released.notify_one();
    }

    /// Close idle handles older than `max_age`, returning how many went
    pub fn cleanup_old(&self, max_age: Duration) -> usize {
        let removed = {
            let mut handles = self.handles.lock();
            let before = handles.len();
            handles.retain(|h| h.in_use || h.created_at.elapsed() <= max_age);
            before - handles.len()
        };
        if removed > 0 {
            tracing::debug!(removed, "Cleaned up old connections");
            self.released.notify_waiters();
        }
        removed
    }

    /// Close every handle so the next caller reconnects from scratch.
    ///
    /// Checked-out handles are detached and closed when their guard drops.
    pub fn close_all(&self) -> usize {
        let closed = {
            let mut handles = self.handles.lock();
            let count = handles.len();
            handles.clear();
            count
        };
        tracing::debug!(closed, "All connections closed and pool cleared");
        self.released.notify_waiters();
        closed
    }

    pub fn stats(&self) -> PoolStats {
        let handles = self.handles.lock();
        let in_use = handles.iter().filter(|h| h.in_use).count();
        PoolStats {
            open: handles.len(),
            in_use,
            idle: handles.len() - in_use,
            total_created: self.total_created.load(Ordering::Relaxed),
            capacity: self.capacity,
        }
    }

    /// Per-handle bookkeeping, oldest first
    pub fn connections(&self) -> Vec<ConnectionInfo> {
        self.handles
            .lock()
            .iter()
            .map(|h| ConnectionInfo {
                id: h.id,
                age: h.created_at.elapsed(),
                idle_for: h.last_used.elapsed(),
                in_use: h.in_use,
                use_count: h.use_count,
                owner: h.owner,
            })
            .collect()
    }
}

/// Slot reserved for a connect in flight. Unless committed, dropping it
/// frees the slot, including when the acquiring future is cancelled.
struct Reservation<'a> {
    pool: &'a ConnectionPool,
    id: u64,
    committed: bool,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.committed {
            self.pool.abandon(self.id);
        }
    }
}

/// A checked-out connection, returned to the pool on drop
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    id: u64,
    stream: Option<BoxedStream>,
    broken: bool,
}

impl PooledConnection<'_> {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn stream(&mut self) -> Result<&mut BoxedStream> {
        self.stream
            .as_mut()
            .ok_or_else(|| Error::Internal("pooled connection has no stream".to_string()))
    }

    /// Drop this handle from the pool instead of returning it
    pub fn mark_broken(&mut self) {
        self.broken = true;
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        self.pool.release(self.id, self.stream.take(), self.broken);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    /// Connector that hands out in-memory streams and counts them
    struct DuplexConnector {
        connects: AtomicUsize,
        fail: std::sync::atomic::AtomicBool,
        delay_ms: AtomicU64,
    }

    impl DuplexConnector {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                fail: std::sync::atomic::AtomicBool::new(false),
                delay_ms: AtomicU64::new(0),
            })
        }
    }

    #[async_trait]
    impl Connector for DuplexConnector {
        async fn connect(&self) -> Result<BoxedStream> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            let delay = self.delay_ms.load(Ordering::SeqCst);
            if delay > 0 {
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(Error::PipeNotFound("test".into()));
            }
            let (client, server) = tokio::io::duplex(64);
            std::mem::forget(server);
            Ok(Box::new(client))
        }

        fn endpoint(&self) -> String {
            "duplex".to_string()
        }
    }

    fn pool(connector: Arc<DuplexConnector>, capacity: usize) -> ConnectionPool {
        ConnectionPool::new(connector, capacity, Duration::from_millis(10))
    }

    #[tokio::test]
    async fn test_reuses_idle_connection() {
        let connector = DuplexConnector::new();
        let pool = pool(connector.clone(), 3);

        let first_id = pool.acquire(Duration::from_secs(1)).await.unwrap().id();
        let second_id = pool.acquire(Duration::from_secs(1)).await.unwrap().id();

        assert_eq!(first_id, second_id);
        assert_eq!(connector.connects.load(Ordering::SeqCst), 1);
        let connections = pool.connections();
        assert_eq!(connections.len(), 1);
        assert_eq!(connections[0].id, first_id);
        assert_eq!(connections[0].use_count, 2);
        assert!(!connections[0].in_use);
        assert_eq!(pool.stats().idle, 1);
    }

    #[tokio::test]
    async fn test_capacity_and_timeout() {
        let connector = DuplexConnector::new();
        let pool = pool(connector.clone(), 2);

        let a = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let b = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(pool.stats().in_use, 2);

        let err = pool.acquire(Duration::from_millis(50)).await.err().unwrap();
        assert!(matches!(err, Error::PoolTimeout(50)));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);

        drop(a);
        drop(b);
        assert_eq!(pool.stats().idle, 2);
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let connector = DuplexConnector::new();
        let pool = Arc::new(pool(connector, 1));

        let held = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let held_id = held.id();

        let waiter = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.acquire(Duration::from_secs(2)).await.map(|c| c.id()) })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        drop(held);

        assert_eq!(waiter.await.unwrap().unwrap(), held_id);
    }

    #[tokio::test]
    async fn test_broken_connection_is_removed() {
        let connector = DuplexConnector::new();
        let pool = pool(connector.clone(), 3);

        let mut conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        conn.mark_broken();
        drop(conn);

        assert_eq!(pool.stats().open, 0);
        pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_connect_failure_on_empty_pool_is_immediate() {
        let connector = DuplexConnector::new();
        connector.fail.store(true, Ordering::SeqCst);
        let pool = pool(connector, 3);

        let started = Instant::now();
        let err = pool.acquire(Duration::from_secs(5)).await.err().unwrap();
        assert!(matches!(err, Error::PipeNotFound(_)));
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(pool.stats().open, 0);
    }

    #[tokio::test]
    async fn test_close_all_detaches_checked_out_handles() {
        let connector = DuplexConnector::new();
        let pool = pool(connector.clone(), 3);

        let idle = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let busy = pool.acquire(Duration::from_secs(1)).await.unwrap();
        drop(idle);

        assert_eq!(pool.close_all(), 2);
        assert_eq!(pool.stats().open, 0);

        drop(busy);
        assert_eq!(pool.stats().open, 0);

        pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(connector.connects.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cleanup_old_only_touches_idle_handles() {
        let connector = DuplexConnector::new();
        let pool = pool(connector, 3);

        let idle = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let busy = pool.acquire(Duration::from_secs(1)).await.unwrap();
        drop(idle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(pool.cleanup_old(Duration::from_secs(60)), 0);
        assert_eq!(pool.cleanup_old(Duration::from_millis(5)), 1);

        let stats = pool.stats();
        assert_eq!(stats.open, 1);
        assert_eq!(stats.in_use, 1);
        drop(busy);
    }

    #[tokio::test]
    async fn test_cancelled_connect_frees_its_slot() {
        let connector = DuplexConnector::new();
        connector.delay_ms.store(2000, Ordering::SeqCst);
        let pool = pool(connector.clone(), 2);

        for _ in 0..2 {
            let attempt = tokio::time::timeout(Duration::from_millis(50), pool.acquire(Duration::from_secs(5))).await;
            assert!(attempt.is_err());
        }
        assert_eq!(pool.stats().open, 0);
        assert_eq!(pool.stats().total_created, 0);

        connector.delay_ms.store(0, Ordering::SeqCst);
        let conn = pool.acquire(Duration::from_millis(200)).await.unwrap();
        assert_eq!(pool.stats().in_use, 1);
        drop(conn);
        assert_eq!(pool.stats().total_created, 1);
    }
}
