//! IPC with the WinDbg extension
//!
//! Layered leaves first: the wire codec, the named pipe transport, the
//! bounded connection pool, and the Communication Manager on top.

pub mod manager;
pub mod pool;
pub mod protocol;
pub mod transport;

pub use manager::{CommunicationManager, ConnectionHealth, NetworkErrorsAreHealthy, ProbePolicy, StrictProbe};
pub use pool::{ConnectionPool, PoolStats};
pub use transport::{BoxedStream, Connector, PipeConnector};
