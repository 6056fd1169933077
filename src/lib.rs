//! Fan-out relay built on a reference-counted buffer pool.
//!
//! Inbound connection threads read frames into pooled [`LineBuffer`]s and hand them to a single
//! distributor thread, which enqueues one shared handle per connected endpoint. Each buffer goes
//! back to the pool when the last queue that received it has written it out.

pub mod buffer_pool;
pub mod client;
pub mod config;
pub mod connection;
pub mod distributor;
pub mod endpoint;
pub mod error;
pub mod line;
pub mod logging;
pub mod metrics;
pub mod protocol;
pub mod reaper;
pub mod relay;

pub use buffer_pool::{Lease, PoolStats, Recycle, RefCountedPool, Shared};
pub use client::ChatClient;
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use line::{BufferPool, LineBuffer, Message};
pub use metrics::{MetricsSnapshot, RelayMetrics};
pub use protocol::{Frame, FrameReader, ProtocolError};
pub use relay::{Relay, RelayHandle};
