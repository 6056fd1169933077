//! Relay orchestration.
//!
//! This module binds the listener, wires the accept loop to the distributor thread through
//! bounded channels, and owns the shared pool and metrics. Each accepted connection gets its own
//! pair of endpoint threads; the distributor owns the set of endpoints.

use crate::config::RelayConfig;
use crate::connection::Connection;
use crate::distributor::{Distributor, DistributorChannels};
use crate::endpoint::Endpoint;
use crate::error::{RelayError, Result};
use crate::line::{BufferPool, Message};
use crate::metrics::{MetricsSnapshot, RelayMetrics};
use crossbeam_channel::Sender;
use parking_lot::Mutex;
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pause between polls of the non-blocking listener.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// A bound relay that has not started serving yet.
pub struct Relay {
    listener: TcpListener,
    local_addr: SocketAddr,
    config: RelayConfig,
    pool: BufferPool,
    metrics: Arc<RelayMetrics>,
    running: Arc<AtomicBool>,
}

impl Relay {
    /// Bind the listener and create the buffer pool. No threads are started.
    pub fn bind(config: RelayConfig) -> Result<Self> {
        config.validate()?;
        let listener = TcpListener::bind(config.listen)
            .map_err(|err| RelayError::io(err, format!("binding {}", config.listen)))?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| RelayError::io(err, "reading listener address"))?;
        listener
            .set_nonblocking(true)
            .map_err(|err| RelayError::io(err, "configuring listener"))?;

        let pool = BufferPool::with_capacity(config.pool.preallocate);
        let metrics = Arc::new(RelayMetrics::new(pool.clone()));
        Ok(Self {
            listener,
            local_addr,
            config,
            pool,
            metrics,
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn metrics(&self) -> Arc<RelayMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Flag that keeps the accept loop running; clearing it shuts the relay down.
    pub fn running(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.running)
    }

    /// Serve on the calling thread until the running flag is cleared.
    ///
    /// Returns the final counters after every endpoint has been retired.
    pub fn run(self) -> Result<MetricsSnapshot> {
        let Relay {
            listener,
            local_addr,
            config,
            pool,
            metrics,
            running,
        } = self;

        let (registration_tx, registration_rx) =
            crossbeam_channel::bounded(config.queues.registration_capacity);
        let (message_tx, message_rx) = crossbeam_channel::bounded(config.queues.inbound_capacity);
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded(1);

        let distributor = Distributor::new(pool.clone(), Arc::clone(&metrics));
        let channels = DistributorChannels {
            registrations: registration_rx,
            messages: message_rx,
            shutdown: shutdown_rx,
        };
        let reap_interval = config.reaper.interval();
        let distributor = thread::Builder::new()
            .name("distributor".to_string())
            .spawn(move || distributor.run(channels, reap_interval))
            .map_err(|err| RelayError::io(err, "spawning distributor thread"))?;

        info!(
            addr = %local_addr,
            endpoint_capacity = config.queues.endpoint_capacity,
            reap_interval_ms = config.reaper.interval_ms,
            preallocated = config.pool.preallocate,
            "relay listening"
        );

        let acceptor = Acceptor {
            next_id: 0,
            endpoint_capacity: config.queues.endpoint_capacity,
            pool,
            metrics: Arc::clone(&metrics),
            registrations: registration_tx,
            messages: message_tx,
        };
        acceptor.serve(&listener, &running);

        // The distributor may already be gone if it panicked; that shows up in join.
        let _ = shutdown_tx.send(());
        distributor
            .join()
            .map_err(|_| RelayError::ThreadPanicked("distributor".to_string()))?;

        let snapshot = metrics.snapshot();
        info!(metrics = %snapshot.to_json(), "relay stopped");
        Ok(snapshot)
    }

    /// Serve on a background thread.
    pub fn spawn(self) -> Result<RelayHandle> {
        let addr = self.local_addr;
        let running = self.running();
        let pool = self.pool.clone();
        let metrics = self.metrics();
        let thread = thread::Builder::new()
            .name("relay".to_string())
            .spawn(move || self.run())
            .map_err(|err| RelayError::io(err, "spawning relay thread"))?;
        Ok(RelayHandle {
            addr,
            running,
            pool,
            metrics,
            thread: Mutex::new(Some(thread)),
        })
    }
}

/// Accept loop state. Registration and message senders live here, so when the loop ends the
/// distributor sees its registration channel close.
struct Acceptor {
    next_id: u64,
    endpoint_capacity: usize,
    pool: BufferPool,
    metrics: Arc<RelayMetrics>,
    registrations: Sender<Endpoint>,
    messages: Sender<Message>,
}

impl Acceptor {
    fn serve(mut self, listener: &TcpListener, running: &AtomicBool) {
        while running.load(Ordering::Relaxed) {
            match listener.accept() {
                Ok((stream, peer)) => {
                    if let Err(err) = self.admit(stream) {
                        warn!(%peer, error = %err, "failed to start endpoint");
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => {}
                Err(err) => {
                    // Per-connection failures (e.g. ECONNABORTED) should not stop the listener.
                    warn!(error = %err, "accept failed");
                    thread::sleep(ACCEPT_POLL);
                }
            }
        }
        debug!("accept loop stopped");
    }

    fn admit(&mut self, stream: TcpStream) -> io::Result<()> {
        stream.set_nonblocking(false)?;
        stream.set_nodelay(true)?;
        self.metrics.record_accept();

        let id = self.next_id;
        self.next_id += 1;
        let conn: Arc<dyn Connection> = Arc::new(stream);
        info!(endpoint = id, peer = %conn.peer(), "connection accepted");

        let (endpoint, directions) = Endpoint::new(
            id,
            conn,
            self.endpoint_capacity,
            self.pool.clone(),
            self.messages.clone(),
        );
        directions.spawn()?;
        if let Err(rejected) = self.registrations.send(endpoint) {
            rejected.into_inner().retire();
            return Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "distributor stopped",
            ));
        }
        Ok(())
    }
}

/// Control handle for a relay running on a background thread.
pub struct RelayHandle {
    addr: SocketAddr,
    running: Arc<AtomicBool>,
    pool: BufferPool,
    metrics: Arc<RelayMetrics>,
    thread: Mutex<Option<JoinHandle<Result<MetricsSnapshot>>>>,
}

impl RelayHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn metrics(&self) -> &RelayMetrics {
        &self.metrics
    }

    /// Stop accepting, retire every endpoint and wait for the relay thread.
    ///
    /// Returns `None` if the relay was already shut down.
    pub fn shutdown(&self) -> Option<Result<MetricsSnapshot>> {
        self.running.store(false, Ordering::Relaxed);
        let thread = self.thread.lock().take()?;
        Some(
            thread
                .join()
                .unwrap_or_else(|_| Err(RelayError::ThreadPanicked("relay".to_string()))),
        )
    }
}

impl Drop for RelayHandle {
    fn drop(&mut self) {
        let _ = self.shutdown();
    }
}
