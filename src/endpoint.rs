//! One connection's pair of directions and the queue between them and the distributor.
//!
//! An accepted connection becomes an [`Endpoint`] (kept by the distributor) plus its
//! [`Directions`] (moved onto two threads):
//!
//! - the inbound direction reads frames into pooled buffers and submits them to the distributor;
//! - the outbound direction drains the endpoint's bounded queue onto the socket, dropping each
//!   handle after the write whether or not it succeeded.
//!
//! A direction that fails closes the shared connection and marks itself stopped in the
//! endpoint's [`Liveness`]. Closing also hangs up a signal channel so an outbound direction
//! blocked on an empty queue notices the failure without waiting for traffic. The endpoint only
//! counts as dead once both directions have stopped.

use crate::buffer_pool::Shared;
use crate::connection::Connection;
use crate::line::{BufferPool, LineBuffer, Message};
use crate::protocol::{read_frame_body, read_frame_header};
use crossbeam_channel::{self, select, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, trace};

/// Identifies one direction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Inbound,
    Outbound,
}

/// Combined state of an endpoint's two directions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// Both directions are running.
    Running,
    /// Exactly one direction has stopped.
    HalfClosed,
    /// Both directions have stopped; the endpoint can be reaped.
    Closed,
}

/// Per-direction stopped flags shared by an endpoint and its two threads.
#[derive(Debug, Default)]
pub struct Liveness {
    inbound_stopped: AtomicBool,
    outbound_stopped: AtomicBool,
}

impl Liveness {
    pub fn new() -> Self {
        Self::default()
    }

    fn flag(&self, direction: Direction) -> &AtomicBool {
        match direction {
            Direction::Inbound => &self.inbound_stopped,
            Direction::Outbound => &self.outbound_stopped,
        }
    }

    /// Mark `direction` stopped. Returns `false` if it already was.
    pub fn stop(&self, direction: Direction) -> bool {
        !self.flag(direction).swap(true, Ordering::AcqRel)
    }

    pub fn is_stopped(&self, direction: Direction) -> bool {
        self.flag(direction).load(Ordering::Acquire)
    }

    pub fn state(&self) -> LinkState {
        match (
            self.is_stopped(Direction::Inbound),
            self.is_stopped(Direction::Outbound),
        ) {
            (false, false) => LinkState::Running,
            (true, true) => LinkState::Closed,
            _ => LinkState::HalfClosed,
        }
    }

    /// True until both directions have stopped.
    pub fn is_alive(&self) -> bool {
        self.state() != LinkState::Closed
    }
}

/// Connection plus the hang-up signal fired by the first close.
struct Link {
    conn: Arc<dyn Connection>,
    peer: String,
    closed: AtomicBool,
    hangup: Mutex<Option<Sender<()>>>,
}

impl Link {
    fn new(conn: Arc<dyn Connection>) -> (Self, Receiver<()>) {
        let (hangup_tx, hangup_rx) = crossbeam_channel::bounded(0);
        let link = Self {
            peer: conn.peer(),
            conn,
            closed: AtomicBool::new(false),
            hangup: Mutex::new(Some(hangup_tx)),
        };
        (link, hangup_rx)
    }

    /// Close the connection once and wake anything waiting on the hang-up signal.
    fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.conn.close();
            self.hangup.lock().take();
        }
    }
}

/// Marks a direction stopped and closes the link when the direction's loop exits, including by
/// panic.
struct StopGuard<'a> {
    endpoint: u64,
    direction: Direction,
    link: &'a Link,
    liveness: &'a Liveness,
}

impl Drop for StopGuard<'_> {
    fn drop(&mut self) {
        self.link.close();
        self.liveness.stop(self.direction);
        debug!(
            endpoint = self.endpoint,
            peer = %self.link.peer,
            direction = ?self.direction,
            state = ?self.liveness.state(),
            "endpoint direction stopped"
        );
    }
}

/// The distributor's view of a connection: its queue, liveness, and connection handle.
pub struct Endpoint {
    id: u64,
    queue: Sender<Message>,
    backlog: Receiver<Message>,
    liveness: Arc<Liveness>,
    link: Arc<Link>,
}

impl Endpoint {
    /// Build an endpoint around `conn` with a queue of `capacity` messages.
    ///
    /// The returned [`Directions`] read frames into buffers from `pool` and submit them on
    /// `messages`; nothing runs until they are spawned.
    pub fn new(
        id: u64,
        conn: Arc<dyn Connection>,
        capacity: usize,
        pool: BufferPool,
        messages: Sender<Message>,
    ) -> (Self, Directions) {
        let (queue, backlog) = crossbeam_channel::bounded(capacity);
        let (link, hangup) = Link::new(conn);
        let link = Arc::new(link);
        let liveness = Arc::new(Liveness::new());

        let directions = Directions {
            inbound: Inbound {
                id,
                link: Arc::clone(&link),
                liveness: Arc::clone(&liveness),
                pool,
                messages,
            },
            outbound: Outbound {
                id,
                link: Arc::clone(&link),
                liveness: Arc::clone(&liveness),
                queue: backlog.clone(),
                hangup,
            },
        };
        let endpoint = Self {
            id,
            queue,
            backlog,
            liveness,
            link,
        };
        (endpoint, directions)
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn peer(&self) -> &str {
        &self.link.peer
    }

    pub fn state(&self) -> LinkState {
        self.liveness.state()
    }

    pub fn is_alive(&self) -> bool {
        self.liveness.is_alive()
    }

    /// Messages waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }

    /// Enqueue a new owner of `message` without blocking.
    ///
    /// Returns `false` when the queue is full; the extra owner is released immediately.
    pub fn offer(&self, message: &Message) -> bool {
        match self.queue.try_send(Shared::clone(message)) {
            Ok(()) => true,
            Err(TrySendError::Full(rejected) | TrySendError::Disconnected(rejected)) => {
                trace!(endpoint = self.id, "endpoint queue full, message dropped");
                drop(rejected);
                false
            }
        }
    }

    /// Close the connection; both directions wind down on their own.
    pub fn close(&self) {
        self.link.close();
    }

    /// Close the connection and queue, releasing every message still queued.
    ///
    /// Returns how many messages were released.
    pub fn retire(self) -> usize {
        self.link.close();
        let Endpoint { queue, backlog, .. } = self;
        drop(queue);
        backlog.try_iter().count()
    }
}

impl std::fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Endpoint")
            .field("id", &self.id)
            .field("peer", &self.link.peer)
            .field("state", &self.state())
            .field("queued", &self.queued())
            .finish()
    }
}

/// Both halves of an endpoint, ready to be run.
pub struct Directions {
    pub inbound: Inbound,
    pub outbound: Outbound,
}

impl Directions {
    /// Run each direction on its own named thread.
    ///
    /// If the inbound thread cannot be started its direction is marked stopped and the
    /// connection closed, so the endpoint still converges to dead.
    pub fn spawn(self) -> io::Result<()> {
        let Directions { inbound, outbound } = self;
        let id = inbound.id;

        let link = Arc::clone(&inbound.link);
        let liveness = Arc::clone(&inbound.liveness);
        thread::Builder::new()
            .name(format!("endpoint-{id}-out"))
            .spawn(move || outbound.run())
            .and_then(|_| {
                thread::Builder::new()
                    .name(format!("endpoint-{id}-in"))
                    .spawn(move || inbound.run())
            })
            .map(|_| ())
            .map_err(|err| {
                link.close();
                liveness.stop(Direction::Inbound);
                liveness.stop(Direction::Outbound);
                err
            })
    }
}

/// Reads frames from the network and submits them to the distributor.
pub struct Inbound {
    id: u64,
    link: Arc<Link>,
    liveness: Arc<Liveness>,
    pool: BufferPool,
    messages: Sender<Message>,
}

impl Inbound {
    /// Loop until the connection fails, a frame is malformed, or the distributor is gone.
    pub fn run(self) {
        let _guard = StopGuard {
            endpoint: self.id,
            direction: Direction::Inbound,
            link: &self.link,
            liveness: &self.liveness,
        };
        let conn = &*self.link.conn;

        loop {
            let header = match read_frame_header(conn) {
                Ok(header) => header,
                Err(err) => {
                    debug!(endpoint = self.id, peer = %self.link.peer, error = %err, "recv failure");
                    return;
                }
            };

            let mut lease = self.pool.acquire();
            if let Err(err) = read_frame_body(conn, header, &mut lease) {
                debug!(endpoint = self.id, peer = %self.link.peer, error = %err, "recv failure");
                return;
            }

            let message: Shared<LineBuffer> = lease.freeze();
            trace!(endpoint = self.id, len = message.len(), "frame received");
            if self.messages.send(message).is_err() {
                debug!(endpoint = self.id, "distributor stopped, ending inbound direction");
                return;
            }
        }
    }
}

/// Drains the endpoint's queue onto the network.
pub struct Outbound {
    id: u64,
    link: Arc<Link>,
    liveness: Arc<Liveness>,
    queue: Receiver<Message>,
    hangup: Receiver<()>,
}

impl Outbound {
    /// Loop until a write fails, the queue is closed, or the connection is closed.
    pub fn run(self) {
        let _guard = StopGuard {
            endpoint: self.id,
            direction: Direction::Outbound,
            link: &self.link,
            liveness: &self.liveness,
        };

        loop {
            select! {
                recv(self.queue) -> message => {
                    let Ok(message) = message else {
                        return;
                    };
                    let written = self.link.conn.write_all(message.as_bytes());
                    drop(message);
                    if let Err(err) = written {
                        debug!(endpoint = self.id, peer = %self.link.peer, error = %err, "send failure");
                        return;
                    }
                }
                recv(self.hangup) -> _ => return,
            }
        }
    }
}
