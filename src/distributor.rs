//! The single thread that owns the live endpoint set.
//!
//! Registration, fan-out and reaping all happen here, so an offer never races with the removal
//! of the endpoint it targets. The loop multiplexes four sources with `select!`:
//!
//! - newly accepted endpoints,
//! - messages submitted by inbound directions,
//! - the reap ticker,
//! - the shutdown signal.
//!
//! Fan-out never blocks: a full endpoint queue simply misses the message.

use crate::endpoint::Endpoint;
use crate::line::{BufferPool, Message};
use crate::metrics::RelayMetrics;
use crate::reaper::{self, ReapReport};
use crossbeam_channel::{never, select, tick, Receiver};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, trace};

/// Result of fanning out one message.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Delivery {
    /// Endpoints whose queue accepted the message.
    pub delivered: usize,
    /// Endpoints whose queue was full.
    pub dropped: usize,
}

/// Channels feeding the distributor loop.
pub struct DistributorChannels {
    pub registrations: Receiver<Endpoint>,
    pub messages: Receiver<Message>,
    pub shutdown: Receiver<()>,
}

/// Owner of the live endpoint set.
pub struct Distributor {
    endpoints: Vec<Endpoint>,
    pool: BufferPool,
    metrics: Arc<RelayMetrics>,
}

impl Distributor {
    pub fn new(pool: BufferPool, metrics: Arc<RelayMetrics>) -> Self {
        Self {
            endpoints: Vec::new(),
            pool,
            metrics,
        }
    }

    /// Number of endpoints in the live set, dead ones not yet reaped included.
    pub fn live(&self) -> usize {
        self.endpoints.len()
    }

    /// Add an endpoint to the live set.
    pub fn register(&mut self, endpoint: Endpoint) {
        debug!(endpoint = endpoint.id(), peer = endpoint.peer(), "endpoint registered");
        self.endpoints.push(endpoint);
        self.metrics.record_register(self.endpoints.len());
    }

    /// Offer `message` to every endpoint, the sender's own included, then drop the producer's
    /// handle.
    ///
    /// Afterwards the message is owned exactly by the queues that accepted it.
    pub fn distribute(&mut self, message: Message) -> Delivery {
        let mut delivery = Delivery::default();
        for endpoint in &self.endpoints {
            if endpoint.offer(&message) {
                delivery.delivered += 1;
            } else {
                delivery.dropped += 1;
            }
        }
        trace!(
            len = message.len(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "message distributed"
        );
        drop(message);
        self.metrics
            .record_distribution(delivery.delivered, delivery.dropped);
        delivery
    }

    /// Remove dead endpoints and log pool diagnostics.
    pub fn reap(&mut self) -> ReapReport {
        let report = reaper::sweep(&mut self.endpoints);
        self.record(&report);
        report
    }

    fn record(&self, report: &ReapReport) {
        self.metrics
            .record_reap(report.reaped, report.reclaimed, report.live);
        let stats = self.pool.stats();
        info!(
            reaped = report.reaped,
            live = report.live,
            allocated = stats.allocated,
            returned = stats.returned,
            in_flight = stats.in_flight(),
            "reap sweep"
        );
        debug!(metrics = %self.metrics.snapshot().to_json(), "relay counters");
    }

    /// Run until shutdown is signalled or every producer of registrations and messages is gone.
    ///
    /// On exit every endpoint, live or dead, is retired and its queue released.
    pub fn run(mut self, channels: DistributorChannels, reap_interval: Duration) -> ReapReport {
        let DistributorChannels {
            registrations,
            messages,
            shutdown,
        } = channels;
        let ticker = tick(reap_interval);
        let no_registrations = never();
        let no_messages = never();
        let mut registrations_open = true;
        let mut messages_open = true;

        info!(interval_ms = reap_interval.as_millis() as u64, "distributor started");
        while registrations_open || messages_open {
            let pending_registrations = if registrations_open {
                &registrations
            } else {
                &no_registrations
            };
            let pending_messages = if messages_open {
                &messages
            } else {
                &no_messages
            };
            select! {
                recv(pending_registrations) -> endpoint => match endpoint {
                    Ok(endpoint) => self.register(endpoint),
                    Err(_) => registrations_open = false,
                },
                recv(pending_messages) -> message => match message {
                    Ok(message) => {
                        self.distribute(message);
                    }
                    Err(_) => messages_open = false,
                },
                recv(ticker) -> _ => {
                    self.reap();
                }
                recv(shutdown) -> _ => break,
            }
        }

        let report = reaper::retire_all(&mut self.endpoints);
        self.record(&report);
        info!(
            retired = report.reaped,
            released = report.reclaimed,
            "distributor stopped"
        );
        report
    }
}
