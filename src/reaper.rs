//! Removal of dead endpoints from the live set.

use crate::endpoint::Endpoint;
use tracing::debug;

/// Outcome of one sweep over the live set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Endpoints removed because both directions had stopped.
    pub reaped: usize,
    /// Queued messages released while removing them.
    pub reclaimed: usize,
    /// Endpoints left in the live set.
    pub live: usize,
}

/// Remove every dead endpoint from `endpoints`, releasing whatever its queue still held.
///
/// Surviving endpoints keep their relative order.
pub fn sweep(endpoints: &mut Vec<Endpoint>) -> ReapReport {
    let (live, dead): (Vec<Endpoint>, Vec<Endpoint>) =
        std::mem::take(endpoints).into_iter().partition(Endpoint::is_alive);
    *endpoints = live;

    let mut report = ReapReport {
        reaped: dead.len(),
        reclaimed: 0,
        live: endpoints.len(),
    };
    for endpoint in dead {
        let id = endpoint.id();
        let released = endpoint.retire();
        debug!(endpoint = id, released, "endpoint reaped");
        report.reclaimed += released;
    }
    report
}

/// Retire every endpoint, live or not. Used when the relay shuts down.
pub fn retire_all(endpoints: &mut Vec<Endpoint>) -> ReapReport {
    let reaped = endpoints.len();
    let reclaimed = endpoints.drain(..).map(Endpoint::retire).sum();
    ReapReport {
        reaped,
        reclaimed,
        live: 0,
    }
}
