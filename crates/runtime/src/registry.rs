//! Request lifecycle registry
//!
//! This module owns the mapping from request id to pending-completion state
//! and is the sole source of truth for "is this request still active".
//! Every lookup, state transition, and removal happens in a single critical
//! section so dispatch, completion, and abort are linearizable per id.

use crate::stream::{CompletionSink, StreamEvent};
use inflight_common::config::RegistryConfig;
use inflight_common::error::{InflightError, Result};
use inflight_common::metrics::METRICS;
use inflight_protocol::{FinishReason, Usage};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, trace};

/// Request identifier
pub type RequestId = String;

/// Lifecycle state of one request
///
/// `Pending -> Streaming -> Completed` on the normal path;
/// `Pending|Streaming -> Aborted` on cancellation. Terminal states are
/// final and their entries are removed immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Registered, no chunk delivered yet
    Pending,

    /// At least one chunk delivered
    Streaming,

    /// Finished normally
    Completed,

    /// Cancelled by the caller or by teardown
    Aborted,
}

impl RequestState {
    /// True for states no transition leaves
    pub fn is_terminal(self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Aborted)
    }
}

/// A single in-flight request
struct RequestEntry {
    /// Where this request's events are delivered
    sink: CompletionSink,

    /// Current lifecycle state
    state: RequestState,

    /// Submission time, for the duration histogram
    submitted_at: Instant,
}

/// Registry of in-flight requests
///
/// Entries are created on submission, mutated on each streamed chunk, and
/// removed upon reaching a terminal state. Memory is bounded by the number
/// of concurrently in-flight requests.
///
/// Sink sends are non-blocking unbounded-channel handoffs, so they are
/// issued inside the critical section; this preserves per-id event order
/// and guarantees exactly one terminal event per request.
pub struct RequestRegistry {
    /// Active requests
    entries: Mutex<HashMap<RequestId, RequestEntry>>,

    /// Maximum number of concurrently in-flight requests
    max_in_flight: usize,
}

impl RequestRegistry {
    /// Create a new registry
    pub fn new(config: RegistryConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_in_flight: config.max_in_flight,
        }
    }

    /// Register a new request under `id`
    ///
    /// Fails with `DuplicateId` if `id` is still active, and with
    /// `Overloaded` when the in-flight bound is reached. The existing
    /// entry is left untouched in both cases.
    pub fn register(&self, id: impl Into<RequestId>, sink: CompletionSink) -> Result<()> {
        let id = id.into();
        let mut entries = self.entries.lock();

        if entries.contains_key(&id) {
            METRICS.request.duplicate_ids_total.inc();
            return Err(InflightError::duplicate_id(id));
        }

        if entries.len() >= self.max_in_flight {
            return Err(InflightError::overloaded(format!(
                "{} requests already in flight",
                entries.len()
            )));
        }

        entries.insert(
            id.clone(),
            RequestEntry {
                sink,
                state: RequestState::Pending,
                submitted_at: Instant::now(),
            },
        );
        METRICS.request.active_requests.inc();

        trace!("Registered request {}, {} in flight", id, entries.len());
        Ok(())
    }

    /// Forward a content delta to the request's sink
    ///
    /// Returns `UnknownId` if the id is absent or already terminal; the
    /// chunk is dropped. That path is benign (a late delivery after abort
    /// or completion) and is observable through the stale-chunk counter
    /// kept by the caller.
    pub fn dispatch(&self, id: &str, delta: String) -> Result<()> {
        let mut entries = self.entries.lock();

        let entry = entries
            .get_mut(id)
            .ok_or_else(|| InflightError::unknown_id(id))?;

        entry.state = RequestState::Streaming;
        // Receiver may be gone if the caller dropped its handle
        let _ = entry.sink.send(StreamEvent::Chunk(delta));
        METRICS.dispatch.chunks_total.inc();

        Ok(())
    }

    /// Complete a request: deliver the terminal `Done` event and remove it
    pub fn complete(
        &self,
        id: &str,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    ) -> Result<()> {
        let mut entries = self.entries.lock();

        let entry = entries
            .remove(id)
            .ok_or_else(|| InflightError::unknown_id(id))?;

        let _ = entry.sink.send(StreamEvent::Done {
            finish_reason,
            usage,
        });

        METRICS.request.active_requests.dec();
        METRICS.request.completions_total.inc();
        METRICS
            .request
            .request_duration
            .observe(entry.submitted_at.elapsed().as_secs_f64());

        debug!("Completed request {} ({:?})", id, finish_reason);
        Ok(())
    }

    /// Fail a request terminally: deliver the `Error` event and remove it
    pub fn fail(&self, id: &str, message: impl Into<String>) -> Result<()> {
        let mut entries = self.entries.lock();

        let entry = entries
            .remove(id)
            .ok_or_else(|| InflightError::unknown_id(id))?;

        let _ = entry.sink.send(StreamEvent::Error(message.into()));

        METRICS.request.active_requests.dec();
        METRICS.request.failures_total.inc();

        debug!("Failed request {}", id);
        Ok(())
    }

    /// Abort a request: deliver the terminal `Aborted` event and remove it
    ///
    /// Once this returns, any later `dispatch` for the id yields
    /// `UnknownId` and no chunk reaches the sink.
    pub fn abort(&self, id: &str) -> Result<()> {
        let mut entries = self.entries.lock();

        let entry = entries
            .remove(id)
            .ok_or_else(|| InflightError::unknown_id(id))?;

        let _ = entry.sink.send(StreamEvent::Aborted);

        METRICS.request.active_requests.dec();
        METRICS.request.aborts_total.inc();

        debug!("Aborted request {}", id);
        Ok(())
    }

    /// Abort every in-flight request, returning the drained ids
    ///
    /// Teardown path: `reset`/`unload` call this before touching the
    /// engine so no callback dangles into a torn-down engine.
    pub fn abort_all(&self) -> Vec<RequestId> {
        let mut entries = self.entries.lock();

        let drained: Vec<(RequestId, RequestEntry)> = entries.drain().collect();
        let mut ids = Vec::with_capacity(drained.len());

        for (id, entry) in drained {
            let _ = entry.sink.send(StreamEvent::Aborted);
            METRICS.request.active_requests.dec();
            METRICS.request.aborts_total.inc();
            ids.push(id);
        }

        if !ids.is_empty() {
            debug!("Aborted {} in-flight requests", ids.len());
        }
        ids
    }

    /// Remove an entry without delivering any event
    ///
    /// Rollback path for submissions the engine rejected: the caller gets
    /// the error directly, so the sink must stay silent.
    pub(crate) fn evict(&self, id: &str) -> bool {
        let removed = self.entries.lock().remove(id).is_some();
        if removed {
            METRICS.request.active_requests.dec();
        }
        removed
    }

    /// Current lifecycle state of a request, if active
    pub fn state(&self, id: &str) -> Option<RequestState> {
        self.entries.lock().get(id).map(|e| e.state)
    }

    /// Number of in-flight requests
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Check whether no requests are in flight
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
