//! Per-request streaming channel
//!
//! The caller-facing view of one in-flight request: a channel of stream
//! events ending in exactly one terminal event. Delivery-thread identity is
//! decoupled from registry locking; the channel is the handoff point.

use inflight_protocol::{FinishReason, Usage};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// One event on a request's stream
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// A partial content delta
    Chunk(String),

    /// Normal completion; nothing follows
    Done {
        finish_reason: FinishReason,
        usage: Option<Usage>,
    },

    /// The request was aborted; nothing follows
    Aborted,

    /// The request failed terminally; nothing follows
    Error(String),
}

impl StreamEvent {
    /// True for events that end the stream
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Chunk(_))
    }
}

/// Sending half of a request's stream, held by the registry
pub type CompletionSink = mpsc::UnboundedSender<StreamEvent>;

/// Caller-facing handle to an in-flight chat completion
#[derive(Debug)]
pub struct ChatHandle {
    /// Identifier usable to abort the request
    pub request_id: String,

    events: mpsc::UnboundedReceiver<StreamEvent>,
}

impl ChatHandle {
    pub(crate) fn new(request_id: String, events: mpsc::UnboundedReceiver<StreamEvent>) -> Self {
        Self { request_id, events }
    }

    /// Receive the next stream event
    ///
    /// Returns `None` once the stream is exhausted, which only happens
    /// after a terminal event (or if the request was rolled back before
    /// any event was delivered).
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    /// Convert the handle into a `Stream` of events
    pub fn into_stream(self) -> UnboundedReceiverStream<StreamEvent> {
        UnboundedReceiverStream::new(self.events)
    }
}

/// Final result of a non-streaming chat completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// Accumulated response text
    pub text: String,

    /// Why generation stopped
    pub finish_reason: FinishReason,

    /// Usage reported by the engine, when available
    pub usage: Option<Usage>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_events() {
        assert!(!StreamEvent::Chunk("hi".to_string()).is_terminal());
        assert!(StreamEvent::Aborted.is_terminal());
        assert!(StreamEvent::Error("boom".to_string()).is_terminal());
        assert!(StreamEvent::Done {
            finish_reason: FinishReason::Stop,
            usage: None,
        }
        .is_terminal());
    }
}
