//! Deterministic replay engine
//!
//! A scripted stand-in for the real inference engine. It replays a fixed
//! chunk sequence for every submitted request, delivering results through
//! the subscribed callback from a worker thread the caller does not
//! control, the same delivery model the real engine has. Used by tests
//! and the demo binary.

use crate::EngineCallback;
use inflight_common::{InflightError, Result};
use inflight_protocol::{
    CompletionChunk, CompletionRequest, FinishReason, StreamChoice, StreamDelta, Usage,
};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

/// Script replayed for every submitted request
#[derive(Debug, Clone)]
pub struct ReplayScript {
    /// Content deltas emitted in order
    pub deltas: Vec<String>,

    /// Finish reason on the final chunk
    pub finish_reason: FinishReason,

    /// Usage block attached to the final chunk
    pub usage: Option<Usage>,

    /// Delay before each emitted chunk
    pub chunk_delay: Duration,

    /// Number of chunks still delivered after a cancel is observed
    ///
    /// Models the real engine's cooperative cancellation: chunks already in
    /// flight keep arriving for a while before the abort chunk lands.
    pub cancel_lag: usize,
}

impl Default for ReplayScript {
    fn default() -> Self {
        Self {
            deltas: Vec::new(),
            finish_reason: FinishReason::Stop,
            usage: None,
            chunk_delay: Duration::ZERO,
            cancel_lag: 0,
        }
    }
}

impl ReplayScript {
    /// Script that streams the given text deltas and finishes normally
    pub fn text<I, S>(deltas: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            deltas: deltas.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Attach a usage block to the final chunk
    pub fn with_usage(mut self, usage: Usage) -> Self {
        self.usage = Some(usage);
        self
    }

    /// Delay each chunk by the given duration
    pub fn with_chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    /// Keep delivering this many chunks after a cancel is observed
    pub fn with_cancel_lag(mut self, lag: usize) -> Self {
        self.cancel_lag = lag;
        self
    }
}

/// Scripted engine that replays chunk sequences deterministically
pub struct ReplayEngine {
    /// Script applied to every submission
    script: Mutex<ReplayScript>,

    /// Shared stream callback installed by the runtime
    callback: Mutex<Option<EngineCallback>>,

    /// Whether a model is currently loaded
    loaded: AtomicBool,

    /// Loaded model path and library descriptor
    loaded_model: Mutex<Option<(PathBuf, String)>>,

    /// Request ids a cancel was issued for
    cancelled: Arc<Mutex<HashSet<String>>>,

    /// Number of accepted submissions
    submissions: AtomicUsize,
}

impl ReplayEngine {
    /// Create a replay engine with the given script
    pub fn new(script: ReplayScript) -> Self {
        Self {
            script: Mutex::new(script),
            callback: Mutex::new(None),
            loaded: AtomicBool::new(false),
            loaded_model: Mutex::new(None),
            cancelled: Arc::new(Mutex::new(HashSet::new())),
            submissions: AtomicUsize::new(0),
        }
    }

    /// Replace the script for subsequent submissions
    pub fn set_script(&self, script: ReplayScript) {
        *self.script.lock() = script;
    }

    /// Number of submissions accepted so far
    pub fn submissions(&self) -> usize {
        self.submissions.load(Ordering::Relaxed)
    }

    /// Whether a cancel was issued for the given request id
    pub fn was_cancelled(&self, request_id: &str) -> bool {
        self.cancelled.lock().contains(request_id)
    }

    /// Currently loaded model path and library, if any
    pub fn loaded_model(&self) -> Option<(PathBuf, String)> {
        self.loaded_model.lock().clone()
    }

    fn emit(callback: &EngineCallback, chunk: &CompletionChunk) {
        // Chunk construction is infallible to serialize
        let payload = serde_json::to_string(chunk).expect("serialize replay chunk");
        callback.as_ref()(&payload);
    }

    fn delta_chunk(request_id: &str, content: &str) -> CompletionChunk {
        CompletionChunk {
            id: request_id.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta {
                    content: Some(content.to_string()),
                },
                finish_reason: None,
            }],
            usage: None,
            error: None,
        }
    }

    fn final_chunk(
        request_id: &str,
        finish_reason: FinishReason,
        usage: Option<Usage>,
    ) -> CompletionChunk {
        CompletionChunk {
            id: request_id.to_string(),
            choices: vec![StreamChoice {
                index: 0,
                delta: StreamDelta::default(),
                finish_reason: Some(finish_reason),
            }],
            usage,
            error: None,
        }
    }
}

impl crate::Engine for ReplayEngine {
    fn load_model(&self, model_path: &Path, model_lib: &str) -> Result<()> {
        *self.loaded_model.lock() = Some((model_path.to_path_buf(), model_lib.to_string()));
        self.loaded.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn subscribe(&self, callback: EngineCallback) {
        *self.callback.lock() = Some(callback);
    }

    fn submit(&self, payload: &str) -> Result<()> {
        if !self.loaded.load(Ordering::SeqCst) {
            return Err(InflightError::engine_unavailable("no model loaded"));
        }

        let request: CompletionRequest = serde_json::from_str(payload)
            .map_err(|e| InflightError::malformed_payload(format!("bad request payload: {}", e)))?;

        let Some(callback) = self.callback.lock().clone() else {
            warn!("Replay engine has no subscriber, dropping request {}", request.request_id);
            return Ok(());
        };

        self.submissions.fetch_add(1, Ordering::Relaxed);

        let script = self.script.lock().clone();
        let cancelled = Arc::clone(&self.cancelled);
        let request_id = request.request_id;

        std::thread::spawn(move || {
            let is_cancelled = |id: &str| cancelled.lock().contains(id);
            let mut lag_left: Option<usize> = None;

            for delta in &script.deltas {
                if !script.chunk_delay.is_zero() {
                    std::thread::sleep(script.chunk_delay);
                }

                if lag_left.is_none() && is_cancelled(&request_id) {
                    lag_left = Some(script.cancel_lag);
                }

                if let Some(n) = lag_left {
                    if n == 0 {
                        Self::emit(
                            &callback,
                            &Self::final_chunk(&request_id, FinishReason::Abort, None),
                        );
                        return;
                    }
                    lag_left = Some(n - 1);
                }

                Self::emit(&callback, &Self::delta_chunk(&request_id, delta));
            }

            if !script.chunk_delay.is_zero() {
                std::thread::sleep(script.chunk_delay);
            }

            if is_cancelled(&request_id) {
                Self::emit(
                    &callback,
                    &Self::final_chunk(&request_id, FinishReason::Abort, None),
                );
            } else {
                Self::emit(
                    &callback,
                    &Self::final_chunk(&request_id, script.finish_reason, script.usage.clone()),
                );
            }
        });

        Ok(())
    }

    fn cancel(&self, request_id: &str) {
        self.cancelled.lock().insert(request_id.to_string());
    }

    fn reset(&self) -> Result<()> {
        Ok(())
    }

    fn unload(&self) -> Result<()> {
        self.loaded.store(false, Ordering::SeqCst);
        *self.loaded_model.lock() = None;
        Ok(())
    }
}
