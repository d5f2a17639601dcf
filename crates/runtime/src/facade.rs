//! Engine facade
//!
//! The only component that talks to the external inference engine. It
//! translates chat-completion calls into engine payloads, registers them,
//! routes the engine's streamed results back to the correct caller, and
//! relays cancellation. The engine invokes the shared stream callback from
//! a thread the runtime does not control; everything that crosses that
//! boundary goes through `on_engine_chunk`, which never panics and never
//! propagates errors back into the engine.

use crate::registry::RequestRegistry;
use crate::stream::{ChatHandle, Completion, StreamEvent};
use inflight_common::config::RuntimeConfig;
use inflight_common::error::{InflightError, Result};
use inflight_common::metrics::METRICS;
use inflight_engine::Engine;
use inflight_protocol::{
    ChatMessage, CompletionChunk, CompletionRequest, FinishReason, GenerationSettings,
    StreamOptions,
};
use std::path::Path;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Facade over the external inference engine
///
/// Holds the request registry (1:1, lifetime-bound) and the engine handle.
/// Construction installs the shared stream callback; the facade is the
/// engine's single subscriber.
pub struct EngineFacade {
    /// External engine capability
    engine: Arc<dyn Engine>,

    /// In-flight request bookkeeping
    registry: RequestRegistry,
}

impl EngineFacade {
    /// Create a facade and subscribe it to the engine's stream callback
    pub fn new(engine: Arc<dyn Engine>, config: &RuntimeConfig) -> Arc<Self> {
        let facade = Arc::new(Self {
            engine: Arc::clone(&engine),
            registry: RequestRegistry::new(config.registry.clone()),
        });

        // The engine outlives nothing here: a weak reference keeps the
        // callback from cycling engine -> callback -> facade -> engine.
        let weak = Arc::downgrade(&facade);
        engine.subscribe(Arc::new(move |raw: &str| {
            if let Some(facade) = weak.upgrade() {
                facade.on_engine_chunk(raw);
            }
        }));

        facade
    }

    /// Submit a chat completion and return a streaming handle
    ///
    /// `request_id` may be caller-supplied; otherwise one is generated.
    /// The id is registered before the engine is touched, so a duplicate
    /// fails without any engine call. If the engine rejects the submission
    /// the registry entry is rolled back and the error is returned
    /// directly; the handle's sink stays silent.
    pub fn submit_chat_completion(
        &self,
        messages: Vec<ChatMessage>,
        settings: GenerationSettings,
        request_id: Option<String>,
    ) -> Result<ChatHandle> {
        if messages.is_empty() {
            return Err(InflightError::invalid_input("messages must not be empty"));
        }

        let id = match request_id {
            Some(id) if id.is_empty() => {
                return Err(InflightError::invalid_input("request id must not be empty"));
            }
            Some(id) => id,
            None => Uuid::new_v4().to_string(),
        };

        let (tx, rx) = mpsc::unbounded_channel();
        self.registry.register(id.clone(), tx)?;
        METRICS.request.submissions_total.inc();

        let request = CompletionRequest {
            request_id: id.clone(),
            messages,
            settings,
            stream: true,
            stream_options: Some(StreamOptions {
                include_usage: true,
            }),
        };
        let payload = serde_json::to_string(&request)?;

        if let Err(e) = self.engine.submit(&payload) {
            self.registry.evict(&id);
            warn!("Engine rejected request {}: {}", id, e);
            return Err(e);
        }

        debug!("Submitted request {}", id);
        Ok(ChatHandle::new(id, rx))
    }

    /// Handle one raw result payload from the engine callback
    ///
    /// Runs on whatever thread the engine delivers from. Malformed
    /// payloads are dropped with a diagnostic; chunks for unknown or
    /// already-terminal ids are benign races and are dropped the same way.
    pub fn on_engine_chunk(&self, raw: &str) {
        let mut chunk: CompletionChunk = match serde_json::from_str(raw) {
            Ok(chunk) => chunk,
            Err(e) => {
                METRICS.dispatch.malformed_payloads_total.inc();
                warn!("Dropping malformed engine payload: {}", e);
                return;
            }
        };

        if let Some(message) = chunk.error.take() {
            if let Err(e) = self.registry.fail(&chunk.id, message) {
                self.note_stale(&chunk.id, &e);
            }
            return;
        }

        let content = chunk.content();
        if !content.is_empty() {
            if let Err(e) = self.registry.dispatch(&chunk.id, content) {
                self.note_stale(&chunk.id, &e);
                return;
            }
        }

        if let Some(finish_reason) = chunk.finish_reason() {
            if let Err(e) = self.registry.complete(&chunk.id, finish_reason, chunk.usage) {
                self.note_stale(&chunk.id, &e);
            }
        }
    }

    fn note_stale(&self, id: &str, error: &InflightError) {
        if error.is_benign() {
            METRICS.dispatch.stale_chunks_total.inc();
            debug!("Dropping stale chunk for request {}", id);
        } else {
            warn!("Failed to route chunk for request {}: {}", id, error);
        }
    }

    /// Abort an in-flight request
    ///
    /// Registry bookkeeping commits first (deterministic), then the engine
    /// is told to cancel (cooperative, best-effort). Chunks still in
    /// flight afterwards are dropped as stale, not surfaced as errors.
    pub fn abort(&self, request_id: &str) -> Result<()> {
        self.registry.abort(request_id)?;
        self.engine.cancel(request_id);
        info!("Abort issued for request {}", request_id);
        Ok(())
    }

    /// Run a chat completion to the end and return the folded result
    pub async fn generate(
        &self,
        messages: Vec<ChatMessage>,
        settings: GenerationSettings,
    ) -> Result<Completion> {
        let mut handle = self.submit_chat_completion(messages, settings, None)?;
        let mut text = String::new();

        while let Some(event) = handle.next_event().await {
            match event {
                StreamEvent::Chunk(delta) => text.push_str(&delta),
                StreamEvent::Done {
                    finish_reason,
                    usage,
                } => {
                    return Ok(Completion {
                        text,
                        finish_reason,
                        usage,
                    })
                }
                StreamEvent::Aborted => {
                    return Ok(Completion {
                        text,
                        finish_reason: FinishReason::Abort,
                        usage: None,
                    })
                }
                StreamEvent::Error(message) => {
                    return Err(InflightError::internal(format!(
                        "generation failed: {}",
                        message
                    )))
                }
            }
        }

        Err(InflightError::internal(
            "stream ended without a terminal event",
        ))
    }

    /// Load model weights and the matching engine library
    ///
    /// Any in-flight requests are aborted first; their callbacks must not
    /// land in an engine that is reloading.
    pub fn load_model(&self, model_path: &Path, model_lib: &str) -> Result<()> {
        self.drain_in_flight();
        info!(
            "Loading model from {} (lib {})",
            model_path.display(),
            model_lib
        );
        self.engine.load_model(model_path, model_lib)
    }

    /// Reset engine chat state, aborting all in-flight requests first
    pub fn reset(&self) -> Result<()> {
        self.drain_in_flight();
        self.engine.reset()
    }

    /// Tear down the loaded model, aborting all in-flight requests first
    pub fn unload(&self) -> Result<()> {
        self.drain_in_flight();
        info!("Unloading model");
        self.engine.unload()
    }

    /// Number of requests currently in flight
    pub fn in_flight(&self) -> usize {
        self.registry.len()
    }

    fn drain_in_flight(&self) {
        let drained = self.registry.abort_all();
        for id in &drained {
            self.engine.cancel(id);
        }
        if !drained.is_empty() {
            warn!("Aborted {} in-flight requests during teardown", drained.len());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use inflight_engine::{ReplayEngine, ReplayScript};
    use inflight_protocol::Usage;
    use std::time::Duration;

    fn usage(prompt: u32, completion: u32) -> Usage {
        Usage {
            prompt_tokens: prompt,
            completion_tokens: completion,
            total_tokens: prompt + completion,
            extra: None,
        }
    }

    fn loaded_engine(script: ReplayScript) -> Arc<ReplayEngine> {
        let engine = Arc::new(ReplayEngine::new(script));
        engine
            .load_model(Path::new("/models/test"), "test-lib")
            .unwrap();
        engine
    }

    async fn collect(handle: &mut ChatHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn test_streamed_completion() {
        let engine = loaded_engine(
            ReplayScript::text(["hello", " world"]).with_usage(usage(4, 2)),
        );
        let facade = EngineFacade::new(engine.clone(), &RuntimeConfig::default());

        let mut handle = facade
            .submit_chat_completion(
                vec![ChatMessage::user("greet me")],
                GenerationSettings::default(),
                Some("r1".to_string()),
            )
            .unwrap();
        assert_eq!(handle.request_id, "r1");

        let events = collect(&mut handle).await;
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], StreamEvent::Chunk("hello".to_string()));
        assert_eq!(events[1], StreamEvent::Chunk(" world".to_string()));
        assert_eq!(
            events[2],
            StreamEvent::Done {
                finish_reason: FinishReason::Stop,
                usage: Some(usage(4, 2)),
            }
        );

        assert_eq!(facade.in_flight(), 0);
        assert_eq!(engine.submissions(), 1);
    }

    #[tokio::test]
    async fn test_duplicate_id_fails_before_engine_call() {
        let engine = loaded_engine(
            ReplayScript::text(["slow"]).with_chunk_delay(Duration::from_millis(100)),
        );
        let facade = EngineFacade::new(engine.clone(), &RuntimeConfig::default());

        let _handle = facade
            .submit_chat_completion(
                vec![ChatMessage::user("one")],
                GenerationSettings::default(),
                Some("r1".to_string()),
            )
            .unwrap();

        let second = facade.submit_chat_completion(
            vec![ChatMessage::user("two")],
            GenerationSettings::default(),
            Some("r1".to_string()),
        );

        assert!(matches!(second, Err(InflightError::DuplicateId(_))));
        // The duplicate never reached the engine
        assert_eq!(engine.submissions(), 1);
    }

    #[tokio::test]
    async fn test_abort_suppresses_lagging_chunks() {
        let engine = loaded_engine(
            ReplayScript::text(["a", "b", "c", "d", "e"])
                .with_chunk_delay(Duration::from_millis(10))
                .with_cancel_lag(2),
        );
        let facade = EngineFacade::new(engine.clone(), &RuntimeConfig::default());

        let mut handle = facade
            .submit_chat_completion(
                vec![ChatMessage::user("stream")],
                GenerationSettings::default(),
                Some("r1".to_string()),
            )
            .unwrap();

        facade.abort("r1").unwrap();
        assert!(engine.was_cancelled("r1"));

        let events = collect(&mut handle).await;
        // Whatever was delivered before the abort, the stream ends with
        // exactly one Aborted and nothing after it
        let terminal_at = events.iter().position(|e| e.is_terminal()).unwrap();
        assert_eq!(events[terminal_at], StreamEvent::Aborted);
        assert_eq!(terminal_at, events.len() - 1);

        assert_eq!(facade.in_flight(), 0);

        // A second abort refers to an id that is already terminal
        let second = facade.abort("r1");
        assert!(matches!(second, Err(InflightError::UnknownId(_))));
    }

    #[tokio::test]
    async fn test_late_chunk_after_abort_is_dropped() {
        let engine = loaded_engine(ReplayScript::text([] as [&str; 0]));
        let facade = EngineFacade::new(engine, &RuntimeConfig::default());

        let (tx, mut rx) = mpsc::unbounded_channel();
        facade.registry.register("r2", tx).unwrap();
        facade.abort("r2").unwrap();

        // Simulate an engine chunk that was already in flight
        let late = serde_json::json!({
            "id": "r2",
            "choices": [{"index": 0, "delta": {"content": "late chunk"}}]
        });
        facade.on_engine_chunk(&late.to_string());

        assert_eq!(rx.recv().await, Some(StreamEvent::Aborted));
        assert_eq!(rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_malformed_payloads_never_panic() {
        let engine = loaded_engine(ReplayScript::default());
        let facade = EngineFacade::new(engine, &RuntimeConfig::default());

        facade.on_engine_chunk("not json at all");
        facade.on_engine_chunk("{\"choices\": []}"); // no id
        facade.on_engine_chunk("42");

        assert_eq!(facade.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_engine_error_rolls_back_registration() {
        // Engine with no model loaded rejects every submission
        let engine = Arc::new(ReplayEngine::new(ReplayScript::text(["x"])));
        let facade = EngineFacade::new(engine.clone(), &RuntimeConfig::default());

        let result = facade.submit_chat_completion(
            vec![ChatMessage::user("hi")],
            GenerationSettings::default(),
            Some("r1".to_string()),
        );

        assert!(matches!(result, Err(InflightError::EngineUnavailable(_))));
        assert_eq!(facade.in_flight(), 0);

        // The id is immediately reusable
        facade.load_model(Path::new("/models/test"), "test-lib").unwrap();
        let retry = facade.submit_chat_completion(
            vec![ChatMessage::user("hi")],
            GenerationSettings::default(),
            Some("r1".to_string()),
        );
        assert!(retry.is_ok());
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let engine = loaded_engine(ReplayScript::default());
        let facade = EngineFacade::new(engine.clone(), &RuntimeConfig::default());

        let result = facade.submit_chat_completion(
            Vec::new(),
            GenerationSettings::default(),
            None,
        );

        assert!(matches!(result, Err(InflightError::InvalidInput(_))));
        assert_eq!(engine.submissions(), 0);
    }

    #[tokio::test]
    async fn test_generate_folds_stream() {
        let engine = loaded_engine(
            ReplayScript::text(["The answer", " is 42."]).with_usage(usage(7, 5)),
        );
        let facade = EngineFacade::new(engine, &RuntimeConfig::default());

        let completion = facade
            .generate(
                vec![ChatMessage::user("what is the answer?")],
                GenerationSettings::default(),
            )
            .await
            .unwrap();

        assert_eq!(completion.text, "The answer is 42.");
        assert_eq!(completion.finish_reason, FinishReason::Stop);
        assert_eq!(completion.usage, Some(usage(7, 5)));
    }

    #[tokio::test]
    async fn test_unload_drains_in_flight_requests() {
        let engine = loaded_engine(
            ReplayScript::text(["a", "b", "c"]).with_chunk_delay(Duration::from_millis(50)),
        );
        let facade = EngineFacade::new(engine.clone(), &RuntimeConfig::default());

        let mut handles = Vec::new();
        for i in 0..3 {
            handles.push(
                facade
                    .submit_chat_completion(
                        vec![ChatMessage::user("go")],
                        GenerationSettings::default(),
                        Some(format!("r{}", i)),
                    )
                    .unwrap(),
            );
        }
        assert_eq!(facade.in_flight(), 3);

        facade.unload().unwrap();

        assert_eq!(facade.in_flight(), 0);
        for (i, handle) in handles.iter_mut().enumerate() {
            let events = collect(handle).await;
            assert_eq!(*events.last().unwrap(), StreamEvent::Aborted);
            assert!(engine.was_cancelled(&format!("r{}", i)));
        }

        // Engine torn down: new submissions fail cleanly
        let result = facade.submit_chat_completion(
            vec![ChatMessage::user("hi")],
            GenerationSettings::default(),
            None,
        );
        assert!(matches!(result, Err(InflightError::EngineUnavailable(_))));
    }

    #[tokio::test]
    async fn test_concurrent_streams_do_not_cross() {
        let engine = loaded_engine(
            ReplayScript::text(["alpha", "beta", "gamma"]).with_usage(usage(3, 3)),
        );
        let facade = EngineFacade::new(engine.clone(), &RuntimeConfig::default());

        let mut handles = Vec::new();
        for i in 0..16 {
            handles.push(
                facade
                    .submit_chat_completion(
                        vec![ChatMessage::user("go")],
                        GenerationSettings::default(),
                        Some(format!("req-{}", i)),
                    )
                    .unwrap(),
            );
        }

        for handle in handles.iter_mut() {
            let events = collect(handle).await;
            assert_eq!(events.len(), 4);
            assert_eq!(events[0], StreamEvent::Chunk("alpha".to_string()));
            assert_eq!(events[1], StreamEvent::Chunk("beta".to_string()));
            assert_eq!(events[2], StreamEvent::Chunk("gamma".to_string()));
            assert!(events[3].is_terminal());
        }

        assert_eq!(facade.in_flight(), 0);
        assert_eq!(engine.submissions(), 16);
    }
}
