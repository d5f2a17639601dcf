//! Inflight engine interface
//!
//! Capability interface for the external inference engine. The engine is an
//! opaque collaborator reached through a JSON call surface: requests go in
//! as serialized payloads, results come back through a single shared stream
//! callback, tagged by request id. The runtime installs exactly one callback
//! and is the only component that talks to the engine.

pub mod replay;

use inflight_common::Result;
use std::path::Path;
use std::sync::Arc;

pub use replay::{ReplayEngine, ReplayScript};

/// Stream callback installed by the runtime
///
/// Invoked by the engine for every result payload, potentially from a
/// thread the runtime does not control. Payloads are raw JSON strings in
/// the engine's own schema.
pub type EngineCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// External inference engine capability
///
/// `submit` is fire-and-forget: results for a submitted request arrive via
/// the subscribed callback. `cancel` is cooperative and best-effort; chunks
/// already in flight may still be delivered after it returns.
pub trait Engine: Send + Sync {
    /// Load model weights and the matching engine library
    fn load_model(&self, model_path: &Path, model_lib: &str) -> Result<()>;

    /// Install the shared stream callback (replaces any previous one)
    fn subscribe(&self, callback: EngineCallback);

    /// Submit a serialized chat-completion request
    fn submit(&self, payload: &str) -> Result<()>;

    /// Request cancellation of an in-flight generation
    fn cancel(&self, request_id: &str);

    /// Reset engine chat state, keeping the model loaded
    fn reset(&self) -> Result<()>;

    /// Tear down the loaded model
    fn unload(&self) -> Result<()>;
}
