//! Inflight runtime
//!
//! Request-lifecycle tracking and streaming-response dispatch for an
//! opaque LLM inference engine. The registry is the source of truth for
//! in-flight requests; the facade is the only component that talks to the
//! engine and routes its streamed results back to the correct caller.

pub mod catalog;
pub mod facade;
pub mod registry;
pub mod store;
pub mod stream;

pub use catalog::ModelCatalog;
pub use facade::EngineFacade;
pub use registry::{RequestId, RequestRegistry, RequestState};
pub use store::{DownloadEvent, Fetcher, HttpFetcher, ModelStore};
pub use stream::{ChatHandle, Completion, CompletionSink, StreamEvent};
