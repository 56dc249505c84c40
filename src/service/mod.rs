pub mod document;
pub mod emitter;
pub mod pipeline;
pub mod provider;
pub mod session_store;
pub mod summary;
pub mod text;

pub use document::decode_document;
pub use emitter::StreamEmitter;
pub use pipeline::{AnalysisPipeline, PipelineError};
pub use provider::{CallPolicy, HttpChatClient, RetryingProvider};
pub use session_store::SessionStore;
pub use summary::SummaryGenerator;
