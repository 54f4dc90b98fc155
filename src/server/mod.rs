//! Server module
//!
//! Request pipeline, built-in handlers and server startup.

pub mod context;
pub mod cookies;
pub mod errors;
pub mod finalize;
pub mod http;
pub mod pipeline;
pub mod recovery;
pub mod startup;

// Re-export key types
pub use context::{ContextError, RequestContext, RequestMeta};
pub use finalize::{FinalizeOutcome, SessionFinalizer};
pub use http::{create_router, PipelineConfig, PipelineState};
pub use pipeline::{page_assets, PageAssets, REQUEST_ID_HEADER};
pub use startup::{run_server_with_config, ServerConfig, ServerHandle};
