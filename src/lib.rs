pub mod app;
pub mod domain;
pub mod infra;
pub mod storage;
pub mod transport;

// Convenience re-exports (keeps call-sites clean)
pub use app::{HeksherService, Sentinel, ServiceError};
pub use domain::{ContextFilter, DeclareRequest, Rule, Setting};
