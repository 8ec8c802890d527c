//! I/O orchestration: the declare(...) state machine wired to Postgres, and
//! the background health sentinel.

pub mod sentinel;
pub mod service;

pub use sentinel::Sentinel;
pub use service::{HeksherService, ServiceError};
