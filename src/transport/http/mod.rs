pub mod error;
pub mod handlers;
pub mod router;
pub mod types;

pub use router::{create_router, ApiDoc};
pub use types::AppState;
