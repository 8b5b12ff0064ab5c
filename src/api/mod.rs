//! HTTP surface: REST mirror of the realtime operations, plus router
//! assembly and shared application state.

mod error;
mod handlers;
mod routes;
mod state;

pub use error::{ApiError, ApiResult};
pub use routes::create_router;
pub use state::AppState;
