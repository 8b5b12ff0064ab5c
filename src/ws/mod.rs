//! Realtime WebSocket layer.
//!
//! [`hub`] owns connected clients and their subscriptions; [`handler`]
//! drives each socket with a reader/writer task pair; [`types`] defines
//! the wire protocol.

mod handler;
mod hub;
pub mod types;

pub use handler::ws_handler;
pub use hub::Hub;
