//! Subprocess session supervision.
//!
//! A session is one supervised CLI subprocess: the manager owns its
//! lifecycle, scans its stdout/stderr into line events, keeps a bounded
//! history for replay, and fans live events out to subscribers.

mod manager;
mod models;
mod ring_buffer;

pub use manager::{ManagerConfig, SessionError, SessionManager, Subscription};
pub use models::{OutputEvent, OutputKind, Session, SessionState};
pub use ring_buffer::RingBuffer;
