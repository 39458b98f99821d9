//! WebSocket event stream.
//!
//! Clients connect to `/events` and receive every dispatched sync event as it
//! happens, so a dashboard can follow a run without polling the history.

mod manager;
mod protocol;

pub use manager::ConnectionManager;
pub use protocol::*;
