//! Request handlers behind the HTTP routes.

mod audit;
mod sync;
mod websocket;

pub use audit::*;
pub use sync::*;
pub use websocket::*;
