//! Bearer token authentication for the HTTP surface.

mod middleware;

pub use middleware::AuthUser;
