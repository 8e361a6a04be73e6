//! HTTP surface: configuration, live connections, identity, handlers,
//! middleware, and the server lifecycle.

pub mod config;
pub mod connection;
pub mod handlers;
pub mod identity;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use config::*;
pub use connection::*;
pub use handlers::{ApiError, AppState};
pub use identity::{HeaderIdentityResolver, IdentityResolver, JwtIdentityResolver};
pub use module::NetworkModule;
pub use shutdown::*;
