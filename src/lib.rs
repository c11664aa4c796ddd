//! azinv - Azure resource inventory as queryable tables
//!
//! - [`azure`] - Session, HTTP, retry and error classification for ARM
//! - [`plugin`] - Query host adapter: row sink, budget, rate limiting
//! - [`resource`] - Table registry and the generic List/Get handlers
//! - [`config`] - Connection configuration

pub mod azure;
pub mod config;
pub mod plugin;
pub mod resource;

/// Version injected at compile time via AZINV_VERSION env var (set by CI/CD),
/// or the crate version for local builds.
pub const VERSION: &str = match option_env!("AZINV_VERSION") {
    Some(v) => v,
    None => env!("CARGO_PKG_VERSION"),
};
