//! Pluggable request authentication
//!
//! Two credential schemes, each with four interchangeable verification modes:
//!
//! | Scheme  | Credential                      | Modes                                  |
//! |---------|---------------------------------|----------------------------------------|
//! | API key | `X-API-Key` (configurable)      | local, gateway, introspection, custom  |
//! | JWT     | `Authorization: Bearer <token>` | local, gateway, introspection, custom  |
//!
//! Remote modes cache successful verdicts in a TTL + LRU [`auth::TokenCache`]
//! keyed by the SHA-256 digest of the credential.
//!
//! The guards plug into any axum router via
//! [`auth::api_key_middleware`] and [`auth::jwt_middleware`]; [`server`]
//! hosts them standalone.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging. `RUST_LOG` overrides `level`.
///
/// # Errors
///
/// Returns [`Error::Internal`] if a global subscriber is already installed.
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    let installed = match format {
        Some("json") => subscriber.with(fmt::layer().json()).try_init(),
        _ => subscriber.with(fmt::layer()).try_init(),
    };
    installed.map_err(|e| Error::Internal(format!("failed to install tracing subscriber: {e}")))
}
