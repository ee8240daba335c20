//! Vulcan authorization service
//!
//! Turns external identity-provider sign-ins into per-application access
//! tokens and manages self-service API keys with service-level permissions.
//!
//! # Features
//!
//! - **Identity linking**: provider assertions (OIDC ID tokens) resolve to one canonical identity
//! - **Two-phase access tokens**: pending at sign-in, activated by an application-signed HMAC assertion
//! - **API keys**: owner-managed permission sets checked as `"<Service>::*"` wildcards
//! - **Audit trail**: structured `tracing` records for every credential event

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod auth;
pub mod cli;
pub mod config;
pub mod error;
pub mod server;

pub use error::{Error, Result};

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Setup tracing/logging
pub fn setup_tracing(level: &str, format: Option<&str>) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::registry().with(filter);

    match format {
        Some("json") => subscriber
            .with(fmt::layer().json())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialized: {e}"))),
        _ => subscriber
            .with(fmt::layer())
            .try_init()
            .map_err(|e| Error::Internal(format!("tracing already initialized: {e}"))),
    }
}
