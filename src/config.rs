//! Configuration management

use std::{collections::HashSet, path::Path};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::model::ReactivationPolicy;
use crate::auth::token::DEFAULT_ACTIVATION_TTL_SECS;
use crate::{Error, Result};

/// Placeholder written in place of secrets when printing configuration.
const REDACTED: &str = "<redacted>";

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Environment files to load before processing config.
    /// Paths support ~ expansion. Loaded in order, later files override earlier.
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Access token settings
    pub tokens: TokenConfig,
    /// External identity providers accepted at sign-in
    pub providers: Vec<ProviderConfig>,
    /// Applications seeded into the store at startup
    pub applications: Vec<ApplicationConfig>,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Origins allowed by CORS. Empty disables cross-origin access.
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            allowed_origins: Vec::new(),
        }
    }
}

/// Access token settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Lifetime of an activated token, in seconds (default 7 days)
    pub activation_ttl_secs: u64,
    /// Behaviour when an already-active token is activated again
    pub reactivation: ReactivationPolicy,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            activation_ttl_secs: DEFAULT_ACTIVATION_TTL_SECS,
            reactivation: ReactivationPolicy::Refresh,
        }
    }
}

impl TokenConfig {
    /// Activation TTL as a `chrono` duration.
    pub fn activation_ttl(&self) -> Result<chrono::Duration> {
        chrono::Duration::from_std(std::time::Duration::from_secs(self.activation_ttl_secs))
            .map_err(|e| Error::Config(format!("tokens.activation_ttl_secs out of range: {e}")))
    }
}

/// An OIDC identity provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Provider name used in `/auth/signin/{name}` and stored on provider accounts
    pub name: String,
    /// Issuer URL (e.g. `https://accounts.google.com`)
    pub issuer: String,
    /// Expected `aud` claim (the OAuth client id)
    pub audience: String,
    /// JWKS endpoint; derived from the issuer when omitted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_uri: Option<String>,
}

/// An application allowed to request access tokens
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationConfig {
    /// Public application id
    pub uuid: Uuid,
    /// HMAC secret the application signs activation tokens with
    pub secret_key: String,
}

impl Config {
    /// Load configuration from an optional YAML file merged with
    /// `VULCAN_`-prefixed environment variables (`__` separates nesting).
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        let first: Self = figment
            .clone()
            .merge(Env::prefixed("VULCAN_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Env files may carry VULCAN_* overrides, so the environment layer is
        // merged again once they are loaded.
        if first.env_files.is_empty() {
            first.validate()?;
            return Ok(first);
        }
        first.load_env_files();

        let config: Self = figment
            .merge(Env::prefixed("VULCAN_").split("__"))
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the service cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.tokens.activation_ttl_secs == 0 {
            return Err(Error::Config(
                "tokens.activation_ttl_secs must be greater than zero".to_string(),
            ));
        }
        self.tokens.activation_ttl()?;

        let mut names = HashSet::new();
        for provider in &self.providers {
            if provider.name.is_empty() || provider.audience.is_empty() {
                return Err(Error::Config(format!(
                    "provider '{}' needs a name and an audience",
                    provider.name
                )));
            }
            if !names.insert(provider.name.as_str()) {
                return Err(Error::Config(format!(
                    "duplicate provider name: {}",
                    provider.name
                )));
            }
        }

        let mut uuids = HashSet::new();
        for app in &self.applications {
            if app.secret_key.is_empty() {
                return Err(Error::Config(format!(
                    "application {} has an empty secret_key",
                    app.uuid
                )));
            }
            if !uuids.insert(app.uuid) {
                return Err(Error::Config(format!("duplicate application: {}", app.uuid)));
            }
        }
        Ok(())
    }

    /// Copy of the configuration with application secrets masked, for display.
    #[must_use]
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        for app in &mut copy.applications {
            app.secret_key = REDACTED.to_string();
        }
        copy
    }

    /// Load environment files into the process environment.
    /// Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = match (path_str.strip_prefix('~'), std::env::var_os("HOME")) {
                (Some(rest), Some(home)) => format!("{}{rest}", home.to_string_lossy()),
                _ => path_str.clone(),
            };

            let path = Path::new(&expanded);
            if !path.exists() {
                tracing::debug!("Env file not found (skipped): {expanded}");
                continue;
            }
            match dotenvy::from_path(path) {
                Ok(()) => tracing::info!("Loaded env file: {expanded}"),
                Err(e) => tracing::warn!("Failed to load env file {expanded}: {e}"),
            }
        }
    }
}
