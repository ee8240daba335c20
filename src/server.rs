//! HTTP server: wiring, router layers and graceful shutdown

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    http::{HeaderName, HeaderValue, Method, header},
};
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::{
    catch_panic::CatchPanicLayer,
    cors::{AllowOrigin, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};

use crate::auth::{
    AuthService, InMemoryStore, OidcAssertionValidator, RandomHexGenerator, handler::API_KEY_HEADER,
    handler::auth_routes,
};
use crate::config::{Config, ServerConfig};
use crate::{Error, Result};

/// Vulcan HTTP server
pub struct Server {
    config: Config,
    service: Arc<AuthService>,
}

impl Server {
    /// Build the service from configuration: one OIDC validator per provider
    /// and every configured application seeded into the store.
    pub async fn new(config: Config) -> Result<Self> {
        let store = Arc::new(InMemoryStore::new());
        let mut service = AuthService::new(store, &config.tokens, Arc::new(RandomHexGenerator))?;

        for provider in &config.providers {
            let validator = OidcAssertionValidator::new(provider)
                .map_err(|e| Error::Config(format!("provider '{}': {e}", provider.name)))?;
            let validator = Arc::new(validator);
            service = service.with_provider(&provider.name, &provider.audience, validator);
        }

        for app in &config.applications {
            service.register_application(app.uuid, &app.secret_key).await?;
        }

        Ok(Self {
            config,
            service: Arc::new(service),
        })
    }

    /// Shared service handle.
    #[must_use]
    pub fn service(&self) -> Arc<AuthService> {
        Arc::clone(&self.service)
    }

    /// Router with all middleware applied.
    pub fn router(&self) -> Result<Router> {
        create_router(Arc::clone(&self.service), &self.config.server)
    }

    /// Bind and serve until Ctrl+C or SIGTERM.
    pub async fn run(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.server.host, self.config.server.port)
            .parse()
            .map_err(|e| Error::Config(format!("Invalid server address: {e}")))?;

        let app = self.router()?;
        let listener = TcpListener::bind(addr).await?;

        info!(host = %self.config.server.host, port = %self.config.server.port, "Listening");
        info!(
            providers = ?self.service.providers().collect::<Vec<_>>(),
            applications = self.config.applications.len(),
            "Authorization service ready"
        );
        if self.config.providers.is_empty() {
            warn!("No identity providers configured - sign-in is disabled");
        }

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await
            .map_err(|e| Error::Internal(e.to_string()))?;

        info!("Server shutdown complete");
        Ok(())
    }
}

/// Build the router with CORS, tracing and panic recovery layers.
pub fn create_router(service: Arc<AuthService>, server: &ServerConfig) -> Result<Router> {
    Ok(auth_routes(service)
        .layer(cors_layer(&server.allowed_origins)?)
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http()))
}

fn cors_layer(allowed_origins: &[String]) -> Result<CorsLayer> {
    let origins = allowed_origins
        .iter()
        .map(|o| {
            HeaderValue::from_str(o)
                .map_err(|e| Error::Config(format!("Invalid CORS origin '{o}': {e}")))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static(API_KEY_HEADER),
        ]))
}

/// Shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Shutdown signal received");
}
