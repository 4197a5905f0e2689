//! HTTP host for the authentication guards

use std::sync::Arc;
use std::time::Duration;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware,
    response::IntoResponse,
    routing::get,
};
use serde_json::json;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tower_http::{catch_panic::CatchPanicLayer, trace::TraceLayer};
use tracing::{debug, error, info, warn};

use crate::auth::{
    ApiKeyGuard, ApiKeyVerifier, AuthContext, AuthGuard, CredentialVerifier, HttpClient,
    JwtGuard, JwtVerifier, api_key_middleware, jwt_middleware,
};
use crate::config::Config;
use crate::{Error, Result};

/// Guards shared by the router and background tasks
#[derive(Debug, Default)]
pub struct AppState {
    /// API key guard, when enabled
    pub api_key: Option<Arc<ApiKeyGuard>>,
    /// JWT guard, when enabled
    pub jwt: Option<Arc<JwtGuard>>,
}

impl AppState {
    /// Build the enabled guards around one shared HTTP client
    ///
    /// # Errors
    ///
    /// Returns an error if a verifier cannot be constructed (bad key material
    /// or cache settings).
    pub fn from_config(config: &Config, client: &reqwest::Client) -> Result<Self> {
        let bypass = &config.auth.bypass_paths;

        let api_key = if config.auth.api_key.enabled {
            let verifier =
                ApiKeyVerifier::new(&config.auth.api_key, HttpClient::shared(client.clone()))?;
            Some(Arc::new(AuthGuard::new(verifier, bypass.clone())))
        } else {
            None
        };

        let jwt = if config.auth.jwt.enabled {
            let verifier = JwtVerifier::new(&config.auth.jwt, HttpClient::shared(client.clone()))?;
            Some(Arc::new(AuthGuard::new(verifier, bypass.clone())))
        } else {
            None
        };

        Ok(Self { api_key, jwt })
    }

    /// Sweep expired entries from both verdict caches
    pub fn cleanup_caches(&self) -> usize {
        let api_key = self
            .api_key
            .as_ref()
            .map_or(0, |g| g.verifier().cleanup_cache());
        let jwt = self.jwt.as_ref().map_or(0, |g| g.verifier().cleanup_cache());
        api_key + jwt
    }

    /// Shut down both guards. Safe to call more than once.
    pub fn shutdown(&self) {
        if let Some(ref guard) = self.api_key {
            guard.shutdown();
        }
        if let Some(ref guard) = self.jwt {
            guard.shutdown();
        }
    }

    fn is_ready(&self) -> bool {
        !self.api_key.as_ref().is_some_and(|g| g.is_shut_down())
            && !self.jwt.as_ref().is_some_and(|g| g.is_shut_down())
    }
}

/// Create the router.
///
/// The API key guard wraps the JWT guard, so when both are enabled a request
/// must pass both and the API key is checked first.
pub fn create_router(state: Arc<AppState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .route("/metrics", get(metrics_handler))
        .route("/whoami", get(whoami_handler));

    if let Some(ref guard) = state.jwt {
        router = router.layer(middleware::from_fn_with_state(
            Arc::clone(guard),
            jwt_middleware,
        ));
    }
    if let Some(ref guard) = state.api_key {
        router = router.layer(middleware::from_fn_with_state(
            Arc::clone(guard),
            api_key_middleware,
        ));
    }

    router
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn ready_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    if state.is_ready() {
        (StatusCode::OK, Json(json!({"status": "ready"})))
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "shutting_down"})),
        )
    }
}

async fn metrics_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let api_key = state.api_key.as_ref().and_then(|g| g.verifier().cache_stats());
    let jwt = state.jwt.as_ref().and_then(|g| g.verifier().cache_stats());
    Json(json!({
        "api_key": { "enabled": state.api_key.is_some(), "cache": api_key },
        "jwt": { "enabled": state.jwt.is_some(), "cache": jwt },
    }))
}

async fn whoami_handler(request: Request<Body>) -> impl IntoResponse {
    match request.extensions().get::<AuthContext>() {
        Some(context) => Json(json!({
            "authenticated": true,
            "context": context,
        })),
        None => Json(json!({"authenticated": false})),
    }
}

/// Authentication server: guards plus the HTTP listener
pub struct AuthServer {
    config: Config,
    state: Arc<AppState>,
}

impl AuthServer {
    /// Validate configuration and build the guards.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] for invalid configuration and propagates
    /// verifier construction failures.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let client = reqwest::Client::builder()
            .user_agent(concat!("authgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        let state = Arc::new(AppState::from_config(&config, &client)?);

        Ok(Self { config, state })
    }

    /// Shared state
    #[must_use]
    pub fn state(&self) -> Arc<AppState> {
        Arc::clone(&self.state)
    }

    /// Router with the enabled guards applied
    pub fn router(&self) -> Router {
        create_router(self.state())
    }

    /// Serve until Ctrl+C or SIGTERM, then shut the guards down
    ///
    /// # Errors
    ///
    /// Returns an error if the listener cannot bind or the server fails.
    pub async fn run(self) -> Result<()> {
        let (shutdown_tx, _) = broadcast::channel::<()>(1);
        let app = self.router();

        let host = self.config.server.host.as_str();
        let port = self.config.server.port;
        let listener = TcpListener::bind((host, port)).await?;

        info!(host = %host, port, version = env!("CARGO_PKG_VERSION"), "Listening");
        self.log_schemes();

        let state = self.state();
        let mut shutdown_rx = shutdown_tx.subscribe();
        let period = Duration::from_secs(self.config.server.cache_cleanup_interval_seconds);
        let sweeper = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let removed = state.cleanup_caches();
                        if removed > 0 {
                            debug!(removed, "Swept expired cache entries");
                        }
                    }
                    _ = shutdown_rx.recv() => break,
                }
            }
        });

        let served = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
            .await
            .map_err(|e| Error::Internal(e.to_string()));

        let _ = shutdown_tx.send(());
        if let Err(e) = sweeper.await {
            warn!(error = %e, "Cache sweeper task failed");
        }

        info!("Shutting down auth guards...");
        self.state.shutdown();
        served
    }

    fn log_schemes(&self) {
        let auth = &self.config.auth;
        if auth.api_key.enabled {
            info!(
                scheme = "api_key",
                mode = %auth.api_key.mode,
                header = %auth.api_key.header_name,
                "API key authentication enabled"
            );
        }
        if auth.jwt.enabled {
            info!(scheme = "jwt", mode = %auth.jwt.mode, "JWT authentication enabled");
        }
        if !auth.api_key.enabled && !auth.jwt.enabled {
            warn!("AUTHENTICATION disabled - all requests are forwarded");
        }
        info!(bypass = ?auth.bypass_paths, "Bypass paths");
    }
}

async fn shutdown_signal(shutdown_tx: broadcast::Sender<()>) {
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
    let _ = shutdown_tx.send(());
}
