//! Axum middleware guarding routes with a [`CredentialVerifier`]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{HeaderMap, Request, StatusCode, header::WWW_AUTHENTICATE},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use super::api_key::ApiKeyVerifier;
use super::jwt::JwtVerifier;
use super::verifier::CredentialVerifier;
use super::{AuthResult, Scheme};

const SERVICE_UNAVAILABLE: &str = "Authentication service unavailable";

/// Identity attached to request extensions after successful authentication
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthContext {
    /// Scheme that authenticated the request
    pub scheme: Scheme,
    /// Tenant/group identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// User identity
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

/// Request guard: bypass paths, credential extraction and verification
pub struct AuthGuard<V> {
    verifier: V,
    bypass_paths: Vec<String>,
    disposed: AtomicBool,
}

/// Guard for the API key scheme
pub type ApiKeyGuard = AuthGuard<ApiKeyVerifier>;

/// Guard for the JWT scheme
pub type JwtGuard = AuthGuard<JwtVerifier>;

impl<V: std::fmt::Debug> std::fmt::Debug for AuthGuard<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthGuard")
            .field("verifier", &self.verifier)
            .field("bypass_paths", &self.bypass_paths)
            .field("disposed", &self.disposed.load(Ordering::Relaxed))
            .finish()
    }
}

impl<V: CredentialVerifier> AuthGuard<V> {
    /// Wrap a verifier. Paths under any of `bypass_paths` skip authentication.
    pub fn new(verifier: V, bypass_paths: Vec<String>) -> Self {
        Self {
            verifier,
            bypass_paths,
            disposed: AtomicBool::new(false),
        }
    }

    /// The wrapped verifier
    pub fn verifier(&self) -> &V {
        &self.verifier
    }

    /// Check if a path is exempt from authentication.
    ///
    /// Prefixes match on segment boundaries: `/health` covers `/health` and
    /// `/health/live`, not `/healthz`.
    pub fn is_bypassed(&self, path: &str) -> bool {
        self.bypass_paths.iter().any(|prefix| {
            path.strip_prefix(prefix.as_str()).is_some_and(|rest| {
                rest.is_empty() || rest.starts_with('/') || prefix.ends_with('/')
            })
        })
    }

    /// Extract and verify the request credential
    pub async fn authenticate(&self, headers: &HeaderMap) -> AuthResult {
        if self.is_shut_down() {
            return AuthResult::failure(SERVICE_UNAVAILABLE);
        }

        if !self.verifier.requires_credential() {
            return self.verifier.verify(None, headers).await;
        }

        match self.verifier.extract_credential(headers) {
            Some(credential) => self.verifier.verify(Some(&credential), headers).await,
            None => AuthResult::failure(self.verifier.missing_credential_message()),
        }
    }

    /// Release verifier resources. Returns `true` only for the call that did the work.
    pub fn shutdown(&self) -> bool {
        if self
            .disposed
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        self.verifier.release();
        info!(scheme = %self.verifier.scheme(), "Auth guard shut down");
        true
    }

    /// Whether [`shutdown`](Self::shutdown) has run
    pub fn is_shut_down(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }
}

/// API key authentication middleware
pub async fn api_key_middleware(
    State(guard): State<Arc<ApiKeyGuard>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    guard_request(&guard, request, next).await
}

/// JWT bearer authentication middleware
pub async fn jwt_middleware(
    State(guard): State<Arc<JwtGuard>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    guard_request(&guard, request, next).await
}

async fn guard_request<V: CredentialVerifier>(
    guard: &AuthGuard<V>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let scheme = guard.verifier().scheme();
    let path = request.uri().path().to_string();

    if guard.is_bypassed(&path) {
        debug!(%scheme, path = %path, "Bypass path, skipping auth");
        return next.run(request).await;
    }

    let result = guard.authenticate(request.headers()).await;
    if !result.is_valid() {
        let message = result.error_message().unwrap_or("Authentication failed");
        warn!(%scheme, path = %path, reason = message, "Authentication failed");
        return unauthorized_response(scheme, message);
    }

    debug!(
        %scheme,
        path = %path,
        group_id = result.group_id().unwrap_or("-"),
        "Authenticated request"
    );
    request.extensions_mut().insert(AuthContext {
        scheme,
        group_id: result.group_id().map(String::from),
        user_id: result.user_id().map(String::from),
    });
    next.run(request).await
}

/// Create a 401 Unauthorized response
fn unauthorized_response(scheme: Scheme, message: &str) -> Response {
    let body = Json(json!({
        "error": "Unauthorized",
        "message": message,
    }));
    match scheme {
        Scheme::Jwt => (StatusCode::UNAUTHORIZED, [(WWW_AUTHENTICATE, "Bearer")], body).into_response(),
        Scheme::ApiKey => (StatusCode::UNAUTHORIZED, body).into_response(),
    }
}
