//! Authentication for inbound requests
//!
//! Two credential schemes share one shape:
//!
//! ```text
//! Request arrives
//!   -> bypass path?            -- /health, /metrics, /ready forward untouched
//!   -> extract credential      -- X-API-Key header or Authorization: Bearer
//!   -> CredentialVerifier      -- Local | Gateway | Introspection | Custom
//!        -> TokenCache         -- remote modes only, successes only
//!   -> 401 or forward with AuthContext in request extensions
//! ```
//!
//! Nothing in the request path returns an error: every outcome, including
//! transport failures and misconfiguration detected at request time, is an
//! [`AuthResult`].

pub mod api_key;
pub mod cache;
pub mod client;
pub mod jwt;
pub mod middleware;
mod remote;
pub mod verifier;

use std::fmt;

use serde::Serialize;

pub use api_key::ApiKeyVerifier;
pub use cache::{CacheStatsSnapshot, TokenCache, Verdict};
pub use client::{ClientOwnership, HttpClient};
pub use jwt::JwtVerifier;
pub use middleware::{
    ApiKeyGuard, AuthContext, AuthGuard, JwtGuard, api_key_middleware, jwt_middleware,
};
pub use verifier::CredentialVerifier;

/// Credential scheme a verifier handles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    /// Static or remotely checked API key header
    ApiKey,
    /// JWT bearer token
    Jwt,
}

impl Scheme {
    /// Name used in logs and metrics
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiKey => "api_key",
            Self::Jwt => "jwt",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single verification attempt.
///
/// `error_message` is present exactly when the result is invalid; the
/// constructors are the only way to build one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AuthResult {
    is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl AuthResult {
    /// Successful verification with the extracted identity
    #[must_use]
    pub fn success(group_id: Option<String>, user_id: Option<String>) -> Self {
        Self {
            is_valid: true,
            group_id,
            user_id,
            error_message: None,
        }
    }

    /// Failed verification with a caller-safe reason
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            is_valid: false,
            group_id: None,
            user_id: None,
            error_message: Some(message.into()),
        }
    }

    /// Whether the credential was accepted
    #[must_use]
    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    /// Tenant/group identity
    #[must_use]
    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    /// User identity (JWT only)
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Failure reason
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}

impl Verdict for AuthResult {
    fn is_success(&self) -> bool {
        self.is_valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_message_present_iff_invalid() {
        let ok = AuthResult::success(Some("tenantA".into()), None);
        assert!(ok.is_valid());
        assert!(ok.error_message().is_none());
        assert_eq!(ok.group_id(), Some("tenantA"));

        let bad = AuthResult::failure("Invalid API key");
        assert!(!bad.is_valid());
        assert_eq!(bad.error_message(), Some("Invalid API key"));
        assert!(bad.group_id().is_none());
        assert!(bad.user_id().is_none());
    }

    #[test]
    fn only_valid_results_are_successful_verdicts() {
        assert!(AuthResult::success(None, None).is_success());
        assert!(!AuthResult::failure("nope").is_success());
    }

    #[test]
    fn serializes_without_empty_fields() {
        let json = serde_json::to_value(AuthResult::success(Some("g1".into()), None)).unwrap();
        assert_eq!(json, serde_json::json!({"is_valid": true, "group_id": "g1"}));
    }

    #[test]
    fn scheme_names() {
        assert_eq!(Scheme::ApiKey.to_string(), "api_key");
        assert_eq!(Scheme::Jwt.as_str(), "jwt");
    }
}
