//! The capability shared by both credential verifiers

use async_trait::async_trait;
use axum::http::HeaderMap;

use super::cache::CacheStatsSnapshot;
use super::{AuthResult, Scheme};
use crate::config::{GatewayHeaders, VerificationMode};

/// Message returned when trusted gateway headers are absent
pub const MISSING_GATEWAY_IDENTITY: &str = "Missing identity headers from gateway";

/// Verifies one credential scheme with the strategy chosen at construction.
///
/// Implementations must be `Send + Sync` because one instance serves every
/// concurrent request.
#[async_trait]
pub trait CredentialVerifier: Send + Sync + 'static {
    /// Scheme handled by this verifier
    fn scheme(&self) -> Scheme;

    /// Strategy selected from configuration
    fn mode(&self) -> VerificationMode;

    /// Whether a credential must be extracted before [`verify`](Self::verify).
    ///
    /// Gateway mode reads identity headers instead of a credential.
    fn requires_credential(&self) -> bool {
        self.mode() != VerificationMode::Gateway
    }

    /// Pull the raw credential out of the request headers
    fn extract_credential(&self, headers: &HeaderMap) -> Option<String>;

    /// Reason reported when [`extract_credential`](Self::extract_credential) finds nothing
    fn missing_credential_message(&self) -> String;

    /// Verify a credential. Never fails; every outcome is an [`AuthResult`].
    async fn verify(&self, credential: Option<&str>, headers: &HeaderMap) -> AuthResult;

    /// Statistics of the verdict cache, if this verifier has one
    fn cache_stats(&self) -> Option<CacheStatsSnapshot>;

    /// Sweep expired cache entries, returning how many were removed
    fn cleanup_cache(&self) -> usize;

    /// Drop cached verdicts and release owned resources.
    ///
    /// Called once by [`AuthGuard::shutdown`](super::AuthGuard::shutdown).
    fn release(&self);
}

/// Read identity from headers injected by a trusted upstream gateway.
///
/// At least one identity header must be present and non-empty.
pub(crate) fn identity_from_headers(
    headers: &HeaderMap,
    trusted: &GatewayHeaders,
    read_user: bool,
) -> AuthResult {
    let group_id = header_value(headers, &trusted.group_id_header);
    let user_id = if read_user {
        header_value(headers, &trusted.user_id_header)
    } else {
        None
    };

    if group_id.is_none() && user_id.is_none() {
        return AuthResult::failure(MISSING_GATEWAY_IDENTITY);
    }
    AuthResult::success(group_id, user_id)
}

pub(crate) fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(String::from)
}

/// Message for a misconfiguration detected while serving a request
pub(crate) fn server_configuration_error(detail: &str) -> String {
    format!("Server configuration error: {detail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, value.parse().unwrap());
        }
        map
    }

    #[test]
    fn gateway_identity_reads_both_headers() {
        let result = identity_from_headers(
            &headers(&[("x-group-id", "g1"), ("x-user-id", "u1")]),
            &GatewayHeaders::default(),
            true,
        );
        assert!(result.is_valid());
        assert_eq!(result.group_id(), Some("g1"));
        assert_eq!(result.user_id(), Some("u1"));
    }

    #[test]
    fn gateway_identity_requires_a_header() {
        let result = identity_from_headers(&HeaderMap::new(), &GatewayHeaders::default(), true);
        assert_eq!(result.error_message(), Some(MISSING_GATEWAY_IDENTITY));

        let blank = identity_from_headers(
            &headers(&[("x-group-id", "  ")]),
            &GatewayHeaders::default(),
            true,
        );
        assert!(!blank.is_valid());
    }

    #[test]
    fn gateway_identity_ignores_user_for_api_keys() {
        let result = identity_from_headers(
            &headers(&[("x-user-id", "u1")]),
            &GatewayHeaders::default(),
            false,
        );
        assert!(!result.is_valid());
    }
}
