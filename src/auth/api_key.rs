//! API key verification
//!
//! | Mode          | Check                                      | Cached |
//! |---------------|--------------------------------------------|--------|
//! | local         | exact lookup of the key in the config map  | no     |
//! | gateway       | trusted group header from upstream proxy   | no     |
//! | introspection | form POST, `active` must be `true`         | yes    |
//! | custom        | JSON POST `{apiKey}`, `valid` must be true | yes    |

use std::collections::HashMap;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::json;
use tracing::{debug, error, warn};

use super::cache::{CacheStatsSnapshot, TokenCache};
use super::client::HttpClient;
use super::remote::{CustomVerdict, IntrospectionResponse, RemoteEndpoint, RemoteError};
use super::verifier::{
    CredentialVerifier, header_value, identity_from_headers, server_configuration_error,
};
use super::{AuthResult, Scheme};
use crate::Result;
use crate::config::{ApiKeyAuthConfig, GatewayHeaders, VerificationMode, resolve_secret};

const INVALID_API_KEY: &str = "Invalid API key";
const VALIDATION_FAILED: &str = "API key validation failed";
const NOT_ACTIVE: &str = "Token is not active";

enum Strategy {
    Local { keys: HashMap<String, String> },
    Gateway(GatewayHeaders),
    Remote(RemoteCheck),
}

enum RemoteCheck {
    Introspection {
        endpoint: Option<RemoteEndpoint>,
        token_field: String,
    },
    Custom {
        endpoint: Option<RemoteEndpoint>,
    },
}

/// Verifies the API key header with the configured strategy
pub struct ApiKeyVerifier {
    header_name: String,
    mode: VerificationMode,
    strategy: Strategy,
    client: HttpClient,
    cache: Option<TokenCache<AuthResult>>,
}

impl std::fmt::Debug for ApiKeyVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyVerifier")
            .field("header_name", &self.header_name)
            .field("mode", &self.mode)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl ApiKeyVerifier {
    /// Build a verifier from configuration.
    ///
    /// Missing key material or endpoints are not rejected here; they surface
    /// as server configuration errors per request. Run
    /// [`Config::validate`](crate::config::Config::validate) first to fail at startup.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache settings are invalid for a remote mode.
    pub fn new(config: &ApiKeyAuthConfig, client: HttpClient) -> Result<Self> {
        let timeout = config.timeout();
        let strategy = match config.mode {
            VerificationMode::Local => Strategy::Local {
                keys: config.resolved_keys(),
            },
            VerificationMode::Gateway => Strategy::Gateway(config.gateway.clone()),
            VerificationMode::Introspection => Strategy::Remote(RemoteCheck::Introspection {
                endpoint: RemoteEndpoint::new(
                    config.introspection.endpoint.as_deref(),
                    config.introspection.authorization_header(),
                    timeout,
                ),
                token_field: config
                    .introspection
                    .token_field
                    .clone()
                    .unwrap_or_else(|| "key".to_string()),
            }),
            VerificationMode::Custom => Strategy::Remote(RemoteCheck::Custom {
                endpoint: RemoteEndpoint::new(
                    config.custom.endpoint.as_deref(),
                    config.custom.authorization.as_deref().and_then(resolve_secret),
                    timeout,
                ),
            }),
        };

        let cache = if config.mode.is_remote() && config.cache.enabled {
            Some(TokenCache::new(config.cache.ttl(), config.cache.max_size)?)
        } else {
            None
        };

        Ok(Self {
            header_name: config.header_name.clone(),
            mode: config.mode,
            strategy,
            client,
            cache,
        })
    }

    /// Header the key is read from
    #[must_use]
    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    fn verify_local(keys: &HashMap<String, String>, key: &str) -> AuthResult {
        if keys.is_empty() {
            error!(scheme = "api_key", "Local mode has no API keys configured");
            return AuthResult::failure(server_configuration_error("no API keys configured"));
        }
        match keys.get(key) {
            Some(group_id) => AuthResult::success(Some(group_id.clone()), None),
            None => AuthResult::failure(INVALID_API_KEY),
        }
    }

    async fn verify_remote(&self, check: &RemoteCheck, key: &str) -> AuthResult {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_verify(key, || self.call_remote(check, key))
                    .await
            }
            None => self.call_remote(check, key).await,
        }
    }

    async fn call_remote(&self, check: &RemoteCheck, key: &str) -> AuthResult {
        match check {
            RemoteCheck::Introspection {
                endpoint,
                token_field,
            } => {
                let Some(endpoint) = endpoint else {
                    error!(scheme = "api_key", "Introspection endpoint not configured");
                    return AuthResult::failure(server_configuration_error(
                        "introspection endpoint not configured",
                    ));
                };
                let response: std::result::Result<IntrospectionResponse, RemoteError> = endpoint
                    .post_form(&self.client, &[(token_field.as_str(), key)])
                    .await;
                match response {
                    Ok(body) if body.active => AuthResult::success(body.group(), None),
                    Ok(_) => {
                        debug!(scheme = "api_key", "Introspection reported inactive key");
                        AuthResult::failure(NOT_ACTIVE)
                    }
                    Err(e) => remote_failure("introspection", &e),
                }
            }
            RemoteCheck::Custom { endpoint } => {
                let Some(endpoint) = endpoint else {
                    error!(scheme = "api_key", "Custom validation endpoint not configured");
                    return AuthResult::failure(server_configuration_error(
                        "custom validation endpoint not configured",
                    ));
                };
                let response: std::result::Result<CustomVerdict, RemoteError> = endpoint
                    .post_json(&self.client, &json!({ "apiKey": key }))
                    .await;
                match response {
                    Ok(verdict) if verdict.valid => AuthResult::success(verdict.group_id, None),
                    Ok(verdict) => {
                        AuthResult::failure(verdict.error.unwrap_or_else(|| INVALID_API_KEY.to_string()))
                    }
                    Err(e) => remote_failure("custom", &e),
                }
            }
        }
    }
}

fn remote_failure(mode: &str, err: &RemoteError) -> AuthResult {
    error!(scheme = "api_key", mode, error = %err, "Remote API key verification failed");
    AuthResult::failure(VALIDATION_FAILED)
}

#[async_trait]
impl CredentialVerifier for ApiKeyVerifier {
    fn scheme(&self) -> Scheme {
        Scheme::ApiKey
    }

    fn mode(&self) -> VerificationMode {
        self.mode
    }

    fn extract_credential(&self, headers: &HeaderMap) -> Option<String> {
        header_value(headers, &self.header_name)
    }

    fn missing_credential_message(&self) -> String {
        format!("Missing API key header: {}", self.header_name)
    }

    async fn verify(&self, credential: Option<&str>, headers: &HeaderMap) -> AuthResult {
        match (&self.strategy, credential) {
            (Strategy::Gateway(trusted), _) => identity_from_headers(headers, trusted, false),
            (_, None) => AuthResult::failure(self.missing_credential_message()),
            (Strategy::Local { keys }, Some(key)) => Self::verify_local(keys, key),
            (Strategy::Remote(check), Some(key)) => self.verify_remote(check, key).await,
        }
    }

    fn cache_stats(&self) -> Option<CacheStatsSnapshot> {
        self.cache.as_ref().map(TokenCache::stats)
    }

    fn cleanup_cache(&self) -> usize {
        self.cache.as_ref().map_or(0, TokenCache::cleanup_expired)
    }

    fn release(&self) {
        if let Some(ref cache) = self.cache {
            cache.clear();
        }
        if self.client.release() {
            warn!(scheme = "api_key", "Owned HTTP client released; remote verification disabled");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local(keys: &[(&str, &str)]) -> ApiKeyVerifier {
        let config = ApiKeyAuthConfig {
            enabled: true,
            keys: keys
                .iter()
                .map(|(k, g)| ((*k).to_string(), (*g).to_string()))
                .collect(),
            ..Default::default()
        };
        ApiKeyVerifier::new(&config, HttpClient::shared(reqwest::Client::new())).unwrap()
    }

    #[tokio::test]
    async fn local_lookup_maps_key_to_group() {
        let verifier = local(&[("abc123", "tenantA")]);
        let headers = HeaderMap::new();

        let ok = verifier.verify(Some("abc123"), &headers).await;
        assert!(ok.is_valid());
        assert_eq!(ok.group_id(), Some("tenantA"));
        assert!(ok.user_id().is_none());

        let bad = verifier.verify(Some("wrong"), &headers).await;
        assert_eq!(bad.error_message(), Some("Invalid API key"));
    }

    #[tokio::test]
    async fn local_without_keys_is_configuration_error() {
        let verifier = local(&[]);
        let result = verifier.verify(Some("abc123"), &HeaderMap::new()).await;
        assert!(
            result
                .error_message()
                .unwrap()
                .starts_with("Server configuration error")
        );
    }

    #[tokio::test]
    async fn remote_without_endpoint_is_configuration_error() {
        let config = ApiKeyAuthConfig {
            mode: VerificationMode::Custom,
            ..Default::default()
        };
        let verifier =
            ApiKeyVerifier::new(&config, HttpClient::shared(reqwest::Client::new())).unwrap();
        let result = verifier.verify(Some("k"), &HeaderMap::new()).await;
        assert!(
            result
                .error_message()
                .unwrap()
                .contains("custom validation endpoint not configured")
        );
        // Failures are never cached
        assert_eq!(verifier.cache_stats().unwrap().size, 0);
    }

    #[tokio::test]
    async fn missing_credential_message_names_header() {
        let verifier = local(&[("abc123", "tenantA")]);
        let result = verifier.verify(None, &HeaderMap::new()).await;
        assert_eq!(result.error_message(), Some("Missing API key header: X-API-Key"));
    }

    #[test]
    fn extracts_configured_header() {
        let verifier = local(&[("abc123", "tenantA")]);
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", "abc123".parse().unwrap());
        assert_eq!(verifier.extract_credential(&headers).as_deref(), Some("abc123"));
        assert!(verifier.extract_credential(&HeaderMap::new()).is_none());
    }

    #[test]
    fn cache_only_built_for_remote_modes() {
        assert!(local(&[("k", "g")]).cache_stats().is_none());

        let config = ApiKeyAuthConfig {
            mode: VerificationMode::Introspection,
            ..Default::default()
        };
        let verifier =
            ApiKeyVerifier::new(&config, HttpClient::shared(reqwest::Client::new())).unwrap();
        assert!(verifier.cache_stats().is_some());
        assert!(verifier.requires_credential());
    }

    #[test]
    fn gateway_mode_does_not_require_credential() {
        let config = ApiKeyAuthConfig {
            mode: VerificationMode::Gateway,
            ..Default::default()
        };
        let verifier =
            ApiKeyVerifier::new(&config, HttpClient::shared(reqwest::Client::new())).unwrap();
        assert!(!verifier.requires_credential());
    }
}
