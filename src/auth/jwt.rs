//! JWT bearer token verification
//!
//! # Modes
//!
//! - **local**: signature and standard claims (`exp`, optional `iss`/`aud`)
//!   checked with a configured HMAC secret or PEM public key. The group id is
//!   read from the first present claim in `group_claims`, the user id from
//!   `user_claim`.
//! - **gateway**: identity read from headers injected by a trusted proxy.
//! - **introspection**: RFC 7662 form POST with `token_type_hint=access_token`.
//!   Group id from `group_id`/`tenant_id`, user id from `sub`/`client_id`.
//! - **custom**: JSON POST `{token}` to an application endpoint.
//!
//! Only the two remote modes go through the verdict cache.

use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::{HeaderMap, header::AUTHORIZATION};
use jsonwebtoken::{Algorithm, DecodingKey, Validation, errors::ErrorKind};
use parking_lot::RwLock;
use serde_json::{Map, Value, json};
use tracing::{debug, error, warn};

use super::cache::{CacheStatsSnapshot, TokenCache};
use super::client::HttpClient;
use super::remote::{CustomVerdict, IntrospectionResponse, RemoteEndpoint, RemoteError};
use super::verifier::{CredentialVerifier, identity_from_headers, server_configuration_error};
use super::{AuthResult, Scheme};
use crate::config::{GatewayHeaders, JwtAuthConfig, JwtLocalConfig, VerificationMode, resolve_secret};
use crate::{Error, Result};

const INVALID_TOKEN: &str = "Invalid token";
const TOKEN_EXPIRED: &str = "Token has expired";
const VALIDATION_FAILED: &str = "Token validation failed";
const NOT_ACTIVE: &str = "Token is not active";
const MISSING_BEARER: &str =
    "Missing or malformed Authorization header. Expected: Bearer <token>";

/// Loaded local key material and claim mapping
struct LocalKeys {
    /// `None` when unconfigured or after release
    key: RwLock<Option<Arc<DecodingKey>>>,
    validation: Validation,
    group_claims: Vec<String>,
    user_claim: String,
}

enum Strategy {
    Local(LocalKeys),
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

/// Verifies `Authorization: Bearer` tokens with the configured strategy
pub struct JwtVerifier {
    mode: VerificationMode,
    strategy: Strategy,
    client: HttpClient,
    cache: Option<TokenCache<AuthResult>>,
}

impl std::fmt::Debug for JwtVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwtVerifier")
            .field("mode", &self.mode)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl JwtVerifier {
    /// Build a verifier from configuration, loading local key material.
    ///
    /// # Errors
    ///
    /// Returns [`Error::KeyMaterial`] if the algorithm is unknown, does not
    /// match the key type, or the PEM key cannot be read or parsed, and
    /// [`Error::InvalidArgument`] for invalid cache settings.
    pub fn new(config: &JwtAuthConfig, client: HttpClient) -> Result<Self> {
        let timeout = config.timeout();
        let strategy = match config.mode {
            VerificationMode::Local => Strategy::Local(load_local_keys(&config.local)?),
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
                    .unwrap_or_else(|| "token".to_string()),
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
            mode: config.mode,
            strategy,
            client,
            cache,
        })
    }

    fn verify_local(local: &LocalKeys, token: &str) -> AuthResult {
        let Some(key) = local.key.read().clone() else {
            error!(scheme = "jwt", "Local mode has no key material loaded");
            return AuthResult::failure(server_configuration_error(
                "no JWT key material configured",
            ));
        };

        match jsonwebtoken::decode::<Map<String, Value>>(token, &key, &local.validation) {
            Ok(data) => {
                let claims = data.claims;
                let group_id = local
                    .group_claims
                    .iter()
                    .find_map(|name| claim_string(&claims, name));
                let user_id = claim_string(&claims, &local.user_claim);
                AuthResult::success(group_id, user_id)
            }
            Err(e) if matches!(e.kind(), ErrorKind::ExpiredSignature) => {
                debug!(scheme = "jwt", "Rejected expired token");
                AuthResult::failure(TOKEN_EXPIRED)
            }
            Err(e) => {
                debug!(scheme = "jwt", error = %e, "Rejected token");
                AuthResult::failure(INVALID_TOKEN)
            }
        }
    }

    async fn verify_remote(&self, check: &RemoteCheck, token: &str) -> AuthResult {
        match &self.cache {
            Some(cache) => {
                cache
                    .get_or_verify(token, || self.call_remote(check, token))
                    .await
            }
            None => self.call_remote(check, token).await,
        }
    }

    async fn call_remote(&self, check: &RemoteCheck, token: &str) -> AuthResult {
        match check {
            RemoteCheck::Introspection {
                endpoint,
                token_field,
            } => {
                let Some(endpoint) = endpoint else {
                    error!(scheme = "jwt", "Introspection endpoint not configured");
                    return AuthResult::failure(server_configuration_error(
                        "introspection endpoint not configured",
                    ));
                };
                let form = [
                    (token_field.as_str(), token),
                    ("token_type_hint", "access_token"),
                ];
                let response: std::result::Result<IntrospectionResponse, RemoteError> =
                    endpoint.post_form(&self.client, &form).await;
                match response {
                    Ok(body) if body.active => AuthResult::success(body.group(), body.user()),
                    Ok(_) => {
                        debug!(scheme = "jwt", "Introspection reported inactive token");
                        AuthResult::failure(NOT_ACTIVE)
                    }
                    Err(e) => remote_failure("introspection", &e),
                }
            }
            RemoteCheck::Custom { endpoint } => {
                let Some(endpoint) = endpoint else {
                    error!(scheme = "jwt", "Custom validation endpoint not configured");
                    return AuthResult::failure(server_configuration_error(
                        "custom validation endpoint not configured",
                    ));
                };
                let response: std::result::Result<CustomVerdict, RemoteError> = endpoint
                    .post_json(&self.client, &json!({ "token": token }))
                    .await;
                match response {
                    Ok(verdict) if verdict.valid => {
                        AuthResult::success(verdict.group_id, verdict.user_id)
                    }
                    Ok(verdict) => {
                        AuthResult::failure(verdict.error.unwrap_or_else(|| INVALID_TOKEN.to_string()))
                    }
                    Err(e) => remote_failure("custom", &e),
                }
            }
        }
    }
}

fn remote_failure(mode: &str, err: &RemoteError) -> AuthResult {
    error!(scheme = "jwt", mode, error = %err, "Remote token verification failed");
    AuthResult::failure(VALIDATION_FAILED)
}

/// Read a claim as a string; numbers are stringified, anything else ignored
fn claim_string(claims: &Map<String, Value>, name: &str) -> Option<String> {
    match claims.get(name)? {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Parse a configured algorithm name such as `HS256` or `EdDSA`
pub fn parse_algorithm(name: &str) -> Result<Algorithm> {
    Algorithm::from_str(name.trim())
        .map_err(|_| Error::KeyMaterial(format!("unsupported JWT algorithm '{name}'")))
}

fn is_hmac(alg: Algorithm) -> bool {
    matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512)
}

fn load_local_keys(local: &JwtLocalConfig) -> Result<LocalKeys> {
    let configured = local.algorithm.as_deref().map(parse_algorithm).transpose()?;

    let (key, algorithm) = if let Some(ref secret) = local.secret {
        let algorithm = configured.unwrap_or(Algorithm::HS256);
        if !is_hmac(algorithm) {
            return Err(Error::KeyMaterial(format!(
                "a shared secret requires an HMAC algorithm, got {algorithm:?}"
            )));
        }
        let secret = resolve_secret(secret).ok_or_else(|| {
            Error::KeyMaterial(format!(
                "JWT secret references an unset environment variable ({secret})"
            ))
        })?;
        (Some(DecodingKey::from_secret(secret.as_bytes())), algorithm)
    } else if let Some(pem) = read_public_key(local)? {
        let algorithm = configured.unwrap_or(Algorithm::RS256);
        (Some(decoding_key_from_pem(&pem, algorithm)?), algorithm)
    } else {
        warn!(scheme = "jwt", "Local mode configured without key material");
        (None, configured.unwrap_or(Algorithm::HS256))
    };

    let mut validation = Validation::new(algorithm);
    validation.leeway = local.leeway_seconds;
    if let Some(ref issuer) = local.issuer {
        validation.set_issuer(&[issuer]);
    }
    match local.audience {
        Some(ref audience) => validation.set_audience(&[audience]),
        None => validation.validate_aud = false,
    }

    Ok(LocalKeys {
        key: RwLock::new(key.map(Arc::new)),
        validation,
        group_claims: local.group_claims.clone(),
        user_claim: local.user_claim.clone(),
    })
}

fn read_public_key(local: &JwtLocalConfig) -> Result<Option<String>> {
    if let Some(ref pem) = local.public_key_pem {
        return Ok(Some(pem.clone()));
    }
    let Some(ref path) = local.public_key_path else {
        return Ok(None);
    };
    std::fs::read_to_string(path).map(Some).map_err(|e| {
        Error::KeyMaterial(format!(
            "failed to read public key {}: {e}",
            path.display()
        ))
    })
}

fn decoding_key_from_pem(pem: &str, algorithm: Algorithm) -> Result<DecodingKey> {
    let parsed = match algorithm {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => DecodingKey::from_rsa_pem(pem.as_bytes()),
        Algorithm::ES256 | Algorithm::ES384 => DecodingKey::from_ec_pem(pem.as_bytes()),
        Algorithm::EdDSA => DecodingKey::from_ed_pem(pem.as_bytes()),
        other => {
            return Err(Error::KeyMaterial(format!(
                "{other:?} cannot be used with a public key"
            )));
        }
    };
    parsed.map_err(|e| Error::KeyMaterial(format!("invalid {algorithm:?} public key: {e}")))
}

/// Extract the token from `Authorization: Bearer <token>`
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then(|| token.to_string())
}

#[async_trait]
impl CredentialVerifier for JwtVerifier {
    fn scheme(&self) -> Scheme {
        Scheme::Jwt
    }

    fn mode(&self) -> VerificationMode {
        self.mode
    }

    fn extract_credential(&self, headers: &HeaderMap) -> Option<String> {
        bearer_token(headers)
    }

    fn missing_credential_message(&self) -> String {
        MISSING_BEARER.to_string()
    }

    async fn verify(&self, credential: Option<&str>, headers: &HeaderMap) -> AuthResult {
        match (&self.strategy, credential) {
            (Strategy::Gateway(trusted), _) => identity_from_headers(headers, trusted, true),
            (_, None) => AuthResult::failure(MISSING_BEARER),
            (Strategy::Local(local), Some(token)) => Self::verify_local(local, token),
            (Strategy::Remote(check), Some(token)) => self.verify_remote(check, token).await,
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
        if let Strategy::Local(ref local) = self.strategy
            && local.key.write().take().is_some()
        {
            debug!(scheme = "jwt", "Released JWT key material");
        }
        if self.client.release() {
            warn!(scheme = "jwt", "Owned HTTP client released; remote verification disabled");
        }
    }
}
