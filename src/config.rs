//! Configuration management

use std::{
    collections::HashMap,
    env, fmt,
    path::{Path, PathBuf},
    time::Duration,
};

use base64::Engine;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Error, Result};

/// Lower bound for outbound verification timeouts (seconds)
pub const MIN_TIMEOUT_SECONDS: u64 = 1;
/// Upper bound for outbound verification timeouts (seconds)
pub const MAX_TIMEOUT_SECONDS: u64 = 300;

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,
    /// Authentication configuration
    pub auth: AuthConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Interval between background sweeps of expired cache entries
    pub cache_cleanup_interval_seconds: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39500,
            cache_cleanup_interval_seconds: 60,
        }
    }
}

/// Authentication configuration for both credential schemes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Path prefixes that bypass authentication
    pub bypass_paths: Vec<String>,
    /// API key scheme
    pub api_key: ApiKeyAuthConfig,
    /// JWT bearer scheme
    pub jwt: JwtAuthConfig,
}

fn default_bypass_paths() -> Vec<String> {
    vec![
        "/health".to_string(),
        "/metrics".to_string(),
        "/ready".to_string(),
    ]
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            bypass_paths: default_bypass_paths(),
            api_key: ApiKeyAuthConfig::default(),
            jwt: JwtAuthConfig::default(),
        }
    }
}

/// Verification strategy for a credential scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VerificationMode {
    /// Check against locally configured key material
    #[default]
    Local,
    /// Trust identity headers injected by an upstream gateway
    Gateway,
    /// RFC 7662 style token introspection endpoint
    Introspection,
    /// Application-specific validation endpoint
    Custom,
}

impl VerificationMode {
    /// Whether this mode performs an outbound HTTP call
    #[must_use]
    pub fn is_remote(self) -> bool {
        matches!(self, Self::Introspection | Self::Custom)
    }

    /// Lowercase name as used in configuration files
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Gateway => "gateway",
            Self::Introspection => "introspection",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for VerificationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result cache settings for remote verification modes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Cache successful remote verifications
    pub enabled: bool,
    /// Lifetime of a cached verdict
    pub ttl_seconds: u64,
    /// Maximum number of cached verdicts before LRU eviction
    pub max_size: usize,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_seconds: 300,
            max_size: 10_000,
        }
    }
}

impl CacheSettings {
    /// TTL as a [`Duration`]
    #[must_use]
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Header names trusted in gateway mode
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayHeaders {
    /// Header carrying the tenant/group id
    pub group_id_header: String,
    /// Header carrying the user id
    pub user_id_header: String,
}

impl Default for GatewayHeaders {
    fn default() -> Self {
        Self {
            group_id_header: "X-Group-Id".to_string(),
            user_id_header: "X-User-Id".to_string(),
        }
    }
}

/// Introspection endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct IntrospectionConfig {
    /// Endpoint URL
    pub endpoint: Option<String>,
    /// Form field carrying the credential (scheme default when unset)
    pub token_field: Option<String>,
    /// Pre-built `Authorization` header value for the endpoint (supports `env:VAR`)
    pub authorization: Option<String>,
    /// Client id for Basic authentication against the endpoint
    pub client_id: Option<String>,
    /// Client secret for Basic authentication (supports `env:VAR`)
    pub client_secret: Option<String>,
}

impl IntrospectionConfig {
    fn check_references(&self, scheme: &str) -> Result<()> {
        require_resolved(scheme, "introspection.authorization", self.authorization.as_deref())?;
        require_resolved(scheme, "introspection.client_secret", self.client_secret.as_deref())
    }

    /// Resolve the `Authorization` header sent to the introspection endpoint.
    ///
    /// A pre-built value wins over client credentials. Unresolvable
    /// `env:` references yield no header.
    #[must_use]
    pub fn authorization_header(&self) -> Option<String> {
        if let Some(ref value) = self.authorization {
            return resolve_secret(value);
        }
        match (&self.client_id, &self.client_secret) {
            (Some(id), Some(secret)) => {
                let pair = format!("{id}:{}", resolve_secret(secret)?);
                Some(format!(
                    "Basic {}",
                    base64::engine::general_purpose::STANDARD.encode(pair)
                ))
            }
            _ => None,
        }
    }
}

/// Custom validation endpoint settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct CustomEndpointConfig {
    /// Endpoint URL
    pub endpoint: Option<String>,
    /// Optional `Authorization` header value (supports `env:VAR`)
    pub authorization: Option<String>,
}

/// API key scheme configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeyAuthConfig {
    /// Enable API key authentication
    pub enabled: bool,
    /// Verification mode
    pub mode: VerificationMode,
    /// Request header carrying the key
    pub header_name: String,
    /// Local mode: key value (supports `env:VAR`) to group id
    pub keys: HashMap<String, String>,
    /// Gateway mode trusted headers
    pub gateway: GatewayHeaders,
    /// Introspection mode settings
    pub introspection: IntrospectionConfig,
    /// Custom mode settings
    pub custom: CustomEndpointConfig,
    /// Timeout for outbound verification calls
    pub timeout_seconds: u64,
    /// Verdict cache for remote modes
    pub cache: CacheSettings,
}

impl Default for ApiKeyAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: VerificationMode::Local,
            header_name: "X-API-Key".to_string(),
            keys: HashMap::new(),
            gateway: GatewayHeaders::default(),
            introspection: IntrospectionConfig::default(),
            custom: CustomEndpointConfig::default(),
            timeout_seconds: 5,
            cache: CacheSettings::default(),
        }
    }
}

impl ApiKeyAuthConfig {
    /// Resolve configured keys (expand `env:VAR` references).
    ///
    /// Keys whose reference does not resolve are dropped.
    #[must_use]
    pub fn resolved_keys(&self) -> HashMap<String, String> {
        self.keys
            .iter()
            .filter_map(|(key, group)| resolve_secret(key).map(|key| (key, group.clone())))
            .collect()
    }

    /// Outbound timeout as a [`Duration`]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn endpoint(&self) -> Option<&str> {
        match self.mode {
            VerificationMode::Introspection => self.introspection.endpoint.as_deref(),
            VerificationMode::Custom => self.custom.endpoint.as_deref(),
            VerificationMode::Local | VerificationMode::Gateway => None,
        }
    }

    /// Validate this scheme's settings
    pub fn validate(&self) -> Result<()> {
        validate_scheme(
            "api_key",
            self.mode,
            !self.keys.is_empty(),
            self.endpoint(),
            self.timeout_seconds,
            &self.cache,
        )?;
        if self.header_name.trim().is_empty() {
            return Err(Error::config("api_key.header_name must not be empty"));
        }
        match self.mode {
            VerificationMode::Local => {
                for key in self.keys.keys() {
                    require_resolved("api_key", "keys", Some(key.as_str()))?;
                }
            }
            VerificationMode::Introspection => {
                self.introspection.check_references("api_key")?;
            }
            VerificationMode::Custom => {
                require_resolved("api_key", "custom.authorization", self.custom.authorization.as_deref())?;
            }
            VerificationMode::Gateway => {}
        }
        Ok(())
    }
}

/// Local-mode JWT key material and claim mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtLocalConfig {
    /// Signing algorithm (defaults to HS256 for secrets, RS256 for public keys)
    pub algorithm: Option<String>,
    /// Shared HMAC secret (supports `env:VAR`)
    pub secret: Option<String>,
    /// Inline PEM public key
    pub public_key_pem: Option<String>,
    /// Path to a PEM public key
    pub public_key_path: Option<PathBuf>,
    /// Required `iss` claim
    pub issuer: Option<String>,
    /// Required `aud` claim
    pub audience: Option<String>,
    /// Clock skew tolerance
    pub leeway_seconds: u64,
    /// Claims searched in order for the group id
    pub group_claims: Vec<String>,
    /// Claim holding the user id
    pub user_claim: String,
}

impl Default for JwtLocalConfig {
    fn default() -> Self {
        Self {
            algorithm: None,
            secret: None,
            public_key_pem: None,
            public_key_path: None,
            issuer: None,
            audience: None,
            leeway_seconds: 60,
            group_claims: vec!["group_id".to_string(), "tenant_id".to_string()],
            user_claim: "sub".to_string(),
        }
    }
}

impl JwtLocalConfig {
    /// Whether any key material is configured
    #[must_use]
    pub fn has_key_material(&self) -> bool {
        self.secret.is_some() || self.public_key_pem.is_some() || self.public_key_path.is_some()
    }
}

/// JWT bearer scheme configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct JwtAuthConfig {
    /// Enable JWT authentication
    pub enabled: bool,
    /// Verification mode
    pub mode: VerificationMode,
    /// Local mode settings
    pub local: JwtLocalConfig,
    /// Gateway mode trusted headers
    pub gateway: GatewayHeaders,
    /// Introspection mode settings
    pub introspection: IntrospectionConfig,
    /// Custom mode settings
    pub custom: CustomEndpointConfig,
    /// Timeout for outbound verification calls
    pub timeout_seconds: u64,
    /// Verdict cache for remote modes
    pub cache: CacheSettings,
}

impl Default for JwtAuthConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            mode: VerificationMode::Local,
            local: JwtLocalConfig::default(),
            gateway: GatewayHeaders::default(),
            introspection: IntrospectionConfig::default(),
            custom: CustomEndpointConfig::default(),
            timeout_seconds: 5,
            cache: CacheSettings::default(),
        }
    }
}

impl JwtAuthConfig {
    /// Outbound timeout as a [`Duration`]
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    fn endpoint(&self) -> Option<&str> {
        match self.mode {
            VerificationMode::Introspection => self.introspection.endpoint.as_deref(),
            VerificationMode::Custom => self.custom.endpoint.as_deref(),
            VerificationMode::Local | VerificationMode::Gateway => None,
        }
    }

    /// Validate this scheme's settings
    pub fn validate(&self) -> Result<()> {
        validate_scheme(
            "jwt",
            self.mode,
            self.local.has_key_material(),
            self.endpoint(),
            self.timeout_seconds,
            &self.cache,
        )?;
        match self.mode {
            VerificationMode::Local => {
                require_resolved("jwt", "local.secret", self.local.secret.as_deref())
            }
            VerificationMode::Introspection => self.introspection.check_references("jwt"),
            VerificationMode::Custom => {
                require_resolved("jwt", "custom.authorization", self.custom.authorization.as_deref())
            }
            VerificationMode::Gateway => Ok(()),
        }
    }
}

fn validate_scheme(
    scheme: &str,
    mode: VerificationMode,
    has_local_material: bool,
    endpoint: Option<&str>,
    timeout_seconds: u64,
    cache: &CacheSettings,
) -> Result<()> {
    match mode {
        VerificationMode::Local if !has_local_material => {
            return Err(Error::config(format!(
                "{scheme}: local mode requires key material"
            )));
        }
        VerificationMode::Introspection | VerificationMode::Custom => {
            let Some(endpoint) = endpoint else {
                return Err(Error::config(format!(
                    "{scheme}: {mode} mode requires an endpoint URL"
                )));
            };
            require_resolved(scheme, "endpoint", Some(endpoint))?;
            let resolved = resolve_secret(endpoint).unwrap_or_default();
            let url = Url::parse(&resolved).map_err(|e| {
                Error::config(format!("{scheme}: invalid {mode} endpoint '{endpoint}': {e}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") {
                return Err(Error::config(format!(
                    "{scheme}: {mode} endpoint must use http or https"
                )));
            }
        }
        VerificationMode::Local | VerificationMode::Gateway => {}
    }

    if !(MIN_TIMEOUT_SECONDS..=MAX_TIMEOUT_SECONDS).contains(&timeout_seconds) {
        return Err(Error::config(format!(
            "{scheme}: timeout_seconds must be between {MIN_TIMEOUT_SECONDS} and {MAX_TIMEOUT_SECONDS}, got {timeout_seconds}"
        )));
    }

    if mode.is_remote() && cache.enabled {
        if cache.ttl_seconds < 1 {
            return Err(Error::config(format!(
                "{scheme}: cache.ttl_seconds must be at least 1"
            )));
        }
        if cache.max_size < 1 {
            return Err(Error::config(format!(
                "{scheme}: cache.max_size must be at least 1"
            )));
        }
    }

    Ok(())
}

/// Resolve a secret value, expanding an `env:VAR_NAME` reference.
///
/// Returns `None` if the variable is unset or empty. The reference text is
/// never used as the secret itself.
#[must_use]
pub fn resolve_secret(value: &str) -> Option<String> {
    match value.strip_prefix("env:") {
        Some(var_name) => env::var(var_name).ok().filter(|v| !v.is_empty()),
        None => Some(value.to_string()),
    }
}

/// Fail if a configured value is an `env:` reference that does not resolve
fn require_resolved(scheme: &str, field: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(reference) if resolve_secret(reference).is_none() => Err(Error::config(format!(
            "{scheme}: {field} references an unset environment variable ({reference})"
        ))),
        _ => Ok(()),
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist or cannot be parsed.
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

        // AUTHGATE_AUTH__JWT__MODE=gateway -> auth.jwt.mode
        figment = figment.merge(Env::prefixed("AUTHGATE_").split("__"));

        figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))
    }

    /// Validate every enabled scheme. Must pass before any guard is built.
    pub fn validate(&self) -> Result<()> {
        if self.auth.api_key.enabled {
            self.auth.api_key.validate()?;
        }
        if self.auth.jwt.enabled {
            self.auth.jwt.validate()?;
        }
        if self.server.cache_cleanup_interval_seconds == 0 {
            return Err(Error::config(
                "server.cache_cleanup_interval_seconds must be at least 1",
            ));
        }
        Ok(())
    }
}
