//! Outbound calls to introspection and custom validation endpoints

use std::time::Duration;

use reqwest::{RequestBuilder, StatusCode, header::AUTHORIZATION};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use super::client::HttpClient;
use crate::config::resolve_secret;

/// Failure talking to a remote endpoint. Logged, never shown to callers.
#[derive(Debug, thiserror::Error)]
pub(crate) enum RemoteError {
    #[error("HTTP client has been released")]
    ClientReleased,

    #[error("request failed: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("endpoint returned HTTP {0}")]
    Status(StatusCode),

    #[error("malformed response: {0}")]
    Decode(#[source] reqwest::Error),
}

/// A configured verification endpoint
#[derive(Debug, Clone)]
pub(crate) struct RemoteEndpoint {
    url: String,
    authorization: Option<String>,
    timeout: Duration,
}

impl RemoteEndpoint {
    /// `None` when no URL is configured or its `env:` reference is unset;
    /// checked again at request time
    pub(crate) fn new(
        url: Option<&str>,
        authorization: Option<String>,
        timeout: Duration,
    ) -> Option<Self> {
        url.and_then(resolve_secret).map(|url| Self {
            url,
            authorization,
            timeout,
        })
    }

    pub(crate) async fn post_form<R: DeserializeOwned>(
        &self,
        client: &HttpClient,
        form: &[(&str, &str)],
    ) -> Result<R, RemoteError> {
        let http = client.get().ok_or(RemoteError::ClientReleased)?;
        let request = http.post(&self.url).timeout(self.timeout).form(form);
        self.send(request).await
    }

    pub(crate) async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        client: &HttpClient,
        body: &B,
    ) -> Result<R, RemoteError> {
        let http = client.get().ok_or(RemoteError::ClientReleased)?;
        let request = http.post(&self.url).timeout(self.timeout).json(body);
        self.send(request).await
    }

    async fn send<R: DeserializeOwned>(&self, mut request: RequestBuilder) -> Result<R, RemoteError> {
        if let Some(ref value) = self.authorization {
            request = request.header(AUTHORIZATION, value);
        }

        let response = request.send().await.map_err(RemoteError::Transport)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RemoteError::Status(status));
        }
        response.json::<R>().await.map_err(RemoteError::Decode)
    }
}

/// RFC 7662 introspection response (fields this crate reads)
#[derive(Debug, Deserialize)]
pub(crate) struct IntrospectionResponse {
    #[serde(default)]
    pub active: bool,
    pub group_id: Option<String>,
    pub tenant_id: Option<String>,
    pub sub: Option<String>,
    pub client_id: Option<String>,
}

impl IntrospectionResponse {
    pub(crate) fn group(&self) -> Option<String> {
        self.group_id.clone().or_else(|| self.tenant_id.clone())
    }

    pub(crate) fn user(&self) -> Option<String> {
        self.sub.clone().or_else(|| self.client_id.clone())
    }
}

/// Verdict from an application-specific validation endpoint
#[derive(Debug, Deserialize)]
pub(crate) struct CustomVerdict {
    #[serde(default)]
    pub valid: bool,
    #[serde(alias = "groupId")]
    pub group_id: Option<String>,
    #[serde(alias = "userId")]
    pub user_id: Option<String>,
    pub error: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn introspection_identity_fallbacks() {
        let response: IntrospectionResponse = serde_json::from_str(
            r#"{"active": true, "tenant_id": "t1", "client_id": "svc-7", "scope": "read"}"#,
        )
        .unwrap();
        assert!(response.active);
        assert_eq!(response.group().as_deref(), Some("t1"));
        assert_eq!(response.user().as_deref(), Some("svc-7"));
    }

    #[test]
    fn introspection_missing_active_is_inactive() {
        let response: IntrospectionResponse = serde_json::from_str("{}").unwrap();
        assert!(!response.active);
    }

    #[test]
    fn custom_verdict_accepts_camel_case() {
        let verdict: CustomVerdict =
            serde_json::from_str(r#"{"valid": true, "groupId": "g", "userId": "u"}"#).unwrap();
        assert!(verdict.valid);
        assert_eq!(verdict.group_id.as_deref(), Some("g"));
        assert_eq!(verdict.user_id.as_deref(), Some("u"));
    }

    #[test]
    fn endpoint_absent_without_url() {
        assert!(RemoteEndpoint::new(None, None, Duration::from_secs(5)).is_none());
        assert!(
            RemoteEndpoint::new(
                Some("env:AUTHGATE_TEST_UNSET_ENDPOINT_URL"),
                None,
                Duration::from_secs(5)
            )
            .is_none()
        );
    }
}
