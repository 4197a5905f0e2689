//! Outbound HTTP client with explicit ownership
//!
//! A verifier either borrows a client shared by the host application (which it
//! must never close) or builds and owns one (which it releases on shutdown).

use parking_lot::RwLock;
use tracing::debug;

use crate::Result;

/// Who is responsible for releasing the client
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientOwnership {
    /// Injected by the host; never released here
    Shared,
    /// Built by this component; released on shutdown
    Owned,
}

/// Handle to the `reqwest` client used for introspection and custom endpoints
#[derive(Debug)]
pub struct HttpClient {
    inner: RwLock<Option<reqwest::Client>>,
    ownership: ClientOwnership,
}

impl HttpClient {
    /// Borrow a client shared with the rest of the application
    #[must_use]
    pub fn shared(client: reqwest::Client) -> Self {
        Self {
            inner: RwLock::new(Some(client)),
            ownership: ClientOwnership::Shared,
        }
    }

    /// Build a dedicated client owned by this handle
    pub fn owned() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("authgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            inner: RwLock::new(Some(client)),
            ownership: ClientOwnership::Owned,
        })
    }

    /// Ownership marker
    #[must_use]
    pub fn ownership(&self) -> ClientOwnership {
        self.ownership
    }

    /// Clone of the underlying client, or `None` once an owned client is released.
    ///
    /// Callers hold their own clone for the duration of a request, so a
    /// concurrent [`release`](Self::release) never pulls the client out from
    /// under an in-flight call.
    pub fn get(&self) -> Option<reqwest::Client> {
        self.inner.read().clone()
    }

    /// Release an owned client. Returns `true` only for the call that dropped it.
    ///
    /// Shared clients are left untouched.
    pub fn release(&self) -> bool {
        if self.ownership == ClientOwnership::Shared {
            return false;
        }
        let released = self.inner.write().take().is_some();
        if released {
            debug!("Released owned HTTP client");
        }
        released
    }

    /// Whether an owned client has been released
    #[must_use]
    pub fn is_released(&self) -> bool {
        self.inner.read().is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_client_is_never_released() {
        let client = HttpClient::shared(reqwest::Client::new());
        assert_eq!(client.ownership(), ClientOwnership::Shared);
        assert!(!client.release());
        assert!(client.get().is_some());
    }

    #[test]
    fn owned_client_released_exactly_once() {
        let client = HttpClient::owned().unwrap();
        assert_eq!(client.ownership(), ClientOwnership::Owned);
        assert!(client.release());
        assert!(!client.release());
        assert!(client.is_released());
        assert!(client.get().is_none());
    }
}
