use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::http::{bearer_headers, Gateway, NoData, Reply, Unauthorized};
use crate::session::SessionId;
use crate::token_store::{Stored, TokenRecord, TokenStore};

/// Where the process stands with the identity service.
///
/// At most one token is live; it is replaced wholesale on (re)login or refresh.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum AuthState {
    #[default]
    Unauthenticated,
    PendingExternalLogin(SessionId),
    Authenticated(TokenRecord),
}

impl AuthState {
    pub fn token(&self) -> Option<&TokenRecord> {
        match self {
            AuthState::Authenticated(token) => Some(token),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthState::Authenticated(_))
    }
}

#[derive(Debug, PartialEq)]
pub enum Refresh {
    Refreshed(TokenRecord),
    Failed(String),
    /// No refresh mechanism exists; the caller must log in again.
    Unsupported,
}

/// Obtains a replacement for a token the server rejected.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, expired: &TokenRecord) -> Refresh;
}

/// Expired tokens force a full re-login.
pub struct NoRefresh;

#[async_trait]
impl TokenRefresher for NoRefresh {
    async fn refresh(&self, _expired: &TokenRecord) -> Refresh {
        Refresh::Unsupported
    }
}

/// Picks up a token another process saved since ours was loaded.
pub struct ReloadFromDisk {
    store: TokenStore,
}

impl ReloadFromDisk {
    pub fn new(store: TokenStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl TokenRefresher for ReloadFromDisk {
    async fn refresh(&self, expired: &TokenRecord) -> Refresh {
        match self.store.inspect() {
            Ok(Stored::Found(token)) if token.access_token != expired.access_token => {
                Refresh::Refreshed(token)
            }
            Ok(Stored::Found(_)) => Refresh::Failed("no newer token on disk".to_string()),
            Ok(Stored::Missing) => Refresh::Failed("token file is gone".to_string()),
            Ok(Stored::Malformed(reason)) => Refresh::Failed(reason),
            Err(err) => Refresh::Failed(format!("{err:#}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshStrategy {
    /// Expired tokens force a new browser login
    #[default]
    None,
    /// Re-read the token file and retry if it changed
    Reload,
}

impl RefreshStrategy {
    pub fn build(self, store: &TokenStore) -> Box<dyn TokenRefresher> {
        match self {
            RefreshStrategy::None => Box::new(NoRefresh),
            RefreshStrategy::Reload => Box::new(ReloadFromDisk::new(store.clone())),
        }
    }
}

/// Sends requests on behalf of the live token, refreshing it once on 401.
pub struct AuthorizedClient<'a> {
    gateway: &'a dyn Gateway,
    refresher: &'a dyn TokenRefresher,
}

impl<'a> AuthorizedClient<'a> {
    pub fn new(gateway: &'a dyn Gateway, refresher: &'a dyn TokenRefresher) -> Self {
        Self { gateway, refresher }
    }

    pub async fn get(&self, state: &mut AuthState, path: &str) -> Reply {
        let Some(token) = state.token().cloned() else {
            return Reply::NoData(NoData::MissingCredentials);
        };

        match self.send(&token, path).await {
            Ok(reply) => return reply,
            Err(Unauthorized) => {
                tracing::debug!(path, "request unauthorized, attempting refresh");
            }
        }

        let refreshed = match self.refresher.refresh(&token).await {
            Refresh::Refreshed(refreshed) => refreshed,
            Refresh::Failed(reason) => {
                tracing::info!(%reason, "token refresh failed");
                return Reply::NoData(NoData::Unauthorized);
            }
            Refresh::Unsupported => {
                tracing::debug!("token refresh unsupported");
                return Reply::NoData(NoData::Unauthorized);
            }
        };

        *state = AuthState::Authenticated(refreshed.clone());
        match self.send(&refreshed, path).await {
            Ok(reply) => reply,
            Err(Unauthorized) => Reply::NoData(NoData::Unauthorized),
        }
    }

    async fn send(&self, token: &TokenRecord, path: &str) -> Result<Reply, Unauthorized> {
        self.gateway
            .get(path, bearer_headers(&token.access_token))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{HeaderMap, AUTHORIZATION};
    use reqwest::Method;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Answers 401 unless the bearer matches `accepted`.
    struct StubGateway {
        accepted: Option<String>,
        seen: Mutex<Vec<String>>,
    }

    impl StubGateway {
        fn accepting(token: Option<&str>) -> Self {
            Self {
                accepted: token.map(str::to_string),
                seen: Mutex::new(Vec::new()),
            }
        }

        fn requests(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Gateway for StubGateway {
        async fn request(
            &self,
            _method: Method,
            _path: &str,
            headers: HeaderMap,
        ) -> Result<Reply, Unauthorized> {
            let auth = headers
                .get(AUTHORIZATION)
                .and_then(|v| v.to_str().ok())
                .unwrap_or_default()
                .to_string();
            self.seen.lock().unwrap().push(auth.clone());
            match &self.accepted {
                Some(token) if auth == format!("Bearer {token}") => {
                    Ok(Reply::Data(json!({"ok": true})))
                }
                _ => Err(Unauthorized),
            }
        }
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        outcome: Option<TokenRecord>,
    }

    impl CountingRefresher {
        fn new(outcome: Option<TokenRecord>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                outcome,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(&self, _expired: &TokenRecord) -> Refresh {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match &self.outcome {
                Some(token) => Refresh::Refreshed(token.clone()),
                None => Refresh::Failed("nothing to refresh with".to_string()),
            }
        }
    }

    #[tokio::test]
    async fn test_attaches_bearer_from_state() {
        let gateway = StubGateway::accepting(Some("good"));
        let refresher = CountingRefresher::new(None);
        let client = AuthorizedClient::new(&gateway, &refresher);
        let mut state = AuthState::Authenticated(TokenRecord::new("good"));

        let reply = client.get(&mut state, "/api/profile/me").await;
        assert_eq!(reply, Reply::Data(json!({"ok": true})));
        assert_eq!(gateway.requests(), vec!["Bearer good"]);
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_always_unauthorized_refreshes_exactly_once() {
        let gateway = StubGateway::accepting(None);
        let refresher = CountingRefresher::new(Some(TokenRecord::new("also-bad")));
        let client = AuthorizedClient::new(&gateway, &refresher);
        let mut state = AuthState::Authenticated(TokenRecord::new("bad"));

        let reply = client.get(&mut state, "/api/profile/me").await;
        assert_eq!(reply, Reply::NoData(NoData::Unauthorized));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_does_not_retry() {
        let gateway = StubGateway::accepting(None);
        let refresher = CountingRefresher::new(None);
        let client = AuthorizedClient::new(&gateway, &refresher);
        let mut state = AuthState::Authenticated(TokenRecord::new("bad"));

        let reply = client.get(&mut state, "/api/profile/me").await;
        assert_eq!(reply, Reply::NoData(NoData::Unauthorized));
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_unsupported_refresh_gives_up_immediately() {
        let gateway = StubGateway::accepting(None);
        let client = AuthorizedClient::new(&gateway, &NoRefresh);
        let mut state = AuthState::Authenticated(TokenRecord::new("bad"));

        let reply = client.get(&mut state, "/api/profile/me").await;
        assert_eq!(reply, Reply::NoData(NoData::Unauthorized));
        assert_eq!(gateway.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_successful_refresh_replaces_live_token() {
        let gateway = StubGateway::accepting(Some("fresh"));
        let refresher = CountingRefresher::new(Some(TokenRecord::new("fresh")));
        let client = AuthorizedClient::new(&gateway, &refresher);
        let mut state = AuthState::Authenticated(TokenRecord::new("stale"));

        let reply = client.get(&mut state, "/api/profile/me").await;
        assert_eq!(reply, Reply::Data(json!({"ok": true})));
        assert_eq!(state, AuthState::Authenticated(TokenRecord::new("fresh")));
        assert_eq!(gateway.requests(), vec!["Bearer stale", "Bearer fresh"]);
    }

    #[tokio::test]
    async fn test_missing_token_sends_nothing() {
        let gateway = StubGateway::accepting(Some("good"));
        let client = AuthorizedClient::new(&gateway, &NoRefresh);
        let mut state = AuthState::Unauthenticated;

        let reply = client.get(&mut state, "/api/profile/me").await;
        assert_eq!(reply, Reply::NoData(NoData::MissingCredentials));
        assert!(gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_reload_from_disk_requires_a_different_token() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().join("token.json"));
        let refresher = ReloadFromDisk::new(store.clone());
        let expired = TokenRecord::new("old");

        assert!(matches!(refresher.refresh(&expired).await, Refresh::Failed(_)));

        store.save(&expired).unwrap();
        assert!(matches!(refresher.refresh(&expired).await, Refresh::Failed(_)));

        store.save(&TokenRecord::new("new")).unwrap();
        assert_eq!(
            refresher.refresh(&expired).await,
            Refresh::Refreshed(TokenRecord::new("new"))
        );
    }
}
