//! Login flow: resume a cached token, or drive an external browser login.
//!
//! Both paths converge on [`AuthState::Authenticated`] followed by a single
//! profile fetch. The external path polls the server until the browser side
//! of the handshake completes, and is the only path that writes the token
//! file.

use std::future::Future;
use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use reqwest::header::HeaderMap;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::auth::{AuthState, AuthorizedClient, TokenRefresher};
use crate::browser::UrlOpener;
use crate::http::{Gateway, NoData, Reply, Unauthorized};
use crate::profile::{fetch_profile, ProfileRecord};
use crate::session::SessionId;
use crate::token_store::{TokenRecord, TokenStore};
use crate::ui::{pick_one, print_command_status, with_spinner, CommandStatus};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(3);
const BACKOFF_MAX_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum LoginError {
    #[error("could not list login platforms: {0}")]
    PlatformsUnavailable(NoData),
    #[error("login platform list is malformed: {0}")]
    MalformedPlatforms(#[source] serde_json::Error),
    #[error("server offered no login platforms")]
    NoPlatforms,
    #[error("unknown login platform '{name}' (available: {})", available.join(", "))]
    UnknownPlatform { name: String, available: Vec<String> },
    #[error("platform selection failed: {0}")]
    Selection(String),
    #[error("login cancelled")]
    Cancelled,
    #[error("login did not complete within {}s", .0.as_secs())]
    TimedOut(Duration),
    #[error("login did not complete after {0} polls")]
    PollLimit(u32),
    #[error("token storage failed: {0:#}")]
    Storage(anyhow::Error),
}

/// A social platform the server can delegate the login to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Platform {
    pub name: String,
    #[serde(rename = "authorizationUri")]
    pub authorization_uri: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlatformChoice {
    #[default]
    First,
    Named(String),
    Interactive,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
    pub timeout: Option<Duration>,
    pub backoff: bool,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            max_attempts: None,
            timeout: None,
            backoff: false,
        }
    }
}

impl PollSettings {
    fn cadence(&self) -> Cadence {
        if !self.backoff {
            return Cadence::Fixed(self.interval);
        }
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.interval)
            .with_max_interval(BACKOFF_MAX_INTERVAL.max(self.interval))
            .with_max_elapsed_time(None)
            .build();
        Cadence::Backoff(Box::new(backoff))
    }
}

enum Cadence {
    Fixed(Duration),
    Backoff(Box<ExponentialBackoff>),
}

impl Cadence {
    fn next_delay(&mut self) -> Duration {
        match self {
            Cadence::Fixed(interval) => *interval,
            Cadence::Backoff(backoff) => backoff
                .next_backoff()
                .unwrap_or(backoff.max_interval),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginPath {
    CachedToken,
    ExternalLogin,
}

#[derive(Debug)]
pub struct LoginOutcome {
    pub path: LoginPath,
    /// `None` when the profile call after a fresh login produced no data.
    pub profile: Option<ProfileRecord>,
    pub polls: u32,
}

pub struct LoginFlow<'a> {
    gateway: &'a dyn Gateway,
    opener: &'a dyn UrlOpener,
    refresher: &'a dyn TokenRefresher,
    store: &'a TokenStore,
    polling: PollSettings,
    platform: PlatformChoice,
    cancel: CancellationToken,
}

impl<'a> LoginFlow<'a> {
    pub fn new(
        gateway: &'a dyn Gateway,
        opener: &'a dyn UrlOpener,
        refresher: &'a dyn TokenRefresher,
        store: &'a TokenStore,
    ) -> Self {
        Self {
            gateway,
            opener,
            refresher,
            store,
            polling: PollSettings::default(),
            platform: PlatformChoice::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_polling(mut self, polling: PollSettings) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_platform(mut self, platform: PlatformChoice) -> Self {
        self.platform = platform;
        self
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub async fn run(&self, state: &mut AuthState) -> Result<LoginOutcome, LoginError> {
        if let Some(profile) = self.resume_cached(state).await? {
            return Ok(LoginOutcome {
                path: LoginPath::CachedToken,
                profile: Some(profile),
                polls: 0,
            });
        }

        let polls = self.login_external(state).await?;
        let client = self.client();
        let profile = self.unless_cancelled(fetch_profile(&client, state)).await?;
        Ok(LoginOutcome {
            path: LoginPath::ExternalLogin,
            profile,
            polls,
        })
    }

    fn client(&self) -> AuthorizedClient<'a> {
        AuthorizedClient::new(self.gateway, self.refresher)
    }

    /// Races a server call against Ctrl-C.
    async fn unless_cancelled<T>(&self, call: impl Future<Output = T>) -> Result<T, LoginError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(LoginError::Cancelled),
            value = call => Ok(value),
        }
    }

    async fn resume_cached(
        &self,
        state: &mut AuthState,
    ) -> Result<Option<ProfileRecord>, LoginError> {
        let Some(token) = self.store.load().map_err(LoginError::Storage)? else {
            return Ok(None);
        };

        *state = AuthState::Authenticated(token);
        let client = self.client();
        let profile = match self.unless_cancelled(fetch_profile(&client, state)).await {
            Ok(profile) => profile,
            Err(err) => {
                *state = AuthState::Unauthenticated;
                return Err(err);
            }
        };
        match profile {
            Some(profile) => {
                tracing::info!("resumed session from cached token");
                Ok(Some(profile))
            }
            None => {
                tracing::info!("cached token was not accepted, falling back to external login");
                *state = AuthState::Unauthenticated;
                Ok(None)
            }
        }
    }

    async fn login_external(&self, state: &mut AuthState) -> Result<u32, LoginError> {
        if self.cancel.is_cancelled() {
            return Err(LoginError::Cancelled);
        }
        let session = SessionId::generate();
        tracing::debug!(%session, "starting external login");
        *state = AuthState::PendingExternalLogin(session.clone());

        let platforms = self.list_platforms(&session).await?;
        let platform = self.choose_platform(&platforms)?;

        // An interactive pick can outlast a Ctrl-C.
        if self.cancel.is_cancelled() {
            return Err(LoginError::Cancelled);
        }
        if let Err(err) = self.opener.open(&platform.authorization_uri) {
            print_command_status(
                CommandStatus::Warning,
                &format!("Failed to open browser: {err:#}"),
            );
        }

        let (token, polls) = with_spinner(
            &format!("Waiting for {} login to complete...", platform.name),
            self.await_token(&session),
        )
        .await?;

        self.store.save(&token).map_err(LoginError::Storage)?;
        *state = AuthState::Authenticated(token);
        tracing::info!(polls, "external login completed");
        Ok(polls)
    }

    async fn list_platforms(&self, session: &SessionId) -> Result<Vec<Platform>, LoginError> {
        let path = format!("/login/all?session={}", session.query_value());
        let listing = self.gateway.get(&path, HeaderMap::new());
        let body = match self.unless_cancelled(listing).await? {
            Ok(Reply::Data(body)) => body,
            Ok(Reply::NoData(reason)) => return Err(LoginError::PlatformsUnavailable(reason)),
            Err(Unauthorized) => return Err(LoginError::PlatformsUnavailable(NoData::Unauthorized)),
        };

        let platforms: Vec<Platform> =
            serde_json::from_value(body).map_err(LoginError::MalformedPlatforms)?;
        if platforms.is_empty() {
            return Err(LoginError::NoPlatforms);
        }

        let names: Vec<&str> = platforms.iter().map(|p| p.name.as_str()).collect();
        tracing::info!(platforms = ?names, "login platforms available");
        eprintln!("Login platforms: {}", names.join(", "));
        Ok(platforms)
    }

    fn choose_platform<'p>(&self, platforms: &'p [Platform]) -> Result<&'p Platform, LoginError> {
        match &self.platform {
            PlatformChoice::First => platforms.first().ok_or(LoginError::NoPlatforms),
            PlatformChoice::Named(name) => platforms
                .iter()
                .find(|p| p.name.eq_ignore_ascii_case(name))
                .ok_or_else(|| LoginError::UnknownPlatform {
                    name: name.clone(),
                    available: platforms.iter().map(|p| p.name.clone()).collect(),
                }),
            PlatformChoice::Interactive => {
                let names: Vec<&str> = platforms.iter().map(|p| p.name.as_str()).collect();
                let index = pick_one("Sign in with", &names)
                    .map_err(|err| LoginError::Selection(err.to_string()))?;
                Ok(&platforms[index])
            }
        }
    }

    async fn await_token(&self, session: &SessionId) -> Result<(TokenRecord, u32), LoginError> {
        let polling = self.poll_until_token(session);
        match self.polling.timeout {
            Some(limit) => tokio::time::timeout(limit, polling)
                .await
                .map_err(|_| LoginError::TimedOut(limit))?,
            None => polling.await,
        }
    }

    async fn poll_until_token(
        &self,
        session: &SessionId,
    ) -> Result<(TokenRecord, u32), LoginError> {
        let path = format!("/login/external?session={}", session.query_value());
        let mut cadence = self.polling.cadence();
        let mut attempts = 0u32;

        loop {
            if self.polling.max_attempts.is_some_and(|max| attempts >= max) {
                return Err(LoginError::PollLimit(attempts));
            }

            let delay = cadence.next_delay();
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(LoginError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }

            attempts += 1;
            match self.gateway.get(&path, HeaderMap::new()).await {
                Ok(Reply::Data(body)) => match TokenRecord::from_value(body) {
                    Ok(token) => return Ok((token, attempts)),
                    Err(err) => {
                        tracing::warn!(attempt = attempts, %err, "login status is not a token")
                    }
                },
                Ok(Reply::NoData(reason)) => {
                    tracing::debug!(attempt = attempts, %reason, "waiting for user")
                }
                Err(Unauthorized) => {
                    tracing::debug!(attempt = attempts, "login status unauthorized")
                }
            }
        }
    }
}
