use std::fmt;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::{Method, StatusCode};
use serde_json::Value;

pub const DEFAULT_SERVER_URL: &str = "http://localhost:3000";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// The remote rejected our credentials (HTTP 401).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("unauthorized")]
pub struct Unauthorized;

/// Why a call produced no usable payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NoData {
    Status(u16),
    Transport(String),
    InvalidBody(String),
    /// Still unauthorized after the refresh attempt.
    Unauthorized,
    /// No token is live, so no request was sent.
    MissingCredentials,
}

impl fmt::Display for NoData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NoData::Status(code) => write!(f, "status {code}"),
            NoData::Transport(err) => write!(f, "transport error: {err}"),
            NoData::InvalidBody(err) => write!(f, "invalid body: {err}"),
            NoData::Unauthorized => write!(f, "unauthorized"),
            NoData::MissingCredentials => write!(f, "no access token"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Data(Value),
    NoData(NoData),
}

/// Request-executing capability against the identity service.
#[async_trait]
pub trait Gateway: Send + Sync {
    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
    ) -> Result<Reply, Unauthorized>;

    async fn get(&self, path: &str, headers: HeaderMap) -> Result<Reply, Unauthorized> {
        self.request(Method::GET, path, headers).await
    }
}

pub fn bearer_headers(access_token: &str) -> HeaderMap {
    let mut headers = HeaderMap::new();
    match HeaderValue::from_str(&format!("Bearer {access_token}")) {
        Ok(mut value) => {
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }
        // Sent without credentials; the server answers 401.
        Err(_) => tracing::warn!("access token is not a valid header value"),
    }
    headers
}

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("authboot/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl Gateway for ApiClient {
    async fn request(
        &self,
        method: Method,
        path: &str,
        headers: HeaderMap,
    ) -> Result<Reply, Unauthorized> {
        let url = self.url(path);
        tracing::debug!(%method, %url, "sending request");

        let response = match self.http.request(method, &url).headers(headers).send().await {
            Ok(response) => response,
            Err(err) => return Ok(Reply::NoData(NoData::Transport(err.to_string()))),
        };

        match response.status() {
            StatusCode::OK => match response.json::<Value>().await {
                Ok(body) => Ok(Reply::Data(body)),
                Err(err) => Ok(Reply::NoData(NoData::InvalidBody(err.to_string()))),
            },
            StatusCode::UNAUTHORIZED => Err(Unauthorized),
            status => Ok(Reply::NoData(NoData::Status(status.as_u16()))),
        }
    }
}
