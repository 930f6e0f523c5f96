use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::auth::{AuthState, AuthorizedClient};
use crate::http::Reply;

pub const PROFILE_PATH: &str = "/api/profile/me";

#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile is unavailable")]
    Unavailable,
    #[error("profile has an unexpected shape: {0}")]
    Shape(#[from] serde_json::Error),
}

/// The profile as returned by the server, unvalidated.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileRecord(Value);

impl ProfileRecord {
    pub fn new(value: Value) -> Self {
        Self(value)
    }

    pub fn raw(&self) -> &Value {
        &self.0
    }

    /// Reads `id` and `app.nickname.value`, failing if either is absent.
    pub fn summary(&self) -> Result<ProfileSummary, ProfileError> {
        let shape = ProfileShape::deserialize(&self.0)?;
        Ok(ProfileSummary {
            id: shape.id.to_string(),
            nickname: shape.app.nickname.value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProfileSummary {
    pub id: String,
    pub nickname: String,
}

#[derive(Deserialize)]
struct ProfileShape {
    id: ProfileId,
    app: AppSection,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ProfileId {
    Text(String),
    Number(serde_json::Number),
}

impl std::fmt::Display for ProfileId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfileId::Text(id) => f.write_str(id),
            ProfileId::Number(id) => write!(f, "{id}"),
        }
    }
}

#[derive(Deserialize)]
struct AppSection {
    nickname: Nickname,
}

#[derive(Deserialize)]
struct Nickname {
    value: String,
}

pub async fn fetch_profile(
    client: &AuthorizedClient<'_>,
    state: &mut AuthState,
) -> Option<ProfileRecord> {
    match client.get(state, PROFILE_PATH).await {
        Reply::Data(value) => Some(ProfileRecord::new(value)),
        Reply::NoData(reason) => {
            tracing::debug!(%reason, "profile not available");
            None
        }
    }
}
