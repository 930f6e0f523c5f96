use std::fmt;

use uuid::Uuid;

/// Hex digits kept from the UUID. The first 12 carry no version bits.
const SESSION_ID_LEN: usize = 12;

/// Correlates one external login attempt with the server. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    pub fn generate() -> Self {
        let mut id = Uuid::new_v4().simple().to_string();
        id.truncate(SESSION_ID_LEN);
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The id as it appears in a `?session=` query.
    pub fn query_value(&self) -> String {
        urlencoding::encode(self.as_str()).into_owned()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
