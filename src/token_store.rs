//! Local persistence for the token issued by the identity service.
//!
//! The file holds the record exactly as the server sent it, pretty-printed.
//! A missing or unreadable record is never an error: the caller simply falls
//! back to a fresh external login.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_TOKEN_FILE: &str = "./save/token.json";

/// Credential bundle issued by the identity service.
///
/// Only `accessToken` is interpreted; every other field is kept verbatim so
/// the file round-trips unchanged.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
    #[serde(rename = "accessToken")]
    pub access_token: String,
    #[serde(flatten)]
    pub metadata: Map<String, Value>,
}

impl TokenRecord {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            metadata: Map::new(),
        }
    }

    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }
}

impl fmt::Debug for TokenRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenRecord")
            .field("access_token", &mask_token(&self.access_token))
            .field("metadata", &self.metadata.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub fn mask_token(token: &str) -> String {
    if token.len() <= 8 || !token.is_ascii() {
        return "***".to_string();
    }
    format!("{}...{}", &token[..4], &token[token.len() - 4..])
}

/// Result of reading the token file, with the reason kept when it is unusable.
#[derive(Debug, PartialEq)]
pub enum Stored {
    Found(TokenRecord),
    Missing,
    Malformed(String),
}

#[derive(Debug, Clone)]
pub struct TokenStore {
    path: PathBuf,
}

impl TokenStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn inspect(&self) -> Result<Stored> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Stored::Missing),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Ok(Stored::Malformed(e.to_string()))
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("failed to read {}", self.path.display()))
            }
        };

        match serde_json::from_str::<TokenRecord>(&contents) {
            Ok(token) => Ok(Stored::Found(token)),
            Err(e) => Ok(Stored::Malformed(e.to_string())),
        }
    }

    pub fn load(&self) -> Result<Option<TokenRecord>> {
        match self.inspect()? {
            Stored::Found(token) => {
                tracing::debug!(path = %self.path.display(), "loaded cached token");
                Ok(Some(token))
            }
            Stored::Missing => {
                tracing::debug!(path = %self.path.display(), "no cached token");
                Ok(None)
            }
            Stored::Malformed(reason) => {
                tracing::warn!(path = %self.path.display(), %reason, "ignoring malformed token file");
                Ok(None)
            }
        }
    }

    /// Writes the record through a sibling temp file and renames it into place.
    pub fn save(&self, token: &TokenRecord) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create directory {}", parent.display()))?;
        }

        let contents = serde_json::to_string_pretty(token).context("failed to serialize token")?;
        let tmp = self.temp_path();
        write_private(&tmp, contents.as_bytes())
            .with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to replace {}", self.path.display()))?;

        tracing::debug!(path = %self.path.display(), "saved token");
        Ok(())
    }

    pub fn clear(&self) -> Result<bool> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e).with_context(|| format!("failed to remove {}", self.path.display())),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "token.json".to_string());
        self.path.with_file_name(format!(".{name}.tmp"))
    }
}

fn write_private(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}
