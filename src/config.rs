use std::path::{Path, PathBuf};
use std::time::Duration;
use std::{fs, io};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::args::BaseArgs;
use crate::auth::RefreshStrategy;
use crate::http::DEFAULT_SERVER_URL;
use crate::login::{PlatformChoice, PollSettings};
use crate::signin::SignInArgs;
use crate::token_store::DEFAULT_TOKEN_FILE;
use crate::ui::{print_command_status, CommandStatus};

pub const DEFAULT_CONFIG_FILE: &str = "./authboot.json";

/// Optional settings file. Every key may also be given on the command line,
/// which takes precedence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub server_url: Option<String>,
    pub token_file: Option<PathBuf>,
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub backoff: Option<bool>,
    pub platform: Option<String>,
    pub refresh: Option<RefreshStrategy>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Reads the explicit config file, or the default one if it exists.
pub fn load(explicit: Option<&Path>) -> Result<Config> {
    let Some(path) = explicit else {
        return Ok(load_file(Path::new(DEFAULT_CONFIG_FILE)));
    };

    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let config = serde_json::from_str(&contents)
        .with_context(|| format!("failed to parse config {}", path.display()))?;
    warn_unknown_keys(&config, path);
    Ok(config)
}

/// Lenient read: a missing file is empty, a broken one is reported and ignored.
pub fn load_file(path: &Path) -> Config {
    let file_contents = match fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Config::default(),
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not read {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    let config: Config = match serde_json::from_str(&file_contents) {
        Ok(c) => c,
        Err(e) => {
            print_command_status(
                CommandStatus::Warning,
                &format!("could not parse {}: {e}", path.display()),
            );
            return Config::default();
        }
    };

    warn_unknown_keys(&config, path);
    tracing::debug!(path = %path.display(), "loaded config");
    config
}

fn warn_unknown_keys(config: &Config, path: &Path) {
    for key in config.extra.keys() {
        print_command_status(
            CommandStatus::Warning,
            &format!("unknown config key {} in {}", key, path.display()),
        );
    }
}

/// Everything the sign-in needs, after flags, env and file are merged.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub server_url: String,
    pub token_file: PathBuf,
    pub polling: PollSettings,
    pub platform: PlatformChoice,
    pub refresh: RefreshStrategy,
    pub open_browser: bool,
}

/// Priority: CLI flags (and their env vars) > config file > defaults.
pub fn resolve(base: &BaseArgs, args: &SignInArgs, file: &Config) -> Result<Settings> {
    let server_url = base
        .server_url
        .clone()
        .or_else(|| file.server_url.clone())
        .unwrap_or_else(|| DEFAULT_SERVER_URL.to_string());

    let token_file = base
        .token_file
        .clone()
        .or_else(|| file.token_file.clone())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_TOKEN_FILE));

    let defaults = PollSettings::default();
    let polling = PollSettings {
        interval: args
            .poll_interval_ms
            .or(file.poll_interval_ms)
            .map(Duration::from_millis)
            .unwrap_or(defaults.interval),
        max_attempts: args.max_attempts.or(file.max_attempts),
        timeout: args
            .timeout_secs
            .or(file.timeout_secs)
            .map(Duration::from_secs),
        backoff: args.backoff || file.backoff.unwrap_or(false),
    };
    if polling.interval.is_zero() {
        bail!("poll_interval_ms must be at least 1");
    }
    if polling.max_attempts == Some(0) {
        bail!("max_attempts must be at least 1");
    }

    let platform = if args.pick {
        PlatformChoice::Interactive
    } else {
        match args.platform.clone().or_else(|| file.platform.clone()) {
            Some(name) => PlatformChoice::Named(name),
            None => PlatformChoice::First,
        }
    };

    Ok(Settings {
        server_url,
        token_file,
        polling,
        platform,
        refresh: args.refresh.or(file.refresh).unwrap_or_default(),
        open_browser: !args.no_browser,
    })
}
