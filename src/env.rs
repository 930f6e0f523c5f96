use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

const ENV_FILE_VAR: &str = "AUTHBOOT_ENV_FILE";

/// Loads `.env` files before clap parses, so they can feed `env = ...` args.
pub fn bootstrap_from_args(args: &[OsString]) -> Result<()> {
    let explicit = extract_env_file_arg(args)
        .or_else(|| std::env::var_os(ENV_FILE_VAR).map(PathBuf::from));
    load_env(explicit.as_deref())
}

pub fn load_env(explicit_env_file: Option<&Path>) -> Result<()> {
    let cwd = std::env::current_dir().context("failed to read current directory")?;

    for env_file in resolve_env_files(&cwd, explicit_env_file) {
        if !env_file.exists() && explicit_env_file.is_none() {
            continue;
        }
        // Existing variables win; `.env.local` is read first so it beats `.env`.
        dotenvy::from_path(&env_file)
            .with_context(|| format!("failed to load env file {}", env_file.display()))?;
    }
    Ok(())
}

fn extract_env_file_arg(args: &[OsString]) -> Option<PathBuf> {
    let mut explicit = None;
    let mut rest = args.iter().skip(1);
    while let Some(arg) = rest.next() {
        let Some(arg) = arg.to_str() else {
            continue;
        };
        if arg == "--" {
            break;
        }
        if arg == "--env-file" {
            explicit = rest.next().map(PathBuf::from);
        } else if let Some(value) = arg.strip_prefix("--env-file=") {
            explicit = Some(PathBuf::from(value));
        }
    }
    explicit
}

fn resolve_env_files(cwd: &Path, explicit_env_file: Option<&Path>) -> Vec<PathBuf> {
    match explicit_env_file {
        Some(path) if path.is_absolute() => vec![path.to_path_buf()],
        Some(path) => vec![cwd.join(path)],
        None => vec![cwd.join(".env.local"), cwd.join(".env")],
    }
}
