use std::path::PathBuf;

use clap::{ArgAction, Args};

#[derive(Debug, Clone, Args)]
pub struct BaseArgs {
    /// Output as JSON
    #[arg(short = 'j', long)]
    pub json: bool,

    /// Increase log verbosity (-v info, -vv debug); AUTHBOOT_LOG overrides
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Identity service base URL (or via AUTHBOOT_SERVER_URL)
    #[arg(long, env = "AUTHBOOT_SERVER_URL")]
    pub server_url: Option<String>,

    /// Where the access token is cached (or via AUTHBOOT_TOKEN_FILE)
    #[arg(long, env = "AUTHBOOT_TOKEN_FILE")]
    pub token_file: Option<PathBuf>,

    /// Path to a JSON config file (defaults to ./authboot.json when present)
    #[arg(long, env = "AUTHBOOT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Path to a .env file to load before running.
    #[arg(long, env = "AUTHBOOT_ENV_FILE", hide_env_values = true)]
    pub env_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Args)]
pub struct CLIArgs<T: Args> {
    #[command(flatten)]
    pub base: BaseArgs,

    #[command(flatten)]
    pub args: T,
}
