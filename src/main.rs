use anyhow::Result;
use clap::Parser;
use std::ffi::OsString;
use tracing_subscriber::EnvFilter;

mod args;
mod auth;
mod browser;
mod config;
mod env;
mod http;
mod login;
mod profile;
mod session;
mod signin;
mod token_store;
mod ui;

use crate::args::CLIArgs;

const DEFAULT_DEV_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-dev");
const CLI_VERSION: &str = match option_env!("AUTHBOOT_VERSION_STRING") {
    Some(version) => version,
    None => DEFAULT_DEV_VERSION,
};

/// Resume a cached login or sign in through the browser, then show who you are.
#[derive(Debug, Parser)]
#[command(name = "authboot", version = CLI_VERSION)]
struct Cli {
    #[command(flatten)]
    cmd: CLIArgs<signin::SignInArgs>,
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let filter = EnvFilter::try_from_env("AUTHBOOT_LOG")
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,authboot={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    env::bootstrap_from_args(&argv)?;
    let cli = Cli::parse_from(argv);
    init_tracing(cli.cmd.base.verbose);

    signin::run(cli.cmd.base, cli.cmd.args).await
}
