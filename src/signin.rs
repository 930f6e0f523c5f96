use anyhow::{Context, Result};
use clap::Args;
use tokio_util::sync::CancellationToken;

use crate::args::BaseArgs;
use crate::auth::{AuthState, RefreshStrategy};
use crate::browser::{Browser, PrintOnly, UrlOpener};
use crate::config::{self, Settings};
use crate::http::ApiClient;
use crate::login::{LoginFlow, LoginPath};
use crate::profile::{ProfileError, ProfileSummary};
use crate::token_store::TokenStore;
use crate::ui::{print_command_status, CommandStatus};

#[derive(Debug, Clone, Args)]
pub struct SignInArgs {
    /// Milliseconds between login status polls (default 3000)
    #[arg(long, env = "AUTHBOOT_POLL_INTERVAL_MS", value_parser = clap::value_parser!(u64).range(1..))]
    pub poll_interval_ms: Option<u64>,

    /// Give up after this many polls
    #[arg(long, env = "AUTHBOOT_MAX_ATTEMPTS", value_parser = clap::value_parser!(u32).range(1..))]
    pub max_attempts: Option<u32>,

    /// Give up if the browser login takes longer than this many seconds
    #[arg(long, env = "AUTHBOOT_TIMEOUT_SECS")]
    pub timeout_secs: Option<u64>,

    /// Back off exponentially between polls instead of a fixed interval
    #[arg(long)]
    pub backoff: bool,

    /// Sign in with this platform instead of the first one offered
    #[arg(long, env = "AUTHBOOT_PLATFORM", conflicts_with = "pick")]
    pub platform: Option<String>,

    /// Choose the platform interactively
    #[arg(long)]
    pub pick: bool,

    /// Print the authorization URL instead of opening a browser
    #[arg(long)]
    pub no_browser: bool,

    /// How to recover when the server rejects the access token
    #[arg(long, value_enum)]
    pub refresh: Option<RefreshStrategy>,

    /// Remove the cached token and exit
    #[arg(long)]
    pub logout: bool,
}

pub async fn run(base: BaseArgs, args: SignInArgs) -> Result<()> {
    let file_config = config::load(base.config.as_deref())?;
    let settings = config::resolve(&base, &args, &file_config)?;
    let store = TokenStore::new(&settings.token_file);

    if args.logout {
        return run_logout(&store);
    }

    let summary = sign_in(&settings, &store).await?;
    if base.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{} {}", summary.id, summary.nickname);
    }
    Ok(())
}

async fn sign_in(settings: &Settings, store: &TokenStore) -> Result<ProfileSummary> {
    let gateway = ApiClient::new(&settings.server_url)?;
    let opener: Box<dyn UrlOpener> = if settings.open_browser {
        Box::new(Browser)
    } else {
        Box::new(PrintOnly)
    };
    let refresher = settings.refresh.build(store);

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    let flow = LoginFlow::new(&gateway, opener.as_ref(), refresher.as_ref(), store)
        .with_polling(settings.polling.clone())
        .with_platform(settings.platform.clone())
        .with_cancellation(cancel);

    let mut state = AuthState::default();
    let outcome = flow.run(&mut state).await?;
    debug_assert!(state.is_authenticated());
    tracing::debug!(path = ?outcome.path, polls = outcome.polls, "signed in");

    if outcome.path == LoginPath::ExternalLogin {
        print_command_status(
            CommandStatus::Success,
            &format!("Logged in; token saved to {}", store.path().display()),
        );
    }

    let profile = outcome.profile.ok_or(ProfileError::Unavailable)?;
    profile
        .summary()
        .with_context(|| format!("unexpected profile payload: {}", profile.raw()))
}

fn run_logout(store: &TokenStore) -> Result<()> {
    if store.clear()? {
        print_command_status(
            CommandStatus::Success,
            &format!("Removed cached token {}", store.path().display()),
        );
    } else {
        print_command_status(
            CommandStatus::Warning,
            &format!("No cached token at {}", store.path().display()),
        );
    }
    Ok(())
}
