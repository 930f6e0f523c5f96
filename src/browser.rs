use anyhow::{Context, Result};

/// Side-effecting capability that sends the user to an authorization page.
pub trait UrlOpener: Send + Sync {
    fn open(&self, url: &str) -> Result<()>;
}

/// Opens the system browser.
pub struct Browser;

impl UrlOpener for Browser {
    fn open(&self, url: &str) -> Result<()> {
        eprintln!("Opening browser for authentication...");
        eprintln!("If browser doesn't open, visit: {url}");
        open::that(url).context("failed to launch the system browser")
    }
}

/// Prints the URL for headless environments.
pub struct PrintOnly;

impl UrlOpener for PrintOnly {
    fn open(&self, url: &str) -> Result<()> {
        eprintln!("Visit this URL to sign in: {url}");
        Ok(())
    }
}
