use std::io::IsTerminal;

use anyhow::{bail, Result};
use dialoguer::{theme::ColorfulTheme, FuzzySelect};

/// Let the user pick one label; the first one is preselected. Requires TTY.
pub fn pick_one(prompt: &str, labels: &[&str]) -> Result<usize> {
    if !std::io::stdin().is_terminal() || !std::io::stderr().is_terminal() {
        bail!("interactive selection requires a TTY");
    }

    match labels {
        [] => bail!("nothing to select from"),
        [_] => return Ok(0),
        _ => {}
    }

    let selection = FuzzySelect::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .items(labels)
        .default(0)
        .interact_opt()?;

    selection.ok_or_else(|| anyhow::anyhow!("selection aborted"))
}
