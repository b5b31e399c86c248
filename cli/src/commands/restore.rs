use crate::config::Config;
use crate::timespec;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serac_core::crypto::Envelope;
use serac_core::index::now_ts;
use serac_core::restore::restore;
use serac_core::{Access, Index, Pattern};
use std::path::Path;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

/// Materialize the archive state of `--at` (default: now) under the
/// destination directory.
pub async fn run(
    config: &Config,
    destination: &Path,
    at: Option<&str>,
    pattern: Option<&str>,
) -> Result<ExitCode> {
    let timestamp = match at {
        Some(raw) => timespec::parse(raw)?,
        None => now_ts(),
    };
    let pattern = pattern.map(Pattern::new).transpose()?;

    let index = Index::open(&config.index.path, Access::Exclusive)?;
    let envelope = Envelope::new(&config.archive.password, index.envelope_salt()?)?;
    let store = config.open_store().await?;

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Restoring into {}...", destination.display()));

    let outcome = restore(
        &index,
        store,
        &envelope,
        timestamp,
        pattern.as_ref(),
        destination,
    )
    .await?;

    spinner.finish_and_clear();
    info!(
        restored = outcome.restored.len(),
        failed = outcome.failed.len(),
        pending = outcome.pending.len(),
        "restore finished"
    );

    println!(
        "Restored {} file{}, {} already current",
        outcome.restored.len(),
        if outcome.restored.len() == 1 { "" } else { "s" },
        outcome.skipped.len()
    );

    if !outcome.pending.is_empty() {
        println!(
            "{} object(s) are thawing from cold storage; re-run restore once retrieval completes:",
            outcome.pending.len()
        );
        for path in &outcome.pending {
            println!("  {}", path.display());
        }
    }

    if !outcome.failed.is_empty() {
        println!("{} file(s) failed:", outcome.failed.len());
        for (path, err) in &outcome.failed {
            println!("  {}: {}", path.display(), err);
        }
    }

    if outcome.is_clean() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(3))
    }
}
