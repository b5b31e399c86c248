use crate::config::Config;
use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serac_core::archive::{archive, DEFAULT_WORKERS};
use serac_core::crypto::Envelope;
use serac_core::scan::Scanner;
use serac_core::{Access, Index};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Scan the configured sources and archive every change as one run.
pub async fn run(config: &Config) -> Result<ExitCode> {
    let mut index = Index::open(&config.index.path, Access::Exclusive)?;
    let envelope = Arc::new(Envelope::new(
        &config.archive.password,
        index.envelope_salt()?,
    )?);

    let store = config.open_store().await?;
    store.check().await?;

    let scanner = Scanner::new(
        config.source.includes.clone(),
        config.source.excludes.clone(),
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message("Scanning and archiving...");

    let outcome = archive(&scanner, &mut index, store, envelope, DEFAULT_WORKERS).await?;
    let summary = &outcome.run.summary;

    spinner.finish_and_clear();
    info!(run_id = outcome.run.id, "archive finished");

    println!("Archive run {} complete", outcome.run.id);
    println!(
        "  added {}, changed {}, removed {}",
        summary.files_added, summary.files_changed, summary.files_removed
    );
    println!(
        "  uploaded {} object{} ({:.2} MB)",
        outcome.blobs_stored,
        if outcome.blobs_stored == 1 { "" } else { "s" },
        summary.bytes_uploaded as f64 / 1024.0 / 1024.0
    );

    Ok(ExitCode::SUCCESS)
}
