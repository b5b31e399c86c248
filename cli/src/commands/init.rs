use crate::config::Config;
use anyhow::Result;
use serac_core::crypto::Envelope;
use serac_core::Index;
use std::process::ExitCode;

/// Create the index schema and the repository salt. Refuses to touch an
/// existing index.
pub fn run(config: &Config) -> Result<ExitCode> {
    let salt = Envelope::generate_salt();
    Index::create(&config.index.path, &salt)?;

    println!("Index database created at {}", config.index.path.display());
    Ok(ExitCode::SUCCESS)
}
