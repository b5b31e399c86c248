use crate::config::Config;
use crate::timespec;
use anyhow::Result;
use chrono::{Datelike, Local, TimeZone};
use serac_core::index::now_ts;
use serac_core::{Access, FileVersion, Index, Pattern};
use std::process::ExitCode;

/// List the files visible in the archive as of `--at` (default: now).
pub fn run(config: &Config, at: Option<&str>, pattern: Option<&str>) -> Result<ExitCode> {
    let timestamp = match at {
        Some(raw) => timespec::parse(raw)?,
        None => now_ts(),
    };
    let pattern = pattern.map(Pattern::new).transpose()?;

    let index = Index::open(&config.index.path, Access::ReadOnly)?;
    let versions = index.state_at(timestamp, pattern.as_ref())?;

    let this_year = Local::now().year();
    for version in &versions {
        println!("{}", render_line(version, this_year));
    }

    Ok(ExitCode::SUCCESS)
}

fn render_line(version: &FileVersion, this_year: i32) -> String {
    format!(
        "{} {:<8.8} {:<8.8} {:>6} {} {}",
        version.mode_display(),
        version.owner,
        version.group,
        version.size_display(),
        mtime_display(version.mtime, this_year),
        version.path.display()
    )
}

/// `ls -l` style date column: time of day for this year's files, the
/// year for older ones.
fn mtime_display(mtime: i64, this_year: i32) -> String {
    match Local.timestamp_opt(mtime, 0).single() {
        Some(when) if when.year() == this_year => when.format("%b %e %H:%M").to_string(),
        Some(when) => when.format("%b %e  %Y").to_string(),
        None => "?".to_string(),
    }
}
