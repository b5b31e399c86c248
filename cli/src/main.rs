mod commands;
mod config;
mod timespec;

use clap::{Parser, Subcommand};
use config::Config;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[derive(Parser)]
#[command(
    name = "serac",
    version,
    about = "Incremental encrypted archiver for cold object stores",
    long_about = "Serac archives slowly-changing file trees into an encrypted, \
                  content-addressed object store, keeping all metadata in a local \
                  index so archived data never needs to be read back during \
                  normal operation"
)]
struct Cli {
    #[arg(help = "Path to the configuration file")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,

    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    #[arg(short, long, global = true, help = "Only log warnings and errors")]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Check the config file, the object store and the index")]
    Test,

    #[command(about = "Create a new index database")]
    Init,

    #[command(about = "Scan the sources and archive any changes")]
    Archive,

    #[command(about = "List the archive as of an instant")]
    Ls {
        #[arg(long, value_name = "DATE", help = "Date and time (or timestamp) to go back to")]
        at: Option<String>,

        #[arg(long, value_name = "PATTERN", help = "Path or path prefix to list")]
        pattern: Option<String>,
    },

    #[command(about = "Restore files from the archive")]
    Restore {
        #[arg(help = "Directory to restore into")]
        destination: PathBuf,

        #[arg(long, value_name = "DATE", help = "Date and time (or timestamp) to go back to")]
        at: Option<String>,

        #[arg(long, value_name = "PATTERN", help = "Path or path prefix to restore")]
        pattern: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            use clap::error::ErrorKind;
            let _ = err.print();
            return match err.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => ExitCode::SUCCESS,
                _ => ExitCode::from(1),
            };
        }
    };

    init_tracing(cli.verbose, cli.quiet);

    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("serac: {err:#}");
            ExitCode::from(exit_code_for(&err))
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    let config = Config::load(&cli.config)?;

    match cli.command {
        Commands::Test => commands::test::run(&config).await,
        Commands::Init => commands::init::run(&config),
        Commands::Archive => commands::archive::run(&config).await,
        Commands::Ls { at, pattern } => {
            commands::ls::run(&config, at.as_deref(), pattern.as_deref())
        }
        Commands::Restore {
            destination,
            at,
            pattern,
        } => commands::restore::run(&config, &destination, at.as_deref(), pattern.as_deref()).await,
    }
}

fn exit_code_for(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<serac_core::Error>()
        .map(|e| e.exit_code())
        .unwrap_or(2)
}

fn init_tracing(verbose: bool, quiet: bool) {
    let level = if quiet {
        "warn"
    } else if verbose {
        "debug"
    } else {
        "info"
    };

    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::new(format!("serac={level}")))
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .expect("Setting default subscriber failed");
}
