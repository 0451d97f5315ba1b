//! Archivist command line.
//!
//! Every mutating command runs inside a journaled run bracket, takes a
//! mandatory reason and supports `--dry-run`. Read-only commands open the
//! catalog without taking the writer lock.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use archivist::identify::DEFAULT_BATCH_SIZE;
use archivist::RecordKind;
use archivist_logging::{init_logging, LogConfig};
use clap::{Parser, Subcommand};
use tracing::{info, warn};

mod cli;

#[derive(Parser, Debug)]
#[command(
    name = "archivist",
    version,
    about = "Curate the catalog of a digital archive"
)]
struct Cli {
    /// Archive root directory
    #[arg(long, global = true, env = "ARCHIVIST_ROOT", default_value = ".")]
    root: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create the catalog database in <root>/_metadata
    Init,

    /// Register and identify files that are not in the catalog yet
    Identify {
        /// Action catalog (default: $ARCHIVIST_HOME/actions.toml)
        #[arg(long, env = "ARCHIVIST_ACTIONS")]
        actions: Option<PathBuf>,

        /// Files per identifier call
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Reason stored with the journal entries
        #[arg(long)]
        reason: Option<String>,

        /// Show what would be registered without changing anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Identify matching originals again and reassign their actions
    Reidentify {
        /// Query selecting original files
        query: String,

        /// Why the files are re-identified
        reason: String,

        #[arg(long, env = "ARCHIVIST_ACTIONS")]
        actions: Option<PathBuf>,

        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        #[arg(long)]
        dry_run: bool,
    },

    /// Extract matching archives whose action is extract
    Extract {
        /// Query selecting original files
        query: String,

        #[arg(long, env = "ARCHIVIST_ACTIONS")]
        actions: Option<PathBuf>,

        #[arg(long)]
        reason: Option<String>,

        #[arg(long)]
        dry_run: bool,
    },

    /// Search the catalog
    Search {
        /// Query, e.g. "@puid fmt/40 @warning @notnull"
        query: String,

        /// Record kind: original, master, access or statutory
        #[arg(long, default_value = "original", value_parser = cli::parse_kind)]
        kind: RecordKind,

        #[arg(long)]
        limit: Option<u64>,

        #[arg(long)]
        offset: Option<u64>,

        /// Column to sort by (default: relative_path)
        #[arg(long)]
        sort: Option<String>,

        #[arg(long)]
        json: bool,
    },

    /// Show the event journal
    Log(cli::log::LogArgs),

    /// Show catalog version, record counts and the last run
    Info {
        #[arg(long)]
        json: bool,
    },

    /// Check whether the catalog needs an upgrade
    Upgrade,

    /// Edit catalog records
    Edit {
        #[command(subcommand)]
        action: cli::edit::EditCommand,
    },
}

impl Commands {
    /// True for commands that change the archive outside a dry run.
    fn writes_archive(&self) -> bool {
        match self {
            Commands::Init => true,
            Commands::Identify { dry_run, .. }
            | Commands::Reidentify { dry_run, .. }
            | Commands::Extract { dry_run, .. } => !dry_run,
            Commands::Edit { action } => !action.dry_run(),
            Commands::Search { .. } | Commands::Log(_) | Commands::Info { .. } | Commands::Upgrade => {
                false
            }
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let log_dir = cli
        .command
        .writes_archive()
        .then(|| cli::config::logs_dir(&cli.root))
        .filter(|dir| dir.parent().is_some_and(|metadata| metadata.is_dir()));
    if let Err(err) = init_logging(LogConfig {
        app_name: "archivist",
        verbose: cli.verbose,
        log_dir,
    }) {
        eprintln!("Warning: failed to initialize logging: {:#}", err);
    }

    let interrupted = Arc::new(AtomicBool::new(false));
    let flag = interrupted.clone();
    if let Err(err) = ctrlc::set_handler(move || {
        info!("Received Ctrl+C, stopping after the current record...");
        flag.store(true, Ordering::SeqCst);
    }) {
        warn!("Failed to install Ctrl+C handler: {}", err);
    }

    let session = cli::Session::new(cli.root.clone(), interrupted);
    match run_command(cli.command, &session) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{:?}", err);
            ExitCode::from(1)
        }
    }
}

fn run_command(command: Commands, session: &cli::Session) -> Result<()> {
    match command {
        Commands::Init => cli::init::run(session),
        Commands::Identify {
            actions,
            batch_size,
            reason,
            dry_run,
        } => cli::identify::run_identify(
            session,
            cli::identify::IdentifyArgs {
                actions,
                batch_size,
                reason,
                dry_run,
            },
        ),
        Commands::Reidentify {
            query,
            reason,
            actions,
            batch_size,
            dry_run,
        } => cli::identify::run_reidentify(
            session,
            cli::identify::ReidentifyArgs {
                query,
                reason,
                actions,
                batch_size,
                dry_run,
            },
        ),
        Commands::Extract {
            query,
            actions,
            reason,
            dry_run,
        } => cli::extract::run(
            session,
            cli::extract::ExtractArgs {
                query,
                actions,
                reason,
                dry_run,
            },
        ),
        Commands::Search {
            query,
            kind,
            limit,
            offset,
            sort,
            json,
        } => cli::search::run(
            session,
            cli::search::SearchArgs {
                query,
                kind,
                limit,
                offset,
                sort,
                json,
            },
        ),
        Commands::Log(args) => cli::log::run(session, args),
        Commands::Info { json } => cli::info::run(session, json),
        Commands::Upgrade => cli::upgrade::run(session),
        Commands::Edit { action } => cli::edit::run(session, action),
    }
}
