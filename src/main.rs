//! The `larch` executable.
//!
//! Exit codes: 0 on success, 1 on any fatal error, 2 on usage errors
//! (from the argument parser).

use std::path::PathBuf;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use clap::Parser;
use log::info;
use signal_hook::consts::{SIGINT, SIGQUIT, SIGTERM};
use signal_hook::iterator::Signals;

use larch::account::Account;
use larch::catalog::Catalog;
use larch::config::{CliOverrides, Config, Verbosity};
use larch::copier::Copier;
use larch::pool::{PoolConfig, SessionPool};
use larch::Result;

#[derive(Parser)]
#[command(
    name = "larch",
    version,
    about = "Copy messages and folders from one IMAP server to another, without duplicates."
)]
struct Cli {
    /// Configuration section to run.
    section: Option<String>,

    /// Configuration file.
    #[arg(long, value_name = "FILE", default_value = "larch.yaml")]
    config: PathBuf,

    /// Catalog database file.
    #[arg(long, value_name = "FILE", default_value = "larch.db")]
    database: PathBuf,

    /// Scan and log, but change nothing on either server.
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// One of fatal, error, warn, info, debug, imap.
    #[arg(long, value_name = "LEVEL")]
    verbosity: Option<String>,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = run(cli) {
        // the logger may not be up yet when configuration fails
        eprintln!("larch: {}", err);
        process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = Config::load(&cli.config)?;
    let overrides = CliOverrides {
        dry_run: cli.dry_run,
        verbosity: cli.verbosity.clone(),
    };
    let settings = config.resolve(cli.section.as_deref(), &overrides)?;

    init_logger(settings.verbosity);
    if settings.dry_run {
        info!("dry run: no changes will be made");
    }

    let cancel = Arc::new(AtomicBool::new(false));
    watch_signals(Arc::clone(&cancel))?;

    let catalog = Arc::new(Catalog::open(&cli.database)?);
    let session_options = settings.session_options();
    let source_pool = SessionPool::new(
        &settings.from,
        session_options.clone(),
        PoolConfig::default(),
    );
    let dest_pool = SessionPool::new(&settings.to, session_options, PoolConfig::default());

    let source = Arc::new(Account::open(Arc::clone(&source_pool), Arc::clone(&catalog))?);
    let dest = Arc::new(Account::open(Arc::clone(&dest_pool), Arc::clone(&catalog))?);

    info!("syncing {} -> {}", settings.from, settings.to);
    let copier = Copier::new(source, dest, settings.copy_options(), cancel);
    let outcome = copier.copy_all();

    source_pool.disconnect();
    dest_pool.disconnect();

    let stats = copier.stats();
    println!("{}", stats);

    let expired = catalog.maintenance()?;
    if expired > 0 {
        info!("catalog maintenance: expired {} stale accounts", expired);
    }

    outcome.map(|_| ())
}

fn init_logger(verbosity: Verbosity) {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(verbosity.level_filter());
    builder.format_timestamp_secs();
    builder.init();
}

/// INT, QUIT and TERM abort the run cleanly; a second signal aborts the
/// process outright.
fn watch_signals(cancel: Arc<AtomicBool>) -> Result<()> {
    let mut signals = Signals::new([SIGINT, SIGQUIT, SIGTERM])?;
    thread::spawn(move || {
        for signal in signals.forever() {
            let name = match signal {
                SIGINT => "SIGINT",
                SIGQUIT => "SIGQUIT",
                SIGTERM => "SIGTERM",
                _ => "signal",
            };
            log::error!("Interrupted ({})", name);
            if cancel.swap(true, Ordering::SeqCst) {
                process::exit(1);
            }
        }
    });
    Ok(())
}
