use clap::{Parser, Subcommand};
use commitgen::change::{Listing, parse_changes};
use commitgen::config::{self, EngineConfig};
use commitgen::engine::Engine;
use commitgen::vcs::{Repository, Svnlook};
use commitgen::{commit, mirror, output};
use std::fs::OpenOptions;
use std::path::PathBuf;
use std::rc::Rc;
use std::sync::Mutex;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "commitgen")]
#[command(about = "Keep a generated artifact tree in sync with Subversion commits")]
#[command(long_about = "\
Keep a generated artifact tree in sync with Subversion commits

Call from the repository's hook scripts:

  hooks/pre-commit:   commitgen --config /etc/commitgen.toml pre-commit \"$1\" \"$2\"
  hooks/post-commit:  commitgen --config /etc/commitgen.toml post-commit \"$1\" \"$2\"

Every committed file and directory below repository_dir is mirrored into
cache_root. Artifacts generated from those objects are rebuilt whenever an
object they were built from changes. A rejected pre-commit prints its reason
on stderr, which Subversion shows to the committer.

Committing a file named .updateall regenerates everything (the commit itself
is always rejected).

Run 'commitgen gen-config' to generate a documented commitgen.toml.")]
#[command(version = env!("COMMITGEN_VERSION"))]
struct Cli {
    /// Config file
    #[arg(long, default_value = "commitgen.toml", global = true)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate a pending transaction (pre-commit hook)
    PreCommit {
        /// Repository path as passed to the hook
        repos: PathBuf,
        /// Transaction name
        txn: String,
    },
    /// Apply a committed revision to the artifact store (post-commit hook)
    PostCommit {
        /// Repository path as passed to the hook
        repos: PathBuf,
        /// Revision number
        rev: u64,
    },
    /// Regenerate the whole artifact store from the head revision
    UpdateAll,
    /// Drain a regeneration queue left behind by an interrupted run
    Drain,
    /// Parse a saved change listing and print the records
    Classify {
        /// File with `svnlook changed` (or `svn up` with --narrow) output
        file: PathBuf,
        /// The listing uses the narrow `svn up` layout
        #[arg(long)]
        narrow: bool,
        /// Print records as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a stock commitgen.toml with all options documented
    GenConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    if let Command::GenConfig = cli.command {
        print!("{}", config::stock_config_toml());
        return Ok(());
    }

    let config = config::load_config(&cli.config)?;
    init_logging(&config)?;

    match cli.command {
        Command::PreCommit { repos, txn } => {
            if let Err(e) = commit::check_repository(&config, &repos) {
                eprintln!("{e}");
                std::process::exit(1);
            }
            let (mut engine, repo) = open_engine(config);
            if let Err(e) = commit::precommit(&mut engine, repo.as_ref(), &txn) {
                info!(txn = %txn, reason = %e, "commit rejected");
                eprintln!("{e}");
                std::process::exit(1);
            }
        }
        Command::PostCommit { repos, rev } => {
            if let Err(e) = commit::check_repository(&config, &repos) {
                error!(error = %e, "applying revision anyway");
            }
            let (mut engine, repo) = open_engine(config);
            match commit::postcommit(&mut engine, repo.as_ref(), rev) {
                Ok(report) => info!(
                    rev,
                    changes = report.changes.len(),
                    regenerated = report.drain.processed.len(),
                    failures = report.failures.len() + report.drain.failures.len(),
                    "revision applied"
                ),
                Err(e) => error!(rev, error = %e, "post-commit failed"),
            }
        }
        Command::UpdateAll => {
            std::fs::create_dir_all(&config.cache_root)?;
            let (mut engine, repo) = open_engine(config);
            let report = commit::update_all(&mut engine, repo.as_ref())?;
            output::print_commit_report(&report);
        }
        Command::Drain => {
            let (mut engine, _) = open_engine(config);
            if engine.tracker.recovered() == 0 {
                warn!("no interrupted run found");
            }
            let report = engine.drain_queue();
            output::print_drain_report(&report);
        }
        Command::Classify { file, narrow, json } => {
            let listing = if narrow {
                Listing::Working
            } else {
                Listing::Repository
            };
            let stdout = std::fs::read_to_string(&file)?;
            let records = parse_changes(&stdout, listing, &config.repository_dir);
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else {
                output::print_changes(&records);
            }
        }
        Command::GenConfig => unreachable!("handled before config loading"),
    }

    Ok(())
}

/// Install the `tracing` subscriber. `RUST_LOG` wins over `log_level`.
fn init_logging(config: &EngineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.log_level))?;
    match &config.log_file {
        Some(path) => {
            let file = OpenOptions::new().create(true).append(true).open(path)?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_ansi(false)
                .with_writer(Mutex::new(file))
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
    Ok(())
}

/// Engine with the default handlers, backed by `svnlook`.
fn open_engine(config: EngineConfig) -> (Engine, Rc<dyn Repository>) {
    let repo: Rc<dyn Repository> = Rc::new(Svnlook::from_config(&config));
    let mut engine = Engine::open(config);
    mirror::register(&mut engine, Rc::clone(&repo));
    commit::register_update_trigger(&mut engine, Rc::clone(&repo));
    (engine, repo)
}
