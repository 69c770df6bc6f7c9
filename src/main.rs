// ABOUTME: Entry point for the pullwise CLI application.
// ABOUTME: Parses arguments and dispatches to appropriate command handlers.

mod cli;

use clap::Parser;
use cli::{Cli, Commands, LedgerCommands};
use pullwise::config::{self, Config};
use pullwise::credentials::DockerConfigKeychain;
use pullwise::error::Result;
use pullwise::fetch::{FetchOptions, Fetcher};
use pullwise::ledger::{Ledger, LedgerKey, PruneOutcome, format_timestamp};
use pullwise::output::{Output, OutputMode};
use pullwise::registry::OciRegistry;
use pullwise::runtime;
use pullwise::types::ImageRef;
use std::env;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing subscriber based on verbose flag
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let mode = if cli.json {
        OutputMode::Json
    } else if cli.quiet {
        OutputMode::Quiet
    } else {
        OutputMode::Normal
    };
    let mut output = Output::new(mode);

    if let Err(e) = run(cli, &mut output).await {
        output.error(&e.to_string());
        std::process::exit(1);
    }
}

async fn run(cli: Cli, output: &mut Output) -> Result<()> {
    let cwd = env::current_dir()?;

    match cli.command {
        Commands::Init { force } => {
            config::init_config(&cwd, force)?;
            output.success(&format!("Created {}", config::CONFIG_FILENAME));
            Ok(())
        }
        Commands::Fetch {
            image,
            pull_policy,
            platform,
            registry,
            layout,
            sparse,
        } => {
            let config = load_config(cli.config, &cwd)?;

            let options = if let Some(path) = layout {
                FetchOptions::layout(path, sparse)
            } else if registry {
                FetchOptions::registry()
            } else {
                FetchOptions::daemon(pull_policy.unwrap_or_else(|| config.pull_policy.clone()))
            };
            let options = match platform.or_else(|| config.platform.clone()) {
                Some(platform) => options.with_platform(platform),
                None => options,
            };

            fetch(&config, &image, &options, output).await
        }
        Commands::Ledger { command } => {
            let config = load_config(cli.config, &cwd)?;
            let ledger = config.ledger()?;
            ledger_command(&config, &ledger, command, output).await
        }
    }
}

fn load_config(path: Option<PathBuf>, cwd: &std::path::Path) -> Result<Config> {
    match path {
        Some(path) => Config::load(&path),
        None => Config::discover(cwd),
    }
}

async fn fetch(
    config: &Config,
    image: &str,
    options: &FetchOptions,
    output: &mut Output,
) -> Result<()> {
    let daemon = runtime::connect(&config.runtime)?;
    let registry = OciRegistry::with_insecure_registries(config.insecure_registries.clone());
    let fetcher = Fetcher::new(daemon, registry, config.ledger()?)
        .with_registry_mirrors(config.registry_mirrors.clone())
        .with_keychain(DockerConfigKeychain::from_env()?)
        .with_progress(output.progress_target());

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling fetch");
            on_signal.cancel();
        }
    });

    output.start_timer();
    let handle = fetcher.fetch(&cancel, image, options).await?;
    output.fetched(&handle);
    Ok(())
}

async fn ledger_command(
    config: &Config,
    ledger: &Ledger,
    command: LedgerCommands,
    output: &Output,
) -> Result<()> {
    match command {
        LedgerCommands::Show => {
            let record = ledger.read().await?;

            let mut lines = vec![
                format!("Ledger: {}", ledger.path().display()),
                format!(
                    "Pulling interval: {}",
                    display_or_none(&record.interval.pulling_interval)
                ),
                format!("Pruning interval: {}", record.interval.pruning_interval),
                format!("Last prune: {}", display_or_none(&record.interval.last_prune)),
            ];
            for (key, pulled) in record.images() {
                lines.push(format!("  {key}  {pulled}"));
            }
            output.value(&record, &lines.join("\n"));
        }
        LedgerCommands::Prune => match ledger.prune().await? {
            PruneOutcome::Skipped { next_due } => output.success(&format!(
                "Pruning not due until {}",
                format_timestamp(next_due)
            )),
            PruneOutcome::Pruned { removed } => {
                output.success(&format!("Pruned {removed} entries"))
            }
        },
        LedgerCommands::Check { image } => {
            let key = ledger_key(config, &image)?;
            let due = ledger.check_interval(key.as_str()).await?;
            if due {
                output.success(&format!("{key}: pull due"));
            } else {
                output.success(&format!("{key}: not due"));
            }
        }
        LedgerCommands::Forget { image } => {
            let key = ledger_key(config, &image)?;
            if ledger.evict(key.as_str()).await? {
                output.success(&format!("Forgot {key}"));
            } else {
                output.success(&format!("{key} was not in the ledger"));
            }
        }
    }
    Ok(())
}

fn ledger_key(config: &Config, image: &str) -> Result<LedgerKey> {
    let reference = ImageRef::parse(image)?;
    Ok(LedgerKey::derive(&reference, &config.registry_mirrors))
}

fn display_or_none(value: &str) -> &str {
    if value.is_empty() { "(none)" } else { value }
}
