use std::io::IsTerminal;
use std::process;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use open_plan_annotator::config::RuntimeConfig;
use open_plan_annotator::session;
use open_plan_annotator::update::UpdateChecker;

#[derive(Parser)]
#[command(
    name = "open-plan-annotator",
    version,
    about = "Review and annotate coding-agent plans in the browser before they run"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Replace this binary with the latest verified release.
    #[command(alias = "upgrade")]
    Update,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing();

    match run(cli).await {
        Ok(code) => process::exit(code),
        Err(err) => {
            eprintln!("open-plan-annotator: {err:#}");
            process::exit(2);
        }
    }
}

async fn run(cli: Cli) -> Result<i32> {
    let config = RuntimeConfig::from_env()?;

    match cli.command {
        Some(Command::Update) => {
            let checker = UpdateChecker::new(&config)?;
            Ok(checker.run_cli_update().await)
        }
        None => {
            // Invoked from a terminal rather than a host piping an event:
            // show usage instead of hanging on stdin.
            if !config.dev_mode && std::io::stdin().is_terminal() {
                Cli::command().print_help().context("printing help")?;
                return Ok(0);
            }
            session::run_review_session(&config).await
        }
    }
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();
}
