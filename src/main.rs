use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use commit_pilot::config::Config;
use commit_pilot::error::{Error, LlmError};
use commit_pilot::flow::{run_commit, CommitOptions, FlowOutcome};
use commit_pilot::llm::LlmClient;
use commit_pilot::selector::TerminalSelector;
use commit_pilot::types::Tier;
use commit_pilot::{Repository, Vcs};

#[derive(Parser)]
#[command(name = "commit-pilot", version)]
#[command(about = "LLM-assisted commits, branches and merges for git")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Repository to operate on
    #[arg(long, global = true, default_value = ".")]
    repo: PathBuf,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// API key, overrides the configured one
    #[arg(long, global = true, env = "COMMIT_PILOT_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze pending changes and commit, branch or merge
    Commit {
        /// Extra context for the model
        #[arg(long, short)]
        context: Option<String>,
        /// Ask for conventional commit messages
        #[arg(long)]
        conventional: bool,
        /// Push the result
        #[arg(long)]
        push: bool,
        /// Accept the recommendation without prompting
        #[arg(long, short)]
        yes: bool,
    },
    /// Set up the configuration interactively
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {e:#}", "error:".red().bold());
            if let Some(Error::Llm(llm)) = e.downcast_ref::<Error>() {
                hint(llm);
            }
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,commit_pilot={level}")));
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .with(filter)
        .init();
}

fn hint(error: &LlmError) {
    match error {
        LlmError::RateLimited { retry_after, .. } => eprintln!(
            "{}",
            format!("Rate limited, try again in about {} seconds", retry_after.as_secs()).yellow()
        ),
        LlmError::RetriesExhausted { attempts, .. } => {
            eprintln!("{}", format!("Gave up after {attempts} attempts").yellow())
        }
        _ => {}
    }
}

async fn run(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Commit {
            context,
            conventional,
            push,
            yes,
        } => {
            let options = CommitOptions {
                context,
                conventional,
                push,
                yes,
            };
            commit(&cli.repo, cli.api_key.as_deref(), &options).await
        }
        Commands::Config { action: Some(ConfigAction::Show) } => show_config(),
        Commands::Config { action: None } => configure(),
    }
}

async fn commit(path: &Path, api_key: Option<&str>, options: &CommitOptions) -> Result<()> {
    let repo = Repository::new(path);
    if !repo.is_repository().await.map_err(Error::from)? {
        bail!("{} is not a git repository", path.display());
    }

    let config = Config::load().map_err(Error::from)?;
    let key = config.api_key(api_key).map_err(Error::from)?;
    let client = LlmClient::new(config.llm_config(), &key).map_err(Error::from)?;
    let mut selector = TerminalSelector::stdio();

    match run_commit(&repo, &client, &mut selector, &config, options).await? {
        FlowOutcome::NothingToDo => {
            println!("{}", "Nothing to commit, working tree clean".dimmed())
        }
        FlowOutcome::Cancelled => println!("Cancelled, nothing was changed"),
        FlowOutcome::Executed(outcome) => {
            println!(
                "{} {} on {}",
                "done:".green().bold(),
                outcome.action.description(),
                outcome.branch.bold()
            );
            if let Some(commit) = &outcome.commit {
                println!("  commit {commit}");
            }
            for note in &outcome.notes {
                println!("  {}", note.dimmed());
            }
        }
    }
    Ok(())
}

fn show_config() -> Result<()> {
    let path = Config::default_path()?;
    let config = Config::load()?;
    println!("{}", path.display().to_string().bold());
    for (key, value) in config.display_lines() {
        println!("  {key} = {value}");
    }
    Ok(())
}

fn configure() -> Result<()> {
    let mut config = Config::load()?;
    let stdin = io::stdin();
    let mut input = stdin.lock();

    let current_key = config
        .api_key(None)
        .map(|k| k.prefix())
        .unwrap_or_else(|_| "not set".to_string());
    if let Some(key) = ask(&mut input, "API key", &current_key)? {
        config.api_key = Some(key);
    }
    if let Some(tier) = ask(&mut input, "Tier (free, pro)", &config.tier.to_string())? {
        config.tier = tier.parse::<Tier>().unwrap_or_default();
    }
    if let Some(model) = ask(&mut input, "Model", &config.model)? {
        config.model = model;
    }
    let conventional = if config.conventional_commits { "y" } else { "n" };
    if let Some(answer) = ask(&mut input, "Conventional commits (y/n)", conventional)? {
        config.conventional_commits = matches!(answer.to_lowercase().as_str(), "y" | "yes");
    }

    let path = config.save().context("could not save configuration")?;
    println!("{} {}", "saved".green().bold(), path.display());
    Ok(())
}

/// Prompts with the current value; `None` keeps it.
fn ask(input: &mut impl BufRead, label: &str, current: &str) -> Result<Option<String>> {
    print!("{label} [{current}]: ");
    io::stdout().flush()?;
    let mut line = String::new();
    input.read_line(&mut line)?;
    let line = line.trim();
    Ok((!line.is_empty()).then(|| line.to_string()))
}
