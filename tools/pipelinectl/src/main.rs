use analytics_core::{Environment, EnvironmentConfig};
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use std::path::PathBuf;

mod commands;

use commands::{config, invoke, route, stacks};

#[derive(Parser)]
#[command(name = "pipelinectl")]
#[command(author, version, about, long_about = None)]
#[command(about = "Operate the conversation analytics pipeline")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum EnvArg {
    Dev,
    Prod,
}

impl From<EnvArg> for Environment {
    fn from(value: EnvArg) -> Self {
        match value {
            EnvArg::Dev => Environment::Dev,
            EnvArg::Prod => Environment::Prod,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Print the validated configuration of an environment
    Config {
        #[arg(short, long, value_enum)]
        env: EnvArg,
    },

    /// Deploy stacks through the provisioning tool
    Deploy {
        #[arg(short, long, value_enum)]
        env: EnvArg,

        /// Stack to deploy; all configured stacks when omitted
        #[arg(short, long)]
        stack: Vec<String>,

        /// Print the command instead of running it
        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Show pending infrastructure changes
    Diff {
        #[arg(short, long, value_enum)]
        env: EnvArg,

        #[arg(short, long)]
        stack: Vec<String>,

        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Tear down stacks
    Destroy {
        #[arg(short, long, value_enum)]
        env: EnvArg,

        #[arg(short, long)]
        stack: Vec<String>,

        #[arg(long, default_value = "false")]
        dry_run: bool,
    },

    /// Run the one-shot archival token job
    InvokeArchival {
        #[arg(short, long, value_enum)]
        env: EnvArg,
    },

    /// Evaluate a saved storage or job event against the topology
    Route {
        #[arg(short, long, value_enum)]
        env: EnvArg,

        /// Path to the event JSON
        #[arg(long)]
        event: PathBuf,
    },
}

fn load(env: EnvArg) -> Result<EnvironmentConfig> {
    Ok(EnvironmentConfig::load(env.into())?)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Config { env } => {
            let config = load(env)?;
            println!("{}", "Pipeline configuration".bright_blue().bold());
            config::execute(&config)?;
        }

        Commands::Deploy { env, stack, dry_run } => {
            let config = load(env)?;
            println!("{}", "Deploy".bright_blue().bold());
            stacks::execute(stacks::Verb::Deploy, &config, &stack, dry_run).await?;
        }

        Commands::Diff { env, stack, dry_run } => {
            let config = load(env)?;
            println!("{}", "Diff".bright_blue().bold());
            stacks::execute(stacks::Verb::Diff, &config, &stack, dry_run).await?;
        }

        Commands::Destroy { env, stack, dry_run } => {
            let config = load(env)?;
            println!("{}", "Destroy".bright_blue().bold());
            stacks::execute(stacks::Verb::Destroy, &config, &stack, dry_run).await?;
        }

        Commands::InvokeArchival { env } => {
            let config = load(env)?;
            println!("{}", "Archival token job".bright_blue().bold());
            println!("Function: {}", config.functions.tokens_archival.bright_yellow());
            invoke::execute(&config).await?;
        }

        Commands::Route { env, event } => {
            let config = load(env)?;
            println!("{}", "Route (dry run)".bright_blue().bold());
            println!("Event: {}", event.display().to_string().bright_yellow());
            route::execute(&config, &event)?;
        }
    }

    Ok(())
}
