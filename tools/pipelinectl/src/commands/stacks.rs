use analytics_core::EnvironmentConfig;
use anyhow::{bail, Result};
use colored::Colorize;
use tokio::process::Command;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Verb {
    Deploy,
    Diff,
    Destroy,
}

impl Verb {
    fn as_str(&self) -> &'static str {
        match self {
            Verb::Deploy => "deploy",
            Verb::Diff => "diff",
            Verb::Destroy => "destroy",
        }
    }
}

/// Arguments of the provisioning tool invocation. Unknown stack names are
/// rejected so a typo cannot target a stack of another environment.
pub fn cdk_args(verb: Verb, config: &EnvironmentConfig, requested: &[String]) -> Result<Vec<String>> {
    let stacks: Vec<String> = if requested.is_empty() {
        config.stacks.clone()
    } else {
        for name in requested {
            if !config.stacks.contains(name) {
                bail!(
                    "unknown stack '{}' for {} (configured: {})",
                    name,
                    config.environment,
                    config.stacks.join(", ")
                );
            }
        }
        requested.to_vec()
    };

    let mut args = vec![verb.as_str().to_string()];
    args.extend(stacks);
    args.push("--context".to_string());
    args.push(format!("env={}", config.environment));
    Ok(args)
}

pub async fn execute(verb: Verb, config: &EnvironmentConfig, requested: &[String], dry_run: bool) -> Result<()> {
    let args = cdk_args(verb, config, requested)?;
    println!("Command: {} {}", "cdk".bright_yellow(), args.join(" ").bright_yellow());

    if dry_run {
        println!("\n{}", "Dry run, nothing executed".bright_yellow());
        return Ok(());
    }

    let status = Command::new("cdk").args(&args).status().await?;
    if !status.success() {
        bail!("cdk {} exited with {}", verb.as_str(), status);
    }

    println!("\n{}", format!("✓ {} complete", verb.as_str()).bright_green().bold());
    Ok(())
}
