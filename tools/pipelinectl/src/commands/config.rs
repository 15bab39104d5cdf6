use analytics_core::EnvironmentConfig;
use anyhow::Result;
use colored::Colorize;

pub fn execute(config: &EnvironmentConfig) -> Result<()> {
    println!("Environment: {}", config.environment.as_str().bright_yellow());
    println!("Archival CSV: {}", config.historical_key().bright_yellow());
    println!("Consolidated CSV: {}", config.consolidated_key().bright_yellow());
    println!();
    print!("{}", serde_yaml::to_string(config)?);
    println!("\n{}", "✓ Configuration is valid".bright_green().bold());
    Ok(())
}
