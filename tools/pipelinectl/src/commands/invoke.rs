use analytics_core::EnvironmentConfig;
use anyhow::{bail, Result};
use aws_sdk_lambda::primitives::Blob;
use aws_sdk_lambda::Client;
use colored::Colorize;
use serde_json::Value;

/// Invokes the archival function synchronously with an empty payload.
pub async fn execute(config: &EnvironmentConfig) -> Result<()> {
    let sdk_config = aws_config::load_from_env().await;
    let client = Client::new(&sdk_config);

    let response = client
        .invoke()
        .function_name(&config.functions.tokens_archival)
        .payload(Blob::new("{}"))
        .send()
        .await?;

    let body: Value = response
        .payload()
        .map(|blob| serde_json::from_slice(blob.as_ref()))
        .transpose()?
        .unwrap_or(Value::Null);

    if let Some(error) = response.function_error() {
        println!("{}", serde_json::to_string_pretty(&body)?);
        bail!("archival function failed: {}", error);
    }

    let status = body.get("statusCode").and_then(Value::as_u64).unwrap_or_default();
    println!("{}", serde_json::to_string_pretty(&body)?);
    match status {
        200 => println!("\n{}", "✓ Archival dataset written".bright_green().bold()),
        204 => println!("\n{}", "No records to archive".bright_yellow()),
        other => println!("\n{}", format!("Unexpected status {other}").bright_red()),
    }

    Ok(())
}
