use crate::config::QueryConfig;
use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_sdk_athena::types::{QueryExecutionContext, ResultConfiguration};
use aws_sdk_athena::Client;
use std::sync::Mutex;
use tracing::info;

#[async_trait]
pub trait QueryRunner: Send + Sync {
    /// Submits `sql` and returns the query execution id without waiting for it.
    async fn start_query(&self, sql: &str) -> Result<String>;
}

/// Analyst-facing view over the consolidated token table. Rows without any
/// tokens are hidden.
pub fn tokens_view_sql(view: &str, table: &str) -> String {
    format!(
        r#"CREATE OR REPLACE VIEW {view} AS
SELECT
    create_date,
    input_token AS "input tokens",
    output_token AS "output tokens",
    input_token + output_token AS "total tokens",
    input_price AS "input price",
    output_price AS "output price",
    total_price AS "total price",
    source AS "data source"
FROM {table}
WHERE input_token > 0 OR output_token > 0
ORDER BY create_date DESC"#
    )
}

pub struct AthenaQueryRunner {
    client: Client,
    database: String,
    workgroup: String,
    results_location: String,
}

impl AthenaQueryRunner {
    pub fn new(client: Client, query: &QueryConfig) -> Self {
        Self {
            client,
            database: query.database.clone(),
            workgroup: query.workgroup.clone(),
            results_location: query.results_location.clone(),
        }
    }

    pub async fn from_env(query: &QueryConfig) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), query)
    }
}

#[async_trait]
impl QueryRunner for AthenaQueryRunner {
    async fn start_query(&self, sql: &str) -> Result<String> {
        let response = self
            .client
            .start_query_execution()
            .query_string(sql)
            .query_execution_context(
                QueryExecutionContext::builder()
                    .database(&self.database)
                    .build(),
            )
            .result_configuration(
                ResultConfiguration::builder()
                    .output_location(&self.results_location)
                    .build(),
            )
            .work_group(&self.workgroup)
            .send()
            .await
            .map_err(|e| PipelineError::AthenaError(e.into()))?;

        let id = response.query_execution_id().unwrap_or_default().to_string();
        info!(query_execution_id = %id, database = %self.database, "Started Athena query");
        Ok(id)
    }
}

/// Records submitted statements; optionally refuses them.
#[derive(Default)]
pub struct RecordingQueryRunner {
    pub fail: bool,
    statements: Mutex<Vec<String>>,
}

impl RecordingQueryRunner {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn statements(&self) -> Vec<String> {
        self.statements
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl QueryRunner for RecordingQueryRunner {
    async fn start_query(&self, sql: &str) -> Result<String> {
        if self.fail {
            return Err(PipelineError::InvalidConfiguration(
                "query runner unavailable".to_string(),
            ));
        }
        let mut statements = self
            .statements
            .lock()
            .map_err(|e| PipelineError::InvalidConfiguration(e.to_string()))?;
        statements.push(sql.to_string());
        Ok(format!("query-{}", statements.len()))
    }
}
