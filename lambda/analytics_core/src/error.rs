use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unknown environment: {0} (expected dev or prod)")]
    UnknownEnvironment(String),

    #[error("DynamoDB error: {0}")]
    DynamoDbError(#[from] aws_sdk_dynamodb::Error),

    #[error("S3 error: {0}")]
    S3Error(#[from] aws_sdk_s3::Error),

    #[error("Athena error: {0}")]
    AthenaError(#[from] aws_sdk_athena::Error),

    #[error("Glue error: {0}")]
    GlueError(#[from] aws_sdk_glue::Error),

    #[error("Failed to read object body s3://{bucket}/{key}: {message}")]
    ObjectBody {
        bucket: String,
        key: String,
        message: String,
    },

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    #[error("JSON serialization error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("YAML configuration error: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Parquet error: {0}")]
    ParquetError(String),

    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    #[error("Telemetry error: {0}")]
    TelemetryError(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
