use analytics_core::dynamo::DynamoConversationSource;
use analytics_core::storage::S3ObjectStore;
use analytics_core::telemetry::init_tracing;
use analytics_core::EnvironmentConfig;
use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

mod event_handler;

use crate::event_handler::{function_handler, Services};

#[tokio::main]
async fn main() -> Result<(), Error> {
    init_tracing()?;

    let config = EnvironmentConfig::load_from_env()?;
    let services = Arc::new(Services {
        source: Box::new(DynamoConversationSource::from_env(config.tables.current.clone()).await),
        store: Box::new(S3ObjectStore::from_env().await),
        config,
    });

    info!("Service initialized, starting Lambda runtime");

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let services = services.clone();
        async move { function_handler(event, services).await }
    }))
    .await
}
