use analytics_core::glue::GlueJobLauncher;
use analytics_core::telemetry::init_tracing;
use analytics_core::topology::Topology;
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
    let topology = Topology::from_config(&config);
    info!(
        bucket = %topology.bucket,
        prefix = %topology.normalized_prefix,
        transform_job = %topology.transform_job,
        crawler = %topology.crawler,
        "Router topology loaded"
    );

    let services = Arc::new(Services {
        topology,
        launcher: Box::new(GlueJobLauncher::from_env().await),
    });

    lambda_runtime::run(service_fn(move |event: LambdaEvent<Value>| {
        let services = services.clone();
        async move { function_handler(event, services).await }
    }))
    .await
}
