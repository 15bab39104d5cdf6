use analytics_core::glue::JobLauncher;
use analytics_core::topology::{PipelineEvent, Topology, Trigger};
use analytics_core::Result;
use lambda_runtime::{Error, LambdaEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{error, info};

pub struct Services {
    pub topology: Topology,
    pub launcher: Box<dyn JobLauncher>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RouteAction {
    TransformStarted { source_key: String, job_run_id: String },
    CatalogStarted { crawler: String },
    Ignored { event: PipelineEvent },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteResponse {
    pub actions: Vec<RouteAction>,
}

/// Evaluates each event once and starts whatever it arms. A failed start is
/// returned as an error; it is not retried.
pub async fn route(
    topology: &Topology,
    launcher: &dyn JobLauncher,
    events: Vec<PipelineEvent>,
) -> Result<RouteResponse> {
    let mut actions = Vec::with_capacity(events.len());

    for event in events {
        let action = match topology.evaluate(&event) {
            Trigger::ArmTransform { source_key } => {
                let arguments = BTreeMap::from([
                    ("--SOURCE_BUCKET".to_string(), topology.bucket.clone()),
                    ("--SOURCE_KEY".to_string(), source_key.clone()),
                ]);
                let job_run_id = launcher
                    .start_job_run(&topology.transform_job, &arguments)
                    .await?;
                info!(source_key = %source_key, job_run_id = %job_run_id, "Armed transform stage");
                RouteAction::TransformStarted { source_key, job_run_id }
            }
            Trigger::ArmCatalog => {
                launcher.start_crawler(&topology.crawler).await?;
                info!(crawler = %topology.crawler, "Armed catalog stage");
                RouteAction::CatalogStarted {
                    crawler: topology.crawler.clone(),
                }
            }
            Trigger::None => {
                info!(?event, "Event does not arm any stage");
                RouteAction::Ignored { event }
            }
        };
        actions.push(action);
    }

    Ok(RouteResponse { actions })
}

pub(crate) async fn function_handler(
    event: LambdaEvent<Value>,
    services: Arc<Services>,
) -> std::result::Result<RouteResponse, Error> {
    let events = PipelineEvent::parse(&event.payload).map_err(|e| {
        error!("Failed to parse event: {}", e);
        e
    })?;

    let response = route(&services.topology, services.launcher.as_ref(), events)
        .await
        .map_err(|e| {
            error!("Routing failed: {}", e);
            e
        })?;

    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;
    use analytics_core::glue::{LaunchRecord, RecordingJobLauncher};
    use lambda_runtime::Context;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn topology() -> Topology {
        Topology {
            bucket: "reports".to_string(),
            normalized_prefix: "normalized/".to_string(),
            transform_job: "curate".to_string(),
            crawler: "curated-crawler".to_string(),
        }
    }

    fn eventbridge(source: &str, detail_type: &str, detail: Value) -> Value {
        json!({
            "version": "0",
            "id": "6a7e8feb-b491-4cf7-a9f1-bf3703467718",
            "detail-type": detail_type,
            "source": source,
            "account": "123456789012",
            "time": "2025-12-28T05:00:12Z",
            "region": "us-east-1",
            "resources": [],
            "detail": detail
        })
    }

    #[tokio::test]
    async fn test_normalized_write_starts_transform_once() {
        let launcher = RecordingJobLauncher::default();
        let events = vec![PipelineEvent::ObjectCreated {
            bucket: "reports".to_string(),
            key: "normalized/x.csv".to_string(),
        }];

        let response = route(&topology(), &launcher, events).await.unwrap();
        assert_eq!(
            response.actions,
            vec![RouteAction::TransformStarted {
                source_key: "normalized/x.csv".to_string(),
                job_run_id: "jr_1".to_string()
            }]
        );
        assert_eq!(
            launcher.launches(),
            vec![LaunchRecord::JobRun {
                job: "curate".to_string(),
                arguments: BTreeMap::from([
                    ("--SOURCE_BUCKET".to_string(), "reports".to_string()),
                    ("--SOURCE_KEY".to_string(), "normalized/x.csv".to_string()),
                ]),
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_transform_leaves_catalog_stale() {
        let launcher = RecordingJobLauncher::default();
        let events = vec![
            PipelineEvent::JobStateChanged {
                job_name: "curate".to_string(),
                state: "FAILED".to_string(),
            },
            PipelineEvent::ObjectCreated {
                bucket: "reports".to_string(),
                key: "curated/out.parquet".to_string(),
            },
        ];

        let response = route(&topology(), &launcher, events).await.unwrap();
        assert_eq!(response.actions.len(), 2);
        assert!(response
            .actions
            .iter()
            .all(|a| matches!(a, RouteAction::Ignored { .. })));
        assert!(launcher.launches().is_empty());
    }

    #[tokio::test]
    async fn test_event_handler_success_starts_crawler() {
        let launcher = RecordingJobLauncher::default();
        let services = Arc::new(Services {
            topology: topology(),
            launcher: Box::new(launcher),
        });
        let payload = eventbridge(
            "aws.glue",
            "Glue Job State Change",
            json!({"jobName": "curate", "state": "SUCCEEDED", "jobRunId": "jr_1"}),
        );
        let event = LambdaEvent::new(payload, Context::default());
        let response = function_handler(event, services).await.unwrap();

        let body = serde_json::to_value(&response).unwrap();
        assert_eq!(
            body,
            json!({"actions": [{"action": "catalog_started", "crawler": "curated-crawler"}]})
        );
    }

    #[tokio::test]
    async fn test_event_handler_object_created_envelope() {
        let services = Arc::new(Services {
            topology: topology(),
            launcher: Box::new(RecordingJobLauncher::default()),
        });
        let payload = eventbridge(
            "aws.s3",
            "Object Created",
            json!({"bucket": {"name": "reports"}, "object": {"key": "normalized/conversations_normalized.csv"}}),
        );
        let response = function_handler(LambdaEvent::new(payload, Context::default()), services)
            .await
            .unwrap();
        assert!(matches!(
            &response.actions[0],
            RouteAction::TransformStarted { source_key, .. } if source_key == "normalized/conversations_normalized.csv"
        ));
    }
}
