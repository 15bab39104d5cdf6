//! Event-driven stage wiring.
//!
//! Writes under the normalized prefix arm the transform job; a successful
//! transform run arms the catalog crawler. Nothing here retries: a failed or
//! unmatched event leaves downstream stages stale until the next upstream
//! success.

use crate::config::EnvironmentConfig;
use crate::error::{PipelineError, Result};
use crate::json_util::extract_string;
use aws_lambda_events::event::eventbridge::EventBridgeEvent;
use aws_lambda_events::event::s3::S3Event;
use percent_encoding::percent_decode;
use serde::Serialize;
use serde_json::Value;

pub const SUCCEEDED: &str = "SUCCEEDED";
const OBJECT_CREATED_PREFIX: &str = "ObjectCreated:";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PipelineEvent {
    ObjectCreated { bucket: String, key: String },
    JobStateChanged { job_name: String, state: String },
    Other,
}

impl PipelineEvent {
    /// Accepts an S3 notification (one event per record) or a single
    /// EventBridge envelope.
    pub fn parse(payload: &Value) -> Result<Vec<PipelineEvent>> {
        if payload.get("Records").is_some() {
            let event: S3Event = serde_json::from_value(payload.clone())
                .map_err(|e| PipelineError::InvalidEvent(format!("S3 notification: {e}")))?;

            return Ok(event
                .records
                .into_iter()
                .map(|record| {
                    let created = record
                        .event_name
                        .as_deref()
                        .is_some_and(|name| name.starts_with(OBJECT_CREATED_PREFIX));
                    match (created, record.s3.bucket.name, record.s3.object.key) {
                        (true, Some(bucket), Some(key)) => PipelineEvent::ObjectCreated {
                            bucket,
                            key: decode_object_key(&key),
                        },
                        _ => PipelineEvent::Other,
                    }
                })
                .collect());
        }

        if payload.get("detail-type").is_some() {
            let event: EventBridgeEvent<Value> = serde_json::from_value(payload.clone())
                .map_err(|e| PipelineError::InvalidEvent(format!("EventBridge envelope: {e}")))?;
            return Ok(vec![Self::from_eventbridge(&event)]);
        }

        Ok(vec![PipelineEvent::Other])
    }

    fn from_eventbridge(event: &EventBridgeEvent<Value>) -> PipelineEvent {
        match (event.source.as_str(), event.detail_type.as_str()) {
            ("aws.s3", "Object Created") => {
                match (
                    extract_string(&event.detail, &["bucket.name"]),
                    extract_string(&event.detail, &["object.key"]),
                ) {
                    (Some(bucket), Some(key)) => PipelineEvent::ObjectCreated { bucket, key },
                    _ => PipelineEvent::Other,
                }
            }
            ("aws.glue", "Glue Job State Change") => {
                match (
                    extract_string(&event.detail, &["jobName"]),
                    extract_string(&event.detail, &["state"]),
                ) {
                    (Some(job_name), Some(state)) => PipelineEvent::JobStateChanged { job_name, state },
                    _ => PipelineEvent::Other,
                }
            }
            _ => PipelineEvent::Other,
        }
    }
}

/// S3 notifications carry form-encoded keys.
fn decode_object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    percent_decode(spaced.as_bytes())
        .decode_utf8()
        .map(|key| key.into_owned())
        .unwrap_or_else(|_| raw.to_string())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Trigger {
    ArmTransform { source_key: String },
    ArmCatalog,
    None,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Topology {
    pub bucket: String,
    pub normalized_prefix: String,
    pub transform_job: String,
    pub crawler: String,
}

impl Topology {
    pub fn from_config(config: &EnvironmentConfig) -> Self {
        Self {
            bucket: config.storage.bucket.clone(),
            normalized_prefix: config.storage.normalized_prefix.clone(),
            transform_job: config.topology.transform_job.clone(),
            crawler: config.topology.crawler.clone(),
        }
    }

    pub fn evaluate(&self, event: &PipelineEvent) -> Trigger {
        match event {
            PipelineEvent::ObjectCreated { bucket, key }
                if *bucket == self.bucket && key.starts_with(&self.normalized_prefix) =>
            {
                Trigger::ArmTransform {
                    source_key: key.clone(),
                }
            }
            PipelineEvent::JobStateChanged { job_name, state }
                if *job_name == self.transform_job && state == SUCCEEDED =>
            {
                Trigger::ArmCatalog
            }
            _ => Trigger::None,
        }
    }
}

/// Where the pipeline stands after the last observed trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    #[default]
    Idle,
    NormalizeComplete,
    TransformComplete,
}

impl PipelineState {
    pub fn advance(self, trigger: &Trigger) -> PipelineState {
        match (self, trigger) {
            (_, Trigger::ArmTransform { .. }) => PipelineState::NormalizeComplete,
            (PipelineState::NormalizeComplete, Trigger::ArmCatalog) => {
                PipelineState::TransformComplete
            }
            (state, _) => state,
        }
    }
}
