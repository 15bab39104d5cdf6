//! Shared domain for the conversation analytics pipeline.
//!
//! The Lambda crates in this workspace are thin: they load an
//! [`config::EnvironmentConfig`], build the AWS adapters and hand them to the
//! job functions here and in their own `event_handler` modules.

pub mod athena;
pub mod config;
pub mod consolidate;
pub mod curate;
pub mod dynamo;
pub mod error;
pub mod glue;
pub mod json_util;
pub mod message;
pub mod normalize;
pub mod pricing;
pub mod processing;
pub mod report;
pub mod storage;
pub mod telemetry;
pub mod tokens;
pub mod topology;
pub mod usage;

pub use config::{Environment, EnvironmentConfig};
pub use error::{PipelineError, Result};
