use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_sdk_glue::Client;
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::info;

#[async_trait]
pub trait JobLauncher: Send + Sync {
    /// Starts a run of `job` and returns its run id.
    async fn start_job_run(&self, job: &str, arguments: &BTreeMap<String, String>) -> Result<String>;

    async fn start_crawler(&self, name: &str) -> Result<()>;
}

pub struct GlueJobLauncher {
    client: Client,
}

impl GlueJobLauncher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl JobLauncher for GlueJobLauncher {
    async fn start_job_run(&self, job: &str, arguments: &BTreeMap<String, String>) -> Result<String> {
        let mut request = self.client.start_job_run().job_name(job);
        for (key, value) in arguments {
            request = request.arguments(key, value);
        }

        let response = request
            .send()
            .await
            .map_err(|e| PipelineError::GlueError(e.into()))?;

        let run_id = response.job_run_id().unwrap_or_default().to_string();
        info!(job, run_id = %run_id, "Started transform job run");
        Ok(run_id)
    }

    async fn start_crawler(&self, name: &str) -> Result<()> {
        self.client
            .start_crawler()
            .name(name)
            .send()
            .await
            .map_err(|e| PipelineError::GlueError(e.into()))?;

        info!(crawler = name, "Started catalog crawler");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LaunchRecord {
    JobRun {
        job: String,
        arguments: BTreeMap<String, String>,
    },
    Crawler(String),
}

/// Records launches instead of performing them.
#[derive(Default)]
pub struct RecordingJobLauncher {
    launches: Mutex<Vec<LaunchRecord>>,
}

impl RecordingJobLauncher {
    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.launches.lock().map(|l| l.clone()).unwrap_or_default()
    }

    fn record(&self, launch: LaunchRecord) -> Result<usize> {
        let mut launches = self
            .launches
            .lock()
            .map_err(|e| PipelineError::InvalidConfiguration(e.to_string()))?;
        launches.push(launch);
        Ok(launches.len())
    }
}

#[async_trait]
impl JobLauncher for RecordingJobLauncher {
    async fn start_job_run(&self, job: &str, arguments: &BTreeMap<String, String>) -> Result<String> {
        let n = self.record(LaunchRecord::JobRun {
            job: job.to_string(),
            arguments: arguments.clone(),
        })?;
        Ok(format!("jr_{n}"))
    }

    async fn start_crawler(&self, name: &str) -> Result<()> {
        self.record(LaunchRecord::Crawler(name.to_string()))?;
        Ok(())
    }
}
