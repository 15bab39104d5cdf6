use crate::error::{PipelineError, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::Mutex;
use tracing::{debug, info};

pub const CSV_CONTENT_TYPE: &str = "text/csv";
pub const PARQUET_CONTENT_TYPE: &str = "application/vnd.apache.parquet";

#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// `Ok(None)` when the object does not exist. Every other failure is an error.
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>>;

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()>;
}

pub fn s3_url(bucket: &str, key: &str) -> String {
    format!("s3://{bucket}/{key}")
}

pub struct S3ObjectStore {
    client: Client,
}

impl S3ObjectStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub async fn from_env() -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>> {
        let response = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(response) => response,
            Err(e) => {
                if e.as_service_error().map(|se| se.is_no_such_key()).unwrap_or(false) {
                    debug!(bucket, key, "Object not found");
                    return Ok(None);
                }
                return Err(PipelineError::S3Error(e.into()));
            }
        };

        let body = response
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::ObjectBody {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(Some(body.into_bytes()))
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| PipelineError::S3Error(e.into()))?;

        info!(url = %s3_url(bucket, key), bytes = size, "Wrote object");
        Ok(())
    }
}

/// Object store kept in process memory.
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: Mutex<HashMap<(String, String), (Bytes, String)>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, bucket: &str, key: &str, body: impl Into<Bytes>) {
        if let Ok(mut objects) = self.objects.lock() {
            objects.insert(
                (bucket.to_string(), key.to_string()),
                (body.into(), String::new()),
            );
        }
    }

    pub fn object(&self, bucket: &str, key: &str) -> Option<Bytes> {
        self.objects
            .lock()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(body, _)| body.clone())
    }

    pub fn content_type(&self, bucket: &str, key: &str) -> Option<String> {
        self.objects
            .lock()
            .ok()?
            .get(&(bucket.to_string(), key.to_string()))
            .map(|(_, content_type)| content_type.clone())
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .objects
            .lock()
            .map(|objects| objects.keys().map(|(_, key)| key.clone()).collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn get(&self, bucket: &str, key: &str) -> Result<Option<Bytes>> {
        Ok(self.object(bucket, key))
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>, content_type: &str) -> Result<()> {
        let mut objects = self
            .objects
            .lock()
            .map_err(|e| PipelineError::ObjectBody {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;
        objects.insert(
            (bucket.to_string(), key.to_string()),
            (Bytes::from(body), content_type.to_string()),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryObjectStore::new();
        assert_eq!(store.get("b", "k").await.unwrap(), None);

        store.put("b", "k", b"first".to_vec(), CSV_CONTENT_TYPE).await.unwrap();
        store.put("b", "k", b"second".to_vec(), CSV_CONTENT_TYPE).await.unwrap();

        assert_eq!(store.get("b", "k").await.unwrap(), Some(Bytes::from("second")));
        assert_eq!(store.get("other", "k").await.unwrap(), None);
        assert_eq!(store.content_type("b", "k").as_deref(), Some("text/csv"));
        assert_eq!(store.keys(), vec!["k".to_string()]);
    }

    #[test]
    fn test_s3_url() {
        assert_eq!(s3_url("bucket", "a/b.csv"), "s3://bucket/a/b.csv");
    }
}
