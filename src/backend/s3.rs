//! State backend storing the document as a JSON object in S3.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use tracing::debug;

use super::StateBackend;
use crate::State;

pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl S3Backend {
    pub fn new(client: aws_sdk_s3::Client, bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            key: key.into(),
        }
    }

    pub async fn from_env(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        let config = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .load()
            .await;
        Self::new(aws_sdk_s3::Client::new(&config), bucket, key)
    }
}

#[async_trait]
impl StateBackend for S3Backend {
    async fn load(&self) -> Result<State> {
        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let e = e.into_service_error();
                if e.is_no_such_key() {
                    debug!(bucket = %self.bucket, key = %self.key, "no state object yet, starting empty");
                    return Ok(State::new());
                }
                return Err(e).with_context(|| {
                    format!("failed to read state from s3://{}/{}", self.bucket, self.key)
                });
            }
        };
        let body = response
            .body
            .collect()
            .await
            .context("failed to read state object body")?;
        serde_json::from_slice(&body.into_bytes())
            .with_context(|| format!("malformed state in s3://{}/{}", self.bucket, self.key))
    }

    async fn save(&self, state: &State) -> Result<()> {
        let raw = serde_json::to_vec_pretty(state).context("failed to serialize state")?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(raw))
            .send()
            .await
            .with_context(|| {
                format!("failed to write state to s3://{}/{}", self.bucket, self.key)
            })?;
        debug!(bucket = %self.bucket, key = %self.key, "saved state");
        Ok(())
    }
}
