//! Production transport backed by the AWS S3 SDK.

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use futures::stream::{self, StreamExt};

use crate::config::PullConfig;

use super::{ObjectHead, RangeBody, Transport};

/// S3 (or S3-compatible) transport. Credentials resolve through the SDK's
/// default provider chain; `endpoint` overrides switch to path-style
/// addressing for MinIO-style stores.
#[derive(Debug, Clone)]
pub struct S3Transport {
    client: aws_sdk_s3::Client,
}

impl S3Transport {
    /// Build a client from the engine configuration.
    pub async fn connect(config: &PullConfig) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()));
        if let Some(profile) = &config.profile {
            loader = loader.profile_name(profile);
        }
        let base = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&base);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Ok(S3Transport { client: aws_sdk_s3::Client::from_conf(builder.build()) })
    }

    pub fn from_client(client: aws_sdk_s3::Client) -> Self {
        S3Transport { client }
    }
}

#[async_trait]
impl Transport for S3Transport {
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectHead> {
        let out = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .with_context(|| format!("head_object failed for s3://{bucket}/{key}"))?;

        let content_length = out
            .content_length()
            .filter(|len| *len >= 0)
            .with_context(|| format!("head_object returned no size for s3://{bucket}/{key}"))?;

        Ok(ObjectHead { content_length: content_length as u64 })
    }

    async fn get_range(&self, bucket: &str, key: &str, range: &str) -> Result<RangeBody> {
        let out = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .range(range)
            .send()
            .await
            .with_context(|| format!("get_object {range} failed for s3://{bucket}/{key}"))?;

        let content_length = out.content_length().filter(|len| *len >= 0).unwrap_or(0) as u64;

        // ByteStream -> chunk stream; SDK body errors surface as io errors so
        // the worker treats them like any other mid-stream failure.
        let stream = stream::try_unfold(out.body, |mut body| async move {
            match body.try_next().await {
                Ok(Some(chunk)) => Ok(Some((chunk, body))),
                Ok(None) => Ok(None),
                Err(e) => Err(std::io::Error::new(std::io::ErrorKind::Other, e)),
            }
        })
        .boxed();

        Ok(RangeBody { content_length, stream })
    }
}
