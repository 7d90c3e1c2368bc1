use crate::constants::{
    DEFAULT_STORE_CONNECT_TIMEOUT_SECS, DEFAULT_STORE_MAX_ATTEMPTS,
    DEFAULT_STORE_OPERATION_TIMEOUT_SECS,
};
use crate::store::{HeadResult, ObjectStore, StoreError, StoredObject};
use aws_config::retry::RetryConfig;
use aws_config::timeout::TimeoutConfig;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOptions {
    pub max_attempts: u32,
    pub operation_timeout: Duration,
    pub connect_timeout: Duration,
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible services; enables path-style URLs.
    pub endpoint_url: Option<String>,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_STORE_MAX_ATTEMPTS,
            operation_timeout: Duration::from_secs(DEFAULT_STORE_OPERATION_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_STORE_CONNECT_TIMEOUT_SECS),
            region: None,
            endpoint_url: None,
        }
    }
}

impl StoreOptions {
    pub fn new(region: Option<String>, endpoint_url: Option<String>) -> Self {
        Self {
            region,
            endpoint_url,
            ..Self::default()
        }
    }
}

/// Blocking [`ObjectStore`] over the AWS SDK.
///
/// Owns a tokio runtime and drives every request to completion with
/// `block_on`, so it must not be used from inside another async runtime.
pub struct S3ObjectStore {
    client: Client,
    runtime: Runtime,
    options: StoreOptions,
}

impl S3ObjectStore {
    pub fn connect(options: StoreOptions) -> Result<Self, StoreError> {
        let runtime = Runtime::new()
            .map_err(|e| StoreError::Backend(format!("Failed to create runtime: {}", e)))?;
        let client = runtime.block_on(build_client(&options));
        debug!(
            max_attempts = options.max_attempts,
            operation_timeout = ?options.operation_timeout,
            connect_timeout = ?options.connect_timeout,
            "S3 client ready"
        );
        Ok(Self {
            client,
            runtime,
            options,
        })
    }

    pub fn options(&self) -> &StoreOptions {
        &self.options
    }

    fn map_error<E, R>(&self, err: SdkError<E, R>) -> StoreError
    where
        E: std::error::Error + Send + Sync + 'static,
        R: std::fmt::Debug,
    {
        match err {
            SdkError::TimeoutError(_) => StoreError::Timeout(self.options.operation_timeout),
            other => StoreError::Backend(DisplayErrorContext(&other).to_string()),
        }
    }
}

async fn build_client(options: &StoreOptions) -> Client {
    let mut loader = aws_config::defaults(BehaviorVersion::latest())
        .retry_config(RetryConfig::standard().with_max_attempts(options.max_attempts))
        .timeout_config(
            TimeoutConfig::builder()
                .operation_timeout(options.operation_timeout)
                .connect_timeout(options.connect_timeout)
                .build(),
        );
    if let Some(region) = &options.region {
        loader = loader.region(Region::new(region.clone()));
    }
    if let Some(endpoint) = &options.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;

    let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
        .force_path_style(options.endpoint_url.is_some())
        .build();
    Client::from_conf(s3_config)
}

impl ObjectStore for S3ObjectStore {
    fn get(&self, bucket: &str, key: &str) -> Result<StoredObject, StoreError> {
        self.runtime.block_on(async {
            let response = match self.client.get_object().bucket(bucket).key(key).send().await {
                Ok(response) => response,
                Err(err) => {
                    let missing = err
                        .as_service_error()
                        .map(|e| e.is_no_such_key())
                        .unwrap_or(false);
                    if missing {
                        return Err(StoreError::NotFound {
                            bucket: bucket.to_string(),
                            key: key.to_string(),
                        });
                    }
                    return Err(self.map_error(err));
                }
            };

            let content_type = response.content_type().map(str::to_string);
            let cache_control = response.cache_control().map(str::to_string);
            let body = response
                .body
                .collect()
                .await
                .map_err(|e| StoreError::Backend(format!("Failed to read body: {}", e)))?;

            Ok(StoredObject {
                bytes: body.into_bytes().to_vec(),
                content_type,
                cache_control,
            })
        })
    }

    fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        cache_control: &str,
    ) -> Result<(), StoreError> {
        self.runtime.block_on(async {
            self.client
                .put_object()
                .bucket(bucket)
                .key(key)
                .content_type(content_type)
                .cache_control(cache_control)
                .body(ByteStream::from(bytes))
                .send()
                .await
                .map_err(|e| self.map_error(e))?;
            Ok(())
        })
    }

    fn head(&self, bucket: &str, key: &str) -> Result<HeadResult, StoreError> {
        self.runtime.block_on(async {
            match self.client.head_object().bucket(bucket).key(key).send().await {
                Ok(_) => Ok(HeadResult::Exists),
                Err(err) => {
                    let missing = err
                        .as_service_error()
                        .map(|e| e.is_not_found())
                        .unwrap_or(false);
                    if missing {
                        Ok(HeadResult::NotFound)
                    } else {
                        Err(self.map_error(err))
                    }
                }
            }
        })
    }
}
