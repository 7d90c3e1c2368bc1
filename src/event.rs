//! Storage notification parsing.

use crate::error::{PipelineError, Result};
use serde::Deserialize;
use std::fmt;

/// One uploaded object to process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerEvent {
    pub bucket: String,
    pub key: String,
}

impl TriggerEvent {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for TriggerEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

#[derive(Debug, Deserialize)]
struct Notification {
    #[serde(rename = "Records")]
    records: Vec<NotificationRecord>,
}

#[derive(Debug, Deserialize)]
struct NotificationRecord {
    s3: S3Entity,
}

#[derive(Debug, Deserialize)]
struct S3Entity {
    bucket: BucketEntity,
    object: ObjectEntity,
}

#[derive(Debug, Deserialize)]
struct BucketEntity {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ObjectEntity {
    key: String,
}

/// Decodes an object key as it appears in a notification: `+` stands for a
/// space and everything else is percent-encoded.
pub fn decode_key(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|e| {
            PipelineError::InvalidEvent(format!("key '{}' is not valid UTF-8: {}", raw, e))
        })
}

/// Parses an S3 notification document into one event per record, in order.
///
/// # Errors
/// `InvalidEvent` when the JSON is malformed, has no records, or a key does
/// not decode.
pub fn parse_notification(json: &str) -> Result<Vec<TriggerEvent>> {
    let notification: Notification =
        serde_json::from_str(json).map_err(|e| PipelineError::InvalidEvent(e.to_string()))?;

    if notification.records.is_empty() {
        return Err(PipelineError::InvalidEvent(
            "notification contains no records".to_string(),
        ));
    }

    notification
        .records
        .into_iter()
        .map(|record| {
            let key = decode_key(&record.s3.object.key)?;
            Ok(TriggerEvent::new(record.s3.bucket.name, key))
        })
        .collect()
}
