use crate::size_spec::SizeToken;
use crate::store::ObjectStore;
use std::fmt;
use tracing::{error, info};

/// A finished variant ready for upload.
#[derive(Debug, Clone)]
pub struct Variant {
    pub token: SizeToken,
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
    /// Compression failed and `bytes` are the transformed image as rendered.
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Published { key: String },
    Failed { key: String, cause: String },
}

impl PublishOutcome {
    pub fn key(&self) -> &str {
        match self {
            PublishOutcome::Published { key } | PublishOutcome::Failed { key, .. } => key,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

impl fmt::Display for PublishOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishOutcome::Published { key } => write!(f, "published {}", key),
            PublishOutcome::Failed { key, cause } => write!(f, "failed {}: {}", key, cause),
        }
    }
}

/// Uploads variants to one bucket with a fixed cache-control header.
pub struct VariantPublisher<'a, S: ObjectStore + ?Sized> {
    store: &'a S,
    bucket: &'a str,
    cache_control: &'a str,
}

impl<'a, S: ObjectStore + ?Sized> VariantPublisher<'a, S> {
    pub fn new(store: &'a S, bucket: &'a str, cache_control: &'a str) -> Self {
        Self {
            store,
            bucket,
            cache_control,
        }
    }

    /// Uploads `variant`. Store errors are logged and folded into the
    /// outcome, never returned.
    pub fn publish(&self, variant: Variant) -> PublishOutcome {
        let key = variant.key;
        let size = variant.bytes.len();

        match self.store.put(
            self.bucket,
            &key,
            variant.bytes,
            &variant.content_type,
            self.cache_control,
        ) {
            Ok(()) => {
                info!(
                    bucket = self.bucket,
                    key = %key,
                    token = %variant.token,
                    size,
                    degraded = variant.degraded,
                    "Published variant"
                );
                PublishOutcome::Published { key }
            }
            Err(e) => {
                error!(
                    bucket = self.bucket,
                    key = %key,
                    token = %variant.token,
                    error = %e,
                    "Failed to publish variant"
                );
                PublishOutcome::Failed {
                    key,
                    cause: e.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{HeadResult, MemoryObjectStore, StoreError, StoredObject};

    struct RejectingStore;

    impl ObjectStore for RejectingStore {
        fn get(&self, _: &str, _: &str) -> Result<StoredObject, StoreError> {
            Err(StoreError::Backend("down".into()))
        }
        fn put(&self, _: &str, _: &str, _: Vec<u8>, _: &str, _: &str) -> Result<(), StoreError> {
            Err(StoreError::Backend("access denied".into()))
        }
        fn head(&self, _: &str, _: &str) -> Result<HeadResult, StoreError> {
            Err(StoreError::Backend("down".into()))
        }
    }

    fn variant(key: &str) -> Variant {
        Variant {
            token: SizeToken::parse("10x10").unwrap(),
            key: key.to_string(),
            bytes: vec![1, 2, 3],
            content_type: "image/jpeg".to_string(),
            degraded: false,
        }
    }

    #[test]
    fn test_publish_applies_metadata_verbatim() {
        let store = MemoryObjectStore::new();
        let publisher = VariantPublisher::new(&store, "out", "max-age=5, immutable");

        let outcome = publisher.publish(variant("processed/10x10/a.jpg"));
        assert!(outcome.is_published());
        assert_eq!(outcome.key(), "processed/10x10/a.jpg");

        let object = store.object("out", "processed/10x10/a.jpg").unwrap();
        assert_eq!(object.bytes, vec![1, 2, 3]);
        assert_eq!(object.content_type.as_deref(), Some("image/jpeg"));
        assert_eq!(object.cache_control.as_deref(), Some("max-age=5, immutable"));
    }

    #[test]
    fn test_publish_failure_is_an_outcome() {
        let publisher = VariantPublisher::new(&RejectingStore, "out", "x");
        let outcome = publisher.publish(variant("processed/10x10/a.jpg"));

        assert_eq!(
            outcome,
            PublishOutcome::Failed {
                key: "processed/10x10/a.jpg".to_string(),
                cause: "access denied".to_string(),
            }
        );
        assert!(outcome.to_string().contains("access denied"));
    }
}
