pub mod backfill;
pub mod cli;
pub mod compress;
pub mod config;
pub mod constants;
pub mod error;
pub mod event;
pub mod formats;
pub mod key_mapper;
pub mod logger;
pub mod manifest;
pub mod pipeline;
pub mod plan;
pub mod publish;
pub mod s3;
pub mod size_spec;
pub mod store;
pub mod transform;

pub use compress::{CodecKind, CodecPass, CompressionPipeline, Compressed, QualityBound};
pub use config::{PipelineConfig, Profile};
pub use error::{PipelineError, Result};
pub use event::{parse_notification, TriggerEvent};
pub use key_mapper::{map_destination_key, KeyTemplate};
pub use manifest::{DailyManifest, ManifestConsolidator, ManifestEntry};
pub use pipeline::{InvocationReport, ManifestOutcome, Pipeline, VariantReport};
pub use publish::{PublishOutcome, Variant, VariantPublisher};
pub use size_spec::{parse_size_spec, SizeSpecMatch, SizeToken};
pub use store::{FsObjectStore, MemoryObjectStore, ObjectStore, StoreError};
pub use transform::{ImageTransformer, SourceImage, TransformedImage};
