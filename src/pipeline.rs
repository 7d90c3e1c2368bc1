use crate::compress::CompressionPipeline;
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::event::TriggerEvent;
use crate::key_mapper::KeyTemplate;
use crate::manifest::ManifestConsolidator;
use crate::publish::{PublishOutcome, Variant, VariantPublisher};
use crate::size_spec::{parse_size_spec, SizeToken};
use crate::store::ObjectStore;
use crate::transform::{ImageTransformer, SourceImage, TransformOptions};
use chrono::{DateTime, Utc};
use image::DynamicImage;
use rayon::prelude::*;
use std::fmt;
use tracing::{error, info, warn};

/// What happened to one size token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VariantReport {
    pub token: SizeToken,
    pub outcome: PublishOutcome,
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestOutcome {
    Disabled,
    /// Nothing was published, so the manifest was left alone.
    Skipped,
    Written { key: String, rows: usize },
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvocationReport {
    pub source: TriggerEvent,
    pub destination_bucket: String,
    /// One entry per token, in the order the tokens appear in the key.
    pub variants: Vec<VariantReport>,
    pub manifest: ManifestOutcome,
}

impl InvocationReport {
    pub fn published_keys(&self) -> Vec<&str> {
        self.variants
            .iter()
            .filter(|v| v.outcome.is_published())
            .map(|v| v.outcome.key())
            .collect()
    }

    pub fn failed_count(&self) -> usize {
        self.variants
            .iter()
            .filter(|v| !v.outcome.is_published())
            .count()
    }

    pub fn degraded_count(&self) -> usize {
        self.variants.iter().filter(|v| v.degraded).count()
    }

    /// Every variant published and the manifest, if enabled, written.
    pub fn is_complete(&self) -> bool {
        self.failed_count() == 0 && !matches!(self.manifest, ManifestOutcome::Failed(_))
    }
}

impl fmt::Display for InvocationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Source: {}", self.source)?;
        for variant in &self.variants {
            let note = if variant.degraded { " (uncompressed)" } else { "" };
            writeln!(f, "  {} -> {}{}", variant.token, variant.outcome, note)?;
        }
        match &self.manifest {
            ManifestOutcome::Disabled => writeln!(f, "Manifest: disabled"),
            ManifestOutcome::Skipped => writeln!(f, "Manifest: skipped, nothing published"),
            ManifestOutcome::Written { key, rows } => {
                writeln!(f, "Manifest: {} ({} rows)", key, rows)
            }
            ManifestOutcome::Failed(cause) => writeln!(f, "Manifest: failed: {}", cause),
        }
    }
}

/// Per-invocation orchestration: parse, fetch, fan out, publish, record.
pub struct Pipeline<S: ObjectStore> {
    store: S,
    config: PipelineConfig,
    transformer: ImageTransformer,
    compressor: CompressionPipeline,
}

impl<S: ObjectStore> Pipeline<S> {
    pub fn new(store: S, config: PipelineConfig) -> Result<Self> {
        let compressor = CompressionPipeline::from_kinds(&config.codecs, config.quality);
        Self::with_compressor(store, config, compressor)
    }

    /// Like [`Pipeline::new`] with a caller-built codec chain.
    pub fn with_compressor(
        store: S,
        config: PipelineConfig,
        compressor: CompressionPipeline,
    ) -> Result<Self> {
        config.validate()?;
        let transformer = ImageTransformer::new(TransformOptions::from(&config));
        Ok(Self {
            store,
            config,
            transformer,
            compressor,
        })
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn run(&self, event: &TriggerEvent) -> Result<InvocationReport> {
        self.run_at(event, Utc::now())
    }

    /// Runs one invocation, with `now` fixing the manifest day and timestamp.
    ///
    /// # Errors
    /// Only input problems and a failed source fetch are returned as errors.
    /// Transform, publish and manifest failures are recorded in the report.
    pub fn run_at(&self, event: &TriggerEvent, now: DateTime<Utc>) -> Result<InvocationReport> {
        let spec = parse_size_spec(&event.key)?;
        let template = KeyTemplate::new(
            &event.key,
            &spec,
            &self.config.source_folder,
            &self.config.destination_folder,
        )?;
        if let Some(expected) = &self.config.source_bucket {
            if expected != &event.bucket {
                return Err(PipelineError::InvalidEvent(format!(
                    "event bucket '{}' does not match source bucket '{}'",
                    event.bucket, expected
                )));
            }
        }
        info!(
            bucket = %event.bucket,
            key = %event.key,
            sizes = %spec.matched,
            "Parsed size spec"
        );

        let source = self.fetch(event)?;
        let content_type = source
            .content_type
            .clone()
            .unwrap_or_else(|| self.config.output_format.mime_type().to_string());

        let destination_bucket = self.config.destination_bucket_for(&event.bucket);
        let publisher = VariantPublisher::new(
            &self.store,
            destination_bucket,
            &self.config.variant_cache_control,
        );

        let variants: Vec<VariantReport> = match self.transformer.decode(&source.bytes) {
            Ok(img) => {
                let render = |token: &SizeToken| {
                    self.process_token(&img, token, &template, &content_type, &publisher)
                };
                if self.config.parallel_variants {
                    spec.tokens.par_iter().map(render).collect()
                } else {
                    spec.tokens.iter().map(render).collect()
                }
            }
            Err(e) => {
                error!(key = %event.key, error = %e, "Could not decode source image");
                spec.tokens
                    .iter()
                    .map(|token| VariantReport {
                        token: token.clone(),
                        outcome: PublishOutcome::Failed {
                            key: template.render(token),
                            cause: e.to_string(),
                        },
                        degraded: false,
                    })
                    .collect()
            }
        };

        let mut report = InvocationReport {
            source: event.clone(),
            destination_bucket: destination_bucket.to_string(),
            variants,
            manifest: ManifestOutcome::Disabled,
        };
        report.manifest = self.record(&report, now);

        info!(
            key = %event.key,
            published = report.published_keys().len(),
            failed = report.failed_count(),
            degraded = report.degraded_count(),
            "Invocation finished"
        );
        Ok(report)
    }

    fn fetch(&self, event: &TriggerEvent) -> Result<SourceImage> {
        let object = self
            .store
            .get(&event.bucket, &event.key)
            .map_err(|source| PipelineError::Fetch {
                bucket: event.bucket.clone(),
                key: event.key.clone(),
                source,
            })?;
        info!(
            key = %event.key,
            size = object.bytes.len(),
            content_type = object.content_type.as_deref().unwrap_or("-"),
            "Fetched source image"
        );
        Ok(SourceImage {
            bytes: object.bytes,
            content_type: object.content_type,
            bucket: event.bucket.clone(),
            key: event.key.clone(),
        })
    }

    fn process_token(
        &self,
        img: &DynamicImage,
        token: &SizeToken,
        template: &KeyTemplate,
        content_type: &str,
        publisher: &VariantPublisher<'_, S>,
    ) -> VariantReport {
        let key = template.render(token);

        let transformed = match self.transformer.render(img, token) {
            Ok(transformed) => transformed,
            Err(e) => {
                error!(token = %token, key = %key, error = %e, "Could not transform variant");
                return VariantReport {
                    token: token.clone(),
                    outcome: PublishOutcome::Failed {
                        key,
                        cause: e.to_string(),
                    },
                    degraded: false,
                };
            }
        };

        let compressed = self.compressor.compress(&transformed);
        let degraded = compressed.is_degraded();
        let outcome = publisher.publish(Variant {
            token: token.clone(),
            key,
            bytes: compressed.into_bytes(),
            content_type: content_type.to_string(),
            degraded,
        });

        VariantReport {
            token: token.clone(),
            outcome,
            degraded,
        }
    }

    fn record(&self, report: &InvocationReport, now: DateTime<Utc>) -> ManifestOutcome {
        if !self.config.manifest_enabled {
            return ManifestOutcome::Disabled;
        }
        let published = report.published_keys();
        if published.is_empty() {
            warn!(key = %report.source.key, "No variants published, manifest left untouched");
            return ManifestOutcome::Skipped;
        }

        let consolidator = ManifestConsolidator::new(
            &self.store,
            self.config.manifest_bucket_for(&report.source.bucket),
            &self.config.manifest_folder,
            &self.config.manifest_cache_control,
            self.config.timezone,
        );
        match consolidator.consolidate(published, now) {
            Ok(committed) => ManifestOutcome::Written {
                key: committed.key,
                rows: committed.rows,
            },
            Err(e) => {
                error!(error = %e, "Could not update daily manifest");
                ManifestOutcome::Failed(e.to_string())
            }
        }
    }
}
