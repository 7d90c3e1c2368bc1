use crate::constants::PROGRESS_BAR_TEMPLATE;
use crate::event::TriggerEvent;
use crate::pipeline::Pipeline;
use crate::size_spec::scan;
use crate::store::ObjectStore;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BackfillSummary {
    /// Keys the pipeline ran for.
    pub processed: usize,
    /// Keys without a size spec.
    pub skipped: usize,
    /// Keys whose invocation returned an error.
    pub failed: usize,
    pub published: usize,
    pub failed_variants: usize,
    pub degraded: usize,
    pub elapsed: Duration,
}

/// Runs the pipeline once per key, in order.
///
/// Keys are processed one at a time so that invocations never race on the
/// daily manifest. Per-key errors are counted, never returned.
pub fn backfill<S: ObjectStore>(
    pipeline: &Pipeline<S>,
    bucket: &str,
    keys: &[String],
    show_progress: bool,
) -> BackfillSummary {
    let start_time = Instant::now();
    let mut summary = BackfillSummary::default();

    let progress = if show_progress {
        let bar = ProgressBar::new(keys.len() as u64);
        if let Ok(style) = ProgressStyle::with_template(PROGRESS_BAR_TEMPLATE) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    } else {
        ProgressBar::hidden()
    };

    for key in keys {
        progress.set_message(key.clone());

        if scan(key).is_none() {
            debug!(key = %key, "No size spec, skipping");
            summary.skipped += 1;
            progress.inc(1);
            continue;
        }

        match pipeline.run_at(&TriggerEvent::new(bucket, key.clone()), Utc::now()) {
            Ok(report) => {
                summary.processed += 1;
                summary.published += report.published_keys().len();
                summary.failed_variants += report.failed_count();
                summary.degraded += report.degraded_count();
            }
            Err(e) => {
                error!(key = %key, error = %e, "Backfill invocation failed");
                summary.failed += 1;
            }
        }
        progress.inc(1);
    }

    progress.finish_with_message("✅ Backfill complete");
    summary.elapsed = start_time.elapsed();
    summary
}

pub fn print_summary(summary: &BackfillSummary) {
    println!("\n📊 Backfill Summary:");
    println!("  📁 Keys processed: {}", summary.processed);
    println!("  ⏭️  Keys without size spec: {}", summary.skipped);
    println!("  ✅ Variants published: {}", summary.published);
    if summary.degraded > 0 {
        println!("  ⚠️  Variants left uncompressed: {}", summary.degraded);
    }
    if summary.failed_variants > 0 {
        println!("  ⚠️  Failed variants: {}", summary.failed_variants);
    }
    if summary.failed > 0 {
        println!("  ❌ Failed keys: {}", summary.failed);
    }
    println!("  ⏱️  Total time: {:?}", summary.elapsed);
}
