use anyhow::{bail, Context, Result};
use clap::Parser;
use img_fanout::backfill::{backfill, print_summary};
use img_fanout::cli::{Args, Commands, ConfigOverrides, StoreArgs};
use img_fanout::config::PipelineConfig;
use img_fanout::event::{parse_notification, TriggerEvent};
use img_fanout::logger;
use img_fanout::pipeline::Pipeline;
use img_fanout::plan::print_plan;
use img_fanout::s3::{S3ObjectStore, StoreOptions};
use img_fanout::store::{FsObjectStore, ObjectStore};
use std::fs;
use std::path::{Path, PathBuf};

fn main() -> Result<()> {
    let args = Args::parse();
    logger::init(args.quiet, args.verbose, args.json_logs);

    match args.command {
        Commands::Process {
            bucket,
            key,
            event,
            store,
            overrides,
        } => {
            let config = load_config(args.config.as_deref(), &overrides)?;
            let events = collect_events(bucket, key, event)?;
            process_events(open_store(&store)?, config, &events)?;
        }
        Commands::Backfill {
            bucket,
            store_root,
            no_progress,
            overrides,
        } => {
            let config = load_config(args.config.as_deref(), &overrides)?;
            run_backfill(&bucket, store_root, config, !no_progress && !args.quiet)?;
        }
        Commands::Plan { key, overrides } => {
            let config = load_config(args.config.as_deref(), &overrides)?;
            print_plan(&key, &config)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<PipelineConfig> {
    let mut config = match path {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {:?}", path))?,
        None => PipelineConfig::default(),
    };
    overrides.apply(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn collect_events(
    bucket: Option<String>,
    key: Option<String>,
    event: Option<PathBuf>,
) -> Result<Vec<TriggerEvent>> {
    if let Some(path) = event {
        let raw = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read event file {:?}", path))?;
        return Ok(parse_notification(&raw)?);
    }

    match (bucket, key) {
        (Some(bucket), Some(key)) => Ok(vec![TriggerEvent::new(bucket, key)]),
        _ => bail!("either --event or both --bucket and --key are required"),
    }
}

fn open_store(args: &StoreArgs) -> Result<Box<dyn ObjectStore>> {
    if args.s3 {
        let mut options = StoreOptions::new(args.region.clone(), args.endpoint_url.clone());
        if let Some(attempts) = args.max_attempts {
            options.max_attempts = attempts;
        }
        let store = S3ObjectStore::connect(options).context("Failed to create S3 client")?;
        return Ok(Box::new(store));
    }

    match &args.store_root {
        Some(root) => Ok(Box::new(FsObjectStore::new(root))),
        None => bail!("either --store-root or --s3 is required"),
    }
}

fn process_events(
    store: Box<dyn ObjectStore>,
    config: PipelineConfig,
    events: &[TriggerEvent],
) -> Result<()> {
    let pipeline = Pipeline::new(store, config)?;

    let mut failures = 0;
    for event in events {
        match pipeline.run(event) {
            Ok(report) => print!("{}", report),
            Err(e) => {
                eprintln!("❌ {}: {}", event, e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} of {} invocation(s) failed", failures, events.len());
    }
    Ok(())
}

fn run_backfill(
    bucket: &str,
    store_root: PathBuf,
    config: PipelineConfig,
    show_progress: bool,
) -> Result<()> {
    let store = FsObjectStore::new(store_root);
    let keys = store
        .list_keys(bucket, &config.source_folder)
        .with_context(|| format!("Failed to list {}/{}", bucket, config.source_folder))?;
    println!("📊 Found {} object(s) under {}", keys.len(), config.source_folder);

    let pipeline = Pipeline::new(store, config)?;
    let summary = backfill(&pipeline, bucket, &keys, show_progress);
    print_summary(&summary);
    Ok(())
}
