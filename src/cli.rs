use crate::config::{PipelineConfig, Profile};
use crate::formats::OutputFormat;
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "img-fanout",
    about = "Fan out fixed-size image variants from size-encoded object keys",
    long_about = "img-fanout reads an uploaded image whose key carries one or more WIDTHxHEIGHT tokens \
                  (for example originals/shop/700x700_1800x1800/shoe.jpg), letterboxes it onto a canvas \
                  of each size, compresses the result and publishes every variant under the destination \
                  folder. Published keys can optionally be recorded in a per-day CSV manifest.",
    version,
    after_help = "EXAMPLES:\n  \
    img-fanout process -b media -k originals/shop/700x700/shoe.jpg --store-root ./data\n  \
    img-fanout process --event notification.json --s3 --manifest\n  \
    img-fanout backfill -b media --store-root ./data\n  \
    img-fanout plan originals/shop/700x700_1800x1800/shoe.jpg"
)]
pub struct Args {
    #[arg(
        short = 'c',
        long,
        global = true,
        env = "IMG_FANOUT_CONFIG",
        help = "TOML configuration file",
        long_help = "Path to a TOML configuration file. Command line flags override values from the file."
    )]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Only log warnings and errors")]
    pub quiet: bool,

    #[arg(short, long, global = true, help = "Log debug details")]
    pub verbose: bool,

    #[arg(long, global = true, help = "Emit logs as JSON lines")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(
        about = "Process one uploaded image or a storage notification",
        long_about = "Run the pipeline for a single bucket/key pair or for every record of an S3 \
                      notification document, against a local directory store or S3."
    )]
    Process {
        #[arg(short = 'b', long, env = "BUCKET", help = "Bucket holding the upload")]
        bucket: Option<String>,

        #[arg(
            short = 'k',
            long,
            help = "Object key of the upload",
            conflicts_with = "event"
        )]
        key: Option<String>,

        #[arg(
            short = 'e',
            long,
            help = "S3 notification JSON file",
            long_help = "Path to an S3 event notification document. Every record is processed \
                         in order; keys are URL-decoded the way S3 encodes them."
        )]
        event: Option<PathBuf>,

        #[command(flatten)]
        store: StoreArgs,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    #[command(
        about = "Run the pipeline for every sized upload in a local store",
        long_about = "Walk <store-root>/<bucket>/<source_folder> and process every key carrying a size \
                      spec, one key at a time. Keys without a size spec are skipped."
    )]
    Backfill {
        #[arg(short = 'b', long, env = "BUCKET", help = "Bucket to walk")]
        bucket: String,

        #[arg(long, help = "Root directory of the local object store")]
        store_root: PathBuf,

        #[arg(long, help = "Hide the progress bar")]
        no_progress: bool,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },

    #[command(
        about = "Show the variants a key would produce",
        long_about = "Parse the size spec of a key and print each token with its destination key. \
                      Nothing is read or written."
    )]
    Plan {
        #[arg(help = "Object key to plan")]
        key: String,

        #[command(flatten)]
        overrides: ConfigOverrides,
    },
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct StoreArgs {
    #[arg(
        long,
        help = "Root directory of a local object store",
        conflicts_with = "s3",
        required_unless_present = "s3"
    )]
    pub store_root: Option<PathBuf>,

    #[arg(long, help = "Use S3 with credentials from the environment")]
    pub s3: bool,

    #[arg(long, requires = "s3", help = "AWS region override")]
    pub region: Option<String>,

    #[arg(
        long,
        requires = "s3",
        help = "Custom S3-compatible endpoint",
        long_help = "Endpoint URL for an S3-compatible service such as MinIO. Enables path-style addressing."
    )]
    pub endpoint_url: Option<String>,

    #[arg(long, requires = "s3", help = "Attempts per S3 request (default: 3)")]
    pub max_attempts: Option<u32>,
}

#[derive(ClapArgs, Debug, Clone, Default)]
pub struct ConfigOverrides {
    #[arg(
        short = 'p',
        long,
        help = "Preset: bordered or borderless",
        long_help = "bordered: 30px border and the full lossy codec chain (default). \
                     borderless: no border and lossless codecs only."
    )]
    pub profile: Option<Profile>,

    #[arg(long, help = "Bucket variants are written to (default: the event's bucket)")]
    pub destination_bucket: Option<String>,

    #[arg(long, help = "Border in pixels subtracted from each target dimension")]
    pub border: Option<u32>,

    #[arg(short = 'f', long, help = "Output format (jpeg, png, webp)")]
    pub format: Option<OutputFormat>,

    #[arg(long, help = "Append published keys to the daily CSV manifest")]
    pub manifest: bool,

    #[arg(long, help = "Render the variants of one upload in parallel")]
    pub parallel: bool,
}

impl ConfigOverrides {
    /// Layers the flags over `config`. A profile resets border and codecs
    /// before the individual flags apply.
    pub fn apply(&self, config: &mut PipelineConfig) {
        if let Some(profile) = self.profile {
            config.border = profile.border();
            config.codecs = profile.codecs();
        }
        if let Some(bucket) = &self.destination_bucket {
            config.destination_bucket = Some(bucket.clone());
        }
        if let Some(border) = self.border {
            config.border = border;
        }
        if let Some(format) = self.format {
            config.output_format = format;
        }
        if self.manifest {
            config.manifest_enabled = true;
        }
        if self.parallel {
            config.parallel_variants = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_overrides_apply_profile_then_flags() {
        let overrides = ConfigOverrides {
            profile: Some(Profile::Borderless),
            border: Some(5),
            format: Some(OutputFormat::Png),
            manifest: true,
            ..ConfigOverrides::default()
        };
        let mut config = PipelineConfig::default();
        overrides.apply(&mut config);

        assert_eq!(config.border, 5);
        assert_eq!(config.codecs, Profile::Borderless.codecs());
        assert_eq!(config.output_format, OutputFormat::Png);
        assert!(config.manifest_enabled);
        assert!(!config.parallel_variants);
    }

    #[test]
    fn test_parse_process_with_event() {
        let args = Args::try_parse_from([
            "img-fanout",
            "process",
            "--event",
            "n.json",
            "--s3",
            "--region",
            "eu-west-1",
        ])
        .unwrap();
        match args.command {
            Commands::Process { event, store, .. } => {
                assert_eq!(event, Some(PathBuf::from("n.json")));
                assert!(store.s3);
                assert_eq!(store.region.as_deref(), Some("eu-west-1"));
            }
            _ => panic!("expected process"),
        }
    }

    #[test]
    fn test_process_requires_a_store() {
        let result = Args::try_parse_from(["img-fanout", "process", "-b", "m", "-k", "k"]);
        assert!(result.is_err());
    }
}
