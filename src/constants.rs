pub const DEFAULT_SOURCE_FOLDER: &str = "originals/";
pub const DEFAULT_DESTINATION_FOLDER: &str = "processed/";
pub const DEFAULT_MANIFEST_FOLDER: &str = "csv_log/";
pub const MANIFEST_FILE_SUFFIX: &str = "_processed_images.csv";
pub const MANIFEST_CONTENT_TYPE: &str = "text/csv";

/// One week max-age, two minutes of stale-while-revalidate and a day of
/// stale-if-error.
pub const DEFAULT_VARIANT_CACHE_CONTROL: &str =
    "max-age=604800, stale-while-revalidate=120, stale-if-error=86400";
pub const DEFAULT_MANIFEST_CACHE_CONTROL: &str = "public, max-age=86400";

pub const DEFAULT_BORDER_SIZE: u32 = 30;
pub const DEFAULT_BACKGROUND_COLOR: &str = "#FFFFFF";

/// Quality used when encoding the letterboxed canvas before compression.
pub const TRANSFORM_JPEG_QUALITY: u8 = 92;

pub const DEFAULT_QUALITY_LOWER: f32 = 0.6;
pub const DEFAULT_QUALITY_UPPER: f32 = 0.8;

/// Mean absolute per-channel error tolerated by the JPEG recompress search.
pub const JPEG_RECOMPRESS_MAX_MEAN_ERROR: f64 = 2.5;

pub const ZOPFLI_ITERATIONS: u8 = 15;
pub const LIBDEFLATER_HIGH_LEVEL: u8 = 12;
pub const LIBDEFLATER_LOW_LEVEL: u8 = 8;
pub const OXIPNG_PRESET: u8 = 4;

/// Share of available memory the decoder may allocate.
pub const DECODE_MEMORY_SHARE: f64 = 0.9;

/// Peak bytes per canvas pixel: the RGBA canvas plus its RGB copy.
pub const CANVAS_BYTES_PER_PIXEL: u64 = 7;

pub const DEFAULT_STORE_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_STORE_OPERATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_STORE_CONNECT_TIMEOUT_SECS: u64 = 20;

pub const METADATA_SIDECAR_SUFFIX: &str = ".meta.json";

pub const PROGRESS_BAR_TEMPLATE: &str =
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}";
