//! Pipeline configuration.
//!
//! Everything the pipeline needs is carried in one [`PipelineConfig`] handed
//! to [`crate::pipeline::Pipeline::new`]. Values come from the built-in
//! defaults, a named [`Profile`], an optional TOML file and finally CLI
//! overrides, in that order.

use crate::compress::{CodecKind, QualityBound};
use crate::constants::{
    DEFAULT_BACKGROUND_COLOR, DEFAULT_BORDER_SIZE, DEFAULT_DESTINATION_FOLDER,
    DEFAULT_MANIFEST_CACHE_CONTROL, DEFAULT_MANIFEST_FOLDER, DEFAULT_QUALITY_LOWER,
    DEFAULT_QUALITY_UPPER, DEFAULT_SOURCE_FOLDER, DEFAULT_VARIANT_CACHE_CONTROL,
};
use crate::error::{PipelineError, Result};
use crate::formats::OutputFormat;
use chrono::{FixedOffset, Offset, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// Named presets for the two deployed variants of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Profile {
    /// 30px border inset and the full lossy codec chain.
    #[default]
    Bordered,
    /// Content fills the canvas edge to edge; lossless codecs only.
    Borderless,
}

impl Profile {
    pub fn border(&self) -> u32 {
        match self {
            Profile::Bordered => DEFAULT_BORDER_SIZE,
            Profile::Borderless => 0,
        }
    }

    pub fn codecs(&self) -> Vec<CodecKind> {
        match self {
            Profile::Bordered => vec![
                CodecKind::JpegRecompress,
                CodecKind::JpegOptimize,
                CodecKind::PngOptimize,
            ],
            Profile::Borderless => vec![CodecKind::JpegOptimize, CodecKind::PngOptimize],
        }
    }
}

impl FromStr for Profile {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "bordered" => Ok(Profile::Bordered),
            "borderless" => Ok(Profile::Borderless),
            _ => Err(PipelineError::InvalidConfig(format!("unknown profile '{}'", s))),
        }
    }
}

/// Where the resized content sits on the canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum Gravity {
    NorthWest,
    North,
    NorthEast,
    West,
    #[default]
    Center,
    East,
    SouthWest,
    South,
    SouthEast,
}

impl Gravity {
    /// Top-left offset of a `content` box placed on a `canvas`.
    pub fn offset(&self, canvas: (u32, u32), content: (u32, u32)) -> (u32, u32) {
        let free_x = canvas.0.saturating_sub(content.0);
        let free_y = canvas.1.saturating_sub(content.1);

        let x = match self {
            Gravity::NorthWest | Gravity::West | Gravity::SouthWest => 0,
            Gravity::North | Gravity::Center | Gravity::South => free_x / 2,
            Gravity::NorthEast | Gravity::East | Gravity::SouthEast => free_x,
        };
        let y = match self {
            Gravity::NorthWest | Gravity::North | Gravity::NorthEast => 0,
            Gravity::West | Gravity::Center | Gravity::East => free_y / 2,
            Gravity::SouthWest | Gravity::South | Gravity::SouthEast => free_y,
        };
        (x, y)
    }
}

/// Solid canvas colour, written as `#RRGGBB` or `#RGB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct BackgroundColor(pub [u8; 3]);

impl Default for BackgroundColor {
    fn default() -> Self {
        BackgroundColor([0xFF, 0xFF, 0xFF])
    }
}

impl FromStr for BackgroundColor {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidConfig(format!("invalid colour '{}'", s));
        let hex = s.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(invalid());
        }

        let channel = |digits: &str| u8::from_str_radix(digits, 16).map_err(|_| invalid());
        match hex.len() {
            6 => Ok(BackgroundColor([
                channel(&hex[0..2])?,
                channel(&hex[2..4])?,
                channel(&hex[4..6])?,
            ])),
            3 => {
                let mut rgb = [0u8; 3];
                for (slot, digit) in rgb.iter_mut().zip(hex.chars()) {
                    *slot = channel(&format!("{digit}{digit}"))?;
                }
                Ok(BackgroundColor(rgb))
            }
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for BackgroundColor {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<BackgroundColor> for String {
    fn from(color: BackgroundColor) -> Self {
        color.to_string()
    }
}

impl fmt::Display for BackgroundColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b] = self.0;
        write!(f, "#{:02X}{:02X}{:02X}", r, g, b)
    }
}

/// Explicit timezone used to pick the manifest's calendar day.
///
/// Accepts `utc` or a fixed offset such as `+02:00` / `-0530`. Local time is
/// never consulted so manifest names do not depend on the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ManifestTimezone(pub FixedOffset);

impl ManifestTimezone {
    pub fn utc() -> Self {
        ManifestTimezone(Utc.fix())
    }

    pub fn offset(&self) -> FixedOffset {
        self.0
    }
}

impl Default for ManifestTimezone {
    fn default() -> Self {
        Self::utc()
    }
}

impl FromStr for ManifestTimezone {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PipelineError::InvalidConfig(format!("invalid timezone '{}'", s));
        if s.eq_ignore_ascii_case("utc") || s == "Z" {
            return Ok(Self::utc());
        }

        let (sign, rest) = match s.as_bytes().first() {
            Some(b'+') => (1, &s[1..]),
            Some(b'-') => (-1, &s[1..]),
            _ => return Err(invalid()),
        };
        let digits: String = rest.chars().filter(|c| *c != ':').collect();
        if digits.len() != 4 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let hours: i32 = digits[0..2].parse().map_err(|_| invalid())?;
        let minutes: i32 = digits[2..4].parse().map_err(|_| invalid())?;
        if minutes >= 60 {
            return Err(invalid());
        }

        FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60))
            .map(ManifestTimezone)
            .ok_or_else(invalid)
    }
}

impl TryFrom<String> for ManifestTimezone {
    type Error = PipelineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<ManifestTimezone> for String {
    fn from(tz: ManifestTimezone) -> Self {
        tz.to_string()
    }
}

impl fmt::Display for ManifestTimezone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let secs = self.0.local_minus_utc();
        if secs == 0 {
            return f.write_str("UTC");
        }
        let sign = if secs < 0 { '-' } else { '+' };
        let secs = secs.abs();
        write!(f, "{}{:02}:{:02}", sign, secs / 3600, (secs % 3600) / 60)
    }
}

/// Fully resolved settings for one pipeline instance.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    /// When set, events from any other bucket are rejected.
    pub source_bucket: Option<String>,
    /// Defaults to the bucket the event came from.
    pub destination_bucket: Option<String>,
    /// Defaults to the destination bucket.
    pub manifest_bucket: Option<String>,
    pub source_folder: String,
    pub destination_folder: String,
    pub manifest_folder: String,
    pub border: u32,
    pub background: BackgroundColor,
    pub gravity: Gravity,
    pub output_format: OutputFormat,
    pub quality: QualityBound,
    pub codecs: Vec<CodecKind>,
    pub variant_cache_control: String,
    pub manifest_cache_control: String,
    pub manifest_enabled: bool,
    pub timezone: ManifestTimezone,
    pub parallel_variants: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::for_profile(Profile::default())
    }
}

impl PipelineConfig {
    pub fn for_profile(profile: Profile) -> Self {
        Self {
            source_bucket: None,
            destination_bucket: None,
            manifest_bucket: None,
            source_folder: DEFAULT_SOURCE_FOLDER.to_string(),
            destination_folder: DEFAULT_DESTINATION_FOLDER.to_string(),
            manifest_folder: DEFAULT_MANIFEST_FOLDER.to_string(),
            border: profile.border(),
            background: DEFAULT_BACKGROUND_COLOR.parse().unwrap_or_default(),
            gravity: Gravity::default(),
            output_format: OutputFormat::default(),
            quality: QualityBound {
                lower: DEFAULT_QUALITY_LOWER,
                upper: DEFAULT_QUALITY_UPPER,
            },
            codecs: profile.codecs(),
            variant_cache_control: DEFAULT_VARIANT_CACHE_CONTROL.to_string(),
            manifest_cache_control: DEFAULT_MANIFEST_CACHE_CONTROL.to_string(),
            manifest_enabled: false,
            timezone: ManifestTimezone::utc(),
            parallel_variants: false,
        }
    }

    /// Loads a TOML file and layers it over the defaults of its profile.
    pub fn from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(PipelineError::ConfigNotFound(path.to_path_buf()));
        }
        let raw = fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(raw).map_err(|e| PipelineError::InvalidConfig(e.to_string()))?;
        let config = file.resolve();
        config.validate()?;
        Ok(config)
    }

    /// Bucket variants are written to for an event from `event_bucket`.
    pub fn destination_bucket_for<'a>(&'a self, event_bucket: &'a str) -> &'a str {
        self.destination_bucket.as_deref().unwrap_or(event_bucket)
    }

    pub fn manifest_bucket_for<'a>(&'a self, event_bucket: &'a str) -> &'a str {
        self.manifest_bucket
            .as_deref()
            .unwrap_or_else(|| self.destination_bucket_for(event_bucket))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, folder) in [
            ("source_folder", &self.source_folder),
            ("destination_folder", &self.destination_folder),
            ("manifest_folder", &self.manifest_folder),
        ] {
            if folder.is_empty() || !folder.ends_with('/') {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} must be a non-empty prefix ending in '/', got '{}'",
                    name, folder
                )));
            }
        }

        if self.source_folder == self.destination_folder {
            return Err(PipelineError::InvalidConfig(
                "source_folder and destination_folder must differ".to_string(),
            ));
        }

        self.quality.validate()?;

        for (name, bucket) in [
            ("source_bucket", &self.source_bucket),
            ("destination_bucket", &self.destination_bucket),
            ("manifest_bucket", &self.manifest_bucket),
        ] {
            if bucket.as_deref().is_some_and(str::is_empty) {
                return Err(PipelineError::InvalidConfig(format!(
                    "{} must not be empty",
                    name
                )));
            }
        }

        Ok(())
    }
}

/// On-disk shape of the TOML configuration; every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigFile {
    pub profile: Option<Profile>,
    pub source_bucket: Option<String>,
    pub destination_bucket: Option<String>,
    pub manifest_bucket: Option<String>,
    pub source_folder: Option<String>,
    pub destination_folder: Option<String>,
    pub manifest_folder: Option<String>,
    pub border: Option<u32>,
    pub background: Option<BackgroundColor>,
    pub gravity: Option<Gravity>,
    pub output_format: Option<OutputFormat>,
    pub quality: Option<QualityBound>,
    pub codecs: Option<Vec<CodecKind>>,
    pub variant_cache_control: Option<String>,
    pub manifest_cache_control: Option<String>,
    pub manifest_enabled: Option<bool>,
    pub timezone: Option<ManifestTimezone>,
    pub parallel_variants: Option<bool>,
}

impl ConfigFile {
    pub fn resolve(self) -> PipelineConfig {
        let defaults = PipelineConfig::for_profile(self.profile.unwrap_or_default());
        PipelineConfig {
            source_bucket: self.source_bucket.or(defaults.source_bucket),
            destination_bucket: self.destination_bucket.or(defaults.destination_bucket),
            manifest_bucket: self.manifest_bucket.or(defaults.manifest_bucket),
            source_folder: self.source_folder.unwrap_or(defaults.source_folder),
            destination_folder: self
                .destination_folder
                .unwrap_or(defaults.destination_folder),
            manifest_folder: self.manifest_folder.unwrap_or(defaults.manifest_folder),
            border: self.border.unwrap_or(defaults.border),
            background: self.background.unwrap_or(defaults.background),
            gravity: self.gravity.unwrap_or(defaults.gravity),
            output_format: self.output_format.unwrap_or(defaults.output_format),
            quality: self.quality.unwrap_or(defaults.quality),
            codecs: self.codecs.unwrap_or(defaults.codecs),
            variant_cache_control: self
                .variant_cache_control
                .unwrap_or(defaults.variant_cache_control),
            manifest_cache_control: self
                .manifest_cache_control
                .unwrap_or(defaults.manifest_cache_control),
            manifest_enabled: self.manifest_enabled.unwrap_or(defaults.manifest_enabled),
            timezone: self.timezone.unwrap_or(defaults.timezone),
            parallel_variants: self.parallel_variants.unwrap_or(defaults.parallel_variants),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_matches_bordered_profile() {
        let config = PipelineConfig::default();
        assert_eq!(config.border, 30);
        assert_eq!(config.source_folder, "originals/");
        assert_eq!(config.destination_folder, "processed/");
        assert_eq!(config.background, BackgroundColor([255, 255, 255]));
        assert_eq!(config.codecs.len(), 3);
        assert!(!config.manifest_enabled);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_borderless_profile() {
        let config = PipelineConfig::for_profile(Profile::Borderless);
        assert_eq!(config.border, 0);
        assert!(!config.codecs.contains(&CodecKind::JpegRecompress));
    }

    #[test]
    fn test_toml_overrides_profile_defaults() {
        let config = PipelineConfig::from_toml_str(
            r##"
            profile = "borderless"
            border = 12
            background = "#000"
            gravity = "north-west"
            manifest_enabled = true
            timezone = "+02:00"
            codecs = ["png-optimize"]
            quality = { lower = 0.5, upper = 0.7 }
            "##,
        )
        .unwrap();

        assert_eq!(config.border, 12);
        assert_eq!(config.background, BackgroundColor([0, 0, 0]));
        assert_eq!(config.gravity, Gravity::NorthWest);
        assert!(config.manifest_enabled);
        assert_eq!(config.timezone.offset().local_minus_utc(), 7200);
        assert_eq!(config.codecs, vec![CodecKind::PngOptimize]);
        assert_eq!(config.quality.lower, 0.5);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let result = PipelineConfig::from_toml_str("bucket = \"x\"");
        assert!(matches!(result, Err(PipelineError::InvalidConfig(_))));
    }

    #[test]
    fn test_validate_rejects_bad_folders() {
        let mut config = PipelineConfig::default();
        config.destination_folder = "processed".to_string();
        assert!(config.validate().is_err());

        let mut config = PipelineConfig::default();
        config.destination_folder = config.source_folder.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_inverted_quality() {
        let mut config = PipelineConfig::default();
        config.quality = QualityBound {
            lower: 0.9,
            upper: 0.2,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bucket_fallbacks() {
        let mut config = PipelineConfig::default();
        assert_eq!(config.destination_bucket_for("uploads"), "uploads");
        assert_eq!(config.manifest_bucket_for("uploads"), "uploads");

        config.destination_bucket = Some("cdn".to_string());
        assert_eq!(config.manifest_bucket_for("uploads"), "cdn");

        config.manifest_bucket = Some("logs".to_string());
        assert_eq!(config.manifest_bucket_for("uploads"), "logs");
    }

    #[test]
    fn test_background_color_parsing() {
        assert_eq!(
            "#1A2b3C".parse::<BackgroundColor>().unwrap(),
            BackgroundColor([0x1A, 0x2B, 0x3C])
        );
        assert_eq!(
            "#fff".parse::<BackgroundColor>().unwrap(),
            BackgroundColor([255, 255, 255])
        );
        assert!("FFFFFF".parse::<BackgroundColor>().is_err());
        assert!("#GGGGGG".parse::<BackgroundColor>().is_err());
        assert!("#FFFF".parse::<BackgroundColor>().is_err());
        assert_eq!(BackgroundColor([255, 0, 16]).to_string(), "#FF0010");
    }

    #[test]
    fn test_timezone_parsing() {
        assert_eq!("utc".parse::<ManifestTimezone>().unwrap(), ManifestTimezone::utc());
        let tz: ManifestTimezone = "-0530".parse().unwrap();
        assert_eq!(tz.offset().local_minus_utc(), -(5 * 3600 + 30 * 60));
        assert_eq!(tz.to_string(), "-05:30");
        assert!("+25:00".parse::<ManifestTimezone>().is_err());
        assert!("+02:75".parse::<ManifestTimezone>().is_err());
        assert!("Europe/Paris".parse::<ManifestTimezone>().is_err());
    }

    #[test]
    fn test_gravity_offsets() {
        assert_eq!(Gravity::Center.offset((700, 700), (300, 200)), (200, 250));
        assert_eq!(Gravity::NorthWest.offset((700, 700), (300, 200)), (0, 0));
        assert_eq!(Gravity::SouthEast.offset((700, 700), (300, 200)), (400, 500));
        assert_eq!(Gravity::North.offset((10, 10), (10, 4)), (0, 0));
    }
}
