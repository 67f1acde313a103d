//! Session configuration: the JSON document, its validation and the fixed
//! streaming policy.

use log::info;
use serde::Deserialize;
use std::fs::Metadata;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::media::{LogLevel, Rational, VideoCodec};
use crate::pipeline::watchdog::WATCHDOG_THRESHOLD_MS;
use crate::utils::net::{self, HostError};

/// Returns a version as specified in Cargo.toml
pub fn app_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

pub fn app_name() -> &'static str {
    env!("CARGO_PKG_NAME")
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("configuration file name is empty")]
    EmptyPath,

    #[error("unable to read '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("'{0}' is empty")]
    EmptyField(&'static str),

    #[error("invalid output: {0}")]
    Output(HostError),

    #[error("'{0}' does not exist")]
    Missing(PathBuf),

    #[error("'{0}' is not a character device")]
    NotCharDevice(PathBuf),

    #[error("'{0}' is not a regular file")]
    NotRegularFile(PathBuf),

    #[error("watermark is enabled but 'fullFileName' is missing")]
    MissingWatermark,

    #[error("'{0}' is not a PNG image")]
    NotPng(PathBuf),

    #[error("unable to decode '{path}': {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("watermark '{path}' is {width}x{height}, expected {expected_width}x{expected_height}")]
    WatermarkSize {
        path: PathBuf,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
}

/// Fixed parameters every session is held to.
///
/// Mismatches are rejected, never renegotiated.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamPolicy {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub container: &'static str,
    pub codec: VideoCodec,
    pub watermark_width: u32,
    pub watermark_height: u32,
    /// Watermark distance from the left and bottom edges
    pub watermark_margin: u32,
    pub watchdog_threshold: Duration,
    pub protocol_whitelist: Vec<&'static str>,
}

impl Default for StreamPolicy {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: Rational::new(30, 1),
            container: "flv",
            codec: VideoCodec::H264,
            watermark_width: 45,
            watermark_height: 45,
            watermark_margin: 10,
            watchdog_threshold: Duration::from_millis(WATCHDOG_THRESHOLD_MS),
            protocol_whitelist: vec!["tcp", "rtmp"],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConfigDocument {
    program_settings: ProgramSettings,
    #[serde(default)]
    ffmpeg_settings: Option<FfmpegSettings>,
}

#[derive(Debug, Deserialize)]
struct ProgramSettings {
    input: String,
    watermark: WatermarkSettings,
    output: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatermarkSettings {
    enabled: bool,
    #[serde(default)]
    full_file_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FfmpegSettings {
    #[serde(default)]
    log_level: Option<LogLevel>,
}

/// Validated settings of one session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub input_path: PathBuf,
    pub watermark_path: Option<PathBuf>,
    pub output_url: String,
    pub log_level: LogLevel,
}

impl SessionConfig {
    /// Reads and validates the configuration file at `path`.
    pub fn load(path: impl AsRef<Path>, policy: &StreamPolicy) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.as_os_str().is_empty() {
            return Err(ConfigError::EmptyPath);
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&text, policy)
    }

    /// Validates a configuration document.
    pub fn from_json(text: &str, policy: &StreamPolicy) -> Result<Self, ConfigError> {
        let document: ConfigDocument = serde_json::from_str(text)?;
        let settings = document.program_settings;

        if settings.input.is_empty() {
            return Err(ConfigError::EmptyField("input"));
        }
        let input_path = PathBuf::from(&settings.input);
        let metadata = metadata_of(&input_path)?;
        if !is_char_device(&metadata) {
            return Err(ConfigError::NotCharDevice(input_path));
        }
        info!("Config: input stream '{}'", input_path.display());

        let watermark_path = if settings.watermark.enabled {
            let name = settings
                .watermark
                .full_file_name
                .ok_or(ConfigError::MissingWatermark)?;
            if name.is_empty() {
                return Err(ConfigError::EmptyField("fullFileName"));
            }
            let path = PathBuf::from(name);
            check_watermark(&path, policy)?;
            info!("Config: watermark '{}'", path.display());
            Some(path)
        } else {
            info!("Config: watermark is not enabled");
            None
        };

        if settings.output.is_empty() {
            return Err(ConfigError::EmptyField("output"));
        }
        net::extract_host(&settings.output).map_err(ConfigError::Output)?;
        info!("Config: output '{}'", settings.output);

        let log_level = document
            .ffmpeg_settings
            .and_then(|ffmpeg| ffmpeg.log_level)
            .unwrap_or_default();
        info!("Config: media library log level '{}'", log_level);

        Ok(Self {
            input_path,
            watermark_path,
            output_url: settings.output,
            log_level,
        })
    }
}

fn metadata_of(path: &Path) -> Result<Metadata, ConfigError> {
    std::fs::metadata(path).map_err(|_| ConfigError::Missing(path.to_path_buf()))
}

#[cfg(unix)]
fn is_char_device(metadata: &Metadata) -> bool {
    use std::os::unix::fs::FileTypeExt;
    metadata.file_type().is_char_device()
}

#[cfg(not(unix))]
fn is_char_device(_metadata: &Metadata) -> bool {
    false
}

/// The watermark must be a regular PNG file of exactly the policy size.
fn check_watermark(path: &Path, policy: &StreamPolicy) -> Result<(), ConfigError> {
    let metadata = metadata_of(path)?;
    if !metadata.is_file() {
        return Err(ConfigError::NotRegularFile(path.to_path_buf()));
    }

    let bytes = std::fs::read(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    match image::guess_format(&bytes) {
        Ok(image::ImageFormat::Png) => {}
        _ => return Err(ConfigError::NotPng(path.to_path_buf())),
    }

    let decoded = image::load_from_memory_with_format(&bytes, image::ImageFormat::Png)
        .map_err(|source| ConfigError::Image {
            path: path.to_path_buf(),
            source,
        })?;
    let (width, height) = (decoded.width(), decoded.height());
    if width != policy.watermark_width || height != policy.watermark_height {
        return Err(ConfigError::WatermarkSize {
            path: path.to_path_buf(),
            width,
            height,
            expected_width: policy.watermark_width,
            expected_height: policy.watermark_height,
        });
    }
    Ok(())
}
