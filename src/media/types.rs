//! Value types exchanged across the media boundary

use serde::Deserialize;
use std::ffi::{c_int, c_void};
use std::path::PathBuf;

/// Exact fraction, used for time bases, frame rates and aspect ratios.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Rational {
    pub num: i32,
    pub den: i32,
}

impl Rational {
    pub const fn new(num: i32, den: i32) -> Self {
        Self { num, den }
    }

    pub fn invert(&self) -> Self {
        Self::new(self.den, self.num)
    }

    /// Converts `value` expressed in `from` units into `to` units, rounding to
    /// the nearest integer with halves away from zero.
    pub fn rescale(value: i64, from: Rational, to: Rational) -> i64 {
        let mut b = from.num as i128 * to.den as i128;
        let mut c = from.den as i128 * to.num as i128;
        if c == 0 {
            return value;
        }
        if c < 0 {
            b = -b;
            c = -c;
        }

        let product = value as i128 * b;
        let half = c / 2;
        let scaled = if product >= 0 {
            (product + half) / c
        } else {
            -((-product + half) / c)
        };
        scaled.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }
}

impl std::fmt::Display for Rational {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.num, self.den)
    }
}

/// Pixel format identified by its library name (`yuv420p`, `yuyv422`, ...).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PixelFormat(String);

impl PixelFormat {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Kind of elementary stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Video,
    Audio,
    Other,
}

impl std::fmt::Display for MediaKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MediaKind::Video => write!(f, "Video"),
            MediaKind::Audio => write!(f, "Audio"),
            MediaKind::Other => write!(f, "Other"),
        }
    }
}

/// A stream discovered while probing the input.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    pub index: usize,
    pub kind: MediaKind,
    pub width: u32,
    pub height: u32,
    pub time_base: Rational,
    /// Frame rate as guessed from the container and codec.
    pub frame_rate: Rational,
}

/// Parameters of an opened decoder, used to set up the encoder and the filter
/// source.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderParams {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub sample_aspect_ratio: Rational,
    pub packet_time_base: Rational,
    pub frame_rate: Rational,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VideoCodec {
    H264,
}

impl VideoCodec {
    pub fn name(&self) -> &'static str {
        match self {
            VideoCodec::H264 => "h264",
        }
    }
}

/// What the library reports about a registered encoder.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderInfo {
    pub name: String,
    /// Supported pixel formats in order of preference.
    pub pixel_formats: Vec<PixelFormat>,
}

impl EncoderInfo {
    /// First advertised format, if any.
    pub fn preferred_pixel_format(&self) -> Option<&PixelFormat> {
        self.pixel_formats.iter().find(|fmt| !fmt.as_str().is_empty())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub codec: VideoCodec,
    pub width: u32,
    pub height: u32,
    pub sample_aspect_ratio: Rational,
    pub pixel_format: PixelFormat,
    pub time_base: Rational,
    /// Emit codec extradata once in the container header instead of in-band.
    pub global_header: bool,
}

/// Watermark composited over the main picture.
#[derive(Debug, Clone, PartialEq)]
pub struct Overlay {
    pub path: PathBuf,
    /// Distance from the left edge, in pixels.
    pub left: u32,
    /// Distance from the bottom edge, in pixels.
    pub bottom: u32,
}

/// Everything needed to build the filter graph of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterSpec {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    pub time_base: Rational,
    pub sample_aspect_ratio: Rational,
    pub frame_rate: Rational,
    /// The sink only accepts this format (the encoder's).
    pub sink_pixel_format: PixelFormat,
    pub overlay: Option<Overlay>,
}

impl FilterSpec {
    /// Argument string of the buffer source node.
    pub fn source_args(&self) -> String {
        format!(
            "video_size={}x{}:pix_fmt={}:time_base={}:pixel_aspect={}:frame_rate={}",
            self.width,
            self.height,
            self.pixel_format,
            self.time_base,
            self.sample_aspect_ratio,
            self.frame_rate
        )
    }

    /// Graph description linking `[in]` to `[out]`.
    pub fn describe(&self) -> String {
        match &self.overlay {
            Some(overlay) => format!(
                "movie={} [wm];[in][wm] overlay={}:main_h-overlay_h-{} [out]",
                escape_filter_path(&overlay.path.to_string_lossy()),
                overlay.left,
                overlay.bottom
            ),
            None => "null".to_string(),
        }
    }
}

/// Escapes a path for use as a filter option inside a graph description.
///
/// Two parsers see the value: the option parser, then the graph parser.
fn escape_filter_path(path: &str) -> String {
    let escape = |input: &str, specials: &[char]| {
        let mut out = String::with_capacity(input.len());
        for c in input.chars() {
            if specials.contains(&c) {
                out.push('\\');
            }
            out.push(c);
        }
        out
    };
    let option_level = escape(path, &['\\', '\'', ':']);
    escape(&option_level, &['\\', '\'', '[', ']', ',', ';'])
}

/// Interrupt callback handed to blocking network calls.
///
/// The library calls `callback(opaque)` while blocked; a non-zero return
/// aborts the call.
#[derive(Debug, Clone, Copy)]
pub struct InterruptHook {
    pub callback: extern "C" fn(*mut c_void) -> c_int,
    pub opaque: *mut c_void,
}

impl InterruptHook {
    pub fn poll(&self) -> c_int {
        (self.callback)(self.opaque)
    }
}

/// Verbosity of the media library's own logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Quiet,
    Panic,
    Fatal,
    Error,
    Warning,
    Info,
    Verbose,
    Debug,
    #[default]
    Trace,
}

impl LogLevel {
    pub fn name(&self) -> &'static str {
        match self {
            LogLevel::Quiet => "quiet",
            LogLevel::Panic => "panic",
            LogLevel::Fatal => "fatal",
            LogLevel::Error => "error",
            LogLevel::Warning => "warning",
            LogLevel::Info => "info",
            LogLevel::Verbose => "verbose",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }

    /// Numeric level understood by the library (`AV_LOG_*`).
    pub fn av_level(&self) -> i32 {
        match self {
            LogLevel::Quiet => -8,
            LogLevel::Panic => 0,
            LogLevel::Fatal => 8,
            LogLevel::Error => 16,
            LogLevel::Warning => 24,
            LogLevel::Info => 32,
            LogLevel::Verbose => 40,
            LogLevel::Debug => 48,
            LogLevel::Trace => 56,
        }
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Version of one linked media library.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LibraryVersion {
    pub name: &'static str,
    pub version: String,
}

impl std::fmt::Display for LibraryVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}
