//! FFmpeg implementation of the media boundary.
//!
//! Uses the raw bindings re-exported by `ffmpeg-next`. Every native handle is
//! owned by exactly one wrapper whose `Drop` frees it, so a partially built
//! session is released by dropping whatever was created.

mod codec;
mod demux;
mod filter;
mod frame;
mod mux;

use ffmpeg_next::ffi;
use log::{debug, info};
use std::ffi::{CStr, CString, c_char, c_int, c_uint};

use super::{
    EncoderInfo, EncoderSettings, FilterSpec, LibraryVersion, LogLevel, MediaBackend, MediaError,
    PixelFormat, Rational, StreamInfo, VideoCodec,
};

pub use codec::{FfmpegDecoder, FfmpegEncoder};
pub use demux::FfmpegInput;
pub use filter::FfmpegFilter;
pub use frame::{FfmpegFrame, FfmpegPacket};
pub use mux::FfmpegOutput;

/// Entry point to the system FFmpeg libraries.
///
/// Registers the capture devices and initializes networking on creation;
/// networking is de-initialized on drop.
pub struct FfmpegBackend {
    _private: (),
}

impl FfmpegBackend {
    pub fn new() -> Result<Self, MediaError> {
        unsafe {
            ffi::avdevice_register_all();
            check(ffi::avformat_network_init())?;
        }
        info!("FfmpegBackend: devices registered, network initialized");
        Ok(Self { _private: () })
    }
}

impl Drop for FfmpegBackend {
    fn drop(&mut self) {
        unsafe {
            ffi::avformat_network_deinit();
        }
        debug!("FfmpegBackend: network de-initialized");
    }
}

impl MediaBackend for FfmpegBackend {
    type Packet = FfmpegPacket;
    type Frame = FfmpegFrame;
    type Input = FfmpegInput;
    type Decoder = FfmpegDecoder;
    type Filter = FfmpegFilter;
    type Encoder = FfmpegEncoder;
    type Output = FfmpegOutput;

    fn set_log_level(&self, level: LogLevel) -> Result<(), MediaError> {
        let applied = unsafe {
            ffi::av_log_set_level(level.av_level());
            ffi::av_log_get_level()
        };
        if applied != level.av_level() {
            return Err(MediaError::invalid(format!("log level '{}' was not applied", level)));
        }
        debug!("FfmpegBackend: log level set to '{}'", level);
        Ok(())
    }

    fn open_input(&self, path: &str) -> Result<FfmpegInput, MediaError> {
        FfmpegInput::open(path)
    }

    fn open_decoder(&self, input: &FfmpegInput, stream: &StreamInfo) -> Result<FfmpegDecoder, MediaError> {
        FfmpegDecoder::open(input, stream)
    }

    fn find_encoder(&self, codec: VideoCodec) -> Result<EncoderInfo, MediaError> {
        codec::find_encoder(codec)
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<FfmpegEncoder, MediaError> {
        FfmpegEncoder::open(settings)
    }

    fn alloc_output(&self, url: &str, format: &str) -> Result<FfmpegOutput, MediaError> {
        FfmpegOutput::alloc(url, format)
    }

    fn build_filter(&self, spec: &FilterSpec) -> Result<FfmpegFilter, MediaError> {
        FfmpegFilter::build(spec)
    }

    fn alloc_packet(&self) -> Result<FfmpegPacket, MediaError> {
        FfmpegPacket::alloc()
    }

    fn alloc_frame(&self) -> Result<FfmpegFrame, MediaError> {
        FfmpegFrame::alloc()
    }

    fn library_versions(&self) -> Vec<LibraryVersion> {
        let versions = unsafe {
            [
                ("libavutil", ffi::avutil_version()),
                ("libavcodec", ffi::avcodec_version()),
                ("libavformat", ffi::avformat_version()),
                ("libavdevice", ffi::avdevice_version()),
                ("libavfilter", ffi::avfilter_version()),
            ]
        };
        versions
            .into_iter()
            .map(|(name, version)| LibraryVersion {
                name,
                version: format_version(version),
            })
            .collect()
    }
}

/// `major.minor.micro` of a packed library version.
fn format_version(version: c_uint) -> String {
    format!("{}.{}.{}", version >> 16, (version >> 8) & 0xff, version & 0xff)
}

/// Maps a negative return code to a [`MediaError`], passing others through.
pub(crate) fn check(ret: c_int) -> Result<c_int, MediaError> {
    if ret >= 0 { Ok(ret) } else { Err(media_error(ret)) }
}

pub(crate) fn media_error(code: c_int) -> MediaError {
    match ffmpeg_next::Error::from(code) {
        ffmpeg_next::Error::Eof => MediaError::Eof,
        ffmpeg_next::Error::Exit => MediaError::Exit,
        ffmpeg_next::Error::Other { errno } if errno == ffmpeg_next::error::EAGAIN => MediaError::Again,
        _ => MediaError::Native {
            code,
            message: ffmpeg_error_string(code),
        },
    }
}

pub(crate) fn ffmpeg_error_string(errnum: c_int) -> String {
    let mut buf = [0 as c_char; 256];
    unsafe {
        ffi::av_strerror(errnum, buf.as_mut_ptr(), buf.len());
        CStr::from_ptr(buf.as_ptr()).to_string_lossy().into_owned()
    }
}

pub(crate) fn out_of_memory(what: &str) -> MediaError {
    let code = ffi::AVERROR(ffmpeg_next::error::ENOMEM);
    MediaError::Native {
        code,
        message: format!("unable to allocate {}", what),
    }
}

pub(crate) fn c_string(value: &str) -> Result<CString, MediaError> {
    CString::new(value).map_err(|_| MediaError::invalid(format!("'{}' contains a NUL byte", value)))
}

pub(crate) fn to_av(rational: Rational) -> ffi::AVRational {
    ffi::AVRational {
        num: rational.num,
        den: rational.den,
    }
}

pub(crate) fn from_av(rational: ffi::AVRational) -> Rational {
    Rational::new(rational.num, rational.den)
}

pub(crate) fn pixel_format_name(format: ffi::AVPixelFormat) -> Option<PixelFormat> {
    if format == ffi::AVPixelFormat::AV_PIX_FMT_NONE {
        return None;
    }
    let name = unsafe { ffi::av_get_pix_fmt_name(format) };
    if name.is_null() {
        return None;
    }
    let name = unsafe { CStr::from_ptr(name) };
    Some(PixelFormat::new(name.to_string_lossy()))
}

pub(crate) fn pixel_format_id(format: &PixelFormat) -> Result<ffi::AVPixelFormat, MediaError> {
    let name = c_string(format.as_str())?;
    let id = unsafe { ffi::av_get_pix_fmt(name.as_ptr()) };
    if id == ffi::AVPixelFormat::AV_PIX_FMT_NONE {
        return Err(MediaError::invalid(format!("unknown pixel format '{}'", format)));
    }
    Ok(id)
}
