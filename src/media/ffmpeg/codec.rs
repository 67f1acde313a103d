use ffmpeg_next::ffi;
use log::{debug, info, warn};
use std::ffi::{CStr, c_int};
use std::ptr;

use super::demux::FfmpegInput;
use super::frame::{FfmpegFrame, FfmpegPacket};
use super::{check, from_av, out_of_memory, pixel_format_id, pixel_format_name, to_av};
use crate::media::{
    Decoder, DecoderParams, Encoder, EncoderInfo, EncoderSettings, MediaError, PixelFormat,
    Rational, StreamInfo, VideoCodec,
};

fn codec_id(codec: VideoCodec) -> ffi::AVCodecID {
    match codec {
        VideoCodec::H264 => ffi::AVCodecID::AV_CODEC_ID_H264,
    }
}

fn lookup_encoder(codec: VideoCodec) -> Result<*const ffi::AVCodec, MediaError> {
    let encoder = unsafe { ffi::avcodec_find_encoder(codec_id(codec)) };
    if encoder.is_null() {
        return Err(MediaError::invalid(format!("no registered {} encoder", codec.name())));
    }
    Ok(encoder)
}

/// Allocates a codec context owned by the returned guard.
fn alloc_context(codec: *const ffi::AVCodec) -> Result<CodecContext, MediaError> {
    let ctx = unsafe { ffi::avcodec_alloc_context3(codec) };
    if ctx.is_null() {
        return Err(out_of_memory("codec context"));
    }
    Ok(CodecContext { ctx })
}

struct CodecContext {
    ctx: *mut ffi::AVCodecContext,
}

impl Drop for CodecContext {
    fn drop(&mut self) {
        unsafe {
            ffi::avcodec_free_context(&mut self.ctx);
        }
    }
}

pub(super) fn find_encoder(codec: VideoCodec) -> Result<EncoderInfo, MediaError> {
    let encoder = lookup_encoder(codec)?;
    let name = unsafe { CStr::from_ptr((*encoder).name) }
        .to_string_lossy()
        .into_owned();

    let mut pixel_formats = Vec::new();
    unsafe {
        let mut format = (*encoder).pix_fmts;
        if format.is_null() {
            warn!("FfmpegEncoder: '{}' does not list its pixel formats", name);
        } else {
            while *format != ffi::AVPixelFormat::AV_PIX_FMT_NONE {
                if let Some(known) = pixel_format_name(*format) {
                    pixel_formats.push(known);
                }
                format = format.add(1);
            }
        }
    }
    Ok(EncoderInfo { name, pixel_formats })
}

/// Opened decode context for one input stream.
pub struct FfmpegDecoder {
    context: CodecContext,
}

impl FfmpegDecoder {
    pub(super) fn open(input: &FfmpegInput, info: &StreamInfo) -> Result<Self, MediaError> {
        let stream = input.stream(info.index);
        if stream.is_null() {
            return Err(MediaError::invalid(format!("no input stream {}", info.index)));
        }

        unsafe {
            let params = (*stream).codecpar;
            let decoder = ffi::avcodec_find_decoder((*params).codec_id);
            if decoder.is_null() {
                return Err(MediaError::invalid(format!(
                    "no registered decoder for codec id {}",
                    (*params).codec_id as c_int
                )));
            }

            let context = alloc_context(decoder)?;
            check(ffi::avcodec_parameters_to_context(context.ctx, params))?;
            (*context.ctx).pkt_timebase = (*stream).time_base;
            (*context.ctx).framerate = to_av(info.frame_rate);
            check(ffi::avcodec_open2(context.ctx, decoder, ptr::null_mut()))?;

            info!(
                "FfmpegDecoder: opened '{}' for stream {}",
                CStr::from_ptr((*decoder).name).to_string_lossy(),
                info.index
            );
            Ok(Self { context })
        }
    }
}

impl Decoder for FfmpegDecoder {
    type Packet = FfmpegPacket;
    type Frame = FfmpegFrame;

    fn params(&self) -> DecoderParams {
        let ctx = self.context.ctx;
        unsafe {
            DecoderParams {
                width: u32::try_from((*ctx).width).unwrap_or(0),
                height: u32::try_from((*ctx).height).unwrap_or(0),
                pixel_format: pixel_format_name((*ctx).pix_fmt)
                    .unwrap_or_else(|| PixelFormat::new("none")),
                sample_aspect_ratio: from_av((*ctx).sample_aspect_ratio),
                packet_time_base: from_av((*ctx).pkt_timebase),
                frame_rate: from_av((*ctx).framerate),
            }
        }
    }

    fn send_packet(&mut self, packet: Option<&FfmpegPacket>) -> Result<(), MediaError> {
        let packet = packet.map_or(ptr::null(), |packet| packet.ptr as *const _);
        unsafe {
            check(ffi::avcodec_send_packet(self.context.ctx, packet))?;
        }
        Ok(())
    }

    fn receive_frame(&mut self, frame: &mut FfmpegFrame) -> Result<(), MediaError> {
        unsafe {
            check(ffi::avcodec_receive_frame(self.context.ctx, frame.ptr))?;
        }
        Ok(())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        debug!("FfmpegDecoder: freed");
    }
}

/// Opened encode context.
pub struct FfmpegEncoder {
    context: CodecContext,
    capabilities: c_int,
}

impl FfmpegEncoder {
    pub(super) fn open(settings: &EncoderSettings) -> Result<Self, MediaError> {
        let encoder = lookup_encoder(settings.codec)?;
        let context = alloc_context(encoder)?;
        let pixel_format = pixel_format_id(&settings.pixel_format)?;

        unsafe {
            let ctx = context.ctx;
            (*ctx).width = settings.width as c_int;
            (*ctx).height = settings.height as c_int;
            (*ctx).sample_aspect_ratio = to_av(settings.sample_aspect_ratio);
            (*ctx).pix_fmt = pixel_format;
            (*ctx).time_base = to_av(settings.time_base);
            if settings.global_header {
                (*ctx).flags |= ffi::AV_CODEC_FLAG_GLOBAL_HEADER as c_int;
            }
            check(ffi::avcodec_open2(ctx, encoder, ptr::null_mut()))?;

            info!(
                "FfmpegEncoder: opened '{}' {}x{} {} time base {}",
                CStr::from_ptr((*encoder).name).to_string_lossy(),
                settings.width,
                settings.height,
                settings.pixel_format,
                settings.time_base
            );
            Ok(Self {
                context,
                capabilities: (*encoder).capabilities,
            })
        }
    }

    pub(super) fn as_ptr(&self) -> *const ffi::AVCodecContext {
        self.context.ctx
    }
}

impl Encoder for FfmpegEncoder {
    type Packet = FfmpegPacket;
    type Frame = FfmpegFrame;

    fn time_base(&self) -> Rational {
        from_av(unsafe { (*self.context.ctx).time_base })
    }

    fn buffers_frames(&self) -> bool {
        self.capabilities & ffi::AV_CODEC_CAP_DELAY as c_int != 0
    }

    fn send_frame(&mut self, frame: Option<&FfmpegFrame>) -> Result<(), MediaError> {
        let frame = frame.map_or(ptr::null(), |frame| frame.ptr as *const _);
        unsafe {
            check(ffi::avcodec_send_frame(self.context.ctx, frame))?;
        }
        Ok(())
    }

    fn receive_packet(&mut self, packet: &mut FfmpegPacket) -> Result<(), MediaError> {
        unsafe {
            check(ffi::avcodec_receive_packet(self.context.ctx, packet.ptr))?;
        }
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        debug!("FfmpegEncoder: freed");
    }
}
