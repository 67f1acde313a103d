use ffmpeg_next::ffi;
use log::{debug, info};
use std::ptr;

use super::frame::FfmpegPacket;
use super::{c_string, check, from_av};
use crate::media::{Demuxer, MediaError, MediaKind, StreamInfo};

/// Opened input format context (`avformat_open_input`).
pub struct FfmpegInput {
    pub(super) ctx: *mut ffi::AVFormatContext,
}

impl FfmpegInput {
    pub(super) fn open(path: &str) -> Result<Self, MediaError> {
        let url = c_string(path)?;
        let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
        unsafe {
            check(ffi::avformat_open_input(
                &mut ctx,
                url.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
            ))?;
        }
        if ctx.is_null() {
            return Err(MediaError::invalid(format!("no input context for '{}'", path)));
        }
        let input = Self { ctx };

        unsafe {
            check(ffi::avformat_find_stream_info(input.ctx, ptr::null_mut()))?;
        }
        info!("FfmpegInput: opened '{}' with {} streams", path, input.stream_count());
        Ok(input)
    }

    fn stream_count(&self) -> usize {
        unsafe { (*self.ctx).nb_streams as usize }
    }

    /// Stream at `index`, null when out of range.
    pub(super) fn stream(&self, index: usize) -> *mut ffi::AVStream {
        if index >= self.stream_count() {
            return ptr::null_mut();
        }
        unsafe { *(*self.ctx).streams.add(index) }
    }
}

impl Demuxer for FfmpegInput {
    type Packet = FfmpegPacket;

    fn streams(&self) -> Vec<StreamInfo> {
        let mut streams = Vec::with_capacity(self.stream_count());
        for index in 0..self.stream_count() {
            let stream = self.stream(index);
            if stream.is_null() {
                continue;
            }
            unsafe {
                let params = (*stream).codecpar;
                if params.is_null() {
                    continue;
                }
                let kind = match (*params).codec_type {
                    ffi::AVMediaType::AVMEDIA_TYPE_VIDEO => MediaKind::Video,
                    ffi::AVMediaType::AVMEDIA_TYPE_AUDIO => MediaKind::Audio,
                    _ => MediaKind::Other,
                };
                let frame_rate = ffi::av_guess_frame_rate(self.ctx, stream, ptr::null_mut());
                streams.push(StreamInfo {
                    index,
                    kind,
                    width: u32::try_from((*params).width).unwrap_or(0),
                    height: u32::try_from((*params).height).unwrap_or(0),
                    time_base: from_av((*stream).time_base),
                    frame_rate: from_av(frame_rate),
                });
            }
        }
        debug!("FfmpegInput: streams {:?}", streams);
        streams
    }

    fn read_packet(&mut self, packet: &mut FfmpegPacket) -> Result<(), MediaError> {
        unsafe {
            check(ffi::av_read_frame(self.ctx, packet.ptr))?;
        }
        Ok(())
    }
}

impl Drop for FfmpegInput {
    fn drop(&mut self) {
        unsafe {
            ffi::avformat_close_input(&mut self.ctx);
        }
        debug!("FfmpegInput: closed");
    }
}
