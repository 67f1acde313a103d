use ffmpeg_next::ffi;
use log::{debug, error, info};
use std::ffi::{c_int, c_void};
use std::ptr;

use super::codec::FfmpegEncoder;
use super::frame::FfmpegPacket;
use super::{c_string, check, from_av};
use crate::media::{InterruptHook, MediaError, Muxer, Rational};

/// Output format context (`avformat_alloc_output_context2`) and its sink.
pub struct FfmpegOutput {
    ctx: *mut ffi::AVFormatContext,
}

impl FfmpegOutput {
    pub(super) fn alloc(url: &str, format: &str) -> Result<Self, MediaError> {
        let c_url = c_string(url)?;
        let c_format = c_string(format)?;
        let mut ctx: *mut ffi::AVFormatContext = ptr::null_mut();
        unsafe {
            check(ffi::avformat_alloc_output_context2(
                &mut ctx,
                ptr::null(),
                c_format.as_ptr(),
                c_url.as_ptr(),
            ))?;
        }
        if ctx.is_null() {
            return Err(MediaError::invalid(format!("no output context for '{}'", url)));
        }
        if unsafe { (*ctx).oformat.is_null() } {
            unsafe { ffi::avformat_free_context(ctx) };
            return Err(MediaError::invalid(format!("no output format '{}'", format)));
        }
        debug!("FfmpegOutput: allocated '{}' output for '{}'", format, url);
        Ok(Self { ctx })
    }

    fn format_flags(&self) -> c_int {
        unsafe { (*(*self.ctx).oformat).flags }
    }

    fn stream(&self, index: usize) -> *mut ffi::AVStream {
        unsafe {
            if index >= (*self.ctx).nb_streams as usize {
                return ptr::null_mut();
            }
            *(*self.ctx).streams.add(index)
        }
    }
}

impl Muxer for FfmpegOutput {
    type Packet = FfmpegPacket;
    type Encoder = FfmpegEncoder;

    fn add_video_stream(&mut self) -> Result<usize, MediaError> {
        let stream = unsafe { ffi::avformat_new_stream(self.ctx, ptr::null()) };
        if stream.is_null() {
            return Err(MediaError::invalid("unable to add an output stream"));
        }
        let index = unsafe { (*stream).index };
        usize::try_from(index).map_err(|_| MediaError::invalid(format!("negative stream index {}", index)))
    }

    fn configure_stream(&mut self, index: usize, encoder: &FfmpegEncoder) -> Result<(), MediaError> {
        let stream = self.stream(index);
        if stream.is_null() {
            return Err(MediaError::invalid(format!("no output stream {}", index)));
        }
        unsafe {
            check(ffi::avcodec_parameters_from_context((*stream).codecpar, encoder.as_ptr()))?;
            (*stream).time_base = (*encoder.as_ptr()).time_base;
        }
        Ok(())
    }

    fn needs_global_header(&self) -> bool {
        self.format_flags() & ffi::AVFMT_GLOBALHEADER as c_int != 0
    }

    fn needs_network(&self) -> bool {
        self.format_flags() & ffi::AVFMT_NOFILE as c_int == 0
    }

    fn open_io(&mut self, url: &str, hook: InterruptHook, whitelist: &[&str]) -> Result<(), MediaError> {
        if self.has_open_io() {
            return Err(MediaError::invalid("output sink is already open"));
        }
        let c_url = c_string(url)?;
        let key = c_string("protocol_whitelist")?;
        let value = c_string(&whitelist.join(","))?;

        let callback: unsafe extern "C" fn(*mut c_void) -> c_int = hook.callback;
        let interrupt = ffi::AVIOInterruptCB {
            callback: Some(callback),
            opaque: hook.opaque,
        };

        unsafe {
            let mut options: *mut ffi::AVDictionary = ptr::null_mut();
            check(ffi::av_dict_set(&mut options, key.as_ptr(), value.as_ptr(), 0))?;

            (*self.ctx).interrupt_callback = interrupt;
            let opened = ffi::avio_open2(
                &mut (*self.ctx).pb,
                c_url.as_ptr(),
                ffi::AVIO_FLAG_WRITE as c_int,
                &interrupt,
                &mut options,
            );
            let unconsumed = !options.is_null();
            ffi::av_dict_free(&mut options);
            check(opened)?;

            if unconsumed {
                error!("FfmpegOutput: protocol options were not applied to '{}'", url);
                ffi::avio_closep(&mut (*self.ctx).pb);
                return Err(MediaError::invalid("protocol whitelist was not consumed"));
            }
        }
        info!("FfmpegOutput: sink opened for '{}'", url);
        Ok(())
    }

    fn has_open_io(&self) -> bool {
        unsafe { !(*self.ctx).pb.is_null() }
    }

    fn write_header(&mut self) -> Result<(), MediaError> {
        unsafe {
            check(ffi::avformat_write_header(self.ctx, ptr::null_mut()))?;
        }
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        let stream = self.stream(index);
        if stream.is_null() {
            return None;
        }
        Some(from_av(unsafe { (*stream).time_base }))
    }

    fn write_packet(&mut self, packet: &mut FfmpegPacket) -> Result<(), MediaError> {
        unsafe {
            check(ffi::av_interleaved_write_frame(self.ctx, packet.ptr))?;
        }
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), MediaError> {
        unsafe {
            check(ffi::av_write_trailer(self.ctx))?;
        }
        Ok(())
    }

    fn close_io(&mut self) -> Result<(), MediaError> {
        if !self.needs_network() || !self.has_open_io() {
            return Ok(());
        }
        unsafe {
            check(ffi::avio_closep(&mut (*self.ctx).pb))?;
        }
        Ok(())
    }
}

impl Drop for FfmpegOutput {
    fn drop(&mut self) {
        unsafe {
            if self.needs_network() && !(*self.ctx).pb.is_null() {
                ffi::avio_closep(&mut (*self.ctx).pb);
            }
            ffi::avformat_free_context(self.ctx);
        }
        debug!("FfmpegOutput: freed");
    }
}
