use ffmpeg_next::ffi;

use super::{out_of_memory, to_av};
use crate::media::{EncodedPacket, MediaError, RawFrame, Rational};

fn timestamp(value: i64) -> Option<i64> {
    (value != ffi::AV_NOPTS_VALUE).then_some(value)
}

/// Owned `AVPacket`.
pub struct FfmpegPacket {
    pub(super) ptr: *mut ffi::AVPacket,
}

impl FfmpegPacket {
    pub(super) fn alloc() -> Result<Self, MediaError> {
        let ptr = unsafe { ffi::av_packet_alloc() };
        if ptr.is_null() {
            return Err(out_of_memory("packet"));
        }
        Ok(Self { ptr })
    }
}

impl EncodedPacket for FfmpegPacket {
    fn stream_index(&self) -> usize {
        let index = unsafe { (*self.ptr).stream_index };
        usize::try_from(index).unwrap_or(usize::MAX)
    }

    fn set_stream_index(&mut self, index: usize) {
        unsafe {
            (*self.ptr).stream_index = index as i32;
        }
    }

    fn pts(&self) -> Option<i64> {
        timestamp(unsafe { (*self.ptr).pts })
    }

    fn rescale_timestamps(&mut self, from: Rational, to: Rational) {
        unsafe {
            ffi::av_packet_rescale_ts(self.ptr, to_av(from), to_av(to));
        }
    }

    fn size(&self) -> usize {
        usize::try_from(unsafe { (*self.ptr).size }).unwrap_or(0)
    }

    fn unref(&mut self) {
        unsafe {
            ffi::av_packet_unref(self.ptr);
        }
    }
}

impl Drop for FfmpegPacket {
    fn drop(&mut self) {
        unsafe {
            ffi::av_packet_free(&mut self.ptr);
        }
    }
}

/// Owned `AVFrame`.
pub struct FfmpegFrame {
    pub(super) ptr: *mut ffi::AVFrame,
}

impl FfmpegFrame {
    pub(super) fn alloc() -> Result<Self, MediaError> {
        let ptr = unsafe { ffi::av_frame_alloc() };
        if ptr.is_null() {
            return Err(out_of_memory("frame"));
        }
        Ok(Self { ptr })
    }
}

impl RawFrame for FfmpegFrame {
    fn pts(&self) -> Option<i64> {
        timestamp(unsafe { (*self.ptr).pts })
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        unsafe {
            (*self.ptr).pts = pts.unwrap_or(ffi::AV_NOPTS_VALUE);
        }
    }

    fn best_effort_timestamp(&self) -> Option<i64> {
        timestamp(unsafe { (*self.ptr).best_effort_timestamp })
    }

    fn unref(&mut self) {
        unsafe {
            ffi::av_frame_unref(self.ptr);
        }
    }
}

impl Drop for FfmpegFrame {
    fn drop(&mut self) {
        unsafe {
            ffi::av_frame_free(&mut self.ptr);
        }
    }
}
