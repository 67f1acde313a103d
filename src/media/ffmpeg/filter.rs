use ffmpeg_next::ffi;
use log::{debug, info};
use std::ffi::{c_int, c_void};
use std::ptr;

use super::frame::FfmpegFrame;
use super::{c_string, check, from_av, out_of_memory, pixel_format_id};
use crate::media::{FilterGraph, FilterSpec, MediaError, Rational};

/// Configured `buffer -> ... -> buffersink` graph.
///
/// The source and sink contexts belong to the graph and are invalidated
/// when it is freed.
pub struct FfmpegFilter {
    graph: *mut ffi::AVFilterGraph,
    source: *mut ffi::AVFilterContext,
    sink: *mut ffi::AVFilterContext,
}

/// Owns one `AVFilterInOut` list until the graph parser takes it.
struct InOut(*mut ffi::AVFilterInOut);

impl InOut {
    fn new(name: &str, filter: *mut ffi::AVFilterContext) -> Result<Self, MediaError> {
        let inout = InOut(unsafe { ffi::avfilter_inout_alloc() });
        if inout.0.is_null() {
            return Err(out_of_memory("filter endpoint"));
        }
        let name = c_string(name)?;
        unsafe {
            (*inout.0).name = ffi::av_strdup(name.as_ptr());
            if (*inout.0).name.is_null() {
                return Err(out_of_memory("filter endpoint name"));
            }
            (*inout.0).filter_ctx = filter;
            (*inout.0).pad_idx = 0;
            (*inout.0).next = ptr::null_mut();
        }
        Ok(inout)
    }
}

impl Drop for InOut {
    fn drop(&mut self) {
        unsafe {
            ffi::avfilter_inout_free(&mut self.0);
        }
    }
}

impl FfmpegFilter {
    pub(super) fn build(spec: &FilterSpec) -> Result<Self, MediaError> {
        let graph = unsafe { ffi::avfilter_graph_alloc() };
        if graph.is_null() {
            return Err(out_of_memory("filter graph"));
        }
        let mut filter = Self {
            graph,
            source: ptr::null_mut(),
            sink: ptr::null_mut(),
        };

        let buffer = c_string("buffer")?;
        let buffersink = c_string("buffersink")?;
        let args = c_string(&spec.source_args())?;
        let description = c_string(&spec.describe())?;
        let in_name = c_string("in")?;
        let out_name = c_string("out")?;
        let pix_fmts = c_string("pix_fmts")?;
        let sink_format = pixel_format_id(&spec.sink_pixel_format)?;

        unsafe {
            let source_def = ffi::avfilter_get_by_name(buffer.as_ptr());
            let sink_def = ffi::avfilter_get_by_name(buffersink.as_ptr());
            if source_def.is_null() || sink_def.is_null() {
                return Err(MediaError::invalid("buffer filters are not available"));
            }

            check(ffi::avfilter_graph_create_filter(
                &mut filter.source,
                source_def,
                in_name.as_ptr(),
                args.as_ptr(),
                ptr::null_mut(),
                filter.graph,
            ))?;
            check(ffi::avfilter_graph_create_filter(
                &mut filter.sink,
                sink_def,
                out_name.as_ptr(),
                ptr::null(),
                ptr::null_mut(),
                filter.graph,
            ))?;

            check(ffi::av_opt_set_bin(
                filter.sink as *mut c_void,
                pix_fmts.as_ptr(),
                &sink_format as *const ffi::AVPixelFormat as *const u8,
                std::mem::size_of::<ffi::AVPixelFormat>() as c_int,
                ffi::AV_OPT_SEARCH_CHILDREN as c_int,
            ))?;

            // the source feeds the graph's "in" label, the sink drains "out"
            let mut outputs = InOut::new("in", filter.source)?;
            let mut inputs = InOut::new("out", filter.sink)?;
            check(ffi::avfilter_graph_parse_ptr(
                filter.graph,
                description.as_ptr(),
                &mut inputs.0,
                &mut outputs.0,
                ptr::null_mut(),
            ))?;
            drop(inputs);
            drop(outputs);

            check(ffi::avfilter_graph_config(filter.graph, ptr::null_mut()))?;
        }

        info!("FfmpegFilter: configured '{}'", spec.describe());
        debug!("FfmpegFilter: source arguments '{}'", spec.source_args());
        Ok(filter)
    }
}

impl FilterGraph for FfmpegFilter {
    type Frame = FfmpegFrame;

    fn push(&mut self, frame: Option<&mut FfmpegFrame>) -> Result<(), MediaError> {
        let frame = frame.map_or(ptr::null_mut(), |frame| frame.ptr);
        unsafe {
            check(ffi::av_buffersrc_add_frame_flags(self.source, frame, 0))?;
        }
        Ok(())
    }

    fn pull(&mut self, frame: &mut FfmpegFrame) -> Result<(), MediaError> {
        unsafe {
            check(ffi::av_buffersink_get_frame(self.sink, frame.ptr))?;
        }
        Ok(())
    }

    fn time_base(&self) -> Rational {
        from_av(unsafe { ffi::av_buffersink_get_time_base(self.sink) })
    }
}

impl Drop for FfmpegFilter {
    fn drop(&mut self) {
        unsafe {
            ffi::avfilter_graph_free(&mut self.graph);
        }
        self.source = ptr::null_mut();
        self.sink = ptr::null_mut();
        debug!("FfmpegFilter: freed");
    }
}
