//! The frame loop: read, decode, filter, encode and write until the input
//! ends or a stop is requested, then flush every stage in order.

use log::{debug, info, warn};
use std::time::Instant;

use crate::error::{Stage, StreamerError, StreamerResult};
use crate::media::{
    Decoder, Demuxer, EncodedPacket, Encoder, FilterGraph, MediaBackend, MediaError, Muxer,
    RawFrame, Rational,
};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::lifecycle::PipelineGraph;
use crate::pipeline::session::StreamPipeline;
use crate::pipeline::state::PipelineState;
use crate::pipeline::watchdog::WatchdogTimer;
use crate::utils::sos::SignalOfStop;

impl<B: MediaBackend> StreamPipeline<B> {
    /// Runs the frame loop on the graph built by `setup`.
    ///
    /// The graph is left in place; [`StreamPipeline::process`] tears it down.
    pub(crate) fn run(&mut self) -> StreamerResult<()> {
        let Some(graph) = self.graph.as_mut() else {
            return Err(StreamerError::NotSetUp);
        };
        if self.state != PipelineState::Ready {
            return Err(StreamerError::invariant(format!(
                "frame loop cannot start in state '{}'",
                self.state
            )));
        }

        let read_packet = self
            .backend
            .alloc_packet()
            .map_err(|e| StreamerError::media(Stage::AllocPacket, e))?;
        let decoded = self
            .backend
            .alloc_frame()
            .map_err(|e| StreamerError::media(Stage::Decode, e))?;
        let filtered = self
            .backend
            .alloc_frame()
            .map_err(|e| StreamerError::media(Stage::Filter, e))?;

        let mut frame_loop = FrameLoop::<B> {
            graph,
            health: &self.health,
            watchdog: &self.watchdog,
            cancel: &self.cancel,
            state: &mut self.state,
            read_packet,
            decoded,
            filtered,
        };
        frame_loop.run()
    }
}

struct FrameLoop<'a, B: MediaBackend> {
    graph: &'a mut PipelineGraph<B>,
    health: &'a PipelineHealth,
    watchdog: &'a WatchdogTimer,
    cancel: &'a SignalOfStop,
    state: &'a mut PipelineState,
    read_packet: B::Packet,
    decoded: B::Frame,
    filtered: B::Frame,
}

impl<B: MediaBackend> FrameLoop<'_, B> {
    fn run(&mut self) -> StreamerResult<()> {
        let result = self.read_input().and_then(|()| self.flush());
        if result.is_err() {
            self.state.advance(PipelineState::Failed);
        }
        result
    }

    fn read_input(&mut self) -> StreamerResult<()> {
        self.state.advance(PipelineState::Reading {
            started_at: Instant::now(),
        });
        let video_stream = self
            .graph
            .video_stream
            .ok_or_else(|| StreamerError::invariant("no input video stream selected"))?;

        loop {
            if self.cancel.cancelled() && self.state.accepts_cancellation() {
                info!("FrameLoop: stop requested, flushing");
                break;
            }

            let input = self.graph.input.get_mut()?;
            match input.read_packet(&mut self.read_packet) {
                Ok(()) => {}
                Err(MediaError::Eof) => {
                    info!("FrameLoop: end of input");
                    break;
                }
                Err(err) => {
                    warn!("FrameLoop: unable to read input, flushing: {}", err);
                    break;
                }
            }

            if self.read_packet.stream_index() != video_stream {
                self.health.record_packet_skipped();
                self.read_packet.unref();
                continue;
            }
            self.health.record_packet_read();

            let sent = self
                .graph
                .decoder
                .get_mut()?
                .send_packet(Some(&self.read_packet));
            self.read_packet.unref();
            sent.map_err(|e| StreamerError::media(Stage::Decode, e))?;

            self.drain_decoder()?;
        }

        if let Some(elapsed) = self.state.running_duration() {
            debug!("FrameLoop: read input for {:?}", elapsed);
        }
        Ok(())
    }

    fn flush(&mut self) -> StreamerResult<()> {
        self.state.advance(PipelineState::FlushingDecoder);
        self.graph
            .decoder
            .get_mut()?
            .send_packet(None)
            .map_err(|e| StreamerError::media(Stage::Decode, e))?;
        self.drain_decoder()?;

        self.state.advance(PipelineState::FlushingFilter);
        self.graph
            .filter
            .get_mut()?
            .push(None)
            .map_err(|e| StreamerError::media(Stage::Filter, e))?;
        self.drain_filter()?;

        if self.graph.encoder.get()?.buffers_frames() {
            self.state.advance(PipelineState::FlushingEncoder);
            self.encode_write(true)?;
        }

        self.state.advance(PipelineState::Finalizing);
        self.graph
            .output
            .get_mut()?
            .write_trailer()
            .map_err(|e| StreamerError::media(Stage::WriteTrailer, e))?;
        info!("FrameLoop: trailer written");

        self.state.advance(PipelineState::Finished);
        Ok(())
    }

    /// Moves every frame the decoder has ready through the filter graph.
    fn drain_decoder(&mut self) -> StreamerResult<()> {
        loop {
            let decoder = self.graph.decoder.get_mut()?;
            match decoder.receive_frame(&mut self.decoded) {
                Ok(()) => {}
                Err(err) if err.is_drain_sentinel() => return Ok(()),
                Err(err) => return Err(StreamerError::media(Stage::Decode, err)),
            }
            self.health.record_frame_decoded();

            let pts = self.decoded.best_effort_timestamp();
            self.decoded.set_pts(pts);

            let pushed = self.graph.filter.get_mut()?.push(Some(&mut self.decoded));
            self.decoded.unref();
            pushed.map_err(|e| StreamerError::media(Stage::Filter, e))?;

            self.drain_filter()?;
        }
    }

    fn drain_filter(&mut self) -> StreamerResult<()> {
        loop {
            let filter = self.graph.filter.get_mut()?;
            match filter.pull(&mut self.filtered) {
                Ok(()) => {}
                Err(err) if err.is_drain_sentinel() => return Ok(()),
                Err(err) => return Err(StreamerError::media(Stage::Filter, err)),
            }
            self.health.record_frame_filtered();

            let from = self.graph.filter.get()?.time_base();
            let to = self.graph.encoder.get()?.time_base();
            if let Some(pts) = self.filtered.pts() {
                self.filtered.set_pts(Some(Rational::rescale(pts, from, to)));
            }

            let result = self.encode_write(false);
            self.filtered.unref();
            result?;
        }
    }

    /// Sends the filtered frame (the flush signal when `flush` is set) to the
    /// encoder and writes every packet it hands back.
    fn encode_write(&mut self, flush: bool) -> StreamerResult<()> {
        let encoder = self.graph.encoder.get_mut()?;
        let sent = if flush {
            encoder.send_frame(None)
        } else {
            encoder.send_frame(Some(&self.filtered))
        };
        sent.map_err(|e| StreamerError::media(Stage::Encode, e))?;
        let encoder_time_base = encoder.time_base();

        let output_stream = self
            .graph
            .output_stream
            .ok_or_else(|| StreamerError::invariant("no output stream configured"))?;

        loop {
            let packet = self.graph.packet.get_mut()?;
            packet.unref();
            let encoder = self.graph.encoder.get_mut()?;
            match encoder.receive_packet(packet) {
                Ok(()) => {}
                Err(err) if err.is_drain_sentinel() => return Ok(()),
                Err(err) => return Err(StreamerError::media(Stage::Encode, err)),
            }

            let output = self.graph.output.get_mut()?;
            let stream_time_base = output.stream_time_base(output_stream).ok_or_else(|| {
                StreamerError::invariant(format!("output stream {} has no time base", output_stream))
            })?;
            packet.set_stream_index(output_stream);
            packet.rescale_timestamps(encoder_time_base, stream_time_base);
            let (pts, size) = (packet.pts(), packet.size());

            self.watchdog.set_begin_time();
            let written = output.write_packet(packet);
            self.watchdog.reset_begin_time();

            match written {
                Ok(()) => {
                    if !self.health.record_packet_written(pts, size) {
                        warn!("FrameLoop: packet timestamp {:?} went backwards", pts);
                    }
                }
                Err(MediaError::Eof) => {
                    info!("FrameLoop: sink reported end of stream");
                    return Err(StreamerError::media(Stage::Write, MediaError::Eof));
                }
                Err(err) => {
                    let timed_out = self.watchdog.is_timeout_reached();
                    if timed_out {
                        warn!("FrameLoop: write interrupted by watchdog: {}", err);
                    }
                    return Err(StreamerError::network(Stage::Write, err, timed_out));
                }
            }
        }
    }
}
