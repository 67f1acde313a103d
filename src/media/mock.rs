//! Scripted in-memory backend used by the unit tests.
//!
//! Every object records what it does in a shared [`EventLog`] so tests can
//! assert acquisition and release order. Failures are injected per step.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ffi::{c_int, c_void};
use std::rc::Rc;
use std::thread::sleep;
use std::time::{Duration, Instant};

use super::*;
use crate::utils::sos::SignalOfStop;

const NATIVE_EIO: i32 = -5;
const INPUT_TIME_BASE: Rational = Rational::new(1, 1_000_000);
const FLV_TIME_BASE: Rational = Rational::new(1, 1000);
const FRAME_DURATION_US: i64 = 33_333;
const STALL_LIMIT: Duration = Duration::from_secs(5);

/// Step at which the backend reports an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    OpenInput,
    OpenDecoder,
    AllocOutput,
    FindEncoder,
    OpenEncoder,
    OpenIo,
    WriteHeader,
    BuildFilter,
    AllocPacket,
    /// The filter rejects the end-of-stream marker.
    FlushFilter,
    /// The decoder rejects the packet with this index.
    Decode(usize),
    /// The muxer rejects the packet with this index.
    Write(usize),
    WriteTrailer,
    CloseSink,
}

#[derive(Debug, Clone)]
pub struct MockScript {
    pub width: u32,
    pub height: u32,
    pub frame_rate: Rational,
    pub has_video: bool,
    /// Adds an audio stream at index 0 with one audio packet per video packet.
    pub with_audio: bool,
    /// Number of video packets before end of input.
    pub packets: usize,
    pub failure: Option<Failure>,
    /// Frames the encoder holds back before producing packets.
    pub encoder_delay: usize,
    /// The filter discards every n-th frame it receives.
    pub filter_drop_every: Option<usize>,
    /// Written packet index whose write blocks until the hook interrupts it.
    pub stall_write_at: Option<usize>,
    /// Cancels the signal once the video packet with this index was read.
    pub cancel_after: Option<(usize, SignalOfStop)>,
    pub pixel_formats: Vec<&'static str>,
    pub needs_network: bool,
}

impl Default for MockScript {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            frame_rate: Rational::new(30, 1),
            has_video: true,
            with_audio: false,
            packets: 10,
            failure: None,
            encoder_delay: 0,
            filter_drop_every: None,
            stall_write_at: None,
            cancel_after: None,
            pixel_formats: vec!["yuv420p"],
            needs_network: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct EventLog(Rc<RefCell<Vec<String>>>);

impl EventLog {
    pub fn push(&self, event: impl Into<String>) {
        self.0.borrow_mut().push(event.into());
    }

    pub fn snapshot(&self) -> Vec<String> {
        self.0.borrow().clone()
    }

    pub fn clear(&self) {
        self.0.borrow_mut().clear();
    }

    pub fn contains(&self, event: &str) -> bool {
        self.0.borrow().iter().any(|e| e == event)
    }

    pub fn position(&self, event: &str) -> Option<usize> {
        self.0.borrow().iter().position(|e| e == event)
    }
}

#[derive(Debug, Default)]
struct Shared {
    events: EventLog,
    log_level: Cell<Option<LogLevel>>,
    whitelist: RefCell<Vec<String>>,
    filter_spec: RefCell<Option<FilterSpec>>,
    encoder_settings: RefCell<Option<EncoderSettings>>,
    written: RefCell<Vec<i64>>,
    header_written: Cell<bool>,
    trailer_written: Cell<bool>,
}

pub struct MockBackend {
    script: Rc<MockScript>,
    shared: Rc<Shared>,
}

impl MockBackend {
    pub fn new(script: MockScript) -> Self {
        Self {
            script: Rc::new(script),
            shared: Rc::new(Shared::default()),
        }
    }

    pub fn events(&self) -> EventLog {
        self.shared.events.clone()
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.shared.log_level.get()
    }

    pub fn whitelist(&self) -> Vec<String> {
        self.shared.whitelist.borrow().clone()
    }

    pub fn filter_spec(&self) -> Option<FilterSpec> {
        self.shared.filter_spec.borrow().clone()
    }

    pub fn encoder_settings(&self) -> Option<EncoderSettings> {
        self.shared.encoder_settings.borrow().clone()
    }

    /// Timestamps of written packets, in output stream units.
    pub fn written(&self) -> Vec<i64> {
        self.shared.written.borrow().clone()
    }

    pub fn header_written(&self) -> bool {
        self.shared.header_written.get()
    }

    pub fn trailer_written(&self) -> bool {
        self.shared.trailer_written.get()
    }

    fn fail_at(&self, step: Failure) -> Result<(), MediaError> {
        fail_at(&self.script, step)
    }
}

fn fail_at(script: &MockScript, step: Failure) -> Result<(), MediaError> {
    if script.failure == Some(step) {
        Err(MediaError::Native {
            code: NATIVE_EIO,
            message: format!("injected failure at {:?}", step),
        })
    } else {
        Ok(())
    }
}

/// Hook that never interrupts.
pub fn noop_hook() -> InterruptHook {
    extern "C" fn never(_: *mut c_void) -> c_int {
        0
    }
    InterruptHook {
        callback: never,
        opaque: std::ptr::null_mut(),
    }
}

#[derive(Debug, Default)]
pub struct MockPacket {
    stream_index: usize,
    pts: Option<i64>,
    size: usize,
    events: Option<EventLog>,
}

impl EncodedPacket for MockPacket {
    fn stream_index(&self) -> usize {
        self.stream_index
    }

    fn set_stream_index(&mut self, index: usize) {
        self.stream_index = index;
    }

    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn rescale_timestamps(&mut self, from: Rational, to: Rational) {
        self.pts = self.pts.map(|pts| Rational::rescale(pts, from, to));
    }

    fn size(&self) -> usize {
        self.size
    }

    fn unref(&mut self) {
        self.pts = None;
        self.size = 0;
    }
}

impl Drop for MockPacket {
    fn drop(&mut self) {
        if let Some(events) = &self.events {
            events.push("free packet");
        }
    }
}

#[derive(Debug, Default)]
pub struct MockFrame {
    pts: Option<i64>,
    best_effort: Option<i64>,
}

impl RawFrame for MockFrame {
    fn pts(&self) -> Option<i64> {
        self.pts
    }

    fn set_pts(&mut self, pts: Option<i64>) {
        self.pts = pts;
    }

    fn best_effort_timestamp(&self) -> Option<i64> {
        self.best_effort
    }

    fn unref(&mut self) {
        self.pts = None;
        self.best_effort = None;
    }
}

pub struct MockInput {
    script: Rc<MockScript>,
    shared: Rc<Shared>,
    schedule: VecDeque<(usize, usize)>,
}

impl MockInput {
    fn video_index(&self) -> usize {
        usize::from(self.script.with_audio)
    }
}

impl Demuxer for MockInput {
    type Packet = MockPacket;

    fn streams(&self) -> Vec<StreamInfo> {
        let mut streams = Vec::new();
        if self.script.with_audio {
            streams.push(StreamInfo {
                index: 0,
                kind: MediaKind::Audio,
                width: 0,
                height: 0,
                time_base: Rational::new(1, 48_000),
                frame_rate: Rational::new(0, 1),
            });
        }
        if self.script.has_video {
            streams.push(StreamInfo {
                index: self.video_index(),
                kind: MediaKind::Video,
                width: self.script.width,
                height: self.script.height,
                time_base: INPUT_TIME_BASE,
                frame_rate: self.script.frame_rate,
            });
        }
        streams
    }

    fn read_packet(&mut self, packet: &mut MockPacket) -> Result<(), MediaError> {
        let Some((stream_index, sequence)) = self.schedule.pop_front() else {
            return Err(MediaError::Eof);
        };
        packet.stream_index = stream_index;
        packet.pts = Some(sequence as i64 * FRAME_DURATION_US);
        packet.size = 4096;

        if stream_index == self.video_index() {
            if let Some((after, signal)) = &self.script.cancel_after {
                if *after == sequence {
                    self.shared.events.push("cancel");
                    signal.cancel();
                }
            }
        }
        Ok(())
    }
}

impl Drop for MockInput {
    fn drop(&mut self) {
        self.shared.events.push("close input");
    }
}

pub struct MockDecoder {
    script: Rc<MockScript>,
    shared: Rc<Shared>,
    queue: VecDeque<Option<i64>>,
    received: usize,
    draining: bool,
}

impl Decoder for MockDecoder {
    type Packet = MockPacket;
    type Frame = MockFrame;

    fn params(&self) -> DecoderParams {
        DecoderParams {
            width: self.script.width,
            height: self.script.height,
            pixel_format: PixelFormat::new("yuyv422"),
            sample_aspect_ratio: Rational::new(1, 1),
            packet_time_base: INPUT_TIME_BASE,
            frame_rate: self.script.frame_rate,
        }
    }

    fn send_packet(&mut self, packet: Option<&MockPacket>) -> Result<(), MediaError> {
        let Some(packet) = packet else {
            self.draining = true;
            self.shared.events.push("flush decoder");
            return Ok(());
        };
        if self.draining {
            return Err(MediaError::Eof);
        }
        if let Some(Failure::Decode(index)) = self.script.failure {
            if index == self.received {
                fail_at(&self.script, Failure::Decode(index))?;
            }
        }
        self.received += 1;
        self.queue.push_back(packet.pts);
        Ok(())
    }

    // holds one frame back until drained
    fn receive_frame(&mut self, frame: &mut MockFrame) -> Result<(), MediaError> {
        if self.queue.len() > 1 || (self.draining && !self.queue.is_empty()) {
            if let Some(pts) = self.queue.pop_front() {
                frame.pts = None;
                frame.best_effort = pts;
                return Ok(());
            }
        }
        if self.draining {
            Err(MediaError::Eof)
        } else {
            Err(MediaError::Again)
        }
    }
}

impl Drop for MockDecoder {
    fn drop(&mut self) {
        self.shared.events.push("free decoder");
    }
}

pub struct MockFilter {
    shared: Rc<Shared>,
    script: Rc<MockScript>,
    drop_every: Option<usize>,
    received: usize,
    time_base: Rational,
    queue: VecDeque<Option<i64>>,
    flushed: bool,
}

impl FilterGraph for MockFilter {
    type Frame = MockFrame;

    fn push(&mut self, frame: Option<&mut MockFrame>) -> Result<(), MediaError> {
        if self.flushed {
            return Err(MediaError::Eof);
        }
        match frame {
            Some(frame) => {
                self.received += 1;
                let dropped = self.drop_every.is_some_and(|n| self.received % n == 0);
                if !dropped {
                    self.queue.push_back(frame.pts);
                }
                frame.unref();
            }
            None => {
                fail_at(&self.script, Failure::FlushFilter)?;
                self.flushed = true;
                self.shared.events.push("flush filter");
            }
        }
        Ok(())
    }

    fn pull(&mut self, frame: &mut MockFrame) -> Result<(), MediaError> {
        match self.queue.pop_front() {
            Some(pts) => {
                frame.pts = pts;
                frame.best_effort = pts;
                Ok(())
            }
            None if self.flushed => Err(MediaError::Eof),
            None => Err(MediaError::Again),
        }
    }

    fn time_base(&self) -> Rational {
        self.time_base
    }
}

impl Drop for MockFilter {
    fn drop(&mut self) {
        self.shared.events.push("free filter");
    }
}

pub struct MockEncoder {
    shared: Rc<Shared>,
    time_base: Rational,
    delay: usize,
    queue: VecDeque<Option<i64>>,
    draining: bool,
}

impl Encoder for MockEncoder {
    type Packet = MockPacket;
    type Frame = MockFrame;

    fn time_base(&self) -> Rational {
        self.time_base
    }

    fn buffers_frames(&self) -> bool {
        self.delay > 0
    }

    fn send_frame(&mut self, frame: Option<&MockFrame>) -> Result<(), MediaError> {
        if self.draining {
            return Err(MediaError::Eof);
        }
        match frame {
            Some(frame) => self.queue.push_back(frame.pts),
            None => {
                self.draining = true;
                self.shared.events.push("flush encoder");
            }
        }
        Ok(())
    }

    fn receive_packet(&mut self, packet: &mut MockPacket) -> Result<(), MediaError> {
        if self.queue.len() > self.delay || (self.draining && !self.queue.is_empty()) {
            if let Some(pts) = self.queue.pop_front() {
                packet.stream_index = 0;
                packet.pts = pts;
                packet.size = 1200;
                return Ok(());
            }
        }
        if self.draining {
            Err(MediaError::Eof)
        } else {
            Err(MediaError::Again)
        }
    }
}

impl Drop for MockEncoder {
    fn drop(&mut self) {
        self.shared.events.push("free encoder");
    }
}

pub struct MockOutput {
    script: Rc<MockScript>,
    shared: Rc<Shared>,
    stream_time_base: Option<Rational>,
    hook: Option<InterruptHook>,
    writes: usize,
}

impl MockOutput {
    fn stall(&self, hook: InterruptHook) -> Result<(), MediaError> {
        let started = Instant::now();
        while started.elapsed() < STALL_LIMIT {
            if hook.poll() != 0 {
                return Err(MediaError::Exit);
            }
            sleep(Duration::from_millis(1));
        }
        Err(MediaError::Native {
            code: NATIVE_EIO,
            message: "stall was never interrupted".into(),
        })
    }
}

impl Muxer for MockOutput {
    type Packet = MockPacket;
    type Encoder = MockEncoder;

    fn add_video_stream(&mut self) -> Result<usize, MediaError> {
        Ok(0)
    }

    fn configure_stream(&mut self, index: usize, encoder: &MockEncoder) -> Result<(), MediaError> {
        if index != 0 {
            return Err(MediaError::invalid(format!("no output stream {}", index)));
        }
        self.stream_time_base = Some(encoder.time_base());
        Ok(())
    }

    fn needs_global_header(&self) -> bool {
        true
    }

    fn needs_network(&self) -> bool {
        self.script.needs_network
    }

    fn open_io(&mut self, _url: &str, hook: InterruptHook, whitelist: &[&str]) -> Result<(), MediaError> {
        fail_at(&self.script, Failure::OpenIo)?;
        *self.shared.whitelist.borrow_mut() = whitelist.iter().map(|p| p.to_string()).collect();
        self.hook = Some(hook);
        self.shared.events.push("open sink");
        Ok(())
    }

    fn has_open_io(&self) -> bool {
        self.hook.is_some()
    }

    fn write_header(&mut self) -> Result<(), MediaError> {
        fail_at(&self.script, Failure::WriteHeader)?;
        // flv forces millisecond timestamps
        self.stream_time_base = Some(FLV_TIME_BASE);
        self.shared.header_written.set(true);
        self.shared.events.push("write header");
        Ok(())
    }

    fn stream_time_base(&self, index: usize) -> Option<Rational> {
        if index == 0 { self.stream_time_base } else { None }
    }

    fn write_packet(&mut self, packet: &mut MockPacket) -> Result<(), MediaError> {
        let index = self.writes;
        self.writes += 1;

        if self.script.stall_write_at == Some(index) {
            let hook = self.hook.unwrap_or_else(noop_hook);
            return self.stall(hook);
        }
        if let Some(Failure::Write(at)) = self.script.failure {
            if at == index {
                fail_at(&self.script, Failure::Write(at))?;
            }
        }
        if let Some(pts) = packet.pts() {
            self.shared.written.borrow_mut().push(pts);
        }
        packet.unref();
        Ok(())
    }

    fn write_trailer(&mut self) -> Result<(), MediaError> {
        fail_at(&self.script, Failure::WriteTrailer)?;
        self.shared.trailer_written.set(true);
        self.shared.events.push("write trailer");
        Ok(())
    }

    fn close_io(&mut self) -> Result<(), MediaError> {
        if self.hook.take().is_none() {
            return Ok(());
        }
        self.shared.events.push("close sink");
        fail_at(&self.script, Failure::CloseSink)
    }
}

impl Drop for MockOutput {
    fn drop(&mut self) {
        self.shared.events.push("free output");
    }
}

impl MediaBackend for MockBackend {
    type Packet = MockPacket;
    type Frame = MockFrame;
    type Input = MockInput;
    type Decoder = MockDecoder;
    type Filter = MockFilter;
    type Encoder = MockEncoder;
    type Output = MockOutput;

    fn set_log_level(&self, level: LogLevel) -> Result<(), MediaError> {
        self.shared.log_level.set(Some(level));
        Ok(())
    }

    fn open_input(&self, _path: &str) -> Result<MockInput, MediaError> {
        self.fail_at(Failure::OpenInput)?;
        let video_index = usize::from(self.script.with_audio);
        let mut schedule = VecDeque::new();
        for sequence in 0..self.script.packets {
            if self.script.with_audio {
                schedule.push_back((0, sequence));
            }
            if self.script.has_video {
                schedule.push_back((video_index, sequence));
            }
        }
        self.shared.events.push("open input");
        Ok(MockInput {
            script: self.script.clone(),
            shared: self.shared.clone(),
            schedule,
        })
    }

    fn open_decoder(&self, _input: &MockInput, _stream: &StreamInfo) -> Result<MockDecoder, MediaError> {
        self.fail_at(Failure::OpenDecoder)?;
        self.shared.events.push("open decoder");
        Ok(MockDecoder {
            script: self.script.clone(),
            shared: self.shared.clone(),
            queue: VecDeque::new(),
            received: 0,
            draining: false,
        })
    }

    fn find_encoder(&self, codec: VideoCodec) -> Result<EncoderInfo, MediaError> {
        self.fail_at(Failure::FindEncoder)?;
        Ok(EncoderInfo {
            name: format!("mock-{}", codec.name()),
            pixel_formats: self.script.pixel_formats.iter().map(|f| PixelFormat::new(*f)).collect(),
        })
    }

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<MockEncoder, MediaError> {
        self.fail_at(Failure::OpenEncoder)?;
        *self.shared.encoder_settings.borrow_mut() = Some(settings.clone());
        self.shared.events.push("open encoder");
        Ok(MockEncoder {
            shared: self.shared.clone(),
            time_base: settings.time_base,
            delay: self.script.encoder_delay,
            queue: VecDeque::new(),
            draining: false,
        })
    }

    fn alloc_output(&self, _url: &str, _format: &str) -> Result<MockOutput, MediaError> {
        self.fail_at(Failure::AllocOutput)?;
        self.shared.events.push("alloc output");
        Ok(MockOutput {
            script: self.script.clone(),
            shared: self.shared.clone(),
            stream_time_base: None,
            hook: None,
            writes: 0,
        })
    }

    fn build_filter(&self, spec: &FilterSpec) -> Result<MockFilter, MediaError> {
        self.fail_at(Failure::BuildFilter)?;
        *self.shared.filter_spec.borrow_mut() = Some(spec.clone());
        self.shared.events.push("build filter");
        Ok(MockFilter {
            shared: self.shared.clone(),
            script: self.script.clone(),
            drop_every: self.script.filter_drop_every,
            received: 0,
            time_base: spec.time_base,
            queue: VecDeque::new(),
            flushed: false,
        })
    }

    fn alloc_packet(&self) -> Result<MockPacket, MediaError> {
        self.fail_at(Failure::AllocPacket)?;
        Ok(MockPacket {
            stream_index: 0,
            pts: None,
            size: 0,
            events: Some(self.shared.events.clone()),
        })
    }

    fn alloc_frame(&self) -> Result<MockFrame, MediaError> {
        Ok(MockFrame::default())
    }

    fn library_versions(&self) -> Vec<LibraryVersion> {
        vec![LibraryVersion {
            name: "mock",
            version: "1.0.0".into(),
        }]
    }
}
