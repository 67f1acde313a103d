//! Media library boundary
//!
//! The session drives demux, decode, filter, encode and mux through the traits
//! below. A backend owns the native handles behind each associated type and
//! releases them when the value is dropped, so ownership of a handle is the
//! same thing as the obligation to free it.
//!
//! Calls report failures as [`MediaError`]. Two variants are not failures in
//! drain loops: [`MediaError::Again`] (more input needed) and
//! [`MediaError::Eof`] (stage fully flushed).

pub mod types;

#[cfg(feature = "ffmpeg")]
pub mod ffmpeg;

#[cfg(test)]
pub(crate) mod mock;

pub use types::{
    DecoderParams, EncoderInfo, EncoderSettings, FilterSpec, InterruptHook, LibraryVersion,
    LogLevel, MediaKind, Overlay, PixelFormat, Rational, StreamInfo, VideoCodec,
};

/// Result code of a media library call.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum MediaError {
    /// Output not available in this state, more input is required.
    #[error("resource temporarily unavailable")]
    Again,

    /// The stage has been fully flushed or the input is exhausted.
    #[error("end of stream")]
    Eof,

    /// A blocking call was aborted by its interrupt hook.
    #[error("immediate exit requested")]
    Exit,

    /// Any other negative library code.
    #[error("{message} (code {code})")]
    Native { code: i32, message: String },

    /// The backend refused the call before reaching the library.
    #[error("invalid data: {0}")]
    Invalid(String),
}

impl MediaError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::Invalid(msg.into())
    }

    /// `true` for the "try again" and "end of stream" sentinels.
    pub fn is_drain_sentinel(&self) -> bool {
        matches!(self, MediaError::Again | MediaError::Eof)
    }
}

/// A decoded or filtered picture.
pub trait RawFrame {
    fn pts(&self) -> Option<i64>;
    fn set_pts(&mut self, pts: Option<i64>);
    fn best_effort_timestamp(&self) -> Option<i64>;
    /// Drops the picture data but keeps the buffer for reuse.
    fn unref(&mut self);
}

/// A compressed unit, either read from the input or produced by the encoder.
pub trait EncodedPacket {
    fn stream_index(&self) -> usize;
    fn set_stream_index(&mut self, index: usize);
    fn pts(&self) -> Option<i64>;
    fn rescale_timestamps(&mut self, from: Rational, to: Rational);
    fn size(&self) -> usize;
    fn unref(&mut self);
}

/// An opened input source.
pub trait Demuxer {
    type Packet: EncodedPacket;

    fn streams(&self) -> Vec<StreamInfo>;

    /// Reads the next compressed unit of any stream.
    fn read_packet(&mut self, packet: &mut Self::Packet) -> Result<(), MediaError>;
}

/// An opened decode context.
pub trait Decoder {
    type Packet: EncodedPacket;
    type Frame: RawFrame;

    fn params(&self) -> DecoderParams;

    /// `None` enters draining mode.
    fn send_packet(&mut self, packet: Option<&Self::Packet>) -> Result<(), MediaError>;
    fn receive_frame(&mut self, frame: &mut Self::Frame) -> Result<(), MediaError>;
}

/// A configured filter graph with one source and one sink.
pub trait FilterGraph {
    type Frame: RawFrame;

    /// Pushes a frame into the source node, `None` flushes the graph.
    fn push(&mut self, frame: Option<&mut Self::Frame>) -> Result<(), MediaError>;
    fn pull(&mut self, frame: &mut Self::Frame) -> Result<(), MediaError>;

    /// Time base of frames leaving the sink.
    fn time_base(&self) -> Rational;
}

/// An opened encode context.
pub trait Encoder {
    type Packet: EncodedPacket;
    type Frame: RawFrame;

    fn time_base(&self) -> Rational;

    /// Whether the codec keeps frames internally and must be drained at the end.
    fn buffers_frames(&self) -> bool;

    /// `None` enters draining mode.
    fn send_frame(&mut self, frame: Option<&Self::Frame>) -> Result<(), MediaError>;
    fn receive_packet(&mut self, packet: &mut Self::Packet) -> Result<(), MediaError>;
}

/// An allocated mux context and, once opened, its byte sink.
pub trait Muxer {
    type Packet: EncodedPacket;
    type Encoder: Encoder;

    fn add_video_stream(&mut self) -> Result<usize, MediaError>;

    /// Copies the encoder parameters and time base into the output stream.
    fn configure_stream(&mut self, index: usize, encoder: &Self::Encoder) -> Result<(), MediaError>;

    fn needs_global_header(&self) -> bool;

    /// `false` for formats that do their own I/O.
    fn needs_network(&self) -> bool;

    /// Opens the byte sink with `hook` installed as the interrupt callback and
    /// the transport restricted to `whitelist`.
    fn open_io(&mut self, url: &str, hook: InterruptHook, whitelist: &[&str]) -> Result<(), MediaError>;

    fn has_open_io(&self) -> bool;

    fn write_header(&mut self) -> Result<(), MediaError>;

    /// May differ from the configured value once the header is written.
    fn stream_time_base(&self, index: usize) -> Option<Rational>;

    fn write_packet(&mut self, packet: &mut Self::Packet) -> Result<(), MediaError>;

    fn write_trailer(&mut self) -> Result<(), MediaError>;

    /// Closes the byte sink. Calling it with no sink open is a no-op.
    fn close_io(&mut self) -> Result<(), MediaError>;
}

/// Factory for every native object a session needs.
pub trait MediaBackend {
    type Packet: EncodedPacket;
    type Frame: RawFrame;
    type Input: Demuxer<Packet = Self::Packet>;
    type Decoder: Decoder<Packet = Self::Packet, Frame = Self::Frame>;
    type Filter: FilterGraph<Frame = Self::Frame>;
    type Encoder: Encoder<Packet = Self::Packet, Frame = Self::Frame>;
    type Output: Muxer<Packet = Self::Packet, Encoder = Self::Encoder>;

    fn set_log_level(&self, level: LogLevel) -> Result<(), MediaError>;

    fn open_input(&self, path: &str) -> Result<Self::Input, MediaError>;

    fn open_decoder(&self, input: &Self::Input, stream: &StreamInfo) -> Result<Self::Decoder, MediaError>;

    fn find_encoder(&self, codec: VideoCodec) -> Result<EncoderInfo, MediaError>;

    fn open_encoder(&self, settings: &EncoderSettings) -> Result<Self::Encoder, MediaError>;

    fn alloc_output(&self, url: &str, format: &str) -> Result<Self::Output, MediaError>;

    fn build_filter(&self, spec: &FilterSpec) -> Result<Self::Filter, MediaError>;

    fn alloc_packet(&self) -> Result<Self::Packet, MediaError>;

    fn alloc_frame(&self) -> Result<Self::Frame, MediaError>;

    fn library_versions(&self) -> Vec<LibraryVersion>;
}
