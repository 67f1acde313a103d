//! Streaming session: setup, teardown and the public entry points.
//!
//! # Lifecycle
//!
//! `setup` builds the [`PipelineGraph`] in dependency order (input, decoder,
//! output, encoder, sink, header, filter graph, packet buffer). Any failure
//! tears down what was acquired so far and leaves the pipeline idle.
//!
//! `process` runs the frame loop and always tears the graph down before it
//! returns, so a pipeline can be set up again afterwards.

use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;

use crate::config::{SessionConfig, StreamPolicy};
use crate::error::{Stage, StreamerError, StreamerResult};
use crate::media::{
    Decoder, Demuxer, EncoderSettings, FilterSpec, LibraryVersion, MediaBackend, MediaError,
    MediaKind, Muxer, Overlay,
};
use crate::pipeline::health::PipelineHealth;
use crate::pipeline::lifecycle::PipelineGraph;
use crate::pipeline::state::PipelineState;
use crate::pipeline::watchdog::{Registration, WatchdogTimer};
use crate::utils::net;
use crate::utils::sos::{self, SignalOfStop};

pub struct StreamPipeline<B: MediaBackend> {
    // released before the registration so the sink close can still be polled
    pub(super) graph: Option<PipelineGraph<B>>,
    registration: Option<Registration>,
    pub(super) backend: B,
    pub(super) policy: StreamPolicy,
    pub(super) watchdog: Arc<WatchdogTimer>,
    pub(super) state: PipelineState,
    pub(super) health: PipelineHealth,
    pub(super) cancel: SignalOfStop,
}

impl<B: MediaBackend> StreamPipeline<B> {
    pub fn new(backend: B, policy: StreamPolicy, cancel: SignalOfStop) -> Self {
        let watchdog = WatchdogTimer::new(policy.watchdog_threshold);
        Self {
            graph: None,
            registration: None,
            backend,
            policy,
            watchdog,
            state: PipelineState::Idle,
            health: PipelineHealth::new(),
            cancel,
        }
    }

    /// Default policy, stopped by the process-wide signal.
    pub fn with_defaults(backend: B) -> Self {
        Self::new(backend, StreamPolicy::default(), sos::get_instance())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn state(&self) -> PipelineState {
        self.state
    }

    pub fn health(&self) -> &PipelineHealth {
        &self.health
    }

    pub fn is_set_up(&self) -> bool {
        self.graph.is_some()
    }

    pub fn library_versions(&self) -> Vec<LibraryVersion> {
        self.backend.library_versions()
    }

    /// Loads the configuration file and builds the session graph.
    pub fn setup(&mut self, config_path: &str) -> bool {
        match self.try_setup(config_path) {
            Ok(()) => true,
            Err(err) => {
                error!("StreamPipeline: setup failed: {}", err);
                false
            }
        }
    }

    pub(crate) fn try_setup(&mut self, config_path: &str) -> StreamerResult<()> {
        if self.graph.is_some() {
            return Err(StreamerError::AlreadySetUp);
        }
        let config = SessionConfig::load(Path::new(config_path), &self.policy)?;
        self.setup_with(config)
    }

    /// Builds the session graph from an already validated configuration.
    pub(crate) fn setup_with(&mut self, config: SessionConfig) -> StreamerResult<()> {
        if self.graph.is_some() || self.registration.is_some() {
            return Err(StreamerError::AlreadySetUp);
        }
        self.transition(PipelineState::Initializing);
        self.health = PipelineHealth::new();

        let registration = match self.watchdog.register() {
            Ok(registration) => registration,
            Err(err) => {
                self.abort_setup();
                return Err(err.into());
            }
        };

        let mut graph = PipelineGraph::new(self.watchdog.clone());
        match self.build_graph(&mut graph, &config, &registration) {
            Ok(()) => {
                info!("StreamPipeline: setup complete for '{}'", config.output_url);
                self.graph = Some(graph);
                self.registration = Some(registration);
                self.transition(PipelineState::Ready);
                Ok(())
            }
            Err(err) => {
                if let Some(release_err) = graph.teardown() {
                    warn!("StreamPipeline: release after failed setup: {}", release_err);
                }
                drop(graph);
                drop(registration);
                self.abort_setup();
                Err(err)
            }
        }
    }

    fn abort_setup(&mut self) {
        self.transition(PipelineState::Failed);
        self.transition(PipelineState::Idle);
    }

    fn build_graph(
        &self,
        graph: &mut PipelineGraph<B>,
        config: &SessionConfig,
        registration: &Registration,
    ) -> StreamerResult<()> {
        let policy = &self.policy;

        self.backend
            .set_log_level(config.log_level)
            .map_err(|e| StreamerError::media(Stage::Configure, e))?;

        let input_path = config.input_path.to_string_lossy();
        let input = self
            .backend
            .open_input(&input_path)
            .map_err(|e| StreamerError::media(Stage::OpenInput, e))?;
        let input = graph.input.acquire(input)?;
        info!("StreamPipeline: opened input '{}'", input_path);

        let stream = input
            .streams()
            .into_iter()
            .find(|stream| stream.kind == MediaKind::Video)
            .ok_or_else(|| {
                StreamerError::media(Stage::ProbeStream, MediaError::invalid("input has no video stream"))
            })?;
        graph.video_stream = Some(stream.index);

        if stream.width != policy.width || stream.height != policy.height {
            return Err(StreamerError::policy(format!(
                "frame size is {}x{}, the device must be set to {}x{}",
                stream.width, stream.height, policy.width, policy.height
            )));
        }
        if stream.frame_rate != policy.frame_rate {
            return Err(StreamerError::policy(format!(
                "estimated frame rate is {}, the device must be set to {}",
                stream.frame_rate, policy.frame_rate
            )));
        }

        let decoder = self
            .backend
            .open_decoder(input, &stream)
            .map_err(|e| StreamerError::media(Stage::OpenDecoder, e))?;
        let decoder_params = graph.decoder.acquire(decoder)?.params();
        debug!("StreamPipeline: decoder parameters {:?}", decoder_params);

        let output = self
            .backend
            .alloc_output(&config.output_url, policy.container)
            .map_err(|e| StreamerError::media(Stage::AllocOutput, e))?;
        let output = graph.output.acquire(output)?;
        let output_stream = output
            .add_video_stream()
            .map_err(|e| StreamerError::media(Stage::AllocOutput, e))?;
        graph.output_stream = Some(output_stream);

        let encoder_info = self
            .backend
            .find_encoder(policy.codec)
            .map_err(|e| StreamerError::media(Stage::OpenEncoder, e))?;
        let pixel_format = encoder_info
            .preferred_pixel_format()
            .cloned()
            .unwrap_or_else(|| decoder_params.pixel_format.clone());
        info!(
            "StreamPipeline: using encoder '{}' with pixel format '{}'",
            encoder_info.name, pixel_format
        );

        let settings = EncoderSettings {
            codec: policy.codec,
            width: decoder_params.width,
            height: decoder_params.height,
            sample_aspect_ratio: decoder_params.sample_aspect_ratio,
            pixel_format: pixel_format.clone(),
            time_base: decoder_params.frame_rate.invert(),
            global_header: output.needs_global_header(),
        };
        let encoder = self
            .backend
            .open_encoder(&settings)
            .map_err(|e| StreamerError::media(Stage::OpenEncoder, e))?;
        let encoder = graph.encoder.acquire(encoder)?;
        output
            .configure_stream(output_stream, encoder)
            .map_err(|e| StreamerError::media(Stage::OpenEncoder, e))?;

        if output.needs_network() {
            net::validate_output_host(&config.output_url)?;
            output
                .open_io(&config.output_url, registration.hook(), &policy.protocol_whitelist)
                .map_err(|e| StreamerError::media(Stage::OpenSink, e))?;
            info!(
                "StreamPipeline: opened sink '{}' ({})",
                config.output_url,
                policy.protocol_whitelist.join(",")
            );
        }

        output
            .write_header()
            .map_err(|e| StreamerError::media(Stage::WriteHeader, e))?;

        let spec = FilterSpec {
            width: decoder_params.width,
            height: decoder_params.height,
            pixel_format: decoder_params.pixel_format.clone(),
            time_base: decoder_params.packet_time_base,
            sample_aspect_ratio: decoder_params.sample_aspect_ratio,
            frame_rate: decoder_params.frame_rate,
            sink_pixel_format: pixel_format,
            overlay: config.watermark_path.as_ref().map(|path| Overlay {
                path: path.clone(),
                left: policy.watermark_margin,
                bottom: policy.watermark_margin,
            }),
        };
        debug!("StreamPipeline: filter graph '{}'", spec.describe());
        let filter = self
            .backend
            .build_filter(&spec)
            .map_err(|e| StreamerError::media(Stage::BuildFilter, e))?;
        graph.filter.acquire(filter)?;

        let packet = self
            .backend
            .alloc_packet()
            .map_err(|e| StreamerError::media(Stage::AllocPacket, e))?;
        graph.packet.acquire(packet)?;

        Ok(())
    }

    /// Runs the frame loop, then releases every resource of the session.
    pub fn process(&mut self) -> bool {
        let result = self.run();
        match &result {
            Ok(()) => info!("StreamPipeline: stream finished"),
            Err(err) => {
                if err.is_watchdog() {
                    self.health.record_watchdog_timeout();
                }
                error!("StreamPipeline: processing failed: {}", err);
            }
        }

        if let Some(err) = self.teardown() {
            warn!("StreamPipeline: teardown reported: {}", err);
        }
        info!("StreamPipeline: {}", self.health.summary());
        result.is_ok()
    }

    /// Releases the graph and the watchdog registration.
    ///
    /// Safe to call at any time; does nothing when idle.
    pub(crate) fn teardown(&mut self) -> Option<StreamerError> {
        let err = self.graph.take().and_then(|mut graph| graph.teardown());
        if let Some(err) = &err {
            if err.is_watchdog() {
                self.health.record_watchdog_timeout();
            }
        }
        self.registration = None;
        if self.state != PipelineState::Idle {
            self.transition(PipelineState::Idle);
        }
        err
    }

    fn transition(&mut self, next: PipelineState) {
        self.state.advance(next);
    }
}

impl<B: MediaBackend> Drop for StreamPipeline<B> {
    fn drop(&mut self) {
        self.teardown();
    }
}
