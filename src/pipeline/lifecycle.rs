//! Ownership and ordered release of the native handles of a session

use log::{debug, error, info, warn};
use std::sync::Arc;

use crate::error::{Stage, StreamerError, StreamerResult};
use crate::media::{MediaBackend, MediaError, Muxer};
use crate::pipeline::watchdog::WatchdogTimer;

/// Slot for one native handle.
///
/// Releasing an empty slot is a no-op and releasing twice is harmless, so
/// teardown can run on a half-built graph.
#[derive(Debug)]
pub struct Resource<T> {
    name: &'static str,
    slot: Option<T>,
}

impl<T> Resource<T> {
    pub const fn empty(name: &'static str) -> Self {
        Self { name, slot: None }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn is_set(&self) -> bool {
        self.slot.is_some()
    }

    /// Takes ownership of a freshly created handle.
    pub fn acquire(&mut self, value: T) -> StreamerResult<&mut T> {
        if self.slot.is_some() {
            return Err(StreamerError::invariant(format!("{} is already set", self.name)));
        }
        debug!("Lifecycle: acquired {}", self.name);
        Ok(self.slot.insert(value))
    }

    pub fn get(&self) -> StreamerResult<&T> {
        self.slot
            .as_ref()
            .ok_or_else(|| StreamerError::invariant(format!("{} is not set", self.name)))
    }

    pub fn get_mut(&mut self) -> StreamerResult<&mut T> {
        self.slot
            .as_mut()
            .ok_or_else(|| StreamerError::invariant(format!("{} is not set", self.name)))
    }

    /// Drops the handle, if any. Returns whether something was released.
    pub fn release(&mut self) -> bool {
        match self.slot.take() {
            Some(value) => {
                drop(value);
                debug!("Lifecycle: released {}", self.name);
                true
            }
            None => false,
        }
    }
}

/// Every native handle of one session.
///
/// Built in dependency order by setup; [`PipelineGraph::teardown`] (also run
/// on drop) releases whatever exists in the reverse dependency order.
pub struct PipelineGraph<B: MediaBackend> {
    pub input: Resource<B::Input>,
    pub video_stream: Option<usize>,
    pub decoder: Resource<B::Decoder>,
    pub output: Resource<B::Output>,
    pub output_stream: Option<usize>,
    pub encoder: Resource<B::Encoder>,
    pub filter: Resource<B::Filter>,
    pub packet: Resource<B::Packet>,
    watchdog: Arc<WatchdogTimer>,
}

impl<B: MediaBackend> PipelineGraph<B> {
    pub fn new(watchdog: Arc<WatchdogTimer>) -> Self {
        Self {
            input: Resource::empty("input context"),
            video_stream: None,
            decoder: Resource::empty("decoder context"),
            output: Resource::empty("output context"),
            output_stream: None,
            encoder: Resource::empty("encoder context"),
            filter: Resource::empty("filter graph"),
            packet: Resource::empty("encoder packet"),
            watchdog,
        }
    }

    /// `true` when no handle is held.
    pub fn is_empty(&self) -> bool {
        !(self.input.is_set()
            || self.decoder.is_set()
            || self.output.is_set()
            || self.encoder.is_set()
            || self.filter.is_set()
            || self.packet.is_set())
    }

    /// Releases every held handle. Failures are logged and never stop the
    /// following steps; the first one is returned.
    pub fn teardown(&mut self) -> Option<StreamerError> {
        let mut first_error = None;

        if let Ok(output) = self.output.get_mut() {
            if output.has_open_io() {
                if let Err(err) = close_sink(output, &self.watchdog) {
                    first_error.get_or_insert(err);
                }
            }
        }
        self.output.release();
        self.output_stream = None;
        self.packet.release();
        self.encoder.release();
        self.filter.release();
        self.decoder.release();
        self.video_stream = None;
        self.input.release();

        first_error
    }
}

impl<B: MediaBackend> Drop for PipelineGraph<B> {
    fn drop(&mut self) {
        if !self.is_empty() {
            self.teardown();
        }
    }
}

/// Closes the byte sink of `output` with the watchdog armed.
fn close_sink<M: Muxer>(output: &mut M, watchdog: &WatchdogTimer) -> StreamerResult<()> {
    watchdog.set_begin_time();
    let result = output.close_io();
    watchdog.reset_begin_time();

    match result {
        Ok(()) => Ok(()),
        Err(MediaError::Eof) => {
            info!("Lifecycle: sink reported end of stream while closing");
            Ok(())
        }
        Err(err) => {
            let timed_out = watchdog.is_timeout_reached();
            if timed_out {
                warn!("Lifecycle: closing sink interrupted by watchdog: {}", err);
            } else {
                error!("Lifecycle: unable to close sink: {}", err);
            }
            Err(StreamerError::network(Stage::CloseSink, err, timed_out))
        }
    }
}
