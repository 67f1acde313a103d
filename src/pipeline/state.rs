//! Pipeline state management

use log::{debug, warn};
use std::time::Instant;

/// Session state machine
///
/// Tracks where a session is between `setup` and the end of `process`. The
/// frame loop moves through the flush states in a fixed order once input is
/// exhausted or cancellation is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// No graph is held
    Idle,

    /// Setup is acquiring resources
    Initializing,

    /// Graph built, header written
    Ready,

    /// Reading and transcoding input
    Reading {
        /// When the frame loop started
        started_at: Instant,
    },

    /// Draining frames buffered in the decoder
    FlushingDecoder,

    /// Draining frames buffered in the filter graph
    FlushingFilter,

    /// Draining packets buffered in the encoder
    FlushingEncoder,

    /// Writing the trailer
    Finalizing,

    /// Trailer written
    Finished,

    /// A fatal error ended the session
    Failed,
}

impl PipelineState {
    /// Check if this state transition is valid
    pub fn can_transition_to(&self, target: &PipelineState) -> bool {
        use PipelineState::*;

        match (self, target) {
            (Idle, Initializing) => true,

            (Initializing, Ready) => true,
            (Initializing, Failed) => true,

            (Ready, Reading { .. }) => true,
            (Ready, Failed) => true,

            (Reading { .. }, FlushingDecoder) => true,
            (FlushingDecoder, FlushingFilter) => true,
            (FlushingFilter, FlushingEncoder) => true,
            (FlushingFilter, Finalizing) => true, // encoder keeps no frames
            (FlushingEncoder, Finalizing) => true,
            (Finalizing, Finished) => true,

            (Reading { .. } | FlushingDecoder | FlushingFilter | FlushingEncoder | Finalizing, Failed) => {
                true
            }

            // teardown returns every session to Idle
            (Finished | Failed | Ready, Idle) => true,

            (a, b) if a == b => true,

            _ => false,
        }
    }

    /// Moves to `next`, warning when the step is not an expected one.
    pub fn advance(&mut self, next: PipelineState) {
        if !self.can_transition_to(&next) {
            warn!("PipelineState: unexpected transition {} -> {}", self, next);
        }
        debug!("PipelineState: {} -> {}", self, next);
        *self = next;
    }

    /// Get a human-readable description of this state
    pub fn description(&self) -> &'static str {
        match self {
            PipelineState::Idle => "Idle",
            PipelineState::Initializing => "Initializing",
            PipelineState::Ready => "Ready",
            PipelineState::Reading { .. } => "Reading",
            PipelineState::FlushingDecoder => "Flushing decoder",
            PipelineState::FlushingFilter => "Flushing filter",
            PipelineState::FlushingEncoder => "Flushing encoder",
            PipelineState::Finalizing => "Finalizing",
            PipelineState::Finished => "Finished",
            PipelineState::Failed => "Failed",
        }
    }

    /// Cancellation is honoured only while reading input
    pub fn accepts_cancellation(&self) -> bool {
        matches!(self, PipelineState::Reading { .. })
    }

    /// Get the duration since the frame loop started (if reading)
    pub fn running_duration(&self) -> Option<std::time::Duration> {
        if let PipelineState::Reading { started_at } = self {
            Some(started_at.elapsed())
        } else {
            None
        }
    }
}

impl std::fmt::Display for PipelineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.description())
    }
}
