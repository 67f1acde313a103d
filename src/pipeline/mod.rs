//! Streaming pipeline for a single capture session
//!
//! A session moves through three phases:
//! - Setup: acquire every native handle in dependency order and write the
//!   container header ([`session`])
//! - Frame loop: read, decode, filter, encode and write, then flush each
//!   stage ([`process`])
//! - Teardown: release the handles in reverse dependency order ([`lifecycle`])
//!
//! Blocking network calls are bounded by the [`watchdog`], state changes are
//! tracked by [`state`] and per-session counters live in [`health`].

pub mod health;
pub mod lifecycle;
pub mod process;
pub mod session;
pub mod state;
pub mod watchdog;

pub use health::{HealthSummary, PipelineHealth};
pub use lifecycle::{PipelineGraph, Resource};
pub use session::StreamPipeline;
pub use state::PipelineState;
pub use watchdog::{PollOutcome, Registration, WatchdogError, WatchdogTimer};
