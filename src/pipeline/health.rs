//! Health metrics for a streaming session

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

/// Health metrics for a session
///
/// Counters are updated by the frame loop and read when the session ends.
/// All fields use atomic operations so a snapshot can be taken through a
/// shared reference.
pub struct PipelineHealth {
    /// Compressed units read from the input video stream
    pub packets_read: AtomicU64,

    /// Compressed units belonging to other streams, dropped unread
    pub packets_skipped: AtomicU64,

    /// Frames produced by the decoder
    pub frames_decoded: AtomicU64,

    /// Frames produced by the filter graph
    pub frames_filtered: AtomicU64,

    /// Packets handed to the muxer successfully
    pub packets_written: AtomicU64,

    /// Total bytes of written packets
    pub bytes_written: AtomicU64,

    /// Network calls aborted by the watchdog
    pub watchdog_timeouts: AtomicU64,

    /// Written packets whose timestamp went backwards
    pub out_of_order: AtomicU64,

    last_written_pts: AtomicI64,
}

impl PipelineHealth {
    /// Create a new health metrics instance
    pub fn new() -> Self {
        Self {
            packets_read: AtomicU64::new(0),
            packets_skipped: AtomicU64::new(0),
            frames_decoded: AtomicU64::new(0),
            frames_filtered: AtomicU64::new(0),
            packets_written: AtomicU64::new(0),
            bytes_written: AtomicU64::new(0),
            watchdog_timeouts: AtomicU64::new(0),
            out_of_order: AtomicU64::new(0),
            last_written_pts: AtomicI64::new(i64::MIN),
        }
    }

    pub fn record_packet_read(&self) {
        self.packets_read.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_packet_skipped(&self) {
        self.packets_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_decoded(&self) {
        self.frames_decoded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_frame_filtered(&self) {
        self.frames_filtered.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_watchdog_timeout(&self) {
        self.watchdog_timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a packet accepted by the muxer.
    ///
    /// Returns `false` when its timestamp precedes the previous one.
    pub fn record_packet_written(&self, pts: Option<i64>, size: usize) -> bool {
        self.packets_written.fetch_add(1, Ordering::Relaxed);
        self.bytes_written.fetch_add(size as u64, Ordering::Relaxed);

        let Some(pts) = pts else {
            return true;
        };
        let previous = self.last_written_pts.swap(pts, Ordering::Relaxed);
        if pts < previous {
            self.out_of_order.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    pub fn packets_read(&self) -> u64 {
        self.packets_read.load(Ordering::Relaxed)
    }

    pub fn packets_skipped(&self) -> u64 {
        self.packets_skipped.load(Ordering::Relaxed)
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded.load(Ordering::Relaxed)
    }

    pub fn frames_filtered(&self) -> u64 {
        self.frames_filtered.load(Ordering::Relaxed)
    }

    pub fn packets_written(&self) -> u64 {
        self.packets_written.load(Ordering::Relaxed)
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written.load(Ordering::Relaxed)
    }

    pub fn watchdog_timeouts(&self) -> u64 {
        self.watchdog_timeouts.load(Ordering::Relaxed)
    }

    pub fn out_of_order(&self) -> u64 {
        self.out_of_order.load(Ordering::Relaxed)
    }

    /// Get a summary of health metrics
    pub fn summary(&self) -> HealthSummary {
        HealthSummary {
            packets_read: self.packets_read(),
            packets_skipped: self.packets_skipped(),
            frames_decoded: self.frames_decoded(),
            frames_filtered: self.frames_filtered(),
            packets_written: self.packets_written(),
            bytes_written: self.bytes_written(),
            watchdog_timeouts: self.watchdog_timeouts(),
            out_of_order: self.out_of_order(),
        }
    }
}

impl Default for PipelineHealth {
    fn default() -> Self {
        Self::new()
    }
}

/// Snapshot of health metrics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSummary {
    pub packets_read: u64,
    pub packets_skipped: u64,
    pub frames_decoded: u64,
    pub frames_filtered: u64,
    pub packets_written: u64,
    pub bytes_written: u64,
    pub watchdog_timeouts: u64,
    pub out_of_order: u64,
}

impl std::fmt::Display for HealthSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Health: {} packets read ({} skipped), {} frames decoded, {} filtered, {} packets written ({} bytes, {} out of order), {} watchdog timeouts",
            self.packets_read,
            self.packets_skipped,
            self.frames_decoded,
            self.frames_filtered,
            self.packets_written,
            self.bytes_written,
            self.out_of_order,
            self.watchdog_timeouts
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_metrics() {
        let health = PipelineHealth::new();

        health.record_packet_read();
        health.record_packet_read();
        health.record_packet_skipped();
        health.record_frame_decoded();
        health.record_frame_filtered();
        assert!(health.record_packet_written(Some(0), 1000));
        assert!(health.record_packet_written(Some(33), 1500));

        let summary = health.summary();
        assert_eq!(summary.packets_read, 2);
        assert_eq!(summary.packets_skipped, 1);
        assert_eq!(summary.frames_decoded, 1);
        assert_eq!(summary.frames_filtered, 1);
        assert_eq!(summary.packets_written, 2);
        assert_eq!(summary.bytes_written, 2500);
        assert_eq!(summary.out_of_order, 0);
    }

    #[test]
    fn test_out_of_order_detection() {
        let health = PipelineHealth::new();

        assert!(health.record_packet_written(Some(100), 10));
        assert!(health.record_packet_written(Some(100), 10));
        assert!(!health.record_packet_written(Some(67), 10));
        assert!(health.record_packet_written(None, 10));
        assert_eq!(health.out_of_order(), 1);
    }

    #[test]
    fn test_summary_display() {
        let health = PipelineHealth::new();
        health.record_watchdog_timeout();
        let text = health.summary().to_string();
        assert!(text.starts_with("Health: 0 packets read"));
        assert!(text.ends_with("1 watchdog timeouts"));
    }
}
