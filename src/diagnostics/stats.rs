use serde::Serialize;
use std::time::Instant;

/// Counters for one capture session.
pub struct DiagnosticStats {
    decoded: u64,
    emitted: u64,
    skipped: u64,
    dropped: u64,
    suppressed: u64,
    no_data: u64,
    total_bytes: u64,
    start_time: Instant,
    last_frame_time: Option<Instant>,
    device: Option<String>,
}

/// Snapshot of diagnostic stats for serialisation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DiagnosticSnapshot {
    pub fps: f64,
    pub decoded_frames: u64,
    pub emitted_frames: u64,
    pub skipped_frames: u64,
    pub dropped_frames: u64,
    pub suppressed_frames: u64,
    pub no_data_wakeups: u64,
    pub drop_rate: f64,
    pub bandwidth_bps: u64,
    pub device: Option<String>,
}

impl DiagnosticStats {
    /// Create new stats with zeroed counters.
    pub fn new() -> Self {
        Self {
            decoded: 0,
            emitted: 0,
            skipped: 0,
            dropped: 0,
            suppressed: 0,
            no_data: 0,
            total_bytes: 0,
            start_time: Instant::now(),
            last_frame_time: None,
            device: None,
        }
    }

    /// Label the session with the device card name.
    pub fn set_device(&mut self, device: Option<String>) {
        self.device = device;
    }

    /// Record a buffer that went through the pixel pipeline.
    pub fn record_decoded(&mut self, bytes: usize) {
        self.decoded += 1;
        self.total_bytes += bytes as u64;
        self.last_frame_time = Some(Instant::now());
    }

    /// Record an image handed to the consumer.
    pub fn record_emitted(&mut self) {
        self.emitted += 1;
    }

    /// Record a buffer skipped by frame decimation.
    pub fn record_skip(&mut self) {
        self.skipped += 1;
    }

    /// Record a buffer dropped for size or geometry.
    pub fn record_drop(&mut self) {
        self.dropped += 1;
    }

    /// Record a frame withheld because the signal is lost.
    pub fn record_suppressed(&mut self) {
        self.suppressed += 1;
    }

    /// Record a wakeup that found nothing to read.
    pub fn record_no_data(&mut self) {
        self.no_data += 1;
    }

    /// Decoded frames per second since the stats were (re)started.
    pub fn fps(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0.0;
        }
        self.decoded as f64 / elapsed
    }

    /// Dropped buffers as a percentage (0.0 - 100.0) of decoded + dropped.
    pub fn drop_rate(&self) -> f64 {
        let total = self.decoded + self.dropped;
        if total == 0 {
            return 0.0;
        }
        (self.dropped as f64 / total as f64) * 100.0
    }

    /// Bandwidth in bytes per second.
    pub fn bandwidth_bps(&self) -> u64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed < 0.001 {
            return 0;
        }
        (self.total_bytes as f64 / elapsed) as u64
    }

    /// Time of the last decoded frame.
    pub fn last_frame_time(&self) -> Option<Instant> {
        self.last_frame_time
    }

    /// Reset all counters, keeping the device label.
    pub fn reset(&mut self) {
        let device = self.device.take();
        *self = Self::new();
        self.device = device;
    }

    /// Take a serialisable snapshot.
    pub fn snapshot(&self) -> DiagnosticSnapshot {
        DiagnosticSnapshot {
            fps: self.fps(),
            decoded_frames: self.decoded,
            emitted_frames: self.emitted,
            skipped_frames: self.skipped,
            dropped_frames: self.dropped,
            suppressed_frames: self.suppressed,
            no_data_wakeups: self.no_data,
            drop_rate: self.drop_rate(),
            bandwidth_bps: self.bandwidth_bps(),
            device: self.device.clone(),
        }
    }
}

impl Default for DiagnosticStats {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn initialises_with_zero_values() {
        let stats = DiagnosticStats::new();
        assert_eq!(stats.decoded, 0);
        assert_eq!(stats.dropped, 0);
        assert_eq!(stats.total_bytes, 0);
        assert!(stats.last_frame_time().is_none());
    }

    #[test]
    fn record_decoded_tracks_frames_and_bytes() {
        let mut stats = DiagnosticStats::new();
        stats.record_decoded(1000);
        stats.record_decoded(500);
        assert_eq!(stats.decoded, 2);
        assert_eq!(stats.total_bytes, 1500);
        assert!(stats.last_frame_time().is_some());
    }

    #[test]
    fn fps_is_positive_after_frames() {
        let mut stats = DiagnosticStats::new();
        for _ in 0..30 {
            stats.record_decoded(1000);
        }
        thread::sleep(Duration::from_millis(100));
        let fps = stats.fps();
        assert!(fps > 0.0, "fps should be positive, got {fps}");
    }

    #[test]
    fn drop_rate_returns_percentage() {
        let mut stats = DiagnosticStats::new();
        stats.record_decoded(1000);
        stats.record_decoded(1000);
        stats.record_drop();
        let rate = stats.drop_rate();
        assert!(
            (rate - 33.333).abs() < 1.0,
            "drop rate should be ~33%, got {rate}"
        );
    }

    #[test]
    fn drop_rate_zero_when_no_events() {
        let stats = DiagnosticStats::new();
        assert_eq!(stats.drop_rate(), 0.0);
    }

    #[test]
    fn skips_and_suppressions_do_not_count_as_drops() {
        let mut stats = DiagnosticStats::new();
        stats.record_skip();
        stats.record_suppressed();
        stats.record_no_data();
        let snap = stats.snapshot();
        assert_eq!(snap.dropped_frames, 0);
        assert_eq!(snap.skipped_frames, 1);
        assert_eq!(snap.suppressed_frames, 1);
        assert_eq!(snap.no_data_wakeups, 1);
    }

    #[test]
    fn reset_clears_counters_but_keeps_device() {
        let mut stats = DiagnosticStats::new();
        stats.set_device(Some("USB Video".to_string()));
        stats.record_decoded(1000);
        stats.record_emitted();
        stats.reset();
        assert_eq!(stats.decoded, 0);
        assert_eq!(stats.emitted, 0);
        assert_eq!(stats.device.as_deref(), Some("USB Video"));
    }

    #[test]
    fn snapshot_serialises_to_camelcase() {
        let mut stats = DiagnosticStats::new();
        stats.record_decoded(5000);
        stats.record_emitted();
        let json = serde_json::to_value(stats.snapshot()).unwrap();
        assert_eq!(json["decodedFrames"], 1);
        assert_eq!(json["emittedFrames"], 1);
        assert!(json["noDataWakeups"].is_number());
        assert!(json["device"].is_null());
    }
}
