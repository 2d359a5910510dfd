use embassy_time::{Duration, Instant, Ticker};
use heapless::String;

use crate::config::{CSV_CAPACITY, REPORT_PERIOD_MS};
use crate::ipc::{ExternalFlags, MeasurementFrame, PublishChannel};
use crate::report::write_csv;
use crate::{log_debug, log_info, log_warn};

/// Summary of one freshly read frame.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "board", derive(defmt::Format))]
pub struct FrameSummary {
    pub sequence: u32,
    pub min: f32,
    pub max: f32,
    pub mean: f32,
}

impl FrameSummary {
    fn of(sequence: u32, frame: &MeasurementFrame) -> Self {
        let mut min = f32::INFINITY;
        let mut max = f32::NEG_INFINITY;
        let mut sum = 0.0f32;
        for &v in frame.samples.iter() {
            min = min.min(v);
            max = max.max(v);
            sum += v;
        }
        Self {
            sequence,
            min,
            max,
            mean: sum / frame.samples.len() as f32,
        }
    }
}

/// Reader side of the publish channel: copies out each new frame once and
/// keeps it rendered as CSV for whoever serves it.
pub struct ReportMonitor {
    last_sequence: u32,
    frames: u32,
    skipped: u32,
    busy: u32,
    csv: String<CSV_CAPACITY>,
}

impl ReportMonitor {
    pub const fn new() -> Self {
        Self {
            last_sequence: 0,
            frames: 0,
            skipped: 0,
            busy: 0,
            csv: String::new(),
        }
    }

    /// CSV body of the latest frame, empty until one arrives.
    pub fn csv(&self) -> &str {
        &self.csv
    }

    pub fn frames(&self) -> u32 {
        self.frames
    }

    /// Frames published but never seen because a newer one replaced them.
    pub fn skipped(&self) -> u32 {
        self.skipped
    }

    /// Polls that found a write in progress.
    pub fn busy(&self) -> u32 {
        self.busy
    }

    /// Take a snapshot if a frame newer than the last one seen is available.
    pub fn poll(
        &mut self,
        channel: &PublishChannel,
        flags: &ExternalFlags,
    ) -> Option<(FrameSummary, MeasurementFrame)> {
        let Some((sequence, frame)) = channel.try_snapshot() else {
            self.busy = self.busy.wrapping_add(1);
            return None;
        };
        if sequence == self.last_sequence {
            return None;
        }
        let missed = sequence.wrapping_sub(self.last_sequence).wrapping_sub(1);
        self.skipped = self.skipped.wrapping_add(missed);
        self.last_sequence = sequence;
        self.frames = self.frames.wrapping_add(1);

        self.csv.clear();
        if write_csv(&mut self.csv, &frame.samples, flags).is_err() {
            log_warn!("Frame {} does not fit the CSV buffer", sequence);
            self.csv.clear();
        }
        Some((FrameSummary::of(sequence, &frame), frame))
    }
}

impl Default for ReportMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Poll the publish channel at the reporting cadence and log what arrives.
pub async fn run(channel: &PublishChannel, flags: &ExternalFlags) {
    log_info!("Report task started - polling every {}ms", REPORT_PERIOD_MS);
    let mut ticker = Ticker::every(Duration::from_millis(REPORT_PERIOD_MS));
    let mut monitor = ReportMonitor::new();
    let mut last_sec = Instant::now();

    loop {
        ticker.next().await;

        if let Some((summary, _)) = monitor.poll(channel, flags) {
            log_debug!(
                "Frame {}: min={} max={} mean={}",
                summary.sequence,
                summary.min,
                summary.max,
                summary.mean
            );
        }

        if last_sec.elapsed() >= Duration::from_secs(1) {
            log_info!(
                "Report: {} frames, {} skipped, {} busy polls",
                monitor.frames(),
                monitor.skipped(),
                monitor.busy()
            );
            last_sec = Instant::now();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MEASUREMENT_LEN;

    #[test]
    fn only_new_frames_are_reported() {
        let channel = PublishChannel::new();
        let flags = ExternalFlags::new();
        let mut monitor = ReportMonitor::new();
        assert!(monitor.poll(&channel, &flags).is_none());

        let mut samples = [1.0f32; MEASUREMENT_LEN];
        samples[3] = -2.0;
        samples[100] = 5.0;
        channel.try_publish(&samples);

        let (summary, frame) = monitor.poll(&channel, &flags).unwrap();
        assert_eq!(summary.sequence, 1);
        assert_eq!(summary.min, -2.0);
        assert_eq!(summary.max, 5.0);
        assert_eq!(frame.samples[100], 5.0);
        assert!(monitor.csv().starts_with("Voltage Readings,0,1.000,1,1.000,2,1.000,3,-2.000"));
        assert!(monitor.csv().ends_with("readFLG,False\n"));
        assert!(monitor.poll(&channel, &flags).is_none());
        assert_eq!(monitor.frames(), 1);
    }

    #[test]
    fn overwritten_frames_count_as_skipped() {
        let channel = PublishChannel::new();
        let flags = ExternalFlags::new();
        let mut monitor = ReportMonitor::new();
        for _ in 0..3 {
            channel.try_publish(&[0.0; MEASUREMENT_LEN]);
        }
        assert_eq!(monitor.poll(&channel, &flags).unwrap().0.sequence, 3);
        assert_eq!(monitor.skipped(), 2);
    }

    #[test]
    fn write_in_progress_is_counted_busy() {
        let channel = PublishChannel::new();
        let flags = ExternalFlags::new();
        let mut monitor = ReportMonitor::new();
        let writer = channel.try_begin_write().unwrap();
        assert!(monitor.poll(&channel, &flags).is_none());
        writer.end_write();
        assert_eq!(monitor.busy(), 1);
        assert_eq!(monitor.poll(&channel, &flags).unwrap().0.sequence, 1);
    }
}
