//! Recording parsing, label lists, windowing and resampling.

/// Label lists and driver tags.
pub mod labels;
/// Recording CSV parser.
pub mod loader;
/// Uniform index subsampling.
pub mod resample;
/// Sliding window segmentation.
pub mod segment;

use std::{fmt, sync::Arc};

use serde_json::json;
use shared_logging::LogLevel;

use crate::{error::Result, telemetry::PipelineTelemetry};
use labels::{DriverTag, LabelEntry};
use loader::{load_recording, RecordingSeries};
use resample::{resample_window, Observation};
use segment::{find_windows, Window, WindowParams};

/// Telemetry channels kept per sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Steering wheel position.
    Steer,
    /// Throttle position.
    Gas,
    /// Brake position.
    Brake,
    /// Vehicle speed.
    Speed,
    /// Yaw rate.
    YawRate,
}

/// Every channel, in observation order.
pub const CHANNELS: [Channel; 5] = [
    Channel::Steer,
    Channel::Gas,
    Channel::Brake,
    Channel::Speed,
    Channel::YawRate,
];

impl Channel {
    /// Column name used in feature names.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Steer => "steer",
            Self::Gas => "gas",
            Self::Brake => "brake",
            Self::Speed => "speed",
            Self::YawRate => "yaw_rate",
        }
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One window of one recording, ready for feature extraction.
#[derive(Debug, Clone)]
pub struct WindowSlice {
    /// Sequential id across the whole extraction run.
    pub window_id: usize,
    /// Driver of the owning recording.
    pub driver: DriverTag,
    /// Recording identifier.
    pub recording: String,
    /// Sample range.
    pub window: Window,
    /// Full series of the owning recording, shared by all its windows.
    pub series: Arc<RecordingSeries>,
}

impl WindowSlice {
    /// Observations resampled to at most `max_points`.
    #[must_use]
    pub fn resampled(&self, max_points: usize) -> Vec<Observation> {
        resample_window(&self.series, &self.window, max_points)
    }

    /// Raw samples of one channel inside the window.
    #[must_use]
    pub fn raw(&self, channel: Channel) -> &[f64] {
        &self.series.channel(channel)[self.window.start_index..self.window.end_index]
    }
}

/// Loads each labelled recording once and cuts it into windows.
///
/// Any unreadable recording fails the whole call. Recordings that produce no window are
/// logged and contribute nothing.
pub fn segment_recordings(
    entries: &[LabelEntry],
    params: &WindowParams,
    telemetry: Option<&PipelineTelemetry>,
) -> Result<Vec<WindowSlice>> {
    let mut slices = Vec::new();
    for entry in entries {
        let series = Arc::new(load_recording(&entry.path)?);
        let windows = find_windows(&series.t, params);
        if windows.is_empty() {
            crate::telemetry::trace(
                telemetry,
                LogLevel::Warn,
                "segment.no_windows",
                json!({ "recording": entry.recording, "samples": series.len() }),
            );
            continue;
        }
        crate::telemetry::trace(
            telemetry,
            LogLevel::Debug,
            "segment.recording",
            json!({ "recording": entry.recording, "windows": windows.len() }),
        );
        for window in windows {
            slices.push(WindowSlice {
                window_id: slices.len(),
                driver: entry.driver.clone(),
                recording: entry.recording.clone(),
                window,
                series: Arc::clone(&series),
            });
        }
    }
    Ok(slices)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{fmt::Write as _, fs, path::Path};
    use tempfile::tempdir;

    fn write_recording(path: &Path, seconds: usize, hz: usize) {
        let mut body = String::from(
            "timestamp,wheel_position,car0_throttle_position,car0_brake_position,car0_velocity_vehicle,rot_vel\ns,deg,%,%,m/s,rad/s\n",
        );
        for i in 0..seconds * hz {
            let t = i as f64 / hz as f64;
            let _ = writeln!(body, "{t},{},0.5,0,20,\"0,{},0\"", t.sin(), t.cos());
        }
        fs::write(path, body).unwrap();
    }

    #[test]
    fn windows_share_series_and_get_sequential_ids() {
        let dir = tempdir().unwrap();
        write_recording(&dir.path().join("a.csv"), 40, 20);
        write_recording(&dir.path().join("short.csv"), 10, 20);
        write_recording(&dir.path().join("b.csv"), 40, 20);
        let entries: Vec<LabelEntry> = ["a.csv", "short.csv", "b.csv"]
            .iter()
            .map(|name| LabelEntry {
                recording: (*name).to_owned(),
                path: dir.path().join(name),
                driver: DriverTag::Known("x".into()),
            })
            .collect();
        let params = WindowParams {
            min_points: 100,
            ..WindowParams::default()
        };
        let slices = segment_recordings(&entries, &params, None).unwrap();
        assert_eq!(slices.len(), 4);
        assert_eq!(
            slices.iter().map(|s| s.window_id).collect::<Vec<_>>(),
            vec![0, 1, 2, 3]
        );
        assert!(Arc::ptr_eq(&slices[0].series, &slices[1].series));
        assert_eq!(slices[2].recording, "b.csv");
        assert_eq!(slices[0].raw(Channel::Speed).len(), 500);
        assert_eq!(slices[0].resampled(100).len(), 100);
    }

    #[test]
    fn unreadable_recording_fails() {
        let entries = vec![LabelEntry {
            recording: "missing.csv".into(),
            path: "/nonexistent/missing.csv".into(),
            driver: DriverTag::Placeholder(0),
        }];
        assert!(segment_recordings(&entries, &WindowParams::default(), None).is_err());
    }
}
