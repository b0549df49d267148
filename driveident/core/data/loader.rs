use std::{
    fs::File,
    path::{Path, PathBuf},
};

use csv::{ReaderBuilder, StringRecord, Trim};
use serde::{Deserialize, Serialize};

use super::Channel;
use crate::error::{PipelineError, Result};

const TIMESTAMP: &str = "timestamp";
const ROT_VEL: &str = "rot_vel";
const CHANNEL_COLUMNS: [(Channel, &str); 4] = [
    (Channel::Steer, "wheel_position"),
    (Channel::Gas, "car0_throttle_position"),
    (Channel::Brake, "car0_brake_position"),
    (Channel::Speed, "car0_velocity_vehicle"),
];

/// Time-sorted channel series of one recording. All vectors have equal length.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSeries {
    /// Source file.
    pub path: PathBuf,
    /// Timestamps in seconds, strictly ascending.
    pub t: Vec<f64>,
    /// Steering wheel position.
    pub steer: Vec<f64>,
    /// Throttle position.
    pub gas: Vec<f64>,
    /// Brake position.
    pub brake: Vec<f64>,
    /// Vehicle speed.
    pub speed: Vec<f64>,
    /// Second component of the rotational velocity.
    pub yaw_rate: Vec<f64>,
}

impl RecordingSeries {
    /// Number of samples.
    #[must_use]
    pub fn len(&self) -> usize {
        self.t.len()
    }

    /// Whether the recording has no samples.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }

    /// Samples of one channel.
    #[must_use]
    pub fn channel(&self, channel: Channel) -> &[f64] {
        match channel {
            Channel::Steer => &self.steer,
            Channel::Gas => &self.gas,
            Channel::Brake => &self.brake,
            Channel::Speed => &self.speed,
            Channel::YawRate => &self.yaw_rate,
        }
    }
}

fn parse_cell(raw: Option<&str>) -> f64 {
    match raw.map(str::trim) {
        None | Some("" | "-") => f64::NAN,
        Some(value) => value.parse().unwrap_or(f64::NAN),
    }
}

fn column_index(headers: &StringRecord, name: &str) -> Option<usize> {
    headers.iter().position(|h| h.trim() == name)
}

/// Parses a recording CSV: header row, one units row, then samples.
///
/// Rows without a finite timestamp are dropped, the rest are stably sorted by time, and
/// repeated timestamps keep their first occurrence only.
pub fn load_recording(path: impl AsRef<Path>) -> Result<RecordingSeries> {
    let path = path.as_ref();
    let file = File::open(path).map_err(|err| PipelineError::recording(path, err.to_string()))?;
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(file);
    let headers = reader
        .headers()
        .map_err(|err| PipelineError::recording(path, err.to_string()))?
        .clone();

    let t_idx = column_index(&headers, TIMESTAMP)
        .ok_or_else(|| PipelineError::recording(path, format!("missing column `{TIMESTAMP}`")))?;
    let mut channel_idx = Vec::with_capacity(CHANNEL_COLUMNS.len());
    for (channel, name) in CHANNEL_COLUMNS {
        let idx = column_index(&headers, name)
            .ok_or_else(|| PipelineError::recording(path, format!("missing column `{name}`")))?;
        channel_idx.push((channel, idx));
    }
    let rot_idx = column_index(&headers, ROT_VEL);

    // (timestamp, steer, gas, brake, speed, yaw component if present)
    let mut rows: Vec<(f64, [f64; 4], Option<f64>)> = Vec::new();
    let mut any_yaw = false;
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(|err| PipelineError::recording(path, err.to_string()))?;
        if line == 0 {
            continue;
        }
        let t = parse_cell(record.get(t_idx));
        let mut values = [f64::NAN; 4];
        for (slot, (_, idx)) in values.iter_mut().zip(&channel_idx) {
            *slot = parse_cell(record.get(*idx));
        }
        let yaw = rot_idx
            .and_then(|idx| record.get(idx))
            .and_then(|raw| raw.splitn(3, ',').nth(1))
            .map(|component| parse_cell(Some(component)));
        any_yaw |= yaw.is_some();
        rows.push((t, values, yaw));
    }

    rows.retain(|(t, _, _)| t.is_finite());
    rows.sort_by(|a, b| a.0.total_cmp(&b.0));
    rows.dedup_by(|later, earlier| later.0 == earlier.0);

    let mut series = RecordingSeries {
        path: path.to_path_buf(),
        t: Vec::with_capacity(rows.len()),
        steer: Vec::with_capacity(rows.len()),
        gas: Vec::with_capacity(rows.len()),
        brake: Vec::with_capacity(rows.len()),
        speed: Vec::with_capacity(rows.len()),
        yaw_rate: Vec::with_capacity(rows.len()),
    };
    for (t, [steer, gas, brake, speed], yaw) in rows {
        series.t.push(t);
        series.steer.push(steer);
        series.gas.push(gas);
        series.brake.push(brake);
        series.speed.push(speed);
        series
            .yaw_rate
            .push(if any_yaw { yaw.unwrap_or(f64::NAN) } else { 0.0 });
    }
    Ok(series)
}

/// Returns whether `path` loads as a recording.
#[must_use]
pub fn validate_recording(path: impl AsRef<Path>) -> bool {
    load_recording(path).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    const HEADER: &str = "timestamp,wheel_position,car0_throttle_position,car0_brake_position,car0_velocity_vehicle,rot_vel";
    const UNITS: &str = "s,deg,%,%,m/s,rad/s";

    fn write(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, body).unwrap();
        path
    }

    #[test]
    fn skips_units_row_and_extracts_yaw() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "a.csv",
            &format!(
                "{HEADER}\n{UNITS}\n0.0,1,2,3,4,\"0.1,0.5,0.9\"\n0.1,5,6,7,8,\"0.2,-0.25,0.3\"\n"
            ),
        );
        let series = load_recording(&path).unwrap();
        assert_eq!(series.t, vec![0.0, 0.1]);
        assert_eq!(series.steer, vec![1.0, 5.0]);
        assert_eq!(series.yaw_rate, vec![0.5, -0.25]);
    }

    #[test]
    fn sorts_drops_bad_timestamps_and_collapses_duplicates() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "b.csv",
            &format!(
                "{HEADER}\n{UNITS}\n0.2,3,0,0,0,\"0,3,0\"\n-,9,0,0,0,\"0,9,0\"\n0.1,1,0,0,0,\"0,1,0\"\n0.1,2,0,0,0,\"0,2,0\"\n"
            ),
        );
        let series = load_recording(&path).unwrap();
        assert_eq!(series.t, vec![0.1, 0.2]);
        assert_eq!(series.steer, vec![1.0, 3.0]);
        assert_eq!(series.yaw_rate, vec![1.0, 3.0]);
    }

    #[test]
    fn missing_markers_become_nan() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "c.csv",
            &format!("{HEADER}\n{UNITS}\n0.0,-,abc,,4,\"0,x,0\"\n0.5,1,1,1,1,\"0,2,0\"\n"),
        );
        let series = load_recording(&path).unwrap();
        assert!(series.steer[0].is_nan());
        assert!(series.gas[0].is_nan());
        assert!(series.brake[0].is_nan());
        assert_eq!(series.speed[0], 4.0);
        assert!(series.yaw_rate[0].is_nan());
        assert_eq!(series.yaw_rate[1], 2.0);
    }

    #[test]
    fn yaw_defaults_to_zero_without_rot_vel() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "d.csv",
            "timestamp,wheel_position,car0_throttle_position,car0_brake_position,car0_velocity_vehicle\ns,deg,%,%,m/s\n0,1,1,1,1\n1,1,1,1,1\n",
        );
        let series = load_recording(&path).unwrap();
        assert_eq!(series.yaw_rate, vec![0.0, 0.0]);

        let scalar = write(
            dir.path(),
            "e.csv",
            &format!("{HEADER}\n{UNITS}\n0,1,1,1,1,0.4\n1,1,1,1,1,0.6\n"),
        );
        assert_eq!(load_recording(scalar).unwrap().yaw_rate, vec![0.0, 0.0]);
    }

    #[test]
    fn missing_required_column_is_a_recording_error() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "f.csv", "timestamp,wheel_position\ns,deg\n0,1\n");
        let err = load_recording(&path).unwrap_err();
        assert!(matches!(err, PipelineError::Recording { .. }));
        assert!(err.to_string().contains("car0_throttle_position"));
        assert!(!validate_recording(&path));
        assert!(!validate_recording(dir.path().join("absent.csv")));
    }

    #[test]
    fn header_only_file_is_empty() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "g.csv", &format!("{HEADER}\n{UNITS}\n"));
        let series = load_recording(&path).unwrap();
        assert!(series.is_empty());
        assert!(validate_recording(&path));
    }
}
