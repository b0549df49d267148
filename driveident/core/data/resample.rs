use serde::{Deserialize, Serialize};

use super::{loader::RecordingSeries, segment::Window, CHANNELS};

/// One resampled sample of a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Seconds since the first sample of the window.
    pub time: f64,
    /// Channel values in [`CHANNELS`] order.
    pub values: [f64; 5],
}

/// `min(len, max_points)` indices evenly spaced over `[0, len - 1]`, truncated.
///
/// Both endpoints are included and the result is never longer than `len`.
#[must_use]
pub fn subsample_indices(len: usize, max_points: usize) -> Vec<usize> {
    let count = len.min(max_points);
    match count {
        0 => Vec::new(),
        1 => vec![0],
        _ => (0..count).map(|i| i * (len - 1) / (count - 1)).collect(),
    }
}

/// Resamples the samples of `window` to at most `max_points` observations.
#[must_use]
pub fn resample_window(
    series: &RecordingSeries,
    window: &Window,
    max_points: usize,
) -> Vec<Observation> {
    let Some(&origin) = series.t.get(window.start_index) else {
        return Vec::new();
    };
    subsample_indices(window.len(), max_points)
        .into_iter()
        .map(|offset| {
            let idx = window.start_index + offset;
            let mut values = [0.0; 5];
            for (slot, channel) in values.iter_mut().zip(CHANNELS) {
                *slot = series.channel(channel)[idx];
            }
            Observation {
                time: series.t[idx] - origin,
                values,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn series(n: usize) -> RecordingSeries {
        let t: Vec<f64> = (0..n).map(|i| 5.0 + i as f64 * 0.01).collect();
        RecordingSeries {
            path: PathBuf::from("r.csv"),
            steer: (0..n).map(|i| i as f64).collect(),
            gas: vec![1.0; n],
            brake: vec![0.0; n],
            speed: vec![20.0; n],
            yaw_rate: vec![0.1; n],
            t,
        }
    }

    #[test]
    fn indices_include_endpoints_and_never_upsample() {
        assert_eq!(subsample_indices(10, 4), vec![0, 3, 6, 9]);
        assert_eq!(subsample_indices(3, 10), vec![0, 1, 2]);
        assert_eq!(subsample_indices(5, 1), vec![0]);
        assert!(subsample_indices(0, 5).is_empty());
        let idx = subsample_indices(2500, 500);
        assert_eq!(idx.len(), 500);
        assert_eq!(idx[499], 2499);
        assert!(idx.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn relative_time_is_anchored_at_window_start() {
        let s = series(100);
        let window = Window {
            start_index: 20,
            end_index: 80,
            start_time: 5.2,
            end_time: 5.8,
        };
        let obs = resample_window(&s, &window, 10);
        assert_eq!(obs.len(), 10);
        assert_eq!(obs[0].time, 0.0);
        assert_eq!(obs[0].values[0], 20.0);
        assert_eq!(obs[9].values[0], 79.0);
        assert!(obs.windows(2).all(|w| w[0].time < w[1].time));
    }
}
