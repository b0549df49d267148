use serde::{Deserialize, Serialize};

/// Tolerance that keeps a start landing exactly on `t_last - window_sec`.
const START_EPSILON: f64 = 1e-9;

/// Window geometry and size limits.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WindowParams {
    /// Window length in seconds.
    pub window_sec: f64,
    /// Start offset between candidates in seconds.
    pub step_sec: f64,
    /// Minimum raw samples to keep a window.
    pub min_points: usize,
    /// Ceiling on resampled observations.
    pub max_points: usize,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            window_sec: 25.0,
            step_sec: 12.0,
            min_points: 300,
            max_points: 500,
        }
    }
}

/// Half-open sample range `[start_index, end_index)` of one window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Window {
    /// First sample index.
    pub start_index: usize,
    /// One past the last sample index.
    pub end_index: usize,
    /// Candidate start time.
    pub start_time: f64,
    /// `start_time + window_sec`.
    pub end_time: f64,
}

impl Window {
    /// Raw sample count.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.end_index - self.start_index
    }

    /// Whether the window holds no samples.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end_index == self.start_index
    }
}

fn lower_bound(t: &[f64], value: f64) -> usize {
    t.partition_point(|x| *x < value)
}

/// Cuts a sorted timestamp series into overlapping windows.
///
/// Candidate starts are `t[0] + n * step_sec` below `t_last - window_sec` (plus a small
/// tolerance); a candidate is kept when it covers at least `min_points` samples.
#[must_use]
pub fn find_windows(t: &[f64], params: &WindowParams) -> Vec<Window> {
    let (Some(&first), Some(&last)) = (t.first(), t.last()) else {
        return Vec::new();
    };
    if !(params.step_sec > 0.0 && params.window_sec > 0.0) {
        return Vec::new();
    }
    let limit = last - params.window_sec + START_EPSILON;
    let mut windows = Vec::new();
    let mut n = 0_u64;
    loop {
        let start_time = first + n as f64 * params.step_sec;
        if start_time >= limit {
            break;
        }
        let end_time = start_time + params.window_sec;
        let start_index = lower_bound(t, start_time);
        let end_index = lower_bound(t, end_time);
        if end_index - start_index >= params.min_points {
            windows.push(Window {
                start_index,
                end_index,
                start_time,
                end_time,
            });
        }
        n += 1;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(seconds: f64, hz: f64) -> Vec<f64> {
        let n = (seconds * hz) as usize;
        (0..n).map(|i| i as f64 / hz).collect()
    }

    #[test]
    fn forty_second_recording_yields_two_windows() {
        let t = uniform(40.0, 100.0);
        let windows = find_windows(&t, &WindowParams::default());
        assert_eq!(windows.len(), 2);
        assert_eq!(windows[0].start_index, 0);
        assert_eq!(windows[0].len(), 2500);
        assert!((windows[1].start_time - 12.0).abs() < 1e-12);
        assert_eq!(windows[1].start_index, 1200);
    }

    #[test]
    fn short_or_empty_recordings_yield_nothing() {
        assert!(find_windows(&[], &WindowParams::default()).is_empty());
        assert!(find_windows(&uniform(20.0, 100.0), &WindowParams::default()).is_empty());
    }

    #[test]
    fn sparse_windows_are_dropped() {
        let params = WindowParams {
            window_sec: 10.0,
            step_sec: 5.0,
            min_points: 60,
            max_points: 100,
        };
        let mut t = uniform(10.0, 10.0);
        t.extend(uniform(20.0, 1.0).into_iter().map(|x| x + 10.0));
        let windows = find_windows(&t, &params);
        assert!(windows.iter().all(|w| w.len() >= 60));
        assert_eq!(windows.len(), 1);
    }

    #[test]
    fn exact_fit_window_is_kept() {
        let t: Vec<f64> = (0..=10).map(f64::from).collect();
        let params = WindowParams {
            window_sec: 10.0,
            step_sec: 3.0,
            min_points: 1,
            max_points: 10,
        };
        let windows = find_windows(&t, &params);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].end_index, 10);
    }
}
