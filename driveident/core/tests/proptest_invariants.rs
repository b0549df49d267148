use std::{collections::HashMap, path::PathBuf};

use driveident_core::{
    data::resample::{resample_window, subsample_indices},
    evaluation::folds::stratified_group_folds,
    find_windows, RecordingSeries, WindowParams,
};
use proptest::prelude::*;
use proptest::test_runner::Config as ProptestConfig;

fn timestamps(origin: f64, gaps: &[f64]) -> Vec<f64> {
    let mut t = Vec::with_capacity(gaps.len() + 1);
    t.push(origin);
    for gap in gaps {
        let next = t[t.len() - 1] + gap;
        t.push(next);
    }
    t
}

fn series_from(t: Vec<f64>) -> RecordingSeries {
    let n = t.len();
    RecordingSeries {
        path: PathBuf::from("generated.csv"),
        steer: (0..n).map(|i| i as f64).collect(),
        gas: vec![0.5; n],
        brake: vec![0.0; n],
        speed: vec![20.0; n],
        yaw_rate: vec![0.0; n],
        t,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn windows_are_deterministic_and_well_formed(
        origin in -100.0_f64..100.0,
        gaps in prop::collection::vec(0.005_f64..0.2, 0..2000),
        window_sec in 0.5_f64..30.0,
        step_sec in 0.5_f64..15.0,
        min_points in 1_usize..200,
    ) {
        let t = timestamps(origin, &gaps);
        let params = WindowParams { window_sec, step_sec, min_points, max_points: 50 };
        let windows = find_windows(&t, &params);
        prop_assert_eq!(&windows, &find_windows(&t, &params));

        // Every candidate start holding at least `min_points` samples becomes a window.
        let last = t[t.len() - 1];
        let mut qualifying = 0_usize;
        let mut n = 0_u32;
        loop {
            let start = origin + f64::from(n) * step_sec;
            if start >= last - window_sec + 1e-9 {
                break;
            }
            let end = start + window_sec;
            let points = t.iter().filter(|&&x| x >= start && x < end).count();
            if points >= min_points {
                qualifying += 1;
            }
            n += 1;
        }
        prop_assert_eq!(windows.len(), qualifying);
        for window in &windows {
            prop_assert!(window.len() >= min_points);
            prop_assert!(window.end_index <= t.len());
            prop_assert!(t[window.start_index] >= window.start_time);
            prop_assert!(t[window.end_index - 1] < window.start_time + window_sec);
            let steps = (window.start_time - origin) / step_sec;
            prop_assert!((steps - steps.round()).abs() < 1e-6);
        }
        for pair in windows.windows(2) {
            prop_assert!(pair[0].start_time < pair[1].start_time);
        }
    }

    #[test]
    fn resampled_windows_start_at_zero_and_respect_the_ceiling(
        gaps in prop::collection::vec(0.005_f64..0.05, 1..1500),
        max_points in 1_usize..600,
    ) {
        let series = series_from(timestamps(3.0, &gaps));
        let params = WindowParams { window_sec: 2.0, step_sec: 1.0, min_points: 1, max_points };
        for window in find_windows(&series.t, &params) {
            let observations = resample_window(&series, &window, max_points);
            prop_assert_eq!(observations.len(), window.len().min(max_points));
            prop_assert_eq!(observations[0].time, 0.0);
            let indices = subsample_indices(window.len(), max_points);
            prop_assert_eq!(indices[0], 0);
            if window.len() > 1 && max_points > 1 {
                prop_assert_eq!(indices[indices.len() - 1], window.len() - 1);
            }
            prop_assert!(indices.windows(2).all(|p| p[0] < p[1]));
        }
    }

    #[test]
    fn folds_never_split_a_recording(
        rows in prop::collection::vec((0_usize..12, 0_usize..4), 1..200),
        k in 2_usize..8,
        seed in any::<u64>(),
    ) {
        let groups: Vec<String> = rows.iter().map(|(g, _)| format!("rec{g}")).collect();
        // A recording always belongs to one driver.
        let labels: Vec<String> = rows.iter().map(|(g, _)| format!("driver{}", g % 3)).collect();
        let folds = stratified_group_folds(&labels, &groups, k, seed);
        prop_assert_eq!(folds.len(), rows.len());
        let mut fold_of: HashMap<&str, usize> = HashMap::new();
        for (group, fold) in groups.iter().zip(&folds) {
            prop_assert!(*fold < k);
            let first = *fold_of.entry(group.as_str()).or_insert(*fold);
            prop_assert_eq!(first, *fold);
        }
        prop_assert_eq!(&folds, &stratified_group_folds(&labels, &groups, k, seed));
    }
}
