use indexmap::IndexMap;
use rand::{seq::SliceRandom, SeedableRng};
use rand_chacha::ChaCha8Rng;

fn population_std(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt()
}

fn is_close(a: f64, b: f64) -> bool {
    (a - b).abs() <= 1e-8 + 1e-5 * b.abs()
}

/// Assigns every row to one of `k` folds so that all rows of a group share a fold and
/// class proportions stay balanced across folds.
///
/// Groups are shuffled with `seed`, stably ordered by decreasing spread of their class
/// histogram, then placed greedily into the fold that minimizes the mean (over classes)
/// of the across-fold standard deviation of `fold_count / class_total`. Ties prefer the
/// fold with fewer rows, then the lower index.
#[must_use]
pub fn stratified_group_folds(
    labels: &[String],
    groups: &[String],
    k: usize,
    seed: u64,
) -> Vec<usize> {
    let k = k.max(1);
    let mut classes: Vec<&str> = labels.iter().map(String::as_str).collect();
    classes.sort_unstable();
    classes.dedup();

    let mut histograms: IndexMap<&str, Vec<f64>> = IndexMap::new();
    for (label, group) in labels.iter().zip(groups) {
        let class = classes.binary_search(&label.as_str()).unwrap_or_default();
        histograms
            .entry(group.as_str())
            .or_insert_with(|| vec![0.0; classes.len()])[class] += 1.0;
    }
    let mut class_totals = vec![0.0_f64; classes.len()];
    for histogram in histograms.values() {
        for (total, count) in class_totals.iter_mut().zip(histogram) {
            *total += count;
        }
    }

    let mut order: Vec<usize> = (0..histograms.len()).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);
    let spread: Vec<f64> = histograms.values().map(|h| population_std(h)).collect();
    order.sort_by(|a, b| spread[*b].total_cmp(&spread[*a]));

    let mut fold_counts = vec![vec![0.0_f64; classes.len()]; k];
    let mut fold_sizes = vec![0.0_f64; k];
    let mut group_fold = vec![0_usize; histograms.len()];
    let mut column = vec![0.0_f64; k];
    for &group in &order {
        let histogram = &histograms[group];
        let group_size: f64 = histogram.iter().sum();
        let mut best: Option<(usize, f64, f64)> = None;
        for fold in 0..k {
            let mut eval = 0.0;
            for (class, total) in class_totals.iter().enumerate() {
                for (slot, counts) in column.iter_mut().zip(&fold_counts) {
                    *slot = counts[class];
                }
                column[fold] += histogram[class];
                for slot in &mut column {
                    *slot /= total;
                }
                eval += population_std(&column);
            }
            eval /= class_totals.len().max(1) as f64;
            let size = fold_sizes[fold];
            let better = match best {
                None => true,
                Some((_, best_eval, best_size)) => {
                    eval < best_eval || (is_close(eval, best_eval) && size < best_size)
                }
            };
            if better {
                best = Some((fold, eval, size));
            }
        }
        let chosen = best.map_or(0, |(fold, _, _)| fold);
        for (slot, count) in fold_counts[chosen].iter_mut().zip(histogram) {
            *slot += count;
        }
        fold_sizes[chosen] += group_size;
        group_fold[group] = chosen;
    }

    groups
        .iter()
        .map(|g| histograms.get_index_of(g.as_str()).map_or(0, |idx| group_fold[idx]))
        .collect()
}
