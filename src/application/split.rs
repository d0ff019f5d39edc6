//! Stratified train/test split on target tertiles.

use ndarray::ArrayView1;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha20Rng;

use crate::GlycoError;

/// Row indices of the two partitions, each in ascending order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainTestSplit {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Linear-interpolated quantile of sorted values.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

/// Tertile stratum (0, 1 or 2) for every target.
#[must_use]
pub fn tertile_strata(targets: ArrayView1<'_, f64>) -> Vec<usize> {
    if targets.is_empty() {
        return Vec::new();
    }
    let mut sorted = targets.to_vec();
    sorted.sort_by(f64::total_cmp);
    let q1 = quantile(&sorted, 1.0 / 3.0);
    let q2 = quantile(&sorted, 2.0 / 3.0);
    targets
        .iter()
        .map(|&t| {
            if t <= q1 {
                0
            } else if t <= q2 {
                1
            } else {
                2
            }
        })
        .collect()
}

/// Split rows so each target tertile keeps its share in both partitions.
///
/// The test partition holds `ceil(n * test_size)` rows, allocated across
/// strata by largest remainder. Shuffling inside each stratum uses `seed`.
///
/// # Errors
/// Returns [`GlycoError::Validation`] if `test_size` is outside `(0, 1)` or
/// either partition would be empty.
pub fn stratified_split(
    targets: ArrayView1<'_, f64>,
    test_size: f64,
    seed: u64,
) -> Result<TrainTestSplit, GlycoError> {
    if !(test_size > 0.0 && test_size < 1.0) {
        return Err(GlycoError::Validation(format!(
            "test_size must be in (0, 1), got {test_size}"
        )));
    }
    let n = targets.len();
    // The epsilon keeps exact products such as 150 * 0.2 from rounding up.
    let n_test = (n as f64 * test_size - 1e-9).ceil() as usize;
    if n_test == 0 || n_test >= n {
        return Err(GlycoError::Validation(format!(
            "cannot split {n} samples with test_size {test_size}"
        )));
    }

    let mut strata: [Vec<usize>; 3] = Default::default();
    for (i, s) in tertile_strata(targets).into_iter().enumerate() {
        strata[s].push(i);
    }

    let exact: Vec<f64> = strata.iter().map(|s| s.len() as f64 * test_size).collect();
    let mut quota: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();
    let mut by_remainder: Vec<usize> = (0..3).collect();
    by_remainder.sort_by(|&a, &b| {
        let ra = exact[a] - exact[a].floor();
        let rb = exact[b] - exact[b].floor();
        rb.total_cmp(&ra).then(a.cmp(&b))
    });
    let mut missing = n_test.saturating_sub(quota.iter().sum());
    for &s in by_remainder.iter().cycle().take(3 * n_test) {
        if missing == 0 {
            break;
        }
        if quota[s] < strata[s].len() {
            quota[s] += 1;
            missing -= 1;
        }
    }

    let mut rng = ChaCha20Rng::seed_from_u64(seed);
    let mut train = Vec::with_capacity(n - n_test);
    let mut test = Vec::with_capacity(n_test);
    for (stratum, &take) in strata.iter_mut().zip(&quota) {
        stratum.shuffle(&mut rng);
        test.extend_from_slice(&stratum[..take]);
        train.extend_from_slice(&stratum[take..]);
    }
    train.sort_unstable();
    test.sort_unstable();

    tracing::debug!(
        "Stratified split: {} train / {} test (test quota per tertile {:?})",
        train.len(),
        test.len(),
        quota
    );
    Ok(TrainTestSplit { train, test })
}
