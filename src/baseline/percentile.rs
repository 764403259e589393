// Exact percentiles by linear interpolation between closest ranks
//
// rank = p/100 * (n - 1); value = lo + (hi - lo) * frac. Deterministic for a
// given multiset of samples: the input is sorted with a total order first.

/// Sort a copy of `values` with `f64::total_cmp`
pub fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    sorted
}

/// Percentile `p` (0..=100) of an already sorted slice
pub fn percentile_sorted(sorted: &[f64], p: u8) -> Option<f64> {
    if sorted.is_empty() || p > 100 {
        return None;
    }
    if sorted.len() == 1 {
        return Some(sorted[0]);
    }

    let rank = f64::from(p) / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = rank - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}
