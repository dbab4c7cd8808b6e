//! Robust statistics shared by the resampler, attribution and aggregation stages.
//!
//! Percentiles use linear interpolation between closest ranks (numpy's
//! default convention).

/// Linear-interpolated percentile of already sorted values
pub fn percentile_sorted(sorted: &[f64], q: f64) -> Option<f64> {
    if sorted.is_empty() {
        return None;
    }
    let n = sorted.len();
    let pos = (q / 100.0).clamp(0.0, 1.0) * (n - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    let frac = pos - lo as f64;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * frac)
}

/// Percentile of unsorted values
pub fn percentile(values: &[f64], q: f64) -> Option<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    percentile_sorted(&sorted, q)
}

pub fn median(values: &[f64]) -> Option<f64> {
    percentile(values, 50.0)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation (ddof = 0)
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let var = values.iter().map(|&v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    Some(var.sqrt())
}

/// Inter-decile band `[p10, p90]` of a value set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecileBand {
    pub low: f64,
    pub high: f64,
}

impl DecileBand {
    pub fn of(values: &[f64]) -> Option<Self> {
        let mut sorted = values.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));
        Some(Self {
            low: percentile_sorted(&sorted, 10.0)?,
            high: percentile_sorted(&sorted, 90.0)?,
        })
    }

    pub fn contains(&self, v: f64) -> bool {
        v >= self.low && v <= self.high
    }
}

/// Indices of the values inside their own inter-decile band
pub fn trimmed_indices(values: &[f64]) -> Vec<usize> {
    match DecileBand::of(values) {
        Some(band) => values
            .iter()
            .enumerate()
            .filter(|(_, &v)| band.contains(v))
            .map(|(i, _)| i)
            .collect(),
        None => Vec::new(),
    }
}

/// Median, std and mean of a trimmed value set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrimmedSummary {
    pub median: f64,
    pub std: f64,
    pub mean: f64,
    pub count: usize,
}

/// Drop values outside `[p10, p90]` and summarize the rest
pub fn trimmed_summary(values: &[f64]) -> Option<TrimmedSummary> {
    let kept: Vec<f64> = trimmed_indices(values).into_iter().map(|i| values[i]).collect();
    Some(TrimmedSummary {
        median: median(&kept)?,
        std: std_dev(&kept)?,
        mean: mean(&kept)?,
        count: kept.len(),
    })
}

/// Index of the point with the smallest mean Euclidean distance to all points.
/// Ties resolve to the first index.
pub fn medoid_index(xs: &[f64], ys: &[f64]) -> Option<usize> {
    let n = xs.len().min(ys.len());
    if n == 0 {
        return None;
    }
    let mut best = 0;
    let mut best_mean = f64::INFINITY;
    for i in 0..n {
        let total: f64 = (0..n)
            .map(|j| ((xs[i] - xs[j]).powi(2) + (ys[i] - ys[j]).powi(2)).sqrt())
            .sum();
        let m = total / n as f64;
        if m < best_mean {
            best_mean = m;
            best = i;
        }
    }
    Some(best)
}

/// Medoid coordinate of a point set
pub fn medoid(xs: &[f64], ys: &[f64]) -> Option<(f64, f64)> {
    medoid_index(xs, ys).map(|i| (xs[i], ys[i]))
}
