//! Series statistics used by the technical engine
//!
//! Sample statistics (n - 1 denominator) throughout. Functions return `None`
//! when the input is too short for the statistic to exist.

use statrs::statistics::Statistics;

/// Simple period-over-period returns: `x[i] / x[i-1] - 1`
pub fn pct_returns(values: &[f64]) -> Vec<f64> {
    values.windows(2).map(|w| w[1] / w[0] - 1.0).collect()
}

/// Change from `lookback` observations ago to the last observation
pub fn pct_change_over(values: &[f64], lookback: usize) -> Option<f64> {
    let last = values.len().checked_sub(1)?;
    let base = last.checked_sub(lookback)?;
    Some(values[last] / values[base] - 1.0)
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().mean())
}

pub fn std_dev(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(values.iter().std_dev())
}

pub fn variance(values: &[f64]) -> Option<f64> {
    if values.len() < 2 {
        return None;
    }
    Some(values.iter().variance())
}

pub fn covariance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.len() < 2 {
        return None;
    }
    Some(a.iter().covariance(b.iter()))
}

/// Pearson correlation; `None` when either side has zero variance
pub fn correlation(a: &[f64], b: &[f64]) -> Option<f64> {
    let cov = covariance(a, b)?;
    let denominator = std_dev(a)? * std_dev(b)?;
    if denominator == 0.0 {
        return None;
    }
    Some(cov / denominator)
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let position = q * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let weight = position - lower as f64;

    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * weight)
}

/// Most negative `x / running_max(x) - 1` over the series
pub fn max_drawdown(values: &[f64]) -> Option<f64> {
    let mut peak = *values.first()?;
    let mut worst = 0.0_f64;

    for &value in values {
        if value > peak {
            peak = value;
        }
        let drawdown = value / peak - 1.0;
        if drawdown < worst {
            worst = drawdown;
        }
    }

    Some(worst)
}

/// Trailing moving average; the first `window - 1` positions are `None`
pub fn rolling_mean(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }

    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;

    for (i, value) in values.iter().enumerate() {
        sum += value;
        if i >= window {
            sum -= values[i - window];
        }
        if i + 1 >= window {
            out.push(Some(sum / window as f64));
        } else {
            out.push(None);
        }
    }

    out
}
