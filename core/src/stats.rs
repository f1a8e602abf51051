//! Shared numeric utilities: great-circle distance, circular hour-of-day
//! statistics, and streaming-aggregate helpers.
//!
//! SQLite has neither STDDEV nor trig functions, so the store returns raw
//! aggregates (count / sum / sum-of-squares, hour lists) and these helpers
//! finish the math.

/// Mean Earth radius in kilometres (IUGG).
pub const EARTH_RADIUS_KM: f64 = 6371.0088;

/// Great-circle distance between two lat/lon points, in kilometres.
pub fn haversine_km(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let phi1 = lat1.to_radians();
    let phi2 = lat2.to_radians();
    let d_phi = (lat2 - lat1).to_radians();
    let d_lambda = (lon2 - lon1).to_radians();

    let a = (d_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (d_lambda / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().asin();
    EARTH_RADIUS_KM * c
}

/// Circular mean of hour-of-day values, computed by vector averaging so
/// that hour 23 and hour 0 average to ~23.5 rather than ~11.5.
/// Returns a value in [0, 24), or None for an empty slice.
pub fn circular_mean_hour(hours: &[f64]) -> Option<f64> {
    if hours.is_empty() {
        return None;
    }
    let (mut sin_sum, mut cos_sum) = (0.0, 0.0);
    for h in hours {
        let theta = h * std::f64::consts::TAU / 24.0;
        sin_sum += theta.sin();
        cos_sum += theta.cos();
    }
    let mean_theta = sin_sum.atan2(cos_sum);
    let mut mean_hour = mean_theta * 24.0 / std::f64::consts::TAU;
    if mean_hour < 0.0 {
        mean_hour += 24.0;
    }
    Some(mean_hour)
}

/// Shortest distance between two hours on a 24-hour clock, in [0, 12].
pub fn circular_hour_diff(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 24.0;
    d.min(24.0 - d)
}

/// Sample standard deviation from streaming aggregates.
/// Returns None when n < 2 or the variance collapses to zero (or goes
/// slightly negative from floating-point cancellation).
pub fn sample_std(n: i64, sum: f64, sumsq: f64) -> Option<f64> {
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let mean = sum / nf;
    let var = (sumsq - nf * mean * mean) / (nf - 1.0);
    if var > 0.0 {
        Some(var.sqrt())
    } else {
        None
    }
}

/// Median of the finite values in `values`. None if no finite value exists.
pub fn finite_median(values: &[f64]) -> Option<f64> {
    let mut finite: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if finite.is_empty() {
        return None;
    }
    finite.sort_by(|a, b| a.total_cmp(b));
    let mid = finite.len() / 2;
    if finite.len() % 2 == 0 {
        Some((finite[mid - 1] + finite[mid]) / 2.0)
    } else {
        Some(finite[mid])
    }
}
