// File: fleet-server/src/speedtest/stats.rs
//
// Plain-Rust aggregate math over a fetched row set, kept out of SQL so the
// anomaly threshold is exactly reproducible and unit-testable without a live
// database, per the speed-test aggregator's determinism requirement.

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct Distribution {
    pub count: usize,
    pub avg: f64,
    pub median: f64,
    pub min: f64,
    pub max: f64,
    pub stdev: f64,
}

pub fn distribution(values: &[f64]) -> Distribution {
    if values.is_empty() {
        return Distribution::default();
    }
    let count = values.len();
    let sum: f64 = values.iter().sum();
    let avg = sum / count as f64;
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
    let median = if count % 2 == 0 {
        (sorted[count / 2 - 1] + sorted[count / 2]) / 2.0
    } else {
        sorted[count / 2]
    };
    let min = sorted[0];
    let max = sorted[count - 1];
    let variance = values.iter().map(|v| (v - avg).powi(2)).sum::<f64>() / count as f64;
    let stdev = variance.sqrt();
    Distribution {
        count,
        avg,
        median,
        min,
        max,
        stdev,
    }
}

/// Values outside `mean ± threshold_std * stdev` on the given metric.
pub fn anomaly_indices(values: &[f64], threshold_std: f64) -> Vec<usize> {
    let dist = distribution(values);
    if dist.stdev == 0.0 {
        return Vec::new();
    }
    values
        .iter()
        .enumerate()
        .filter(|(_, v)| (**v - dist.avg).abs() > threshold_std * dist.stdev)
        .map(|(i, _)| i)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distribution_of_uniform_values_has_zero_stdev() {
        let dist = distribution(&[50.0, 50.0, 50.0]);
        assert_eq!(dist.stdev, 0.0);
        assert_eq!(dist.avg, 50.0);
    }

    #[test]
    fn median_of_even_count_averages_middle_pair() {
        let dist = distribution(&[10.0, 20.0, 30.0, 40.0]);
        assert_eq!(dist.median, 25.0);
    }

    #[test]
    fn anomaly_indices_flags_outlier_beyond_threshold() {
        let values = vec![50.0, 51.0, 49.0, 50.0, 200.0];
        let anomalies = anomaly_indices(&values, 2.0);
        assert_eq!(anomalies, vec![4]);
    }

    #[test]
    fn anomaly_indices_is_empty_when_stdev_is_zero() {
        let values = vec![10.0, 10.0, 10.0];
        assert!(anomaly_indices(&values, 1.0).is_empty());
    }
}
