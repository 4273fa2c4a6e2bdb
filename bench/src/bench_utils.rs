use std::env;

pub(crate) fn summarize_ms(samples_ms: &[f64]) -> (f64, f64, f64) {
    let p50_ms = percentile_ms(samples_ms, 0.50);
    let p95_ms = percentile_ms(samples_ms, 0.95);
    let avg_ms = if samples_ms.is_empty() {
        0.0
    } else {
        samples_ms.iter().sum::<f64>() / samples_ms.len() as f64
    };
    (p50_ms, p95_ms, avg_ms)
}

pub(crate) fn percentile_ms(samples_ms: &[f64], quantile: f64) -> f64 {
    if samples_ms.is_empty() {
        return 0.0;
    }

    let mut sorted = samples_ms.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last_index = sorted.len().saturating_sub(1);
    let position = (quantile.clamp(0.0, 1.0) * last_index as f64).round() as usize;
    sorted[position]
}

/// Values in `[0, 1)`, reproducible from `seed`.
pub(crate) fn deterministic_vector(seed: u64, dimension: usize) -> Vec<f32> {
    (0..dimension)
        .map(|index| {
            let mixed = (seed as usize)
                .wrapping_mul(31)
                .wrapping_add(index.wrapping_mul(17))
                % 10_000;
            mixed as f32 / 10_000.0
        })
        .collect()
}

pub(crate) fn read_usize_env_with_min(name: &str, default: usize, min: usize) -> usize {
    match env::var(name) {
        Ok(raw) => match raw.trim().parse::<usize>() {
            Ok(value) if value >= min => value,
            Ok(value) => {
                eprintln!(
                    "warn=invalid_env value={} env={} reason=\"must be >= {}\" using_default={}",
                    value, name, min, default
                );
                default
            }
            Err(_) => {
                eprintln!(
                    "warn=invalid_env value=\"{}\" env={} reason=\"not an integer\" using_default={}",
                    raw, name, default
                );
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentile_picks_nearest_rank() {
        let samples = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(percentile_ms(&samples, 0.0), 1.0);
        assert_eq!(percentile_ms(&samples, 0.5), 3.0);
        assert_eq!(percentile_ms(&samples, 1.0), 5.0);
        assert_eq!(percentile_ms(&[], 0.5), 0.0);
    }

    #[test]
    fn summary_averages_samples() {
        let (p50, p95, avg) = summarize_ms(&[1.0, 2.0, 3.0]);
        assert_eq!(p50, 2.0);
        assert_eq!(p95, 3.0);
        assert!((avg - 2.0).abs() < 1e-12);
    }

    #[test]
    fn deterministic_vector_is_reproducible() {
        let left = deterministic_vector(7, 16);
        assert_eq!(left, deterministic_vector(7, 16));
        assert_ne!(left, deterministic_vector(8, 16));
        assert!(left.iter().all(|value| (0.0..1.0).contains(value)));
    }
}
