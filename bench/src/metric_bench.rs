use std::borrow::Borrow;
use std::time::{Duration, Instant};

use cbir_core::{cosine_distance, histogram_intersection, sum_squared_differences, Histogram};

use crate::bench_utils::{deterministic_vector, read_usize_env_with_min, summarize_ms};

const DEFAULT_DIMENSION: usize = 512;
const DEFAULT_DATASET_SIZE: usize = 10_000;
const DEFAULT_HISTOGRAM_BINS: usize = 30;
const DEFAULT_WARMUP_RUNS: usize = 8;
const DEFAULT_MEASURED_RUNS: usize = 50;

#[derive(Clone, Copy)]
struct MetricBenchConfig {
    dimension: usize,
    dataset_size: usize,
    histogram_bins: usize,
    warmup_runs: usize,
    measured_runs: usize,
}

fn load_config() -> MetricBenchConfig {
    MetricBenchConfig {
        dimension: read_usize_env_with_min("CBIR_BENCH_DIMENSION", DEFAULT_DIMENSION, 1),
        dataset_size: read_usize_env_with_min("CBIR_BENCH_DATASET_SIZE", DEFAULT_DATASET_SIZE, 1),
        histogram_bins: read_usize_env_with_min(
            "CBIR_BENCH_HISTOGRAM_BINS",
            DEFAULT_HISTOGRAM_BINS,
            1,
        ),
        warmup_runs: read_usize_env_with_min("CBIR_BENCH_WARMUP_RUNS", DEFAULT_WARMUP_RUNS, 0),
        measured_runs: read_usize_env_with_min(
            "CBIR_BENCH_MEASURED_RUNS",
            DEFAULT_MEASURED_RUNS,
            1,
        ),
    }
}

/// Best candidate of one timed scan.
struct ScanResult {
    elapsed: Duration,
    best_id: usize,
    best_score: f32,
}

fn scan<T: ?Sized, C: Borrow<T>>(
    query: &T,
    dataset: &[C],
    higher_is_better: bool,
    score: impl Fn(&T, &T) -> Option<f32>,
) -> Option<ScanResult> {
    let started_at = Instant::now();
    let mut best_id = 0usize;
    let mut best_score = if higher_is_better { f32::MIN } else { f32::MAX };

    for (id, candidate) in dataset.iter().enumerate() {
        let value = score(query, candidate.borrow())?;
        let better = if higher_is_better {
            value > best_score
        } else {
            value < best_score
        };
        if better {
            best_score = value;
            best_id = id;
        }
    }

    Some(ScanResult {
        elapsed: started_at.elapsed(),
        best_id,
        best_score,
    })
}

fn measure(
    bench: &str,
    mode: &str,
    config: MetricBenchConfig,
    dimension: usize,
    mut run_once: impl FnMut() -> Option<ScanResult>,
) -> bool {
    for _ in 0..config.warmup_runs {
        if run_once().is_none() {
            return false;
        }
    }

    let mut elapsed_samples = Vec::with_capacity(config.measured_runs);
    let mut total_duration = Duration::from_secs(0);
    let mut last_best_id = 0usize;
    let mut last_best_score = 0.0f32;

    for _ in 0..config.measured_runs {
        let Some(result) = run_once() else {
            return false;
        };
        elapsed_samples.push(result.elapsed.as_secs_f64() * 1_000.0);
        total_duration += result.elapsed;
        last_best_id = result.best_id;
        last_best_score = result.best_score;
    }

    let (p50_ms, p95_ms, avg_ms) = summarize_ms(&elapsed_samples);
    let total_ops = (config.measured_runs * config.dataset_size) as f64;
    let qps = total_ops / total_duration.as_secs_f64().max(f64::MIN_POSITIVE);

    println!(
        "bench={bench} mode={mode} dataset_size={} dimension={dimension} warmup_runs={} measured_runs={} p50_ms={p50_ms:.6} p95_ms={p95_ms:.6} avg_ms={avg_ms:.6} qps={qps:.2} best_id={last_best_id} best_score={last_best_score:.6}",
        config.dataset_size,
        config.warmup_runs,
        config.measured_runs
    );

    true
}

pub(crate) fn run_ssd_bench(mode: &str) -> bool {
    let config = load_config();
    let query = deterministic_vector(42, config.dimension);
    let dataset = generate_dataset(config.dataset_size, config.dimension);

    measure("metric_ssd", mode, config, config.dimension, || {
        scan::<[f32], _>(&query, &dataset, false, |left, right| {
            match sum_squared_differences(left, right) {
                Ok(value) => Some(value),
                Err(error) => {
                    eprintln!("error=ssd_failed detail=\"{error}\"");
                    None
                }
            }
        })
    })
}

pub(crate) fn run_cosine_bench(mode: &str) -> bool {
    let config = load_config();
    let query = deterministic_vector(1337, config.dimension);
    let dataset = generate_dataset(config.dataset_size, config.dimension);

    measure("metric_cosine", mode, config, config.dimension, || {
        scan::<[f32], _>(&query, &dataset, false, |left, right| {
            match cosine_distance(left, right) {
                Ok(value) => Some(value),
                Err(error) => {
                    eprintln!("error=cosine_failed detail=\"{error}\"");
                    None
                }
            }
        })
    })
}

pub(crate) fn run_intersection_bench(mode: &str) -> bool {
    let config = load_config();
    let bins = config.histogram_bins;
    let Some(query) = deterministic_histogram(7, bins) else {
        eprintln!("error=histogram_build_failed bins={bins}");
        return false;
    };
    let mut dataset = Vec::with_capacity(config.dataset_size);
    for id in 0..config.dataset_size {
        let Some(histogram) = deterministic_histogram(id as u64, bins) else {
            eprintln!("error=histogram_build_failed bins={bins}");
            return false;
        };
        dataset.push(histogram);
    }

    measure("metric_intersection", mode, config, bins * bins, || {
        scan::<Histogram, _>(&query, &dataset, true, |left, right| {
            match histogram_intersection(left, right) {
                Ok(value) => Some(value),
                Err(error) => {
                    eprintln!("error=intersection_failed detail=\"{error}\"");
                    None
                }
            }
        })
    })
}

fn generate_dataset(size: usize, dimension: usize) -> Vec<Vec<f32>> {
    (0..size)
        .map(|id| deterministic_vector(id as u64, dimension))
        .collect()
}

fn deterministic_histogram(seed: u64, bins: usize) -> Option<Histogram> {
    Histogram::from_bins(bins, bins, deterministic_vector(seed, bins * bins))
}
