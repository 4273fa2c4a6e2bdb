use std::time::{Duration, Instant};

use cbir_core::{
    retrieve_parallel, retrieve_with_report, CandidateError, ImageEntry, RetrievalMode,
    RetrievalReport, RetrievalRequest,
};
use image::{Rgb, RgbImage};

use crate::bench_utils::{read_usize_env_with_min, summarize_ms};

const DEFAULT_IMAGES: usize = 256;
const DEFAULT_IMAGE_SIDE: usize = 96;
const DEFAULT_TOP_N: usize = 10;
const DEFAULT_WARMUP_RUNS: usize = 2;
const DEFAULT_MEASURED_RUNS: usize = 10;
const MODE: RetrievalMode = RetrievalMode::ColorTexture;

#[derive(Clone, Copy)]
struct RetrievalBenchConfig {
    images: usize,
    image_side: usize,
    top_n: usize,
    warmup_runs: usize,
    measured_runs: usize,
}

fn load_config() -> RetrievalBenchConfig {
    RetrievalBenchConfig {
        images: read_usize_env_with_min("CBIR_BENCH_IMAGES", DEFAULT_IMAGES, 1),
        image_side: read_usize_env_with_min("CBIR_BENCH_IMAGE_SIDE", DEFAULT_IMAGE_SIDE, 7),
        top_n: read_usize_env_with_min("CBIR_BENCH_TOP_N", DEFAULT_TOP_N, 1),
        warmup_runs: read_usize_env_with_min("CBIR_BENCH_WARMUP_RUNS", DEFAULT_WARMUP_RUNS, 0),
        measured_runs: read_usize_env_with_min(
            "CBIR_BENCH_MEASURED_RUNS",
            DEFAULT_MEASURED_RUNS,
            1,
        ),
    }
}

pub(crate) fn run_retrieval_bench(mode: &str) -> bool {
    let config = load_config();
    let side = config.image_side as u32;
    let query = ImageEntry::new("query", synthetic_image(9_999, side));
    // Rasters are rendered on demand, as the CLI decodes them.
    let seeds: Vec<u64> = (0..config.images as u64).collect();
    let load = |seed: &u64| -> Result<ImageEntry, CandidateError> {
        Ok(ImageEntry::new(
            format!("synthetic-{seed:05}"),
            synthetic_image(*seed, side),
        ))
    };
    let request = RetrievalRequest::new(&query, MODE, config.top_n);

    let Some(sequential) = measure(config, || {
        retrieve_with_report(&request, seeds.iter().map(load))
    }) else {
        return false;
    };
    let Some(parallel) = measure(config, || retrieve_parallel(&request, &seeds, load)) else {
        return false;
    };

    if sequential.report.matches != parallel.report.matches {
        eprintln!("error=parallel_mismatch detail=\"parallel ranking differs from sequential\"");
        return false;
    }

    let best_id = sequential
        .report
        .matches
        .first()
        .map(|best| best.id.as_str())
        .unwrap_or("none");
    let speedup = sequential.avg_ms / parallel.avg_ms.max(f64::MIN_POSITIVE);

    println!(
        "bench=retrieval mode={mode} retrieval_mode={MODE} images={} image_side={side} top_n={} warmup_runs={} measured_runs={} seq_p50_ms={:.6} seq_p95_ms={:.6} seq_avg_ms={:.6} par_p50_ms={:.6} par_p95_ms={:.6} par_avg_ms={:.6} speedup={speedup:.2} scored={} best_id={best_id}",
        config.images,
        config.top_n,
        config.warmup_runs,
        config.measured_runs,
        sequential.p50_ms,
        sequential.p95_ms,
        sequential.avg_ms,
        parallel.p50_ms,
        parallel.p95_ms,
        parallel.avg_ms,
        sequential.report.scored,
    );

    true
}

struct Measurement {
    p50_ms: f64,
    p95_ms: f64,
    avg_ms: f64,
    report: RetrievalReport,
}

fn measure<E: std::fmt::Display>(
    config: RetrievalBenchConfig,
    mut run_once: impl FnMut() -> Result<RetrievalReport, E>,
) -> Option<Measurement> {
    for _ in 0..config.warmup_runs {
        if let Err(error) = run_once() {
            eprintln!("error=retrieval_failed detail=\"{error}\"");
            return None;
        }
    }

    let mut elapsed_samples = Vec::with_capacity(config.measured_runs);
    let mut last_report = None;
    for _ in 0..config.measured_runs {
        let started_at = Instant::now();
        let report = match run_once() {
            Ok(report) => report,
            Err(error) => {
                eprintln!("error=retrieval_failed detail=\"{error}\"");
                return None;
            }
        };
        let elapsed: Duration = started_at.elapsed();
        elapsed_samples.push(elapsed.as_secs_f64() * 1_000.0);
        last_report = Some(report);
    }

    let (p50_ms, p95_ms, avg_ms) = summarize_ms(&elapsed_samples);
    last_report.map(|report| Measurement {
        p50_ms,
        p95_ms,
        avg_ms,
        report,
    })
}

/// Smooth colour gradients with a seed-dependent phase, so histograms and
/// gradient magnitudes differ between images.
fn synthetic_image(seed: u64, side: u32) -> RgbImage {
    let phase = (seed.wrapping_mul(37) % 256) as u32;
    RgbImage::from_fn(side, side, |x, y| {
        let red = (x * 255 / side.max(1) + phase) % 256;
        let green = (y * 255 / side.max(1) + phase * 3) % 256;
        let blue = ((x + y) * 4 + phase * 7) % 256;
        Rgb([red as u8, green as u8, blue as u8])
    })
}
