#![forbid(unsafe_code)]
//! Metric and retrieval benchmarks for the CBIR harness.
//!
//! Scenarios:
//! - `ssd`: scan + best match by sum of squared differences
//! - `cosine`: scan + best match by cosine distance
//! - `intersection`: scan + best match by histogram intersection
//! - `retrieval`: end-to-end `color+texture` retrieval over synthetic images,
//!   sequential and on the rayon pool

use std::env;
use std::process;

mod bench_utils;
mod metric_bench;
mod retrieval_bench;

fn main() {
    if cfg!(debug_assertions) && env::var("CBIR_ALLOW_DEBUG_BENCH").as_deref() != Ok("1") {
        eprintln!("error=debug_build_not_allowed message=\"run `cargo run --release -p cbir-bench`\"");
        process::exit(2);
    }

    let mode = if cfg!(debug_assertions) {
        "debug"
    } else {
        "release"
    };

    let scenario = env::var("CBIR_BENCH_SCENARIO").unwrap_or_else(|_| "all".to_string());
    let ok = match scenario.as_str() {
        "all" => {
            metric_bench::run_ssd_bench(mode)
                && metric_bench::run_cosine_bench(mode)
                && metric_bench::run_intersection_bench(mode)
                && retrieval_bench::run_retrieval_bench(mode)
        }
        "ssd" => metric_bench::run_ssd_bench(mode),
        "cosine" => metric_bench::run_cosine_bench(mode),
        "intersection" => metric_bench::run_intersection_bench(mode),
        "retrieval" => retrieval_bench::run_retrieval_bench(mode),
        _ => {
            eprintln!(
                "error=invalid_scenario scenario=\"{}\" allowed=\"all,ssd,cosine,intersection,retrieval\"",
                scenario
            );
            false
        }
    };

    if !ok {
        process::exit(1);
    }
}
