use image::Rgb;

use super::*;
use crate::extract::{rg_chromaticity_histogram, texture_histogram};
use crate::metric::histogram_intersection;

fn gray(level: u8, size: u32) -> RgbImage {
    RgbImage::from_pixel(size, size, Rgb([level, level, level]))
}

fn gradient(seed: u32, size: u32) -> RgbImage {
    RgbImage::from_fn(size, size, |x, y| {
        let red = ((x * 17 + seed * 31) % 256) as u8;
        let green = ((y * 23 + seed * 7) % 256) as u8;
        let blue = ((x * y + seed) % 256) as u8;
        Rgb([red, green, blue])
    })
}

fn entry(id: &str, image: RgbImage) -> Result<ImageEntry, CandidateError> {
    Ok(ImageEntry::new(id, image))
}

fn ids(matches: &[MatchResult]) -> Vec<&str> {
    matches.iter().map(|hit| hit.id.as_str()).collect()
}

fn record(id: &str, values: Vec<f32>) -> CandidateRecord {
    CandidateRecord {
        id: id.to_string(),
        descriptor: Descriptor::Vector(values),
    }
}

#[test]
fn baseline_patch_ranks_by_ascending_ssd() {
    let query = ImageEntry::new("query.png", gray(100, 16));
    let request = RetrievalRequest::new(&query, RetrievalMode::BaselinePatch, 10);
    let candidates = vec![
        entry("far.png", gray(98, 16)),
        entry("near.png", gray(101, 16)),
        entry("query.png", gray(100, 16)),
    ];

    let matches = retrieve(&request, candidates).expect("retrieval must succeed");
    assert_eq!(ids(&matches), vec!["near.png", "far.png"]);
    assert_eq!(matches[0].score, 49.0);
    assert_eq!(matches[1].score, 196.0);
}

#[test]
fn identical_descriptor_with_other_identifier_is_reported() {
    let query = ImageEntry::new("query.png", gray(100, 16));
    let request = RetrievalRequest::new(&query, RetrievalMode::BaselinePatch, 10);
    let candidates = vec![
        entry("query.png", gray(100, 16)),
        entry("copy.png", gray(100, 16)),
    ];

    let report = retrieve_with_report(&request, candidates).expect("retrieval must succeed");
    assert_eq!(ids(&report.matches), vec!["copy.png"]);
    assert_eq!(report.matches[0].score, 0.0);
    assert_eq!(report.excluded_self, 1);
}

#[test]
fn end_to_end_records_scenario() {
    let query = Descriptor::Vector(vec![0.0]);
    let records = vec![
        record("a.jpg", vec![0.0]),
        record("b.jpg", vec![12.3f32.sqrt()]),
        record("c.jpg", vec![4.1f32.sqrt()]),
    ];

    let matches = retrieve_records("a.jpg", &query, Metric::SumSquaredDifferences, &records, 2)
        .expect("retrieval must succeed");
    assert_eq!(ids(&matches), vec!["c.jpg", "b.jpg"]);
    assert!((matches[0].score - 4.1).abs() < 1e-4);
    assert!((matches[1].score - 12.3).abs() < 1e-4);
}

#[test]
fn ties_keep_traversal_order() {
    let query = Descriptor::Vector(vec![0.0]);
    let records = vec![
        record("first", vec![5.0f32.sqrt()]),
        record("tie_a", vec![2.0f32.sqrt()]),
        record("tie_b", vec![-(2.0f32.sqrt())]),
        record("last", vec![3.0]),
    ];

    let matches = retrieve_records("query", &query, Metric::SumSquaredDifferences, &records, 10)
        .expect("retrieval must succeed");
    assert_eq!(ids(&matches), vec!["tie_a", "tie_b", "first", "last"]);
}

#[test]
fn descending_ties_keep_traversal_order() {
    let mut matches = vec![
        MatchResult {
            id: "a".to_string(),
            score: 0.5,
        },
        MatchResult {
            id: "b".to_string(),
            score: 0.9,
        },
        MatchResult {
            id: "c".to_string(),
            score: 0.5,
        },
    ];
    rank(&mut matches, Orientation::Descending, 10);
    assert_eq!(ids(&matches), vec!["b", "a", "c"]);
}

#[test]
fn top_n_bounds_output_length() {
    let query = ImageEntry::new("query.png", gray(100, 16));
    let candidates = || {
        (0..5u8)
            .map(|index| entry(&format!("c{index}.png"), gray(90 + index, 16)))
            .collect::<Vec<_>>()
    };

    let request = RetrievalRequest::new(&query, RetrievalMode::BaselinePatch, 0);
    assert!(retrieve(&request, candidates())
        .expect("retrieval must succeed")
        .is_empty());

    let request = RetrievalRequest::new(&query, RetrievalMode::BaselinePatch, 3);
    let matches = retrieve(&request, candidates()).expect("retrieval must succeed");
    assert_eq!(ids(&matches), vec!["c4.png", "c3.png", "c2.png"]);

    let request = RetrievalRequest::new(&query, RetrievalMode::BaselinePatch, 50);
    let matches = retrieve(&request, candidates()).expect("retrieval must succeed");
    assert_eq!(matches.len(), 5);
    assert!(matches
        .windows(2)
        .all(|pair| pair[0].score <= pair[1].score));
}

#[test]
fn undersized_and_undecodable_candidates_are_skipped() {
    let query = ImageEntry::new("query.png", gray(100, 16));
    let request = RetrievalRequest::new(&query, RetrievalMode::BaselinePatch, 10);
    let candidates = vec![
        entry("tiny.png", gray(100, 3)),
        Err(CandidateError {
            id: "broken.jpg".to_string(),
            error: DecodeError::Unreadable("truncated file".to_string()),
        }),
        entry("ok.png", gray(110, 16)),
    ];

    let report = retrieve_with_report(&request, candidates).expect("retrieval must succeed");
    assert_eq!(ids(&report.matches), vec!["ok.png"]);
    assert_eq!(report.scored, 1);
    let skipped: Vec<&str> = report.skipped.iter().map(|skip| skip.id.as_str()).collect();
    assert_eq!(skipped, vec!["tiny.png", "broken.jpg"]);
}

#[test]
fn unreadable_query_aborts() {
    let query = ImageEntry::new("query.png", gray(100, 4));
    let request = RetrievalRequest::new(&query, RetrievalMode::BaselinePatch, 10);
    let error = retrieve(&request, vec![entry("a.png", gray(1, 16))]).expect_err("must fail");
    assert!(matches!(
        error,
        RetrievalError::Query {
            error: ExtractError::Decode(DecodeError::TooSmall { .. }),
            ..
        }
    ));
}

#[test]
fn unknown_mode_is_rejected_before_extraction() {
    let query = ImageEntry::without_pixels("query.png");
    let error = RetrievalRequest::parse(&query, "gabor", 3).expect_err("must fail");
    assert!(matches!(error, RetrievalError::InvalidMode(_)));

    let request = RetrievalRequest::parse(&query, "hsv", 3).expect("mode must parse");
    assert_eq!(request.mode, RetrievalMode::Hsv);
}

#[test]
fn shape_mismatch_aborts_retrieval() {
    let query = Descriptor::Vector(vec![0.0; 49]);
    let records = vec![record("a", vec![0.0; 49]), record("b", vec![0.0; 48])];
    let error = retrieve_records("query", &query, Metric::SumSquaredDifferences, &records, 10)
        .expect_err("must fail");
    assert!(matches!(
        error,
        RetrievalError::Metric {
            error: MetricError::ShapeMismatch { .. },
            ..
        }
    ));
}

#[test]
fn deep_embedding_ranks_by_cosine_distance() {
    let store = EmbeddingStore::parse(
        "query.jpg,1,0,0\nsame_dir.jpg,0.9,0.1,0\northogonal.jpg,0,1,0\nclose.jpg,1,0.01,0\n",
    )
    .expect("store must parse");
    let query = ImageEntry::without_pixels("/images/query.jpg");
    let request = RetrievalRequest::new(&query, RetrievalMode::DeepEmbedding, 10).with_store(&store);
    let candidates = vec![
        Ok(ImageEntry::without_pixels("/images/orthogonal.jpg")),
        Ok(ImageEntry::without_pixels("/images/close.jpg")),
        Ok(ImageEntry::without_pixels("/images/missing.jpg")),
        Ok(ImageEntry::without_pixels("/images/same_dir.jpg")),
        Ok(ImageEntry::without_pixels("/images/query.jpg")),
    ];

    let report = retrieve_with_report(&request, candidates).expect("retrieval must succeed");
    assert_eq!(
        ids(&report.matches),
        vec![
            "/images/close.jpg",
            "/images/same_dir.jpg",
            "/images/orthogonal.jpg"
        ]
    );
    assert!((report.matches[2].score - 1.0).abs() < 1e-6);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].id, "/images/missing.jpg");
}

#[test]
fn deep_embedding_requires_store() {
    let query = ImageEntry::without_pixels("query.jpg");
    let request = RetrievalRequest::new(&query, RetrievalMode::DeepEmbedding, 10);
    let error = retrieve(&request, Vec::new()).expect_err("must fail");
    assert!(matches!(error, RetrievalError::MissingStore { .. }));
}

#[test]
fn color_texture_score_is_sum_of_components() {
    let query = ImageEntry::new("query.png", gradient(1, 24));
    let candidate = gradient(5, 24);
    let params = ExtractionParams::default();

    let color = histogram_intersection(
        &rg_chromaticity_histogram(query.image.as_ref().expect("pixels"), params.rg_bins())
            .expect("histogram"),
        &rg_chromaticity_histogram(&candidate, params.rg_bins()).expect("histogram"),
    )
    .expect("intersection");
    let texture = histogram_intersection(
        &texture_histogram(query.image.as_ref().expect("pixels"), params.texture_bins())
            .expect("histogram"),
        &texture_histogram(&candidate, params.texture_bins()).expect("histogram"),
    )
    .expect("intersection");

    let request = RetrievalRequest::new(&query, RetrievalMode::ColorTexture, 1);
    let matches = retrieve(&request, vec![entry("candidate.png", candidate)])
        .expect("retrieval must succeed");
    assert_eq!(matches.len(), 1);
    assert!((matches[0].score - (color + texture)).abs() < 1e-5);
}

#[test]
fn fused_mode_drops_candidate_from_every_family() {
    let store = EmbeddingStore::parse("query.png,1,0\nkept.png,1,1\n").expect("store must parse");
    let query = ImageEntry::new("query.png", gradient(2, 16));
    let request = RetrievalRequest::new(&query, RetrievalMode::ColorTextureDeepEmbedding, 10)
        .with_store(&store);
    let candidates = vec![
        entry("kept.png", gradient(3, 16)),
        entry("unlisted.png", gradient(4, 16)),
    ];

    let report = retrieve_with_report(&request, candidates).expect("retrieval must succeed");
    assert_eq!(ids(&report.matches), vec!["kept.png"]);
    assert_eq!(report.skipped[0].id, "unlisted.png");
}

#[test]
fn similarity_modes_rank_descending() {
    let query = ImageEntry::new("query.png", gradient(7, 20));
    let candidates = vec![
        entry("flat.png", gray(30, 20)),
        entry("twin.png", gradient(7, 20)),
        entry("other.png", gradient(40, 20)),
    ];

    for mode in [
        RetrievalMode::RgChromaticity,
        RetrievalMode::Hsv,
        RetrievalMode::RgHsv,
        RetrievalMode::ColorTexture,
    ] {
        let request = RetrievalRequest::new(&query, mode, 10);
        let matches = retrieve(&request, candidates.clone()).expect("retrieval must succeed");
        assert_eq!(matches[0].id, "twin.png", "mode={mode}");
        assert!(
            matches.windows(2).all(|pair| pair[0].score >= pair[1].score),
            "mode={mode}"
        );
    }
}

fn load_seed(seed: &u32) -> Result<ImageEntry, CandidateError> {
    if seed % 9 == 4 {
        return Err(CandidateError {
            id: format!("c{seed:02}.png"),
            error: DecodeError::Unreadable("truncated".to_string()),
        });
    }
    entry(&format!("c{seed:02}.png"), gradient(seed % 13, 20))
}

#[test]
fn parallel_matches_sequential() {
    let query = ImageEntry::new("query.png", gradient(11, 20));
    let seeds: Vec<u32> = (0..40).collect();

    for mode in [RetrievalMode::BaselinePatch, RetrievalMode::ColorTexture] {
        let request = RetrievalRequest::new(&query, mode, 15);
        let sequential = retrieve_with_report(&request, seeds.iter().map(load_seed))
            .expect("retrieval must succeed");
        let parallel =
            retrieve_parallel(&request, &seeds, load_seed).expect("retrieval must succeed");
        assert_eq!(sequential, parallel, "mode={mode}");
        assert_eq!(parallel.skipped.len(), 4, "mode={mode}");
    }
}

#[test]
fn parallel_loads_each_source_once_inside_the_pool() {
    use std::sync::atomic::{AtomicUsize, Ordering};

    let query = ImageEntry::new("query.png", gradient(3, 20));
    let seeds: Vec<u32> = (0..24).collect();
    let loads = AtomicUsize::new(0);

    let request = RetrievalRequest::new(&query, RetrievalMode::Hsv, 5);
    let report = retrieve_parallel(&request, &seeds, |seed| {
        loads.fetch_add(1, Ordering::Relaxed);
        load_seed(seed)
    })
    .expect("retrieval must succeed");

    assert_eq!(loads.load(Ordering::Relaxed), seeds.len());
    assert_eq!(report.matches.len(), 5);
    assert_eq!(report.scored + report.skipped.len(), seeds.len());
}
