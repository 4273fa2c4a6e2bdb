use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use cbir_core::{
    append_record, center_patch, embedding_key, retrieve_parallel, retrieve_records,
    retrieve_with_report, CandidateRecord, Descriptor, EmbeddingStore, ImageEntry, MatchResult,
    Metric, RetrievalMode, RetrievalReport, RetrievalRequest, StoreError,
};

use crate::config::AppConfig;
use crate::output::print_matches;
use crate::source::{identifier, list_images, load_entry};

#[derive(Debug, Clone)]
pub(crate) struct SearchArgs {
    pub(crate) query: PathBuf,
    pub(crate) dir: PathBuf,
    pub(crate) mode: String,
    pub(crate) top_n: usize,
    pub(crate) embeddings: Option<PathBuf>,
    pub(crate) json: bool,
    pub(crate) parallel: bool,
}

pub(crate) fn search(config: &AppConfig, args: SearchArgs) -> Result<()> {
    let report = run_search(config, &args)?;
    print_matches(&report.matches, args.json)
}

pub(crate) fn run_search(config: &AppConfig, args: &SearchArgs) -> Result<RetrievalReport> {
    // Mode first: an unknown name must fail before anything is decoded.
    let mode = args.mode.parse::<RetrievalMode>()?;
    let needs_pixels = mode.needs_pixels();

    let store = if mode.needs_store() {
        let path = args.embeddings.as_deref().with_context(|| {
            format!("mode '{mode}' requires --embeddings or CBIR_EMBEDDINGS_PATH")
        })?;
        Some(load_store(path)?)
    } else {
        None
    };

    let query = load_query(&args.query, needs_pixels)?;
    let paths = list_images(&args.dir, config.recursive)?;

    let mut request = RetrievalRequest::new(&query, mode, args.top_n).with_params(config.params);
    if let Some(store) = store.as_ref() {
        request = request.with_store(store);
    }

    let outcome = if args.parallel {
        retrieve_parallel(&request, &paths, |path| load_entry(path, needs_pixels))
    } else {
        retrieve_with_report(
            &request,
            paths.iter().map(|path| load_entry(path, needs_pixels)),
        )
    };
    let report =
        outcome.with_context(|| format!("retrieval failed for {}", args.query.display()))?;

    tracing::info!(
        mode = %mode,
        fused = mode.is_fused(),
        parallel = args.parallel,
        candidates = paths.len(),
        scored = report.scored,
        excluded_self = report.excluded_self,
        skipped = report.skipped.len(),
        returned = report.matches.len(),
        "search finished"
    );
    Ok(report)
}

pub(crate) fn extract(config: &AppConfig, dir: &Path, output: &Path) -> Result<()> {
    let written = run_extract(config, dir, output)?;
    tracing::info!(written, output = %output.display(), "descriptors written");
    Ok(())
}

/// Writes one center-patch record per decodable image, in traversal order,
/// keyed by base filename. Returns the number of records written.
pub(crate) fn run_extract(config: &AppConfig, dir: &Path, output: &Path) -> Result<usize> {
    let paths = list_images(dir, config.recursive)?;

    if let Some(parent) = output.parent().filter(|parent| !parent.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(output, "").with_context(|| format!("failed to truncate {}", output.display()))?;

    let mut keys = BTreeSet::new();
    for path in &paths {
        let entry = match load_entry(path, true) {
            Ok(entry) => entry,
            Err(error) => {
                tracing::warn!(candidate = %error.id, error = %error.error, "skipping image");
                continue;
            }
        };
        let key = embedding_key(&entry.id);
        if keys.contains(key) {
            tracing::warn!(candidate = %entry.id, key, "skipping image with duplicate file name");
            continue;
        }
        let Some(image) = entry.image.as_ref() else {
            continue;
        };
        let values = match center_patch(image, config.params.patch_size()) {
            Ok(values) => values,
            Err(error) => {
                tracing::warn!(candidate = %entry.id, %error, "skipping image");
                continue;
            }
        };

        match append_record(output, key, &values) {
            Ok(()) => {
                keys.insert(key.to_string());
            }
            Err(error @ StoreError::InvalidKey { .. }) => {
                tracing::warn!(candidate = %entry.id, %error, "skipping image");
            }
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to write record for {}", entry.id));
            }
        }
    }
    Ok(keys.len())
}

pub(crate) fn match_features(
    config: &AppConfig,
    query: &Path,
    features: &Path,
    top_n: usize,
    json: bool,
) -> Result<()> {
    let matches = run_match(config, query, features, top_n)?;
    print_matches(&matches, json)
}

/// Ranks stored center-patch descriptors by SSD against `query`. The query
/// is excluded by its base filename, the key `extract` writes.
pub(crate) fn run_match(
    config: &AppConfig,
    query: &Path,
    features: &Path,
    top_n: usize,
) -> Result<Vec<MatchResult>> {
    let store = load_store(features)?;
    let entry = load_query(query, true)?;
    let image = entry
        .image
        .as_ref()
        .with_context(|| format!("query {} has no pixels", entry.id))?;
    let descriptor = Descriptor::Vector(
        center_patch(image, config.params.patch_size())
            .with_context(|| format!("query {}", entry.id))?,
    );

    let records: Vec<CandidateRecord> = store
        .iter()
        .map(|(key, values)| CandidateRecord {
            id: key.to_string(),
            descriptor: Descriptor::Vector(values.to_vec()),
        })
        .collect();

    let matches = retrieve_records(
        embedding_key(&entry.id),
        &descriptor,
        Metric::SumSquaredDifferences,
        &records,
        top_n,
    )
    .with_context(|| format!("matching against {} failed", features.display()))?;

    tracing::info!(
        records = records.len(),
        returned = matches.len(),
        "match finished"
    );
    Ok(matches)
}

fn load_store(path: &Path) -> Result<EmbeddingStore> {
    let store = EmbeddingStore::load(path)
        .with_context(|| format!("failed to load descriptor store {}", path.display()))?;
    tracing::debug!(
        path = %path.display(),
        entries = store.len(),
        dimension = store.dimension(),
        "descriptor store loaded"
    );
    Ok(store)
}

fn load_query(path: &Path, needs_pixels: bool) -> Result<ImageEntry> {
    load_entry(path, needs_pixels).map_err(|error| {
        anyhow::anyhow!("failed to read query {}: {}", identifier(path), error.error)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbir_core::ExtractionParams;
    use image::{Rgb, RgbImage};

    fn test_config() -> AppConfig {
        AppConfig {
            params: ExtractionParams::default(),
            default_top_n: 3,
            recursive: false,
            parallel: false,
            embeddings_path: None,
        }
    }

    fn write_solid(dir: &Path, name: &str, level: u8) -> PathBuf {
        let path = dir.join(name);
        RgbImage::from_pixel(9, 9, Rgb([level, level, level]))
            .save(&path)
            .expect("png must be written");
        path
    }

    fn args(query: &Path, dir: &Path, mode: &str, top_n: usize) -> SearchArgs {
        SearchArgs {
            query: query.to_path_buf(),
            dir: dir.to_path_buf(),
            mode: mode.to_string(),
            top_n,
            embeddings: None,
            json: false,
            parallel: false,
        }
    }

    #[test]
    fn search_excludes_query_and_ranks_by_ssd() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let query = write_solid(dir.path(), "a.png", 100);
        let near = write_solid(dir.path(), "b.png", 101);
        let far = write_solid(dir.path(), "c.png", 140);

        let report = run_search(&test_config(), &args(&query, dir.path(), "baseline-patch", 5))
            .expect("search must succeed");

        assert_eq!(report.excluded_self, 1);
        let ids: Vec<_> = report.matches.iter().map(|m| m.id.clone()).collect();
        assert_eq!(ids, vec![identifier(&near), identifier(&far)]);
        assert_eq!(report.matches[0].score, 49.0);
    }

    #[test]
    fn search_skips_undecodable_files_and_parallel_agrees() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let query = write_solid(dir.path(), "a.png", 10);
        write_solid(dir.path(), "b.png", 20);
        write_solid(dir.path(), "c.png", 30);
        fs::write(dir.path().join("broken.jpg"), b"nope").expect("file must be written");

        let sequential = run_search(&test_config(), &args(&query, dir.path(), "hsv", 10))
            .expect("search must succeed");
        assert_eq!(sequential.skipped.len(), 1);
        assert_eq!(sequential.matches.len(), 2);

        let mut parallel_args = args(&query, dir.path(), "hsv", 10);
        parallel_args.parallel = true;
        let parallel =
            run_search(&test_config(), &parallel_args).expect("search must succeed");
        assert_eq!(parallel, sequential);
    }

    #[test]
    fn search_rejects_unknown_mode_before_reading_images() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let missing = dir.path().join("missing.png");

        let error = run_search(&test_config(), &args(&missing, dir.path(), "sift", 3))
            .expect_err("must fail");
        assert!(error.to_string().contains("unknown retrieval mode 'sift'"));
    }

    #[test]
    fn deep_embedding_search_requires_store() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let query = write_solid(dir.path(), "a.png", 10);

        let error = run_search(&test_config(), &args(&query, dir.path(), "deep-embedding", 3))
            .expect_err("must fail");
        assert!(error.to_string().contains("--embeddings"));
    }

    #[test]
    fn deep_embedding_search_reads_store_without_pixels() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let images = dir.path().join("images");
        fs::create_dir(&images).expect("dir must be created");
        let query = images.join("a.jpg");
        for name in ["a.jpg", "b.jpg", "c.jpg"] {
            // contents are never decoded in this mode
            fs::write(images.join(name), b"raw").expect("file must be written");
        }
        let store = dir.path().join("resnet.csv");
        fs::write(&store, "a.jpg,1,0\nb.jpg,0,1\nc.jpg,1,0.1\n").expect("store must be written");

        let mut search = args(&query, &images, "deep-embedding", 3);
        search.embeddings = Some(store);
        let report = run_search(&test_config(), &search).expect("search must succeed");

        let ids: Vec<_> = report.matches.iter().map(|m| m.id.clone()).collect();
        assert_eq!(
            ids,
            vec![identifier(&images.join("c.jpg")), identifier(&images.join("b.jpg"))]
        );
    }

    #[test]
    fn extract_then_match_round_trips() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let images = dir.path().join("images");
        fs::create_dir(&images).expect("dir must be created");
        let query = write_solid(&images, "a.png", 50);
        write_solid(&images, "b.png", 52);
        write_solid(&images, "c.png", 90);
        RgbImage::new(3, 3)
            .save(images.join("tiny.png"))
            .expect("png must be written");

        let features = dir.path().join("out").join("features.csv");
        let written =
            run_extract(&test_config(), &images, &features).expect("extract must succeed");
        assert_eq!(written, 3);

        // a second run truncates rather than appending duplicates
        let written =
            run_extract(&test_config(), &images, &features).expect("extract must succeed");
        assert_eq!(written, 3);
        let store = EmbeddingStore::load(&features).expect("store must load");
        assert_eq!(store.len(), 3);
        assert_eq!(store.dimension(), 49);

        let matches =
            run_match(&test_config(), &query, &features, 1).expect("match must succeed");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].id, "b.png");
        assert_eq!(matches[0].score, 4.0 * 49.0);
    }

    #[test]
    fn extract_keys_records_by_base_filename() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let images = dir.path().join("images");
        fs::create_dir(&images).expect("dir must be created");
        write_solid(&images, "a.png", 10);

        let features = dir.path().join("features.csv");
        run_extract(&test_config(), &images, &features).expect("extract must succeed");

        let store = EmbeddingStore::load(&features).expect("store must load");
        let keys: Vec<_> = store.iter().map(|(key, _)| key.to_string()).collect();
        assert_eq!(keys, vec!["a.png"]);
    }

    #[test]
    fn extract_skips_unwritable_names_and_keeps_going() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let images = dir.path().join("images");
        fs::create_dir(&images).expect("dir must be created");
        write_solid(&images, "a,b.png", 10);
        write_solid(&images, "c.png", 20);

        let features = dir.path().join("features.csv");
        let written =
            run_extract(&test_config(), &images, &features).expect("extract must succeed");
        assert_eq!(written, 1);

        let store = EmbeddingStore::load(&features).expect("store must load");
        let keys: Vec<_> = store.iter().map(|(key, _)| key.to_string()).collect();
        assert_eq!(keys, vec!["c.png"]);
    }

    #[test]
    fn extract_skips_duplicate_file_names_when_recursive() {
        let dir = tempfile::tempdir().expect("tempdir must be created");
        let images = dir.path().join("images");
        let nested = images.join("nested");
        fs::create_dir_all(&nested).expect("dirs must be created");
        write_solid(&images, "a.png", 10);
        write_solid(&nested, "a.png", 200);

        let mut config = test_config();
        config.recursive = true;
        let features = dir.path().join("features.csv");
        let written = run_extract(&config, &images, &features).expect("extract must succeed");
        assert_eq!(written, 1);

        let store = EmbeddingStore::load(&features).expect("store must load");
        assert_eq!(store.get("a.png").map(|values| values[0]), Some(10.0));
    }
}
