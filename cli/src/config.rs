use std::path::PathBuf;

use anyhow::{Context, Result};
use cbir_core::extract::{
    DEFAULT_HSV_HUE_BINS, DEFAULT_HSV_SAT_BINS, DEFAULT_PATCH_SIZE, DEFAULT_RG_BINS,
    DEFAULT_TEXTURE_BINS,
};
use cbir_core::ExtractionParams;

use crate::env_utils::{parse_bool_env, parse_optional_path, parse_u32, parse_usize};

const DEFAULT_TOP_N: usize = 3;

#[derive(Debug, Clone)]
pub(crate) struct AppConfig {
    pub(crate) params: ExtractionParams,
    pub(crate) default_top_n: usize,
    pub(crate) recursive: bool,
    pub(crate) parallel: bool,
    pub(crate) embeddings_path: Option<PathBuf>,
}

impl AppConfig {
    pub(crate) fn from_env() -> Result<Self> {
        let patch_size = parse_u32("CBIR_PATCH_SIZE", DEFAULT_PATCH_SIZE)?;
        let rg_bins = parse_usize("CBIR_RG_BINS", DEFAULT_RG_BINS)?;
        let hsv_hue_bins = parse_usize("CBIR_HSV_HUE_BINS", DEFAULT_HSV_HUE_BINS)?;
        let hsv_sat_bins = parse_usize("CBIR_HSV_SAT_BINS", DEFAULT_HSV_SAT_BINS)?;
        let texture_bins = parse_usize("CBIR_TEXTURE_BINS", DEFAULT_TEXTURE_BINS)?;
        let default_top_n = parse_usize("CBIR_DEFAULT_TOP_N", DEFAULT_TOP_N)?;
        let recursive = parse_bool_env("CBIR_RECURSIVE", false)?;
        let parallel = parse_bool_env("CBIR_PARALLEL", false)?;
        let embeddings_path = parse_optional_path("CBIR_EMBEDDINGS_PATH")?;

        let params =
            ExtractionParams::new(patch_size, rg_bins, hsv_hue_bins, hsv_sat_bins, texture_bins)
                .context("invalid CBIR_* extraction settings")?;

        Ok(Self {
            params,
            default_top_n,
            recursive,
            parallel,
            embeddings_path,
        })
    }
}
