#![forbid(unsafe_code)]
//! `cbir` command-line harness.
//!
//! Commands:
//! - `search`: rank a directory of images against a query image
//! - `extract`: write center-patch descriptors of a directory to a CSV store
//! - `match`: rank stored descriptors against a query image

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;
mod env_utils;
mod output;
mod source;

use crate::config::AppConfig;

#[derive(Parser, Debug)]
#[command(name = "cbir")]
#[command(about = "Content-based image retrieval harness")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Rank the images of a directory by similarity to a query image
    Search {
        /// Query image
        query: PathBuf,

        /// Directory holding the candidate images
        dir: PathBuf,

        /// Retrieval mode
        #[arg(short, long, default_value = "baseline-patch")]
        mode: String,

        /// Number of matches to report (defaults to CBIR_DEFAULT_TOP_N)
        #[arg(short = 'n', long)]
        top_n: Option<usize>,

        /// Embedding store CSV for deep-embedding modes
        #[arg(short, long)]
        embeddings: Option<PathBuf>,

        /// Print matches as JSON
        #[arg(long)]
        json: bool,

        /// Score candidates on the rayon pool
        #[arg(long)]
        parallel: bool,
    },

    /// Write center-patch descriptors of every image in a directory
    Extract {
        /// Directory holding the images
        dir: PathBuf,

        /// Output CSV store
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rank stored center-patch descriptors against a query image
    Match {
        /// Query image
        query: PathBuf,

        /// CSV store written by `extract`
        #[arg(short, long)]
        features: PathBuf,

        /// Number of matches to report (defaults to CBIR_DEFAULT_TOP_N)
        #[arg(short = 'n', long)]
        top_n: Option<usize>,

        /// Print matches as JSON
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = AppConfig::from_env().context("invalid configuration")?;

    match cli.command {
        Commands::Search {
            query,
            dir,
            mode,
            top_n,
            embeddings,
            json,
            parallel,
        } => commands::search(
            &config,
            commands::SearchArgs {
                query,
                dir,
                mode,
                top_n: top_n.unwrap_or(config.default_top_n),
                embeddings: embeddings.or_else(|| config.embeddings_path.clone()),
                json,
                parallel: parallel || config.parallel,
            },
        ),
        Commands::Extract { dir, output } => commands::extract(&config, &dir, &output),
        Commands::Match {
            query,
            features,
            top_n,
            json,
        } => commands::match_features(
            &config,
            &query,
            &features,
            top_n.unwrap_or(config.default_top_n),
            json,
        ),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();
}
