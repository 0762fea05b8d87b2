//! directory-iiif - Publish OCR'd trade directories as IIIF annotations
//!
//! Re-projects OCR boxes from the normalised raster onto the image server's
//! canvases, then assembles annotation pages, manifests and collections.

mod annotate;
mod batch;
mod canvas;
mod config;
mod error;
mod geometry;
mod iiif;
mod ocr;
mod storage;
mod transform;
mod vision;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::annotate::{AnnotateJob, DirectoryAnnotator};
use crate::batch::{BatchOptions, BatchRunner, Catalog};
use crate::config::AppConfig;
use crate::transform::{DirectoryTransformer, TransformJob};

/// directory-iiif - OCR to IIIF publication pipeline
#[derive(Parser, Debug)]
#[command(name = "directory-iiif")]
#[command(about = "Transform OCR'd directory pages into IIIF annotations")]
struct Args {
    /// Configuration file (defaults to the user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging unless RUST_LOG says otherwise
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Re-project OCR boxes onto the image server canvases
    Transform {
        ark: String,
        input_dir: PathBuf,
        pdf: PathBuf,
        /// Image server view minus PDF view
        #[arg(allow_negative_numbers = true)]
        diff: i64,
        output_dir: PathBuf,
        /// Read skew angles from `<N>-manifest.json` files instead of the PDF
        #[arg(long)]
        manifest_in: Option<PathBuf>,
        /// Save `<N>.json` angle and ratio files here
        #[arg(long)]
        manifest_out: Option<PathBuf>,
    },
    /// Build annotation pages and the manifest of one directory
    Annotate {
        name: String,
        ark: String,
        input_dir: PathBuf,
        #[arg(allow_negative_numbers = true)]
        diff: i64,
        output_root: PathBuf,
    },
    /// Run every selected directory of a catalog
    Batch {
        catalog: PathBuf,
        /// Stop after the coordinate transform
        #[arg(long)]
        only_transform: bool,
        /// Rebuild annotations already published
        #[arg(long)]
        force: bool,
    },
    /// Write the collection hierarchy of a catalog
    Collection {
        catalog: PathBuf,
        /// Overrides the catalog's output root
        output_root: Option<PathBuf>,
    },
    /// Manage the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Write the default configuration
    Init {
        /// Replace an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose {
        "directory_iiif=debug"
    } else {
        "directory_iiif=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    if let Command::Config { action } = &args.command {
        return run_config(action, args.config.as_deref());
    }

    let config = config::resolve_config(args.config.as_deref())?;
    let provider = canvas::provider_from_config(&config.provider, || storage::get_cache_dir().ok());

    match args.command {
        Command::Transform {
            ark,
            input_dir,
            pdf,
            diff,
            output_dir,
            manifest_in,
            manifest_out,
        } => {
            let job = TransformJob {
                ark,
                input_dir,
                pdf: Some(pdf),
                diff,
                output_dir,
                manifest_in,
                manifest_out,
            };
            let report = DirectoryTransformer::new(&config.transform, &config.provider.base, provider.as_ref())
                .run(&job)
                .with_context(|| format!("Transform of {} failed", job.ark))?;
            info!(
                "Transformed {} pages, {} skipped",
                report.written.len(),
                report.skipped.len()
            );
        }
        Command::Annotate {
            name,
            ark,
            input_dir,
            diff,
            output_root,
        } => {
            let job = AnnotateJob {
                name,
                ark,
                input_dir,
                diff,
                output_root,
            };
            let report = DirectoryAnnotator::new(&config, provider.as_ref())
                .run(&job)
                .with_context(|| format!("Annotation of {} failed", job.name))?;
            info!("Manifest written to {}", report.manifest.display());
        }
        Command::Batch {
            catalog,
            only_transform,
            force,
        } => {
            let catalog = Catalog::load(&catalog)?;
            let options = BatchOptions {
                only_transform,
                force,
            };
            BatchRunner::new(&config, provider.as_ref()).run(&catalog, options);
        }
        Command::Collection {
            catalog,
            output_root,
        } => {
            let mut catalog = Catalog::load(&catalog)?;
            if let Some(root) = output_root {
                catalog.paths.output_root = root;
            }
            batch::collection::write_collections(&catalog, &config)
                .context("Failed to write collections")?;
        }
        Command::Config { .. } => {}
    }

    Ok(())
}

fn run_config(action: &ConfigAction, explicit: Option<&std::path::Path>) -> Result<()> {
    match action {
        ConfigAction::Init { force } => {
            let path = match explicit {
                Some(path) => path.to_path_buf(),
                None => config::default_config_path()?,
            };
            if path.exists() && !force {
                anyhow::bail!("{} already exists, use --force to replace it", path.display());
            }
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
            config::save_config(&AppConfig::default(), &path)?;
            info!("Wrote default configuration to {:?}", path);
        }
        ConfigAction::Show => {
            let config = config::resolve_config(explicit)?;
            println!("{}", toml::to_string_pretty(&config)?);
        }
    }
    Ok(())
}
