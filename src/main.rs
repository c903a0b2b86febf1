use std::{collections::HashSet, fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};

use faceforge_controller::{desktop::DesktopController, Controller};
use faceforge_core::{
    catalog::Catalog,
    detector::FaceDetector,
    facedata::FaceDataSet,
    resource::AssetStore,
    runner::{EnhanceRunner, RunConfig},
    search::{collection_id_for_source, FaceSearch, HttpFaceSearch},
    Session,
};

#[derive(Parser)]
#[command(name = "faceforge", version, about = "Drives a face-editing app through an Android emulator window")]
struct Cli {
    /// Dump annotated screenshots and make every enhancement certain.
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk the shared-folder gallery and enhance every recognized face.
    Enhance {
        /// Directory of source portraits; its basename names the collection.
        #[arg(long)]
        source: PathBuf,

        /// Output root; each run writes into a timestamped subdirectory.
        #[arg(long)]
        output: PathBuf,

        /// Directory of per-face attribute JSON records.
        #[arg(long)]
        facedata: PathBuf,

        /// Directory of reference images.
        #[arg(long, default_value = "assets")]
        assets: PathBuf,

        /// SeetaFace frontal detection model.
        #[arg(long, default_value = "assets/seeta_fd_frontal_v1.0.bin")]
        model: PathBuf,

        /// Base URL of the face search service.
        #[arg(long, default_value = "http://127.0.0.1:7000")]
        search_url: String,

        /// Emulator window to attach to, matched against app name and title.
        #[arg(long, default_value = "BlueStacks")]
        app: String,

        /// Optional TOML catalog overriding the built-in enhancement table.
        #[arg(long)]
        catalog: Option<PathBuf>,

        /// Stop after this many gallery sets (0 = run until exhausted).
        #[arg(long, default_value_t = 0)]
        max_iterations: u32,

        /// Stop after this many recorded outcomes (0 = no cap).
        #[arg(long, default_value_t = 0)]
        limit: u32,
    },
    /// Index the source portraits into the face search collection.
    Index {
        #[arg(long)]
        source: PathBuf,

        #[arg(long, default_value = "http://127.0.0.1:7000")]
        search_url: String,

        /// Re-index images that are already in the collection.
        #[arg(long)]
        overwrite: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .init();

    match cli.command {
        Commands::Enhance {
            source,
            output,
            facedata,
            assets,
            model,
            search_url,
            app,
            catalog,
            max_iterations,
            limit,
        } => enhance(
            cli.debug,
            source,
            output,
            facedata,
            assets,
            model,
            search_url,
            app,
            catalog,
            max_iterations,
            limit,
        ),
        Commands::Index {
            source,
            search_url,
            overwrite,
        } => index(source, search_url, overwrite),
    }
}

#[allow(clippy::too_many_arguments)]
fn enhance(
    debug: bool,
    source: PathBuf,
    output: PathBuf,
    facedata: PathBuf,
    assets: PathBuf,
    model: PathBuf,
    search_url: String,
    app: String,
    catalog_path: Option<PathBuf>,
    max_iterations: u32,
    limit: u32,
) -> Result<()> {
    let controller = DesktopController::connect(&app)
        .with_context(|| format!("attaching to `{app}`"))?;
    let (width, height) = controller.screen_size();
    info!("attached to {app} at {width}x{height}");

    let mut session = Session::new(Box::new(controller), AssetStore::new(&assets));
    if debug {
        session = session.with_debug_dir(&output);
    }

    let mut catalog = match &catalog_path {
        Some(path) => Catalog::load(path)?,
        None => Catalog::default(),
    };
    if debug {
        catalog = catalog.force_certain();
    }

    let detector = FaceDetector::from_model_file(&model)
        .with_context(|| format!("loading detection model {}", model.display()))?;
    let search = HttpFaceSearch::new(search_url);
    let facedata = FaceDataSet::load(&facedata)?;
    info!("loaded {} face records", facedata.len());
    if facedata.is_empty() {
        warn!("no face records loaded; every identified face will be skipped");
    }

    let mut config = RunConfig::new(source, output);
    config.max_iterations = max_iterations;
    config.limit = limit;

    let mut runner = EnhanceRunner::new(session, detector, search, facedata, catalog, config);
    runner.run()?;
    Ok(())
}

fn index(source: PathBuf, search_url: String, overwrite: bool) -> Result<()> {
    let search = HttpFaceSearch::new(search_url);
    let collection = collection_id_for_source(&source);
    search.ensure_collection(&collection)?;

    let existing: HashSet<String> = if overwrite {
        HashSet::new()
    } else {
        search
            .list_external_ids(&collection)?
            .into_iter()
            .collect()
    };
    info!("{} faces already indexed in {collection}", existing.len());

    let mut paths: Vec<PathBuf> = fs::read_dir(&source)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            matches!(
                path.extension().and_then(|s| s.to_str()),
                Some("jpeg") | Some("jpg")
            )
        })
        .collect();
    paths.sort();

    let mut indexed = 0usize;
    for path in &paths {
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if existing.contains(stem) {
            continue;
        }
        let bytes = fs::read(path)?;
        let summary = search.index_face(&collection, stem, &bytes)?;
        if summary.indexed == 0 {
            warn!("{stem}: no face accepted ({} rejected)", summary.unindexed);
        } else {
            info!(
                "{stem}: indexed {} face(s), {} rejected",
                summary.indexed, summary.unindexed
            );
        }
        indexed += 1;
    }
    info!(
        "indexing complete: {indexed} new, {} skipped",
        paths.len() - indexed
    );
    Ok(())
}
