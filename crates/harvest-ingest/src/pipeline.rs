//! Batch orchestration
//!
//! Resolves the input path to a list of `.mbz` archives and processes
//! them strictly sequentially: unpack into the scratch directory, walk
//! the forum and file manifests, clear the scratch, move on. The
//! accumulated [`Harvest`] is handed to exactly one sink at the end.
//!
//! An archive without a forum activity is logged and skipped; every
//! other failure aborts the run. Nothing is ever retried.

use crate::catalog::CatalogClient;
use crate::files::ImageMap;
use crate::model::Harvest;
use crate::{archive, files, forum, sink};
use anyhow::Context;
use harvest_common::{HarvestError, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use tracing::{error, info};

/// Default scratch directory archives are extracted into, cleared after
/// every archive.
pub const DEFAULT_SCRATCH_DIR: &str = "./extracted_mbz";

/// Resolve the input path to the archives of this run: either a single
/// `.mbz` file or every `.mbz` inside a directory (sorted by name).
pub fn collect_archives(input: &Path) -> Result<Vec<PathBuf>> {
    if !input.exists() {
        return Err(HarvestError::invalid_archive(input, "path does not exist"));
    }

    if input.is_dir() {
        let mut archives: Vec<PathBuf> = std::fs::read_dir(input)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .extension()
                        .map(|ext| ext.eq_ignore_ascii_case("mbz"))
                        .unwrap_or(false)
            })
            .collect();
        archives.sort();
        return Ok(archives);
    }

    let is_mbz = input
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("mbz"))
        .unwrap_or(false);
    if !is_mbz {
        return Err(HarvestError::invalid_archive(
            input,
            "input must be a .mbz file or a directory of .mbz files",
        ));
    }
    Ok(vec![input.to_path_buf()])
}

/// Unpack one archive and harvest its discussions and attachments with
/// catalog enrichment. `blob_dest` receives the attachment blobs (CSV
/// mode); the database mode passes `None`.
async fn process_enriched(
    mbz: &Path,
    scratch: &Path,
    catalog: &CatalogClient,
    harvest: &mut Harvest,
    blob_dest: Option<&Path>,
) -> Result<()> {
    let result: Result<()> = async {
        archive::unpack(mbz, scratch)?;
        let retained =
            forum::harvest_discussions(&scratch.join("activities"), Some(catalog), harvest).await?;
        let attachments = files::extract_attachments(&scratch.join("files.xml"), &retained)?;
        if let Some(dest) = blob_dest {
            files::copy_blobs(scratch, &attachments, dest)?;
        }
        harvest.attachments.extend(attachments);
        Ok(())
    }
    .await;

    // The scratch directory must never leak state into the next archive,
    // whether extraction or processing failed partway or not
    let cleanup = archive::clear_scratch(scratch);
    result?;
    cleanup
}

/// Unpack one archive for the static HTML export: no enrichment, every
/// post retained, embedded images copied out while the scratch exists.
async fn process_export(
    mbz: &Path,
    scratch: &Path,
    harvest: &mut Harvest,
    images: &mut ImageMap,
    out_dir: &Path,
) -> Result<()> {
    let result: Result<()> = async {
        archive::unpack(mbz, scratch)?;
        files::map_post_images(
            &scratch.join("files.xml"),
            scratch,
            &out_dir.join("images"),
            &out_dir.join("html"),
            images,
        )?;
        forum::harvest_discussions(&scratch.join("activities"), None, harvest).await?;
        Ok(())
    }
    .await;

    let cleanup = archive::clear_scratch(scratch);
    result?;
    cleanup
}

/// Run the pipeline into the relational sink.
pub async fn run_database(
    input: &Path,
    scratch: &Path,
    database_url: &str,
    catalog_url: &str,
) -> anyhow::Result<()> {
    let catalog = CatalogClient::new(catalog_url)?;
    let mut harvest = Harvest::new();
    harvest_batch(input, scratch, &catalog, &mut harvest, None).await?;

    let db = sink::database::DatabaseSink::connect(database_url)
        .await
        .context("Failed to connect to the database")?;
    db.create_tables().await?;
    db.store(&harvest).await?;
    db.close().await;
    Ok(())
}

/// Run the pipeline into the CSV sink.
pub async fn run_csv(
    input: &Path,
    scratch: &Path,
    output: &Path,
    catalog_url: &str,
) -> anyhow::Result<()> {
    let catalog = CatalogClient::new(catalog_url)?;
    let mut harvest = Harvest::new();
    let blob_dest = output.join("files");
    harvest_batch(input, scratch, &catalog, &mut harvest, Some(&blob_dest)).await?;

    sink::csv::write(&harvest, output)?;
    Ok(())
}

/// Run the pipeline into the static HTML sink.
pub async fn run_html(input: &Path, scratch: &Path, output: &Path) -> anyhow::Result<()> {
    let archives = collect_archives(input)?;
    info!(archives = archives.len(), "Starting HTML export");

    let mut harvest = Harvest::new();
    let mut images = ImageMap::new();
    let progress = batch_progress(archives.len())?;

    for mbz in &archives {
        info!(archive = %mbz.display(), "Processing backup");
        match process_export(mbz, scratch, &mut harvest, &mut images, output).await {
            Ok(()) => {},
            Err(HarvestError::ForumNotFound(path)) => {
                error!(archive = %mbz.display(), path = %path.display(), "No forum activity, skipping archive");
            },
            Err(e) => return Err(e.into()),
        }
        progress.inc(1);
    }
    progress.finish_with_message("archives processed");

    sink::html::render(&harvest.posts, &images, output)?;
    Ok(())
}

/// Shared enriching batch loop for the database and CSV modes.
async fn harvest_batch(
    input: &Path,
    scratch: &Path,
    catalog: &CatalogClient,
    harvest: &mut Harvest,
    blob_dest: Option<&Path>,
) -> anyhow::Result<()> {
    let archives = collect_archives(input)?;
    info!(archives = archives.len(), "Starting harvest");

    let progress = batch_progress(archives.len())?;
    for mbz in &archives {
        info!(archive = %mbz.display(), "Processing backup");
        match process_enriched(mbz, scratch, catalog, harvest, blob_dest).await {
            Ok(()) => {},
            Err(HarvestError::ForumNotFound(path)) => {
                error!(archive = %mbz.display(), path = %path.display(), "No forum activity, skipping archive");
            },
            Err(e) => return Err(e.into()),
        }
        progress.inc(1);
    }
    progress.finish_with_message("archives processed");

    info!(
        posts = harvest.posts.len(),
        datasets = harvest.datasets.len(),
        attachments = harvest.attachments.len(),
        "Harvest complete"
    );
    Ok(())
}

fn batch_progress(len: usize) -> anyhow::Result<ProgressBar> {
    let pb = ProgressBar::new(len as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")?
            .progress_chars("#>-"),
    );
    Ok(pb)
}
