//! CSV export sink
//!
//! Writes four flat files into the output directory, every field quoted:
//! `posts.csv`, `post_dataset.csv` (the post-to-dataset link table),
//! `datasets.csv` and `attachments.csv`. Attachments are deduplicated
//! globally by content hash, first occurrence wins.

use crate::model::Harvest;
use chrono::NaiveDateTime;
use csv::{QuoteStyle, WriterBuilder};
use harvest_common::{HarvestError, Result};
use std::collections::HashSet;
use std::path::Path;
use tracing::info;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Write the whole harvest as CSV files under `out_dir`.
pub fn write(harvest: &Harvest, out_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(out_dir)?;

    write_posts(harvest, out_dir)?;
    write_links(harvest, out_dir)?;
    write_datasets(harvest, out_dir)?;
    write_attachments(harvest, out_dir)?;

    info!(
        posts = harvest.posts.len(),
        datasets = harvest.datasets.len(),
        out = %out_dir.display(),
        "CSV export complete"
    );
    Ok(())
}

fn writer(path: &Path) -> Result<csv::Writer<std::fs::File>> {
    WriterBuilder::new()
        .quote_style(QuoteStyle::Always)
        .from_path(path)
        .map_err(|e| HarvestError::Csv(e.to_string()))
}

fn finish(mut w: csv::Writer<std::fs::File>) -> Result<()> {
    w.flush()?;
    Ok(())
}

fn record<I, T>(w: &mut csv::Writer<std::fs::File>, fields: I) -> Result<()>
where
    I: IntoIterator<Item = T>,
    T: AsRef<[u8]>,
{
    w.write_record(fields)
        .map_err(|e| HarvestError::Csv(e.to_string()))
}

fn opt(value: &Option<String>) -> &str {
    value.as_deref().unwrap_or("")
}

fn naive_ts(value: &Option<NaiveDateTime>) -> String {
    value
        .map(|ts| ts.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_default()
}

fn write_posts(harvest: &Harvest, out_dir: &Path) -> Result<()> {
    let mut w = writer(&out_dir.join("posts.csv"))?;
    record(&mut w, ["id", "author_id", "created", "subject", "message"])?;
    for post in &harvest.posts {
        record(
            &mut w,
            [
                post.id.to_string(),
                post.author_id.to_string(),
                post.created.format(TIMESTAMP_FORMAT).to_string(),
                post.subject.clone(),
                post.message.clone(),
            ],
        )?;
    }
    finish(w)
}

fn write_links(harvest: &Harvest, out_dir: &Path) -> Result<()> {
    let mut w = writer(&out_dir.join("post_dataset.csv"))?;
    record(&mut w, ["post_id", "dataset_id"])?;
    for post in &harvest.posts {
        if let Some(dataset_id) = &post.dataset_id {
            record(&mut w, [post.id.to_string(), dataset_id.clone()])?;
        }
    }
    finish(w)
}

fn write_datasets(harvest: &Harvest, out_dir: &Path) -> Result<()> {
    let mut w = writer(&out_dir.join("datasets.csv"))?;
    record(
        &mut w,
        [
            "id",
            "title",
            "refresh_frequency",
            "theme",
            "description",
            "url",
            "state",
            "created",
            "modified",
            "is_open",
            "access_rights",
            "license_title",
            "license_url",
            "license_id",
            "publisher_id",
            "tags",
        ],
    )?;

    // HashMap order is arbitrary; sort for a reproducible export
    let mut datasets: Vec<_> = harvest.datasets.values().collect();
    datasets.sort_by(|a, b| a.id.cmp(&b.id));

    for d in datasets {
        record(
            &mut w,
            [
                d.id.clone(),
                opt(&d.title).to_string(),
                opt(&d.refresh_frequency).to_string(),
                opt(&d.theme).to_string(),
                opt(&d.description).to_string(),
                d.url.clone(),
                opt(&d.state).to_string(),
                naive_ts(&d.created),
                naive_ts(&d.modified),
                d.is_open.to_string(),
                opt(&d.access_rights).to_string(),
                opt(&d.license_title).to_string(),
                opt(&d.license_url).to_string(),
                opt(&d.license_id).to_string(),
                opt(&d.publisher_id).to_string(),
                d.tags.join(";"),
            ],
        )?;
    }
    finish(w)
}

fn write_attachments(harvest: &Harvest, out_dir: &Path) -> Result<()> {
    let mut w = writer(&out_dir.join("attachments.csv"))?;
    record(
        &mut w,
        ["post_id", "content_hash", "original_name", "mime_type", "created"],
    )?;

    // Global dedup by content hash: the first occurrence wins
    let mut seen: HashSet<&str> = HashSet::new();
    for a in &harvest.attachments {
        if !seen.insert(&a.content_hash) {
            continue;
        }
        record(
            &mut w,
            [
                a.post_id.to_string(),
                a.content_hash.clone(),
                a.original_name.clone(),
                a.mime_type.clone(),
                a.created.format(TIMESTAMP_FORMAT).to_string(),
            ],
        )?;
    }
    finish(w)
}
