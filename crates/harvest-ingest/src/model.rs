//! Domain records shared by every sink
//!
//! One struct per persisted entity, plus the [`Harvest`] accumulator that
//! collects records across a whole batch of archives. The accumulator is
//! owned by the caller and passed `&mut` into each per-archive processing
//! call, so dataset/publisher deduplication spans the entire run.

use chrono::{DateTime, NaiveDateTime, Utc};
use std::collections::HashMap;

/// One forum post. Immutable once built; posts whose catalog link fails
/// enrichment are never constructed in the first place.
#[derive(Debug, Clone)]
pub struct Post {
    /// Post id, unique within one archive (not globally)
    pub id: i64,
    pub author_id: i64,
    pub created: DateTime<Utc>,
    /// Normalized subject line
    pub subject: String,
    /// Sanitized HTML fragment (or display-sanitized HTML in export mode)
    pub message: String,
    /// Catalog dataset id this post links to; `None` only in export mode
    pub dataset_id: Option<String>,
}

/// Open-data catalog dataset, fetched once per unique slug.
#[derive(Debug, Clone)]
pub struct Dataset {
    pub id: String,
    pub title: Option<String>,
    pub refresh_frequency: Option<String>,
    pub theme: Option<String>,
    pub description: Option<String>,
    /// The dataset URL as it appeared in the post
    pub url: String,
    pub state: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub modified: Option<NaiveDateTime>,
    pub is_open: bool,
    pub access_rights: Option<String>,
    pub license_title: Option<String>,
    pub license_url: Option<String>,
    pub license_id: Option<String>,
    pub publisher_id: Option<String>,
    pub tags: Vec<String>,
}

/// Catalog publisher (CKAN organization), deduplicated by id.
#[derive(Debug, Clone)]
pub struct Publisher {
    pub id: String,
    pub name: Option<String>,
    pub description: Option<String>,
}

/// One downloadable resource of a dataset.
#[derive(Debug, Clone)]
pub struct Resource {
    pub id: String,
    pub dataset_id: String,
    pub available_through_api: bool,
    pub name: Option<String>,
    pub description: Option<String>,
    pub created: Option<NaiveDateTime>,
    pub last_modified: Option<NaiveDateTime>,
    pub format: Option<String>,
    pub mimetype: Option<String>,
    pub state: Option<String>,
    /// Size in bytes, never negative; 0 when the catalog omits it
    pub size: i64,
    pub url: Option<String>,
}

/// Binary blob attached to a post, addressed by content hash.
#[derive(Debug, Clone)]
pub struct Attachment {
    pub post_id: i64,
    pub content_hash: String,
    /// Normalized original filename
    pub original_name: String,
    pub mime_type: String,
    pub created: DateTime<Utc>,
}

/// Batch accumulator, alive for one whole run.
///
/// `datasets` is keyed by catalog slug rather than dataset id: the map
/// doubles as the enrichment cache, so a slug seen in a later archive
/// reuses the already-fetched dataset without a new remote call.
#[derive(Debug, Default)]
pub struct Harvest {
    pub datasets: HashMap<String, Dataset>,
    pub publishers: HashMap<String, Publisher>,
    pub resources: Vec<Resource>,
    pub posts: Vec<Post>,
    pub attachments: Vec<Attachment>,
}

impl Harvest {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached dataset id for a slug, if this run has already enriched it.
    pub fn dataset_id_for_slug(&self, slug: &str) -> Option<&str> {
        self.datasets.get(slug).map(|d| d.id.as_str())
    }

    /// Record a publisher unless one with the same id is already known.
    pub fn add_publisher(&mut self, publisher: Publisher) {
        self.publishers
            .entry(publisher.id.clone())
            .or_insert(publisher);
    }
}
