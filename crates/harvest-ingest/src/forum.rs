//! Discussion-forum extraction
//!
//! Walks the `forum.xml` manifest inside an extracted backup and emits one
//! [`Post`] per `discussion/post` element. In enriching mode (database and
//! CSV sinks) a post is kept only when it links a catalog dataset and that
//! dataset resolves; in export mode (static HTML) every post is kept as-is
//! and no remote calls happen.

use crate::catalog::CatalogClient;
use crate::model::{Harvest, Post};
use crate::sanitize::{self, SanitizeMode};
use crate::text;
use chrono::{DateTime, Utc};
use harvest_common::{HarvestError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A post as it appears in the manifest, before sanitization/enrichment.
#[derive(Debug, Clone)]
pub struct RawPost {
    pub id: i64,
    pub author_id: i64,
    pub created: DateTime<Utc>,
    pub subject: String,
    /// Message HTML exactly as stored (XML-unescaped once)
    pub message: String,
}

/// Locate the forum activity directory under `activities/`.
///
/// A course backup contains exactly one forum activity subdirectory with a
/// `forum.xml` manifest; none at all is [`HarvestError::ForumNotFound`].
pub fn find_forum_xml(activities_dir: &Path) -> Result<PathBuf> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(activities_dir)
        .map_err(|_| HarvestError::ForumNotFound(activities_dir.to_path_buf()))?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path().join("forum.xml"))
        .filter(|manifest| manifest.is_file())
        .collect();
    candidates.sort();

    candidates
        .into_iter()
        .next()
        .ok_or_else(|| HarvestError::ForumNotFound(activities_dir.to_path_buf()))
}

/// Parse every `discussion/post` element out of a forum manifest.
///
/// Posts with a missing/non-numeric id, author or creation time are
/// malformed manifest entries and are skipped with a warning.
pub fn parse_forum_xml(xml: &str) -> Result<Vec<RawPost>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut posts = Vec::new();
    let mut current: Option<PostBuilder> = None;
    let mut field: Option<Field> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = e.name();
                if name.as_ref() == b"post" {
                    let id = e
                        .try_get_attribute("id")
                        .map_err(|err| HarvestError::Xml(err.to_string()))?
                        .and_then(|attr| {
                            String::from_utf8_lossy(&attr.value).parse::<i64>().ok()
                        });
                    current = id.map(PostBuilder::new);
                    if current.is_none() {
                        warn!("Skipping post without a numeric id attribute");
                    }
                } else if current.is_some() {
                    field = Field::from_tag(name.as_ref());
                }
            },
            Ok(Event::Text(t)) => {
                if let (Some(builder), Some(field)) = (current.as_mut(), field) {
                    let value = t
                        .unescape()
                        .map_err(|err| HarvestError::Xml(err.to_string()))?;
                    builder.push(field, &value);
                }
            },
            Ok(Event::CData(t)) => {
                if let (Some(builder), Some(field)) = (current.as_mut(), field) {
                    builder.push(field, &String::from_utf8_lossy(t.as_ref()));
                }
            },
            Ok(Event::End(e)) => {
                let name = e.name();
                if name.as_ref() == b"post" {
                    if let Some(builder) = current.take() {
                        match builder.build() {
                            Some(post) => posts.push(post),
                            None => warn!("Skipping malformed post entry"),
                        }
                    }
                    field = None;
                } else if field.is_some() && Field::from_tag(name.as_ref()) == field {
                    field = None;
                }
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(err) => return Err(HarvestError::Xml(err.to_string())),
        }
    }

    Ok(posts)
}

/// Extract, sanitize and (optionally) enrich the posts of one archive,
/// appending survivors to `harvest.posts`. Returns the set of retained
/// post ids, which scopes the file-attachment extraction that follows.
///
/// `enricher == None` selects export mode: no dataset link required, no
/// remote calls, display-grade sanitization.
pub async fn harvest_discussions(
    activities_dir: &Path,
    enricher: Option<&CatalogClient>,
    harvest: &mut Harvest,
) -> Result<HashSet<i64>> {
    let manifest = find_forum_xml(activities_dir)?;
    let xml = std::fs::read_to_string(&manifest)?;
    let raw_posts = parse_forum_xml(&xml)?;
    debug!(manifest = %manifest.display(), posts = raw_posts.len(), "Parsed forum manifest");

    let mut retained = HashSet::new();

    for raw in raw_posts {
        match enricher {
            Some(catalog) => {
                let Some(dataset_id) = resolve_dataset(catalog, &raw, harvest).await else {
                    continue;
                };
                let message =
                    sanitize::sanitize(&sanitize::unescape_entities(&raw.message), SanitizeMode::Record);
                retained.insert(raw.id);
                harvest.posts.push(Post {
                    id: raw.id,
                    author_id: raw.author_id,
                    created: raw.created,
                    subject: text::normalize(&raw.subject),
                    message,
                    dataset_id: Some(dataset_id),
                });
            },
            None => {
                let message = sanitize::sanitize(&raw.message, SanitizeMode::Display);
                retained.insert(raw.id);
                harvest.posts.push(Post {
                    id: raw.id,
                    author_id: raw.author_id,
                    created: raw.created,
                    subject: text::normalize(&raw.subject),
                    message,
                    dataset_id: None,
                });
            },
        }
    }

    Ok(retained)
}

/// Find the post's dataset link and resolve it to a dataset id, through
/// the per-run cache when possible. `None` means the post is discarded:
/// either it has no catalog link or its enrichment failed.
async fn resolve_dataset(
    catalog: &CatalogClient,
    raw: &RawPost,
    harvest: &mut Harvest,
) -> Option<String> {
    let caps = catalog.link_regex().captures(&raw.message)?;
    let url = caps.get(1)?.as_str().to_string();
    let slug = caps.get(2)?.as_str().to_string();

    if let Some(cached) = harvest.dataset_id_for_slug(&slug) {
        debug!(%slug, post = raw.id, "Dataset already fetched, reusing id");
        return Some(cached.to_string());
    }

    match catalog.package_show(&slug, &url).await {
        Ok(enriched) => {
            let dataset_id = enriched.dataset.id.clone();
            if let Some(publisher) = enriched.publisher {
                harvest.add_publisher(publisher);
            }
            harvest.resources.extend(enriched.resources);
            harvest.datasets.insert(slug, enriched.dataset);
            Some(dataset_id)
        },
        Err(err) => {
            warn!(post = raw.id, error = %err, "Enrichment failed, discarding post");
            None
        },
    }
}

/// The post children we care about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    UserId,
    Created,
    Subject,
    Message,
}

impl Field {
    fn from_tag(tag: &[u8]) -> Option<Self> {
        match tag {
            b"userid" => Some(Field::UserId),
            b"created" => Some(Field::Created),
            b"subject" => Some(Field::Subject),
            b"message" => Some(Field::Message),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct PostBuilder {
    id: i64,
    user_id: String,
    created: String,
    subject: String,
    message: String,
}

impl PostBuilder {
    fn new(id: i64) -> Self {
        Self {
            id,
            user_id: String::new(),
            created: String::new(),
            subject: String::new(),
            message: String::new(),
        }
    }

    fn push(&mut self, field: Field, value: &str) {
        let target = match field {
            Field::UserId => &mut self.user_id,
            Field::Created => &mut self.created,
            Field::Subject => &mut self.subject,
            Field::Message => &mut self.message,
        };
        target.push_str(value);
    }

    fn build(self) -> Option<RawPost> {
        let author_id = self.user_id.trim().parse().ok()?;
        let epoch: i64 = self.created.trim().parse().ok()?;
        let created = DateTime::from_timestamp(epoch, 0)?;
        Some(RawPost {
            id: self.id,
            author_id,
            created,
            subject: self.subject,
            message: self.message,
        })
    }
}
