//! Open-data catalog enrichment
//!
//! One `package_show` lookup per unique dataset slug against a CKAN
//! catalog. The catalog's JSON is loosely typed (booleans as strings,
//! sizes as strings or numbers, absent fields everywhere), so the raw
//! response is deserialized permissively and coerced into the typed
//! records of [`crate::model`].
//!
//! Any transport error, non-success HTTP status or `success: false` body
//! maps to [`HarvestError::EnrichmentFailed`]; the caller reacts by
//! discarding the in-flight post. No retries.

use crate::model::{Dataset, Publisher, Resource};
use chrono::NaiveDateTime;
use harvest_common::{HarvestError, Result};
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Default catalog instance the forum links point at.
pub const DEFAULT_CATALOG_URL: &str = "https://data.gov.hr";

/// Remote lookups carry a short fixed timeout; everything else in the
/// pipeline runs to completion.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(3);

/// Everything one successful `package_show` call yields.
#[derive(Debug)]
pub struct Enriched {
    pub dataset: Dataset,
    pub resources: Vec<Resource>,
    pub publisher: Option<Publisher>,
}

/// Client for a CKAN-style catalog API.
pub struct CatalogClient {
    http: reqwest::Client,
    base_url: String,
    link_re: Regex,
}

impl CatalogClient {
    /// Build a client for the catalog at `base_url` (no trailing slash
    /// required). The dataset-link pattern used to scan post messages is
    /// derived from the same base URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let base_url = base_url.trim_end_matches('/').to_string();

        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| HarvestError::Http(e.to_string()))?;

        let pattern = format!(
            r"({}/ckan/dataset/([A-Za-z0-9\-]+))",
            regex::escape(&base_url)
        );
        let link_re = Regex::new(&pattern).map_err(|e| HarvestError::Http(e.to_string()))?;

        Ok(Self {
            http,
            base_url,
            link_re,
        })
    }

    /// Pattern matching `<base>/ckan/dataset/<slug>` links. Capture 1 is
    /// the full URL, capture 2 the slug.
    pub fn link_regex(&self) -> &Regex {
        &self.link_re
    }

    /// Fetch dataset metadata for `slug`. `source_url` is the link as it
    /// appeared in the post; it becomes the dataset's `url` field.
    pub async fn package_show(&self, slug: &str, source_url: &str) -> Result<Enriched> {
        let url = format!(
            "{}/ckan/api/3/action/package_show?id={}",
            self.base_url, slug
        );
        debug!(%slug, "Fetching dataset metadata");

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| HarvestError::enrichment_failed(slug, e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::enrichment_failed(
                slug,
                format!("HTTP {}", status),
            ));
        }

        let body: PackageShowResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::enrichment_failed(slug, format!("bad JSON: {}", e)))?;

        if !body.success {
            return Err(HarvestError::enrichment_failed(
                slug,
                "catalog reported failure",
            ));
        }
        let result = body
            .result
            .ok_or_else(|| HarvestError::enrichment_failed(slug, "missing result object"))?;

        build_enriched(slug, source_url, result)
    }
}

fn build_enriched(slug: &str, source_url: &str, result: PackageResult) -> Result<Enriched> {
    let dataset_id = result
        .id
        .ok_or_else(|| HarvestError::enrichment_failed(slug, "result has no dataset id"))?;

    let publisher = result.organization.as_ref().and_then(|org| {
        org.id.as_ref().map(|org_id| Publisher {
            id: org_id.clone(),
            // Some organizations carry no title; the dataset author is
            // the next best thing the catalog offers
            name: org.title.clone().or_else(|| result.author.clone()),
            description: org.description.clone(),
        })
    });
    let publisher_id = publisher.as_ref().map(|p| p.id.clone());

    let resources = result
        .resources
        .into_iter()
        .filter_map(|raw| {
            let id = raw.id?;
            Some(Resource {
                id,
                dataset_id: dataset_id.clone(),
                available_through_api: string_flag(&raw.available_through_api),
                name: raw.name,
                description: raw.description,
                created: parse_ckan_timestamp(raw.created.as_deref()),
                last_modified: parse_ckan_timestamp(raw.last_modified.as_deref()),
                format: raw.format,
                mimetype: raw.mimetype,
                state: raw.state,
                size: coerce_size(&raw.size),
                url: raw.url,
            })
        })
        .collect();

    let dataset = Dataset {
        id: dataset_id,
        title: result.title,
        refresh_frequency: result.refresh_frequency,
        theme: result.theme,
        description: result.notes,
        url: source_url.to_string(),
        state: result.state,
        created: parse_ckan_timestamp(result.metadata_created.as_deref()),
        modified: parse_ckan_timestamp(result.metadata_modified.as_deref()),
        is_open: truthy(&result.isopen),
        access_rights: result.access_rights,
        license_title: result.license_title,
        license_url: result.license_url,
        license_id: result.license_id,
        publisher_id,
        tags: result
            .tags
            .into_iter()
            .filter_map(|tag| tag.name)
            .collect(),
    };

    Ok(Enriched {
        dataset,
        resources,
        publisher,
    })
}

/// CKAN emits naive ISO-8601 timestamps with fractional seconds
/// ("2021-05-05T11:47:30.254500"). Anything unparseable becomes `None`.
fn parse_ckan_timestamp(raw: Option<&str>) -> Option<NaiveDateTime> {
    let raw = raw?;
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f").ok()
}

/// Python-style truthiness for the `isopen` field, which shows up as a
/// bool, a string, a number, or nothing at all.
fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

/// `available_through_api` is string-typed on the wire: "true"/"1"/"yes"
/// (case-insensitive) mean true, everything else false.
fn string_flag(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => {
            let s = s.to_lowercase();
            s == "true" || s == "1" || s == "yes"
        },
        _ => false,
    }
}

/// Resource size as a non-negative byte count, 0 on missing/invalid.
fn coerce_size(value: &Value) -> i64 {
    let size = match value {
        Value::Number(n) => n.as_i64().unwrap_or(0),
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    };
    size.max(0)
}

#[derive(Debug, Deserialize)]
struct PackageShowResponse {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    result: Option<PackageResult>,
}

#[derive(Debug, Default, Deserialize)]
struct PackageResult {
    id: Option<String>,
    title: Option<String>,
    #[serde(rename = "data_refresh_frequency")]
    refresh_frequency: Option<String>,
    theme: Option<String>,
    notes: Option<String>,
    state: Option<String>,
    metadata_created: Option<String>,
    metadata_modified: Option<String>,
    #[serde(default)]
    isopen: Value,
    access_rights: Option<String>,
    license_title: Option<String>,
    license_url: Option<String>,
    license_id: Option<String>,
    author: Option<String>,
    organization: Option<RawOrganization>,
    #[serde(default)]
    tags: Vec<RawTag>,
    #[serde(default)]
    resources: Vec<RawResource>,
}

#[derive(Debug, Deserialize)]
struct RawOrganization {
    id: Option<String>,
    title: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawTag {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawResource {
    id: Option<String>,
    name: Option<String>,
    description: Option<String>,
    created: Option<String>,
    last_modified: Option<String>,
    format: Option<String>,
    mimetype: Option<String>,
    state: Option<String>,
    url: Option<String>,
    #[serde(default)]
    size: Value,
    #[serde(default)]
    available_through_api: Value,
}
