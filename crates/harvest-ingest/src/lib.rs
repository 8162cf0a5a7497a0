//! Moodle backup (`.mbz`) harvesting pipeline
//!
//! Extracts discussion-forum posts and linked open-data references from
//! Moodle course-backup archives and feeds them to one of three sinks:
//! a relational database, a set of CSV exports, or static paginated HTML.
//!
//! The pipeline is a straight line: unpack archive, parse the forum and
//! file manifests, sanitize message HTML, enrich detected catalog links
//! over the CKAN `package_show` API, deduplicate, emit. Archives in a
//! batch are processed strictly sequentially.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     harvest_ingest::pipeline::run_csv(
//!         Path::new("./backups"),
//!         Path::new(harvest_ingest::pipeline::DEFAULT_SCRATCH_DIR),
//!         Path::new("./csv_output"),
//!         "https://data.gov.hr",
//!     )
//!     .await?;
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod catalog;
pub mod files;
pub mod forum;
pub mod model;
pub mod pipeline;
pub mod sanitize;
pub mod sink;
pub mod text;
