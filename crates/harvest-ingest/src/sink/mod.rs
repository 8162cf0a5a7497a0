//! Terminal consumers of a harvest
//!
//! Three mutually exclusive sinks share the record model of
//! [`crate::model`]: a relational upsert into Postgres, a set of
//! all-fields-quoted CSV exports, and a static paginated HTML rendering.

pub mod csv;
pub mod database;
pub mod html;
