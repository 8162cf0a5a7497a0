//! Relational sink (Postgres)
//!
//! Idempotent per run: re-inserting a record that already exists by
//! primary key is a no-op, except a dataset's tag list which is
//! overwritten on conflict. One connection is held for the whole run and
//! each batch insert commits explicitly.

use crate::model::{Attachment, Dataset, Harvest, Post, Publisher, Resource};
use harvest_common::{HarvestError, Result};
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, QueryBuilder};
use tracing::info;

/// Rows per multi-value INSERT statement.
const INSERT_CHUNK_SIZE: usize = 500;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS publisher (
    id TEXT PRIMARY KEY,
    name TEXT,
    description TEXT
);

CREATE TABLE IF NOT EXISTS dataset (
    id TEXT PRIMARY KEY,
    title TEXT,
    refresh_frequency TEXT,
    theme TEXT,
    description TEXT,
    url TEXT,
    state TEXT,
    created TIMESTAMP,
    modified TIMESTAMP,
    is_open BOOLEAN,
    access_rights TEXT,
    license_title TEXT,
    license_url TEXT,
    license_id TEXT,
    publisher_id TEXT REFERENCES publisher(id),
    tags JSONB
);

CREATE TABLE IF NOT EXISTS resource (
    id TEXT PRIMARY KEY,
    dataset_id TEXT REFERENCES dataset(id),
    available_through_api BOOLEAN,
    name TEXT,
    description TEXT,
    created TIMESTAMP,
    last_modified TIMESTAMP,
    format TEXT,
    mimetype TEXT,
    state TEXT,
    size BIGINT,
    url TEXT
);

CREATE TABLE IF NOT EXISTS post (
    id BIGINT PRIMARY KEY,
    author_id BIGINT,
    dataset_id TEXT REFERENCES dataset(id),
    created TIMESTAMPTZ,
    subject TEXT,
    message TEXT
);

CREATE TABLE IF NOT EXISTS attachment (
    post_id BIGINT REFERENCES post(id),
    content_hash TEXT,
    original_name TEXT,
    mime_type TEXT,
    created TIMESTAMPTZ,
    PRIMARY KEY (post_id, content_hash)
);

CREATE TABLE IF NOT EXISTS reply (
    id BIGSERIAL PRIMARY KEY,
    post_id BIGINT REFERENCES post(id),
    created TIMESTAMPTZ,
    message TEXT
);
"#;

/// Postgres sink holding the run's single connection.
pub struct DatabaseSink {
    pool: PgPool,
}

impl DatabaseSink {
    /// Connect with a pool capped at one connection; the pipeline is
    /// sequential and the spec calls for a single persistent connection.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect(database_url)
            .await
            .map_err(db_err)?;
        Ok(Self { pool })
    }

    /// Create the target tables when missing.
    pub async fn create_tables(&self) -> Result<()> {
        sqlx::raw_sql(SCHEMA_SQL)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Upsert the whole harvest, parents before children.
    pub async fn store(&self, harvest: &Harvest) -> Result<()> {
        self.insert_publishers(harvest).await?;
        self.insert_datasets(harvest).await?;
        self.insert_resources(harvest).await?;
        self.insert_posts(harvest).await?;
        self.insert_attachments(harvest).await?;

        info!(
            publishers = harvest.publishers.len(),
            datasets = harvest.datasets.len(),
            resources = harvest.resources.len(),
            posts = harvest.posts.len(),
            attachments = harvest.attachments.len(),
            "Database load complete"
        );
        Ok(())
    }

    /// Close the connection explicitly at the end of the run.
    pub async fn close(self) {
        self.pool.close().await;
    }

    async fn insert_publishers(&self, harvest: &Harvest) -> Result<()> {
        let mut publishers: Vec<_> = harvest.publishers.values().collect();
        publishers.sort_by(|a, b| a.id.cmp(&b.id));

        for chunk in publishers.chunks(INSERT_CHUNK_SIZE) {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            publisher_insert(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn insert_datasets(&self, harvest: &Harvest) -> Result<()> {
        let mut datasets: Vec<_> = harvest.datasets.values().collect();
        datasets.sort_by(|a, b| a.id.cmp(&b.id));

        for chunk in datasets.chunks(INSERT_CHUNK_SIZE) {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            dataset_insert(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn insert_resources(&self, harvest: &Harvest) -> Result<()> {
        for chunk in harvest.resources.chunks(INSERT_CHUNK_SIZE) {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            resource_insert(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn insert_posts(&self, harvest: &Harvest) -> Result<()> {
        for chunk in harvest.posts.chunks(INSERT_CHUNK_SIZE) {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            post_insert(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
        }
        Ok(())
    }

    async fn insert_attachments(&self, harvest: &Harvest) -> Result<()> {
        for chunk in harvest.attachments.chunks(INSERT_CHUNK_SIZE) {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            attachment_insert(chunk)
                .build()
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
        }
        Ok(())
    }
}

fn publisher_insert<'a>(chunk: &'a [&'a Publisher]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> =
        QueryBuilder::new("INSERT INTO publisher (id, name, description) ");
    qb.push_values(chunk, |mut b, p| {
        b.push_bind(&p.id).push_bind(&p.name).push_bind(&p.description);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    qb
}

fn dataset_insert<'a>(chunk: &'a [&'a Dataset]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO dataset (id, title, refresh_frequency, theme, description, \
         url, state, created, modified, is_open, access_rights, license_title, \
         license_url, license_id, publisher_id, tags) ",
    );
    qb.push_values(chunk, |mut b, d| {
        b.push_bind(&d.id)
            .push_bind(&d.title)
            .push_bind(&d.refresh_frequency)
            .push_bind(&d.theme)
            .push_bind(&d.description)
            .push_bind(&d.url)
            .push_bind(&d.state)
            .push_bind(d.created)
            .push_bind(d.modified)
            .push_bind(d.is_open)
            .push_bind(&d.access_rights)
            .push_bind(&d.license_title)
            .push_bind(&d.license_url)
            .push_bind(&d.license_id)
            .push_bind(&d.publisher_id)
            .push_bind(Json(&d.tags));
    });
    // Tag lists are the one thing refreshed on re-runs
    qb.push(" ON CONFLICT (id) DO UPDATE SET tags = EXCLUDED.tags");
    qb
}

fn resource_insert<'a>(chunk: &'a [Resource]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO resource (id, dataset_id, available_through_api, name, \
         description, created, last_modified, format, mimetype, state, size, url) ",
    );
    qb.push_values(chunk, |mut b, r| {
        b.push_bind(&r.id)
            .push_bind(&r.dataset_id)
            .push_bind(r.available_through_api)
            .push_bind(&r.name)
            .push_bind(&r.description)
            .push_bind(r.created)
            .push_bind(r.last_modified)
            .push_bind(&r.format)
            .push_bind(&r.mimetype)
            .push_bind(&r.state)
            .push_bind(r.size)
            .push_bind(&r.url);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    qb
}

fn post_insert<'a>(chunk: &'a [Post]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO post (id, author_id, dataset_id, created, subject, message) ",
    );
    qb.push_values(chunk, |mut b, p| {
        b.push_bind(p.id)
            .push_bind(p.author_id)
            .push_bind(&p.dataset_id)
            .push_bind(p.created)
            .push_bind(&p.subject)
            .push_bind(&p.message);
    });
    qb.push(" ON CONFLICT (id) DO NOTHING");
    qb
}

fn attachment_insert<'a>(chunk: &'a [Attachment]) -> QueryBuilder<'a, Postgres> {
    let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(
        "INSERT INTO attachment (post_id, content_hash, original_name, mime_type, created) ",
    );
    qb.push_values(chunk, |mut b, a| {
        b.push_bind(a.post_id)
            .push_bind(&a.content_hash)
            .push_bind(&a.original_name)
            .push_bind(&a.mime_type)
            .push_bind(a.created);
    });
    qb.push(" ON CONFLICT (post_id, content_hash) DO NOTHING");
    qb
}

fn db_err(e: sqlx::Error) -> HarvestError {
    HarvestError::Database(e.to_string())
}
