//! End-to-end pipeline tests
//!
//! Build real `.mbz` fixtures (gzip-tar), stub the catalog API with
//! wiremock, run the pipeline sinks and assert on the produced files.

use flate2::write::GzEncoder;
use flate2::Compression;
use harvest_ingest::pipeline;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct Fixture {
    dir: TempDir,
}

impl Fixture {
    fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    fn scratch(&self) -> PathBuf {
        self.path("scratch")
    }
}

/// Write a .mbz archive containing the given entries.
fn write_mbz(target: &Path, entries: &[(&str, &[u8])]) {
    let file = fs::File::create(target).expect("create mbz");
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, name, *contents)
            .expect("append entry");
    }
    builder
        .into_inner()
        .expect("finish tar")
        .finish()
        .expect("finish gzip")
        .flush()
        .expect("flush");
}

fn forum_xml(posts: &[(i64, &str)]) -> String {
    let mut posts_xml = String::new();
    for (id, message) in posts {
        let escaped = message
            .replace('&', "&amp;")
            .replace('<', "&lt;")
            .replace('>', "&gt;");
        posts_xml.push_str(&format!(
            r#"<post id="{id}">
                <userid>100</userid>
                <created>1714657452</created>
                <subject>Post {id}</subject>
                <message>{escaped}</message>
              </post>"#
        ));
    }
    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<activity id="7" modulename="forum">
  <forum id="3">
    <discussions>
      <discussion id="1">
        <posts>{posts_xml}</posts>
      </discussion>
    </discussions>
  </forum>
</activity>"#
    )
}

fn files_xml(entries: &[(i64, &str, &str, &str)]) -> String {
    let mut files = String::new();
    for (item_id, hash, filename, mimetype) in entries {
        files.push_str(&format!(
            r#"<file id="1">
                <contenthash>{hash}</contenthash>
                <itemid>{item_id}</itemid>
                <filename>{filename}</filename>
                <mimetype>{mimetype}</mimetype>
                <timecreated>1714657452</timecreated>
              </file>"#
        ));
    }
    format!(r#"<?xml version="1.0" encoding="UTF-8"?><files>{files}</files>"#)
}

fn package_show_ok() -> serde_json::Value {
    serde_json::json!({
        "success": true,
        "result": {
            "id": "abc123",
            "title": "Roads",
            "resources": [],
            "organization": {"id": "org1", "title": "Ministry"}
        }
    })
}

async fn mock_catalog(server: &MockServer, slug: &str, response: ResponseTemplate, hits: u64) {
    Mock::given(method("GET"))
        .and(path("/ckan/api/3/action/package_show"))
        .and(query_param("id", slug))
        .respond_with(response)
        .expect(hits)
        .mount(server)
        .await;
}

#[tokio::test]
async fn csv_pipeline_enriches_dedups_and_discards() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    mock_catalog(
        &server,
        "roads-2020",
        ResponseTemplate::new(200).set_body_json(package_show_ok()),
        // Two posts share the slug; the catalog must be hit exactly once
        1,
    )
    .await;

    let link = format!("{}/ckan/dataset/roads-2020", server.uri());
    let forum = forum_xml(&[
        (10, &format!("<p>See {link} for details</p>")),
        (11, &format!("<p>Same dataset: {link}</p>")),
        (12, "<p>No dataset link at all</p>"),
    ]);
    let files = files_xml(&[
        (10, "abcd1234", "chart.png", "image/png"),
        (11, "abcd1234", "chart-copy.png", "image/png"),
        (12, "eeee0000", "orphan.png", "image/png"),
    ]);

    let mbz = fx.path("course.mbz");
    write_mbz(
        &mbz,
        &[
            ("activities/forum_3/forum.xml", forum.as_bytes()),
            ("files.xml", files.as_bytes()),
            ("files/ab/abcd1234", b"\x89PNG\r\n\x1a\npixels"),
        ],
    );

    let out = fx.path("out");
    pipeline::run_csv(&mbz, &fx.scratch(), &out, &server.uri())
        .await
        .expect("csv run");

    let posts = fs::read_to_string(out.join("posts.csv")).unwrap();
    assert!(posts.contains("\"10\""));
    assert!(posts.contains("\"11\""));
    // Post without a catalog link is excluded from enriching sinks
    assert!(!posts.contains("\"12\""));

    let links = fs::read_to_string(out.join("post_dataset.csv")).unwrap();
    assert!(links.contains("\"10\",\"abc123\""));
    assert!(links.contains("\"11\",\"abc123\""));

    let datasets = fs::read_to_string(out.join("datasets.csv")).unwrap();
    assert_eq!(datasets.lines().count(), 2); // header + one dataset
    assert!(datasets.contains("\"abc123\",\"Roads\""));

    // Attachments: same hash for two posts collapses to one row, the
    // orphan post's file never makes it in
    let attachments = fs::read_to_string(out.join("attachments.csv")).unwrap();
    assert_eq!(attachments.lines().count(), 2);
    assert!(attachments.contains("\"10\",\"abcd1234\",\"chart.png\""));
    assert!(!attachments.contains("eeee0000"));

    // Blob exported once, named by hash
    assert!(out.join("files/abcd1234").exists());

    // Scratch fully cleared after the batch
    assert!(!fx.scratch().exists());
}

#[tokio::test]
async fn failed_enrichment_discards_post() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    mock_catalog(&server, "broken-500", ResponseTemplate::new(500), 1).await;
    mock_catalog(
        &server,
        "broken-flag",
        ResponseTemplate::new(200)
            .set_body_json(serde_json::json!({"success": false, "error": "not found"})),
        1,
    )
    .await;

    let forum = forum_xml(&[
        (20, &format!("<p>{}/ckan/dataset/broken-500</p>", server.uri())),
        (21, &format!("<p>{}/ckan/dataset/broken-flag</p>", server.uri())),
    ]);

    let mbz = fx.path("course.mbz");
    write_mbz(
        &mbz,
        &[
            ("activities/forum_3/forum.xml", forum.as_bytes()),
            ("files.xml", files_xml(&[]).as_bytes()),
        ],
    );

    let out = fx.path("out");
    pipeline::run_csv(&mbz, &fx.scratch(), &out, &server.uri())
        .await
        .expect("run should continue past failed enrichments");

    let posts = fs::read_to_string(out.join("posts.csv")).unwrap();
    assert_eq!(posts.lines().count(), 1, "both posts discarded: {posts}");
    let datasets = fs::read_to_string(out.join("datasets.csv")).unwrap();
    assert_eq!(datasets.lines().count(), 1);
}

#[tokio::test]
async fn slug_cache_spans_archives() {
    let fx = Fixture::new();
    let server = MockServer::start().await;
    mock_catalog(
        &server,
        "roads-2020",
        ResponseTemplate::new(200).set_body_json(package_show_ok()),
        1,
    )
    .await;

    let link = format!("{}/ckan/dataset/roads-2020", server.uri());
    let input = fx.path("backups");
    fs::create_dir_all(&input).unwrap();

    for (id, name) in [(30, "a.mbz"), (31, "b.mbz")] {
        let forum = forum_xml(&[(id, &format!("<p>{link}</p>"))]);
        write_mbz(
            &input.join(name),
            &[
                ("activities/forum_3/forum.xml", forum.as_bytes()),
                ("files.xml", files_xml(&[]).as_bytes()),
            ],
        );
    }

    let out = fx.path("out");
    pipeline::run_csv(&input, &fx.scratch(), &out, &server.uri())
        .await
        .expect("csv run");

    let links = fs::read_to_string(out.join("post_dataset.csv")).unwrap();
    // One post per archive, both resolved to the same cached dataset id
    assert_eq!(links.matches("\"abc123\"").count(), 2);
}

#[tokio::test]
async fn html_export_keeps_all_posts_and_rewrites_images() {
    let fx = Fixture::new();

    let forum = forum_xml(&[
        (40, "<p>With image: <img src=\"@@PLUGINFILE@@/my%20chart.png\"></p>"),
        (41, "<p>No link, still exported</p>"),
    ]);
    let files = files_xml(&[(40, "abcd1234", "my chart.png", "image/png")]);

    let mbz = fx.path("course.mbz");
    write_mbz(
        &mbz,
        &[
            ("activities/forum_3/forum.xml", forum.as_bytes()),
            ("files.xml", files.as_bytes()),
            ("files/ab/abcd1234", b"\x89PNG\r\n\x1a\npixels"),
        ],
    );

    let out = fx.path("export");
    pipeline::run_html(&mbz, &fx.scratch(), &out)
        .await
        .expect("html run");

    let page = fs::read_to_string(out.join("html/page1.html")).unwrap();
    assert!(page.contains("Post ID: 40"));
    assert!(page.contains("Post ID: 41"));
    // Placeholder rewritten to the copied, extension-sniffed image
    assert!(page.contains("src=\"../images/abcd1234.png\""));
    assert!(!page.contains("@@PLUGINFILE@@"));
    assert!(out.join("images/abcd1234.png").exists());
}

#[tokio::test]
async fn archive_without_forum_is_skipped() {
    let fx = Fixture::new();
    let server = MockServer::start().await;

    let mbz = fx.path("course.mbz");
    write_mbz(&mbz, &[("files.xml", files_xml(&[]).as_bytes())]);

    let out = fx.path("out");
    pipeline::run_csv(&mbz, &fx.scratch(), &out, &server.uri())
        .await
        .expect("forumless archive skipped, run continues");

    let posts = fs::read_to_string(out.join("posts.csv")).unwrap();
    assert_eq!(posts.lines().count(), 1);
    assert!(!fx.scratch().exists());
}

#[tokio::test]
async fn corrupt_archive_fails_but_clears_scratch() {
    let fx = Fixture::new();
    let server = MockServer::start().await;

    // Right suffix, but not a gzip-tar: extraction fails partway
    let mbz = fx.path("course.mbz");
    fs::write(&mbz, b"definitely not gzip data").unwrap();

    let result = pipeline::run_csv(&mbz, &fx.scratch(), &fx.path("out"), &server.uri()).await;
    assert!(result.is_err());
    assert!(
        !fx.scratch().exists(),
        "partial extraction must not survive the failed archive"
    );
}

#[tokio::test]
async fn non_mbz_input_fails() {
    let fx = Fixture::new();
    let bogus = fx.path("course.zip");
    fs::write(&bogus, b"not an archive").unwrap();

    let server = MockServer::start().await;
    let result = pipeline::run_csv(&bogus, &fx.scratch(), &fx.path("out"), &server.uri()).await;
    assert!(result.is_err());
}
