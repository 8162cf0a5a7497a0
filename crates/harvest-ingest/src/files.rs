//! File-manifest extraction
//!
//! `files.xml` enumerates every stored blob of the backup, addressed by
//! content hash and associated to its owning item (for forum attachments,
//! the post id) through `itemid`. This module turns manifest entries into
//! [`Attachment`] records, copies the content-addressed blobs out of the
//! scratch directory, and builds the post-to-image mapping the HTML
//! renderer needs.

use crate::model::Attachment;
use crate::text;
use chrono::{DateTime, Utc};
use harvest_common::{HarvestError, Result};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tracing::debug;

/// Moodle's literal null sentinel for absent mimetypes.
const NULL_MIMETYPE: &str = "$@NULL@$";

/// Post id -> (percent-decoded original filename -> relative image path).
/// Used by the HTML sink to rewrite `@@PLUGINFILE@@` references.
pub type ImageMap = HashMap<i64, HashMap<String, String>>;

/// One `<file>` entry as it appears in the manifest. All fields raw;
/// validation happens when building attachments.
#[derive(Debug, Default, Clone)]
pub struct FileEntry {
    pub filename: String,
    pub content_hash: String,
    pub item_id: String,
    pub mimetype: String,
    pub time_created: String,
}

/// Parse every `<file>` element of a file manifest.
pub fn parse_files_xml(xml: &str) -> Result<Vec<FileEntry>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut entries = Vec::new();
    let mut current: Option<FileEntry> = None;
    let mut field: Option<&'static str> = None;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"file" => current = Some(FileEntry::default()),
                b"filename" => field = Some("filename"),
                b"contenthash" => field = Some("contenthash"),
                b"itemid" => field = Some("itemid"),
                b"mimetype" => field = Some("mimetype"),
                b"timecreated" => field = Some("timecreated"),
                _ => field = None,
            },
            Ok(Event::Text(t)) => {
                if let (Some(entry), Some(field)) = (current.as_mut(), field) {
                    let value = t
                        .unescape()
                        .map_err(|err| HarvestError::Xml(err.to_string()))?;
                    let target = match field {
                        "filename" => &mut entry.filename,
                        "contenthash" => &mut entry.content_hash,
                        "itemid" => &mut entry.item_id,
                        "mimetype" => &mut entry.mimetype,
                        _ => &mut entry.time_created,
                    };
                    target.push_str(&value);
                }
            },
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"file" {
                    if let Some(entry) = current.take() {
                        entries.push(entry);
                    }
                }
                field = None;
            },
            Ok(Event::Eof) => break,
            Ok(_) => {},
            Err(err) => return Err(HarvestError::Xml(err.to_string())),
        }
    }

    Ok(entries)
}

/// Build attachments for the posts in `interest` from a file manifest.
///
/// Entries are skipped silently when the filename is empty or `"."`, the
/// mimetype is absent/empty/the `$@NULL@$` sentinel, the content hash or
/// item id is missing, the creation time is unparseable, or the owning
/// item id is not a retained post.
pub fn extract_attachments(files_xml: &Path, interest: &HashSet<i64>) -> Result<Vec<Attachment>> {
    let xml = std::fs::read_to_string(files_xml)?;
    let entries = parse_files_xml(&xml)?;

    let attachments: Vec<Attachment> = entries
        .into_iter()
        .filter_map(|entry| build_attachment(entry, interest))
        .collect();

    debug!(manifest = %files_xml.display(), count = attachments.len(), "Extracted attachments");
    Ok(attachments)
}

fn build_attachment(entry: FileEntry, interest: &HashSet<i64>) -> Option<Attachment> {
    let post_id: i64 = entry.item_id.trim().parse().ok()?;
    if !interest.contains(&post_id) {
        return None;
    }
    if entry.filename.is_empty() || entry.filename == "." {
        return None;
    }
    if entry.mimetype.is_empty() || entry.mimetype == NULL_MIMETYPE {
        return None;
    }
    if entry.content_hash.is_empty() {
        return None;
    }
    let epoch: i64 = entry.time_created.trim().parse().ok()?;
    let created = DateTime::<Utc>::from_timestamp(epoch, 0)?;

    Some(Attachment {
        post_id,
        content_hash: entry.content_hash,
        original_name: text::normalize(&entry.filename),
        mime_type: entry.mimetype,
        created,
    })
}

/// Path of a content-addressed blob inside an extracted backup:
/// `files/<first two hash chars>/<hash>`.
fn blob_path(extracted_root: &Path, content_hash: &str) -> std::path::PathBuf {
    let subdir = content_hash.get(..2).unwrap_or(content_hash);
    extracted_root.join("files").join(subdir).join(content_hash)
}

/// Copy attachment blobs out of the scratch directory into `dest`, named
/// by content hash. Blobs missing from the backup are skipped. Returns
/// the number of blobs copied.
pub fn copy_blobs(extracted_root: &Path, attachments: &[Attachment], dest: &Path) -> Result<usize> {
    std::fs::create_dir_all(dest)?;

    let mut copied = 0;
    for attachment in attachments {
        let src = blob_path(extracted_root, &attachment.content_hash);
        if !src.exists() {
            continue;
        }
        std::fs::copy(&src, dest.join(&attachment.content_hash))?;
        copied += 1;
    }
    Ok(copied)
}

/// Detect an image format from file content; the manifest mimetype is
/// never trusted for this. Non-images yield `None`.
pub fn sniff_image_extension(path: &Path) -> Option<&'static str> {
    let bytes = std::fs::read(path).ok()?;
    sniff_image_bytes(&bytes)
}

fn sniff_image_bytes(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(b"\x89PNG\r\n\x1a\n") {
        Some("png")
    } else if bytes.starts_with(b"\xFF\xD8\xFF") {
        Some("jpg")
    } else if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        Some("gif")
    } else if bytes.len() >= 12 && &bytes[..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        Some("webp")
    } else if bytes.starts_with(b"BM") {
        Some("bmp")
    } else {
        let head = String::from_utf8_lossy(&bytes[..bytes.len().min(256)]);
        let head = head.trim_start();
        if head.starts_with("<svg") || (head.starts_with("<?xml") && head.contains("<svg")) {
            Some("svg")
        } else {
            None
        }
    }
}

/// Build the post -> filename -> relative-path image mapping for the HTML
/// export, copying each recognized image to `images_dir` as
/// `<hash>.<sniffed extension>`. `html_dir` anchors the relative paths
/// written into the pages.
pub fn map_post_images(
    files_xml: &Path,
    extracted_root: &Path,
    images_dir: &Path,
    html_dir: &Path,
    map: &mut ImageMap,
) -> Result<()> {
    let xml = std::fs::read_to_string(files_xml)?;
    let entries = parse_files_xml(&xml)?;
    std::fs::create_dir_all(images_dir)?;

    for entry in entries {
        let Ok(post_id) = entry.item_id.trim().parse::<i64>() else {
            continue;
        };
        if entry.filename.is_empty() || entry.content_hash.is_empty() {
            continue;
        }

        let src = blob_path(extracted_root, &entry.content_hash);
        if !src.exists() {
            continue;
        }
        let Some(ext) = sniff_image_extension(&src) else {
            continue;
        };

        let target = images_dir.join(format!("{}.{}", entry.content_hash, ext));
        std::fs::copy(&src, &target)?;

        let decoded = urlencoding::decode(&entry.filename)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| entry.filename.clone());
        let relative = relative_from(&target, html_dir);

        map.entry(post_id).or_default().insert(decoded, relative);
    }

    Ok(())
}

/// Relative path from `base` to `target` (both under the export root).
fn relative_from(target: &Path, base: &Path) -> String {
    let target_parts: Vec<_> = target.components().collect();
    let base_parts: Vec<_> = base.components().collect();

    let common = target_parts
        .iter()
        .zip(base_parts.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = std::path::PathBuf::new();
    for _ in common..base_parts.len() {
        out.push("..");
    }
    for part in &target_parts[common..] {
        out.push(part);
    }
    out.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const FILES_XML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<files>
  <file id="1">
    <contenthash>abcd1234</contenthash>
    <itemid>10</itemid>
    <filename>chart.png</filename>
    <mimetype>image/png</mimetype>
    <timecreated>1714657452</timecreated>
  </file>
  <file id="2">
    <contenthash>ffff0000</contenthash>
    <itemid>10</itemid>
    <filename>.</filename>
    <mimetype>image/png</mimetype>
    <timecreated>1714657452</timecreated>
  </file>
  <file id="3">
    <contenthash>eeee1111</contenthash>
    <itemid>10</itemid>
    <filename>doc.pdf</filename>
    <mimetype>$@NULL@$</mimetype>
    <timecreated>1714657452</timecreated>
  </file>
  <file id="4">
    <contenthash>dddd2222</contenthash>
    <itemid>99</itemid>
    <filename>other.png</filename>
    <mimetype>image/png</mimetype>
    <timecreated>1714657452</timecreated>
  </file>
</files>"#;

    fn interest() -> HashSet<i64> {
        [10].into_iter().collect()
    }

    #[test]
    fn test_parse_files_xml() {
        let entries = parse_files_xml(FILES_XML).unwrap();
        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].content_hash, "abcd1234");
        assert_eq!(entries[0].filename, "chart.png");
    }

    #[test]
    fn test_extract_attachments_skip_rules() {
        let dir = TempDir::new().unwrap();
        let manifest = dir.path().join("files.xml");
        std::fs::write(&manifest, FILES_XML).unwrap();

        let attachments = extract_attachments(&manifest, &interest()).unwrap();

        // Dot filename, $@NULL@$ mimetype and foreign itemid all excluded
        assert_eq!(attachments.len(), 1);
        assert_eq!(attachments[0].post_id, 10);
        assert_eq!(attachments[0].content_hash, "abcd1234");
        assert_eq!(attachments[0].original_name, "chart.png");
    }

    #[test]
    fn test_null_sentinel_excluded_even_when_otherwise_valid() {
        let entry = FileEntry {
            filename: "doc.pdf".into(),
            content_hash: "eeee1111".into(),
            item_id: "10".into(),
            mimetype: NULL_MIMETYPE.into(),
            time_created: "1714657452".into(),
        };
        assert!(build_attachment(entry, &interest()).is_none());
    }

    #[test]
    fn test_copy_blobs_skips_missing() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("scratch");
        std::fs::create_dir_all(root.join("files/ab")).unwrap();
        std::fs::write(root.join("files/ab/abcd1234"), b"imagebytes").unwrap();

        let attachments = vec![
            Attachment {
                post_id: 10,
                content_hash: "abcd1234".into(),
                original_name: "chart.png".into(),
                mime_type: "image/png".into(),
                created: Utc::now(),
            },
            Attachment {
                post_id: 10,
                content_hash: "beef9999".into(),
                original_name: "gone.png".into(),
                mime_type: "image/png".into(),
                created: Utc::now(),
            },
        ];

        let dest = dir.path().join("out");
        let copied = copy_blobs(&root, &attachments, &dest).unwrap();
        assert_eq!(copied, 1);
        assert!(dest.join("abcd1234").exists());
        assert!(!dest.join("beef9999").exists());
    }

    #[test]
    fn test_sniff_image_bytes() {
        assert_eq!(sniff_image_bytes(b"\x89PNG\r\n\x1a\nrest"), Some("png"));
        assert_eq!(sniff_image_bytes(b"\xFF\xD8\xFF\xE0rest"), Some("jpg"));
        assert_eq!(sniff_image_bytes(b"GIF89a..."), Some("gif"));
        assert_eq!(sniff_image_bytes(b"RIFF\x00\x00\x00\x00WEBPVP8 "), Some("webp"));
        assert_eq!(sniff_image_bytes(b"%PDF-1.4"), None);
        assert_eq!(sniff_image_bytes(b"plain text"), None);
    }

    #[test]
    fn test_relative_from() {
        let target = Path::new("export/images/abcd.png");
        let base = Path::new("export/html");
        assert_eq!(relative_from(target, base), "../images/abcd.png");
    }

    #[test]
    fn test_map_post_images() {
        let dir = TempDir::new().unwrap();
        let root = dir.path().join("scratch");
        std::fs::create_dir_all(root.join("files/ab")).unwrap();
        std::fs::write(root.join("files/ab/abcd1234"), b"\x89PNG\r\n\x1a\npixels").unwrap();
        let manifest = root.join("files.xml");
        std::fs::write(&manifest, FILES_XML).unwrap();

        let out = dir.path().join("export");
        let mut map = ImageMap::new();
        map_post_images(
            &manifest,
            &root,
            &out.join("images"),
            &out.join("html"),
            &mut map,
        )
        .unwrap();

        let for_post = map.get(&10).unwrap();
        assert_eq!(for_post["chart.png"], "../images/abcd1234.png");
        assert!(out.join("images/abcd1234.png").exists());
    }
}
