//! Moodle backup unpacking
//!
//! A `.mbz` backup is an ordinary gzip-compressed tar archive. Each
//! archive is extracted fully into a scratch directory that the pipeline
//! clears between archives, so nothing leaks from one backup into the
//! next.

use flate2::read::GzDecoder;
use harvest_common::{HarvestError, Result};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tracing::debug;

/// Validate and extract a `.mbz` archive into `scratch`.
///
/// Returns [`HarvestError::InvalidArchive`] when the path does not exist
/// or does not carry the `.mbz` suffix (case-insensitive).
pub fn unpack(archive: &Path, scratch: &Path) -> Result<()> {
    if !archive.exists() {
        return Err(HarvestError::invalid_archive(
            archive,
            "path does not exist",
        ));
    }

    let is_mbz = archive
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("mbz"))
        .unwrap_or(false);
    if !is_mbz {
        return Err(HarvestError::invalid_archive(
            archive,
            "expected a .mbz backup",
        ));
    }

    let file = File::open(archive)?;
    let decoder = GzDecoder::new(BufReader::new(file));
    let mut tar = tar::Archive::new(decoder);
    tar.unpack(scratch)?;

    debug!(archive = %archive.display(), scratch = %scratch.display(), "Extracted backup");
    Ok(())
}

/// Remove the scratch directory recursively, tolerating absence.
pub fn clear_scratch(scratch: &Path) -> Result<()> {
    match std::fs::remove_dir_all(scratch) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;
    use tempfile::TempDir;

    /// Build a minimal .mbz (tar.gz) containing the given files.
    fn write_mbz(path: &Path, files: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let encoder = GzEncoder::new(file, Compression::default());
        let mut builder = tar::Builder::new(encoder);
        for (name, contents) in files {
            let mut header = tar::Header::new_gnu();
            header.set_size(contents.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            builder
                .append_data(&mut header, name, contents.as_bytes())
                .unwrap();
        }
        builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
    }

    #[test]
    fn test_unpack_extracts_contents() {
        let dir = TempDir::new().unwrap();
        let mbz = dir.path().join("backup.mbz");
        write_mbz(&mbz, &[("files.xml", "<files/>"), ("activities/forum_1/forum.xml", "<activity/>")]);

        let scratch = dir.path().join("scratch");
        unpack(&mbz, &scratch).unwrap();

        assert_eq!(
            std::fs::read_to_string(scratch.join("files.xml")).unwrap(),
            "<files/>"
        );
        assert!(scratch.join("activities/forum_1/forum.xml").exists());
    }

    #[test]
    fn test_missing_path_is_invalid_archive() {
        let dir = TempDir::new().unwrap();
        let err = unpack(&dir.path().join("nope.mbz"), &dir.path().join("s")).unwrap_err();
        assert!(matches!(err, HarvestError::InvalidArchive { .. }));
    }

    #[test]
    fn test_wrong_suffix_is_invalid_archive() {
        let dir = TempDir::new().unwrap();
        let zip = dir.path().join("backup.zip");
        std::fs::write(&zip, b"whatever").unwrap();

        let err = unpack(&zip, &dir.path().join("s")).unwrap_err();
        assert!(matches!(err, HarvestError::InvalidArchive { .. }));
    }

    #[test]
    fn test_clear_scratch_tolerates_absence() {
        let dir = TempDir::new().unwrap();
        let scratch = dir.path().join("never-created");
        clear_scratch(&scratch).unwrap();

        std::fs::create_dir_all(scratch.join("nested")).unwrap();
        std::fs::write(scratch.join("nested/blob"), b"x").unwrap();
        clear_scratch(&scratch).unwrap();
        assert!(!scratch.exists());
    }
}
