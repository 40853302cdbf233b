//! Build context packaging.
//!
//! The daemon expects the build context as a tar archive. Entries are walked
//! in sorted order so that an unchanged directory always produces the same
//! bytes and the same fingerprint.

use std::path::Path;

use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use tar::Builder;
use walkdir::WalkDir;

use crate::error::RemoteApiError;

/// Packs a build context directory into a gzipped tar archive in memory.
///
/// Paths inside the archive are relative to `context_dir`, so a Dockerfile
/// at the top level is addressable as `Dockerfile`.
///
/// # Errors
///
/// Returns `RemoteApiError::Archive` if the directory cannot be walked or
/// an entry cannot be read.
pub fn pack_build_context(context_dir: &Path) -> Result<Vec<u8>, RemoteApiError> {
    if !context_dir.is_dir() {
        return Err(archive_error(context_dir, "not a directory"));
    }

    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = Builder::new(encoder);

    for entry in WalkDir::new(context_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_error(context_dir, e))?;
        let relative = entry
            .path()
            .strip_prefix(context_dir)
            .map_err(|e| archive_error(context_dir, e))?;

        if entry.file_type().is_dir() {
            builder
                .append_dir(relative, entry.path())
                .map_err(|e| archive_error(context_dir, e))?;
        } else {
            builder
                .append_path_with_name(entry.path(), relative)
                .map_err(|e| archive_error(context_dir, e))?;
        }
    }

    let encoder = builder
        .into_inner()
        .map_err(|e| archive_error(context_dir, e))?;
    encoder
        .finish()
        .map_err(|e| archive_error(context_dir, e))
}

/// Computes a SHA-256 fingerprint over the relative paths and file contents
/// of a build context.
///
/// Build tasks record the fingerprint next to the image ID and skip the
/// daemon round trip when it has not changed.
pub fn context_fingerprint(context_dir: &Path) -> Result<String, RemoteApiError> {
    if !context_dir.is_dir() {
        return Err(archive_error(context_dir, "not a directory"));
    }

    let mut hasher = Sha256::new();
    for entry in WalkDir::new(context_dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(|e| archive_error(context_dir, e))?;
        let relative = entry
            .path()
            .strip_prefix(context_dir)
            .map_err(|e| archive_error(context_dir, e))?;

        hasher.update(relative.to_string_lossy().as_bytes());
        hasher.update([0u8]);
        if entry.file_type().is_file() {
            let contents =
                std::fs::read(entry.path()).map_err(|e| archive_error(context_dir, e))?;
            hasher.update(&contents);
        }
        hasher.update([0u8]);
    }

    Ok(hex::encode(hasher.finalize()))
}

fn archive_error(path: &Path, message: impl ToString) -> RemoteApiError {
    RemoteApiError::Archive {
        path: path.display().to_string(),
        message: message.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::read::GzDecoder;
    use std::fs;
    use tar::Archive;
    use tempfile::TempDir;

    fn sample_context() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("Dockerfile"), "FROM ubuntu:24.04\n").unwrap();
        fs::create_dir(dir.path().join("app")).unwrap();
        fs::write(dir.path().join("app/main.sh"), "echo hello\n").unwrap();
        dir
    }

    fn archive_paths(bytes: &[u8]) -> Vec<String> {
        let mut archive = Archive::new(GzDecoder::new(bytes));
        archive
            .entries()
            .unwrap()
            .map(|entry| {
                entry
                    .unwrap()
                    .path()
                    .unwrap()
                    .to_string_lossy()
                    .into_owned()
            })
            .collect()
    }

    #[test]
    fn test_pack_uses_relative_paths() {
        let dir = sample_context();
        let bytes = pack_build_context(dir.path()).unwrap();
        let paths = archive_paths(&bytes);

        assert!(paths.contains(&"Dockerfile".to_string()));
        assert!(paths.iter().any(|p| p.trim_end_matches('/') == "app"));
        assert!(paths.contains(&"app/main.sh".to_string()));
    }

    #[test]
    fn test_pack_is_deterministic() {
        let dir = sample_context();
        let first = pack_build_context(dir.path()).unwrap();
        let second = pack_build_context(dir.path()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_pack_rejects_missing_directory() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        let result = pack_build_context(&missing);
        assert!(matches!(result, Err(RemoteApiError::Archive { .. })));
    }

    #[test]
    fn test_fingerprint_stable_for_unchanged_context() {
        let dir = sample_context();
        let first = context_fingerprint(dir.path()).unwrap();
        let second = context_fingerprint(dir.path()).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), 64);
    }

    #[test]
    fn test_fingerprint_changes_with_content() {
        let dir = sample_context();
        let before = context_fingerprint(dir.path()).unwrap();
        fs::write(dir.path().join("app/main.sh"), "echo changed\n").unwrap();
        let after = context_fingerprint(dir.path()).unwrap();
        assert_ne!(before, after);
    }

    #[test]
    fn test_fingerprint_changes_with_renamed_file() {
        let dir = sample_context();
        let before = context_fingerprint(dir.path()).unwrap();
        fs::rename(
            dir.path().join("app/main.sh"),
            dir.path().join("app/run.sh"),
        )
        .unwrap();
        let after = context_fingerprint(dir.path()).unwrap();
        assert_ne!(before, after);
    }
}
