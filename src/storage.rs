//! Storage for uploaded image blobs on disk.

use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

/// File store for scan images.
///
/// Images live under the uploads directory in a two-level layout based on
/// the content hash prefix for filesystem efficiency:
/// `{uploads_dir}/{hash[0..2]}/{scan_id}-{hash[0..8]}.{extension}`.
/// Stored paths are relative to the uploads directory.
#[derive(Clone)]
pub struct ImageStore {
    uploads_dir: PathBuf,
}

impl ImageStore {
    /// Create a store rooted at the given uploads directory.
    pub fn new(uploads_dir: PathBuf) -> Self {
        Self { uploads_dir }
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Save image bytes for a scan.
    ///
    /// Returns the storage path (relative to the uploads directory) and
    /// the content's SHA-256 hash.
    pub fn save_image(
        &self,
        scan_id: &str,
        content: &[u8],
        mime_type: &str,
    ) -> std::io::Result<(String, String)> {
        let hash = content_hash(content);
        let relative = format!(
            "{}/{}-{}.{}",
            &hash[..2],
            scan_id,
            &hash[..8],
            mime_to_extension(mime_type)
        );

        let full = self.uploads_dir.join(&relative);
        if let Some(parent) = full.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(&full, content)?;

        Ok((relative, hash))
    }

    /// Read back a stored image by its relative storage path.
    pub fn open_image(&self, storage_path: &str) -> std::io::Result<Vec<u8>> {
        std::fs::read(self.uploads_dir.join(storage_path))
    }
}

/// SHA-256 of content, hex encoded.
pub fn content_hash(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    hex::encode(hasher.finalize())
}

/// Map an image MIME type to a file extension.
pub fn mime_to_extension(mime: &str) -> &'static str {
    match mime {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_mime_to_extension() {
        assert_eq!(mime_to_extension("image/jpeg"), "jpg");
        assert_eq!(mime_to_extension("image/jpg"), "jpg");
        assert_eq!(mime_to_extension("image/png"), "png");
        assert_eq!(mime_to_extension("image/webp"), "webp");
        assert_eq!(mime_to_extension("application/pdf"), "bin");
    }

    #[test]
    fn test_save_and_open_round_trip() {
        let dir = tempdir().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf());

        let content = b"not really a png";
        let (path, hash) = store.save_image("scan-1", content, "image/png").unwrap();

        assert_eq!(hash, content_hash(content));
        assert_eq!(hash.len(), 64);
        // Two-level layout: hash prefix directory, then scan id + short hash.
        assert!(path.starts_with(&hash[..2]));
        assert!(path.ends_with(".png"));
        assert!(path.contains("scan-1"));

        let read_back = store.open_image(&path).unwrap();
        assert_eq!(read_back, content);
    }

    #[test]
    fn test_open_missing_image_errors() {
        let dir = tempdir().unwrap();
        let store = ImageStore::new(dir.path().to_path_buf());
        assert!(store.open_image("ab/missing-12345678.png").is_err());
    }
}
