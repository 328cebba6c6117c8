//! On-disk enrollment dataset: `<root>/<subject>/image_<token>.jpg`.
//!
//! The directory name under the root is the training label for every
//! image inside it.

use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// File extensions picked up by the training walk (matched case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

#[derive(Error, Debug)]
pub enum DatasetError {
    #[error("failed to walk dataset: {0}")]
    Walk(#[from] walkdir::Error),
    #[error("invalid subject name: {0:?}")]
    InvalidSubject(String),
    #[error("io: {0}")]
    Io(#[from] io::Error),
}

/// Directory holding all images of one subject.
pub fn subject_dir(root: &Path, subject: &str) -> PathBuf {
    root.join(subject)
}

/// Create the subject directory (and the dataset root) if missing.
pub fn ensure_subject_dir(root: &Path, subject: &str) -> Result<PathBuf, DatasetError> {
    if !is_valid_subject(subject) {
        return Err(DatasetError::InvalidSubject(subject.to_string()));
    }
    let dir = subject_dir(root, subject);
    std::fs::create_dir_all(&dir)?;
    Ok(dir)
}

/// A subject name must be a single, non-empty path component.
fn is_valid_subject(subject: &str) -> bool {
    !subject.is_empty()
        && subject != "."
        && subject != ".."
        && !subject.contains(['/', '\\', '\0'])
}

/// Fresh capture file name, `image_<32 hex chars>.jpg`.
pub fn image_file_name() -> String {
    format!("image_{}.jpg", uuid::Uuid::new_v4().simple())
}

/// Every image under `root`, recursively, in a stable (file name) order.
///
/// A missing root is treated as an empty dataset.
pub fn list_images(root: &Path) -> Result<Vec<PathBuf>, DatasetError> {
    if !root.exists() {
        return Ok(Vec::new());
    }

    let mut images = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        if entry.file_type().is_file() && has_image_extension(entry.path()) {
            images.push(entry.into_path());
        }
    }
    Ok(images)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.iter().any(|known| ext.eq_ignore_ascii_case(known)))
        .unwrap_or(false)
}

/// Training label for an image: the name of its immediate parent directory.
pub fn label_for(path: &Path) -> Option<String> {
    path.parent()?
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_image_file_name_format() {
        let a = image_file_name();
        let b = image_file_name();
        assert_ne!(a, b);
        assert!(a.starts_with("image_") && a.ends_with(".jpg"));
        assert_eq!(a.len(), "image_".len() + 32 + ".jpg".len());
    }

    #[test]
    fn test_ensure_subject_dir_creates_root_and_subject() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path().join("dataset");
        let dir = ensure_subject_dir(&root, "alice-id").unwrap();
        assert!(dir.is_dir());
        assert_eq!(dir, root.join("alice-id"));
        // Idempotent.
        ensure_subject_dir(&root, "alice-id").unwrap();
    }

    #[test]
    fn test_ensure_subject_dir_rejects_traversal() {
        let tmp = tempfile::tempdir().unwrap();
        for bad in ["", "..", "a/b", "."] {
            assert!(matches!(
                ensure_subject_dir(tmp.path(), bad),
                Err(DatasetError::InvalidSubject(_))
            ));
        }
    }

    #[test]
    fn test_list_images_recursive_and_filtered() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::create_dir_all(root.join("bob")).unwrap();
        fs::create_dir_all(root.join("alice/nested")).unwrap();
        fs::write(root.join("bob/b.jpg"), b"x").unwrap();
        fs::write(root.join("alice/a.PNG"), b"x").unwrap();
        fs::write(root.join("alice/nested/c.jpeg"), b"x").unwrap();
        fs::write(root.join("alice/notes.txt"), b"x").unwrap();

        let images = list_images(root).unwrap();
        let rel: Vec<_> = images
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_path_buf())
            .collect();
        assert_eq!(
            rel,
            vec![
                PathBuf::from("alice/a.PNG"),
                PathBuf::from("alice/nested/c.jpeg"),
                PathBuf::from("bob/b.jpg"),
            ]
        );
    }

    #[test]
    fn test_list_images_missing_root() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(list_images(&tmp.path().join("absent")).unwrap().is_empty());
    }

    #[test]
    fn test_label_is_parent_directory() {
        assert_eq!(label_for(Path::new("dataset/alice/image_1.jpg")).as_deref(), Some("alice"));
        assert_eq!(
            label_for(Path::new("dataset/alice/nested/x.jpg")).as_deref(),
            Some("nested")
        );
    }
}
