//! Input discovery: turn an input root into the work items of a task.
//!
//! | Kind | Work item |
//! |------|-----------|
//! | `document-to-images` | each PDF below the root |
//! | `images-to-text` | each directory that directly holds page images |
//! | `full-pipeline` | each PDF below the root |
//!
//! Directories rather than single images are the unit for images-to-text
//! because the transcriber stitches every page of a document into one file.
//!
//! Items come back in a `BTreeMap`, so listings are lexicographic and two
//! scans of the same tree produce identical task records.

use crate::error::TaskError;
use crate::model::{ItemRecord, TaskKind};
use std::collections::{BTreeMap, BTreeSet};
use std::ffi::OsStr;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

/// Extensions treated as documents (compared case-insensitively).
pub const DOCUMENT_EXTENSIONS: &[&str] = &["pdf"];

/// Extensions treated as page images (compared case-insensitively).
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Enumerate the work items of a `kind` task rooted at `input_root`.
///
/// # Errors
/// [`TaskError::Scan`] if the root does not exist, is not a directory, or
/// cannot be read. An empty tree is not an error.
pub fn scan(kind: TaskKind, input_root: &Path) -> Result<BTreeMap<String, ItemRecord>, TaskError> {
    let meta = std::fs::metadata(input_root).map_err(|e| TaskError::scan(input_root, e))?;
    if !meta.is_dir() {
        return Err(TaskError::scan(input_root, "not a directory"));
    }
    std::fs::read_dir(input_root).map_err(|e| TaskError::scan(input_root, e))?;

    let items: BTreeMap<String, ItemRecord> = match kind {
        TaskKind::DocumentToImages | TaskKind::FullPipeline => files_with(input_root, DOCUMENT_EXTENSIONS)
            .map(|path| reference(&path))
            .map(|r| (r.clone(), ItemRecord::new(r)))
            .collect(),
        TaskKind::ImagesToText => {
            let dirs: BTreeSet<String> = files_with(input_root, IMAGE_EXTENSIONS)
                .filter_map(|path| path.parent().map(reference))
                .collect();
            dirs.into_iter()
                .map(|r| (r.clone(), ItemRecord::new(r)))
                .collect()
        }
    };

    info!(
        "Scanned {} for {}: {} items",
        input_root.display(),
        kind,
        items.len()
    );
    Ok(items)
}

/// Regular files below `root` whose extension is in `extensions`.
fn files_with<'a>(
    root: &Path,
    extensions: &'a [&'a str],
) -> impl Iterator<Item = std::path::PathBuf> + 'a {
    WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(e) => Some(e),
            Err(e) => {
                warn!("Skipping unreadable entry during scan: {}", e);
                None
            }
        })
        .filter(|e| e.file_type().is_file())
        .filter(move |e| has_extension(e.path(), extensions))
        .map(|e| {
            debug!("Found {}", e.path().display());
            e.into_path()
        })
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|s| s.starts_with('.'))
        .unwrap_or(false)
}

/// Case-insensitive extension check.
pub fn has_extension(path: &Path, extensions: &[&str]) -> bool {
    path.extension()
        .and_then(OsStr::to_str)
        .map(|ext| extensions.iter().any(|e| ext.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

fn reference(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ItemStatus;
    use std::fs;
    use tempfile::TempDir;

    fn touch(root: &Path, rel: &str) {
        let p = root.join(rel);
        fs::create_dir_all(p.parent().unwrap()).unwrap();
        fs::write(p, b"x").unwrap();
    }

    #[test]
    fn documents_are_found_recursively_and_sorted() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "b.pdf");
        touch(root, "a/z.PDF");
        touch(root, "a/notes.txt");
        touch(root, "a/deep/c.pdf");
        touch(root, ".cache/hidden.pdf");

        let items = scan(TaskKind::DocumentToImages, root).unwrap();
        let keys: Vec<_> = items.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                reference(&root.join("a/deep/c.pdf")),
                reference(&root.join("a/z.PDF")),
                reference(&root.join("b.pdf")),
            ]
        );
        assert!(items.values().all(|i| i.status == ItemStatus::Pending));
    }

    #[test]
    fn full_pipeline_enumerates_like_document_to_images() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "x/1.pdf");
        touch(dir.path(), "2.pdf");
        let a = scan(TaskKind::DocumentToImages, dir.path()).unwrap();
        let b = scan(TaskKind::FullPipeline, dir.path()).unwrap();
        assert_eq!(
            a.keys().collect::<Vec<_>>(),
            b.keys().collect::<Vec<_>>()
        );
    }

    #[test]
    fn image_directories_are_the_unit() {
        let dir = TempDir::new().unwrap();
        let root = dir.path();
        touch(root, "reports/q1/page_001.jpg");
        touch(root, "reports/q1/page_002.jpg");
        touch(root, "reports/q2/page_001.png");
        touch(root, "reports/readme.md");
        touch(root, "empty/notes.txt");

        let items = scan(TaskKind::ImagesToText, root).unwrap();
        let keys: Vec<_> = items.keys().cloned().collect();
        assert_eq!(
            keys,
            vec![
                reference(&root.join("reports/q1")),
                reference(&root.join("reports/q2")),
            ]
        );
    }

    #[test]
    fn empty_root_yields_no_items() {
        let dir = TempDir::new().unwrap();
        assert!(scan(TaskKind::ImagesToText, dir.path()).unwrap().is_empty());
    }

    #[test]
    fn missing_root_is_scan_error() {
        let err = scan(TaskKind::DocumentToImages, Path::new("/no/such/input")).unwrap_err();
        assert!(matches!(err, TaskError::Scan { .. }));
    }

    #[test]
    fn file_root_is_scan_error() {
        let dir = TempDir::new().unwrap();
        touch(dir.path(), "a.pdf");
        let err = scan(TaskKind::DocumentToImages, &dir.path().join("a.pdf")).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
