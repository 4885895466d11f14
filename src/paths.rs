//! Output locations for work items.
//!
//! [`map_output`] is a pure function of its arguments: the orchestrator calls
//! it again on every run instead of trusting a stored value, so the mapping
//! must never drift between runs.
//!
//! | Kind | Item | Output |
//! |------|------|--------|
//! | `document-to-images` | `in/a/doc.pdf` | `out/a/doc/` |
//! | `images-to-text` | `in/reports/doc/` | `out/reports/doc.md` |
//! | `full-pipeline` | `in/a/doc.pdf` | `out/a/doc.md` |
//!
//! ## Collisions
//!
//! A mapping that copies the item's relative path verbatim (minus a
//! lowercase `.pdf`) cannot collide with another verbatim mapping. When the
//! copy is not verbatim (a segment had to be sanitised, the extension is
//! spelled `.PDF`, the item lies outside the input root, or an image
//! directory is not exactly two levels deep) the final name gets a
//! `-<10 hex>` suffix from the SHA-256 of the item's relative path.

use crate::model::TaskKind;
use sha2::{Digest, Sha256};
use std::ffi::OsStr;
use std::path::{Component, Path, PathBuf};

/// Characters replaced by `_` in every emitted path segment.
const UNSAFE_CHARS: &[char] = &['<', '>', ':', '"', '/', '\\', '|', '?', '*', '：'];

/// Extension of transcription outputs.
pub const TEXT_EXTENSION: &str = "md";

/// Derive the output location of `item_reference` for a `kind` task.
pub fn map_output(
    item_reference: &str,
    input_root: &Path,
    output_root: &Path,
    kind: TaskKind,
) -> PathBuf {
    let item = Path::new(item_reference);
    let relative = relative_segments(item, input_root);

    match kind {
        TaskKind::DocumentToImages => map_document(item, relative, output_root, None),
        TaskKind::FullPipeline => map_document(item, relative, output_root, Some(TEXT_EXTENSION)),
        TaskKind::ImagesToText => map_image_dir(item, relative, input_root, output_root),
    }
}

/// Make `name` usable as a single path segment.
pub fn sanitize_segment(name: &str) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| {
            if UNSAFE_CHARS.contains(&c) || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();
    match cleaned.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => cleaned,
    }
}

/// Path of the item relative to the input root, one string per segment.
/// `None` when the item is not below the root.
fn relative_segments(item: &Path, input_root: &Path) -> Option<Vec<Segment>> {
    let rel = item.strip_prefix(input_root).ok()?;
    Some(
        rel.components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(Segment::new(s)),
                _ => None,
            })
            .collect(),
    )
}

/// One emitted path segment and whether it differs from the source name.
#[derive(Debug, Clone)]
struct Segment {
    original: String,
    safe: String,
    altered: bool,
}

impl Segment {
    fn new(os: &OsStr) -> Self {
        let (original, lossy) = match os.to_str() {
            Some(s) => (s.to_string(), false),
            None => (os.to_string_lossy().into_owned(), true),
        };
        let safe = sanitize_segment(&original);
        let altered = lossy || safe != original;
        Self {
            original,
            safe,
            altered,
        }
    }

    fn of(name: Option<&OsStr>) -> Self {
        Self::new(name.unwrap_or_else(|| OsStr::new("")))
    }
}

fn map_document(
    item: &Path,
    relative: Option<Vec<Segment>>,
    output_root: &Path,
    extension: Option<&str>,
) -> PathBuf {
    let (hash_key, mut segments, verbatim) = match relative {
        Some(segs) if !segs.is_empty() => {
            let key = join(&segs);
            (key, segs, true)
        }
        _ => (
            item.to_string_lossy().into_owned(),
            vec![Segment::of(item.file_name())],
            false,
        ),
    };

    let last = segments.pop().unwrap_or_else(|| Segment::of(None));
    let file = Path::new(&last.original);
    let stem = Segment::of(file.file_stem());
    let canonical_ext = file.extension() == Some(OsStr::new("pdf"));

    let faithful =
        verbatim && canonical_ext && !stem.altered && segments.iter().all(|s| !s.altered);

    let mut name = stem.safe;
    if !faithful {
        name = format!("{}-{}", name, short_hash(&hash_key));
    }
    if let Some(ext) = extension {
        name = format!("{name}.{ext}");
    }

    let mut out = output_root.to_path_buf();
    out.extend(segments.iter().map(|s| s.safe.as_str()));
    out.push(name);
    out
}

fn map_image_dir(
    item: &Path,
    relative: Option<Vec<Segment>>,
    input_root: &Path,
    output_root: &Path,
) -> PathBuf {
    let (leaf, parent, hash_key, depth_two) = match relative {
        Some(segs) => {
            let key = join(&segs);
            match segs.as_slice() {
                [parent, leaf] => (leaf.clone(), parent.clone(), key, true),
                [.., parent, leaf] => (leaf.clone(), parent.clone(), key, false),
                [leaf] => (leaf.clone(), Segment::of(input_root.file_name()), key, false),
                [] => (
                    Segment::of(input_root.file_name()),
                    Segment::of(input_root.parent().and_then(Path::file_name)),
                    key,
                    false,
                ),
            }
        }
        None => (
            Segment::of(item.file_name()),
            Segment::of(item.parent().and_then(Path::file_name)),
            item.to_string_lossy().into_owned(),
            false,
        ),
    };

    let faithful = depth_two && !leaf.altered && !parent.altered;
    let name = if faithful {
        leaf.safe
    } else {
        format!("{}-{}", leaf.safe, short_hash(&hash_key))
    };

    output_root
        .join(parent.safe)
        .join(format!("{name}.{TEXT_EXTENSION}"))
}

fn join(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|s| s.original.as_str())
        .collect::<Vec<_>>()
        .join("/")
}

/// First 10 hex digits of SHA-256.
pub(crate) fn short_hash(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let hex = format!("{:x}", digest);
    hex[..10].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn map(item: &str, kind: TaskKind) -> PathBuf {
        map_output(item, Path::new("/in"), Path::new("/out"), kind)
    }

    #[test]
    fn document_to_images_preserves_relative_dirs() {
        assert_eq!(
            map("/in/a/b/report.pdf", TaskKind::DocumentToImages),
            PathBuf::from("/out/a/b/report")
        );
        assert_eq!(
            map("/in/report.pdf", TaskKind::DocumentToImages),
            PathBuf::from("/out/report")
        );
    }

    #[test]
    fn full_pipeline_emits_markdown_file() {
        assert_eq!(
            map("/in/a/report.pdf", TaskKind::FullPipeline),
            PathBuf::from("/out/a/report.md")
        );
    }

    #[test]
    fn images_to_text_uses_parent_and_leaf() {
        assert_eq!(
            map("/in/2023/report", TaskKind::ImagesToText),
            PathBuf::from("/out/2023/report.md")
        );
    }

    #[test]
    fn mapping_is_deterministic() {
        for kind in TaskKind::ALL {
            let a = map("/in/x/y：z/doc.PDF", kind);
            let b = map("/in/x/y：z/doc.PDF", kind);
            assert_eq!(a, b);
        }
    }

    #[test]
    fn sanitised_names_get_a_suffix() {
        let out = map("/in/第1章：序/doc", TaskKind::ImagesToText);
        let parent = out.parent().unwrap().file_name().unwrap().to_str().unwrap();
        assert_eq!(parent, "第1章_序");
        let name = out.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("doc-") && name.ends_with(".md"), "got {name}");
    }

    #[test]
    fn sanitize_replaces_reserved_characters() {
        assert_eq!(sanitize_segment("a:b|c?d"), "a_b_c_d");
        assert_eq!(sanitize_segment("x：y"), "x_y");
        assert_eq!(sanitize_segment(".."), "_");
        assert_eq!(sanitize_segment(""), "_");
        assert_eq!(sanitize_segment("tab\there"), "tab_here");
    }

    #[test]
    fn distinct_items_never_collide() {
        let images = [
            "/in/a/x/p/leaf",
            "/in/b/y/p/leaf",
            "/in/p/leaf",
            "/in/leaf",
            "/in/q:r/leaf",
            "/in/q_r/leaf",
            "/in",
        ];
        let docs = [
            "/in/a/doc.pdf",
            "/in/a/doc.PDF",
            "/in/a/doc:1.pdf",
            "/in/a/doc_1.pdf",
            "/elsewhere/a/doc.pdf",
            "/elsewhere/b/doc.pdf",
            "/in/doc.pdf",
        ];

        let check = |kind: TaskKind, items: &[&str]| {
            let outs: HashSet<PathBuf> = items.iter().map(|i| map(i, kind)).collect();
            assert_eq!(outs.len(), items.len(), "collision for {kind}: {outs:?}");
        };
        check(TaskKind::ImagesToText, &images);
        check(TaskKind::DocumentToImages, &docs);
        check(TaskKind::FullPipeline, &docs);
    }

    #[test]
    fn item_outside_root_falls_back_to_file_name() {
        let out = map("/elsewhere/doc.pdf", TaskKind::FullPipeline);
        assert_eq!(out.parent().unwrap(), Path::new("/out"));
        let name = out.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("doc-") && name.ends_with(".md"));
    }
}
