//! PDF rasterisation: render every page of a document into image files.
//!
//! ## Why spawn_blocking?
//!
//! The `pdfium-render` crate wraps the pdfium C++ library, which uses
//! thread-local state internally and is not safe to call from async contexts.
//! `tokio::task::spawn_blocking` moves the work onto the blocking pool so
//! rendering a long document does not stall the runtime, and in particular
//! does not delay the checkpoint ticker.
//!
//! ## Why cap pixels as well as DPI?
//!
//! Pages are scaled by `dpi / 72` (PDF user space is 72 units per inch), but
//! page sizes vary wildly: an A0 poster at 200 DPI would produce a
//! 6,600 × 9,300 px image. `max_rendered_pixels` caps both edges regardless
//! of physical size, keeping memory bounded and the images in the size range
//! vision models handle well.
//!
//! ## Output layout
//!
//! ```text
//! out_dir/
//! ├── page_001.jpg
//! ├── page_002.jpg
//! └── …
//! ```
//!
//! Page images left over from an earlier render of the same item are removed
//! first, so a re-run never leaves stale trailing pages behind.

use crate::config::{PageImageFormat, RenderSettings};
use crate::error::ProcessorError;
use crate::scan::IMAGE_EXTENSIONS;
use image::codecs::jpeg::JpegEncoder;
use image::DynamicImage;
use once_cell::sync::Lazy;
use pdfium_render::prelude::*;
use regex::Regex;
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// PDF user-space units per inch.
const POINTS_PER_INCH: f32 = 72.0;

static RE_PAGE_FILE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^page_\d+$").unwrap());

/// File name of the 1-based `page` in the given format.
pub fn page_file_name(page: usize, format: PageImageFormat) -> String {
    format!("page_{:03}.{}", page, format.extension())
}

/// Render every page of `pdf_path` into `out_dir`.
///
/// Returns the number of pages written.
pub async fn render_document(
    pdf_path: &Path,
    out_dir: &Path,
    settings: &RenderSettings,
) -> Result<usize, ProcessorError> {
    let pdf = pdf_path.to_path_buf();
    let dir = out_dir.to_path_buf();
    let settings = settings.clone();

    tokio::task::spawn_blocking(move || render_document_blocking(&pdf, &dir, &settings))
        .await
        .map_err(|e| ProcessorError::Internal(format!("Render task panicked: {}", e)))?
}

/// Bind pdfium: `lib_path` first if given, then the system library.
pub fn bind_pdfium(lib_path: Option<&Path>) -> Result<Pdfium, ProcessorError> {
    let bindings = match lib_path {
        Some(dir) => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path(dir))
            .or_else(|_| Pdfium::bind_to_system_library()),
        None => Pdfium::bind_to_system_library(),
    }
    .map_err(|e| ProcessorError::PdfiumBindingFailed(format!("{:?}", e)))?;

    Ok(Pdfium::new(bindings))
}

fn render_document_blocking(
    pdf_path: &Path,
    out_dir: &Path,
    settings: &RenderSettings,
) -> Result<usize, ProcessorError> {
    let pdfium = bind_pdfium(settings.pdfium_lib_path.as_deref())?;
    let password = settings.password.as_deref();

    let document = pdfium.load_pdf_from_file(pdf_path, password).map_err(|e| {
        let err_str = format!("{:?}", e);
        if err_str.contains("Password") || err_str.contains("password") {
            ProcessorError::PasswordRequired {
                path: pdf_path.to_path_buf(),
            }
        } else {
            ProcessorError::CorruptPdf {
                path: pdf_path.to_path_buf(),
                detail: err_str,
            }
        }
    })?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    info!("{}: {} pages", pdf_path.display(), total_pages);

    fs::create_dir_all(out_dir).map_err(|e| ProcessorError::OutputWriteFailed {
        path: out_dir.to_path_buf(),
        source: e,
    })?;
    remove_stale_pages(out_dir)?;

    let max = settings.max_rendered_pixels as i32;
    let render_config = PdfRenderConfig::new()
        .scale_page_by_factor(settings.dpi as f32 / POINTS_PER_INCH)
        .set_maximum_width(max)
        .set_maximum_height(max);

    for (idx, page) in pages.iter().enumerate() {
        let page_num = idx + 1;
        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ProcessorError::RasterisationFailed {
                page: page_num,
                detail: format!("{:?}", e),
            }
        })?;

        let image = bitmap.as_image();
        let path = out_dir.join(page_file_name(page_num, settings.image_format));
        save_page(&image, &path, settings)?;
        debug!(
            "Rendered page {} → {} ({}x{} px)",
            page_num,
            path.display(),
            image.width(),
            image.height()
        );
    }

    Ok(total_pages)
}

/// Write one page image via a temp file in the same directory.
fn save_page(image: &DynamicImage, path: &Path, settings: &RenderSettings) -> Result<(), ProcessorError> {
    let write_err = |e: std::io::Error| ProcessorError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;

    {
        let mut writer = BufWriter::new(tmp.as_file());
        encode_into(image, &mut writer, settings)
            .map_err(|e| write_err(std::io::Error::other(e)))?;
        writer.flush().map_err(write_err)?;
    }

    tmp.persist(path).map_err(|e| write_err(e.error))?;
    Ok(())
}

fn encode_into<W: Write>(
    image: &DynamicImage,
    writer: &mut W,
    settings: &RenderSettings,
) -> image::ImageResult<()> {
    match settings.image_format {
        PageImageFormat::Jpeg => {
            // JPEG has no alpha channel.
            let rgb = image.to_rgb8();
            JpegEncoder::new_with_quality(writer, settings.quality).encode_image(&rgb)
        }
        PageImageFormat::Png => {
            let mut buf = Vec::new();
            image.write_to(&mut std::io::Cursor::new(&mut buf), image::ImageFormat::Png)?;
            writer.write_all(&buf).map_err(image::ImageError::IoError)
        }
    }
}

/// Delete `page_NNN.<image ext>` files from an earlier render.
fn remove_stale_pages(dir: &Path) -> Result<(), ProcessorError> {
    let entries = fs::read_dir(dir).map_err(|e| ProcessorError::OutputWriteFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let stale: Vec<PathBuf> = entries
        .filter_map(Result::ok)
        .map(|e| e.path())
        .filter(|p| is_page_image(p))
        .collect();

    for path in stale {
        fs::remove_file(&path).map_err(|e| ProcessorError::OutputWriteFailed {
            path: path.clone(),
            source: e,
        })?;
    }
    Ok(())
}

fn is_page_image(path: &Path) -> bool {
    let stem_matches = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(|s| RE_PAGE_FILE.is_match(s))
        .unwrap_or(false);
    stem_matches && crate::scan::has_extension(path, IMAGE_EXTENSIONS)
}
