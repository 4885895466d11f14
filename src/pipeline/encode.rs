//! Image encoding: page image file → base64 `ImageData` for the VLM.
//!
//! Page images already sit on disk as JPEG or PNG, so the file bytes are
//! sent as-is instead of being decoded and re-encoded. `detail: "high"`
//! instructs GPT-4-class models to use the full image tile budget; without
//! it fine print and small tables are lost.

use crate::error::ProcessorError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use std::path::Path;
use tracing::debug;

/// MIME type for a page image, by extension. Unknown extensions are sent as
/// JPEG, the format the renderer writes by default.
pub fn mime_type_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => "image/png",
        _ => "image/jpeg",
    }
}

/// Read a page image and wrap it for a multimodal request.
pub async fn encode_image_file(path: &Path) -> Result<ImageData, ProcessorError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|e| ProcessorError::Internal(format!("cannot read {}: {}", path.display(), e)))?;

    let b64 = STANDARD.encode(&bytes);
    debug!("Encoded {} → {} bytes base64", path.display(), b64.len());

    Ok(ImageData::new(b64, mime_type_for(path)).with_detail("high"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn mime_type_follows_extension() {
        assert_eq!(mime_type_for(Path::new("p/page_001.PNG")), "image/png");
        assert_eq!(mime_type_for(Path::new("p/page_001.jpg")), "image/jpeg");
        assert_eq!(mime_type_for(Path::new("p/page_001.jpeg")), "image/jpeg");
    }

    #[tokio::test]
    async fn encode_round_trips_file_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page_001.png");
        std::fs::write(&path, b"\x89PNG fake").unwrap();

        let data = encode_image_file(&path).await.expect("encode should succeed");
        assert_eq!(data.mime_type, "image/png");
        let decoded = STANDARD.decode(&data.data).expect("valid base64");
        assert_eq!(decoded, b"\x89PNG fake");
    }

    #[tokio::test]
    async fn missing_file_is_an_error() {
        let err = encode_image_file(Path::new("/no/such/page.jpg")).await.unwrap_err();
        assert!(err.to_string().contains("/no/such/page.jpg"));
    }
}
