//! Upload checks run before a job is created.
//!
//! Everything here is pure: it inspects bytes and names and either accepts
//! the upload or returns [`CoreError::Validation`]. No file is staged for an
//! upload that fails these checks.

use std::io::Cursor;

use image::{ImageFormat, ImageReader};

use crate::error::CoreError;

/// Longest file name kept after sanitizing. Longer names are truncated
/// (keeping the extension) so staged paths stay well under `NAME_MAX`.
pub const MAX_FILENAME_LEN: usize = 120;

/// An upload that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedUpload {
    /// Sanitized file name, safe to embed in a staging path.
    pub filename: String,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

/// Check that `bytes` is a decodable PNG, JPEG or WebP image and that
/// `filename` yields a usable staging name.
///
/// The format is sniffed from the content, not the extension; only the
/// header is parsed.
pub fn validate_upload(filename: &str, bytes: &[u8]) -> Result<ValidatedUpload, CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::Validation("Uploaded file is empty".into()));
    }

    let filename = sanitize_filename(filename)
        .ok_or_else(|| CoreError::Validation("Uploaded file has no usable name".into()))?;

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| CoreError::Validation(format!("Could not read upload: {e}")))?;

    let format = match reader.format() {
        Some(f @ (ImageFormat::Png | ImageFormat::Jpeg | ImageFormat::WebP)) => f,
        Some(other) => {
            return Err(CoreError::Validation(format!(
                "Unsupported image format {other:?}. Supported: PNG, JPEG, WebP"
            )))
        }
        None => {
            return Err(CoreError::Validation(format!(
                "'{filename}' is not a recognizable image"
            )))
        }
    };

    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| CoreError::Validation(format!("'{filename}' could not be decoded: {e}")))?;

    if width == 0 || height == 0 {
        return Err(CoreError::Validation(format!(
            "'{filename}' has zero-sized dimensions"
        )));
    }

    Ok(ValidatedUpload {
        filename,
        format,
        width,
        height,
    })
}

/// Reduce a client-supplied file name to a single safe path component.
///
/// Directory parts are dropped, anything outside `[A-Za-z0-9._-]` becomes
/// `_`, and leading dots are stripped so the result can never be hidden or
/// refer to a parent directory. Returns `None` if nothing usable is left.
pub fn sanitize_filename(raw: &str) -> Option<String> {
    let base = raw.rsplit(['/', '\\']).next().unwrap_or_default();

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');

    if cleaned.is_empty() || cleaned.chars().all(|c| c == '_') {
        return None;
    }

    if cleaned.len() <= MAX_FILENAME_LEN {
        return Some(cleaned.to_string());
    }

    // Keep the extension when truncating. The name is ASCII at this point so
    // byte slicing is safe.
    match cleaned.rsplit_once('.') {
        Some((stem, ext)) if ext.len() < 16 => {
            let keep = MAX_FILENAME_LEN.saturating_sub(ext.len() + 1);
            Some(format!("{}.{ext}", &stem[..keep.min(stem.len())]))
        }
        _ => Some(cleaned[..MAX_FILENAME_LEN].to_string()),
    }
}

impl ValidatedUpload {
    /// MIME type of the sniffed format, whatever the file name says.
    pub fn content_type(&self) -> &'static str {
        content_type_for_format(self.format)
    }
}

/// MIME type for one of the accepted image formats.
pub fn content_type_for_format(format: ImageFormat) -> &'static str {
    match format {
        ImageFormat::Jpeg => "image/jpeg",
        ImageFormat::Png => "image/png",
        ImageFormat::WebP => "image/webp",
        _ => "application/octet-stream",
    }
}

/// MIME type guessed from a file name's extension.
pub fn content_type_for_filename(filename: &str) -> &'static str {
    let ext = filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
