//! Response metadata for stored objects.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Uploads are content addressed, so they never change once written.
pub const CACHE_CONTROL: &str = "max-age=31556952, public, immutable";

/// Secure uploads must not sit in shared caches.
pub const PRIVATE_CACHE_CONTROL: &str = "private, max-age=0, no-store";

/// Extensions browsers render inline. Anything else is served as an attachment.
///
/// SVG is deliberately absent: inline SVG can carry script.
pub const INLINE_IMAGE_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "webp", "avif", "ico", "bmp", "tif", "tiff", "heic", "heif",
];

fn extension_of(filename: &str) -> Option<String> {
    filename
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .filter(|ext| !ext.is_empty() && !ext.contains('/'))
}

pub fn is_inline_image(filename: &str) -> bool {
    extension_of(filename)
        .map(|ext| INLINE_IMAGE_EXTENSIONS.contains(&ext.as_str()))
        .unwrap_or(false)
}

pub fn content_type_for(filename: &str) -> String {
    mime_guess::from_path(filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string()
}

/// `Content-Disposition` header forcing a download under the original name.
pub fn content_disposition(filename: &str) -> String {
    let ascii: String = filename
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c.is_ascii() && !c.is_ascii_control() => c,
            _ => '_',
        })
        .collect();
    format!(
        "attachment; filename=\"{}\"; filename*=UTF-8''{}",
        ascii,
        urlencoding::encode(filename)
    )
}

/// Base64 SHA-256 of the content, recorded as object metadata.
pub fn checksum(data: &[u8]) -> String {
    STANDARD.encode(Sha256::digest(data))
}
