//! Image attachments
//!
//! Images are sent inline as `data:<mime>;base64,<payload>` references, the
//! same form the chat service stores and echoes back in thread history.

use std::path::Path;

use base64::Engine;
use image::GenericImageView;

use crate::error::{ChatError, Result};

/// An image file ready to attach to a submission
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageAttachment {
    /// Detected MIME type, e.g. `image/png`
    pub mime_type: String,
    /// Width in pixels
    pub width: u32,
    /// Height in pixels
    pub height: u32,
    /// Size of the file in bytes
    pub size: u64,
    /// `data:` URL carrying the file contents
    pub data_url: String,
}

/// Read and encode an image file
///
/// The format is detected from the file contents, not the extension, and
/// the image is decoded once to make sure it is usable.
///
/// # Arguments
///
/// * `path` - Image file to read
/// * `max_bytes` - Largest accepted file size
///
/// # Errors
///
/// Returns `ChatError::Attachment` if the file is missing, larger than
/// `max_bytes`, not a recognised image format, or cannot be decoded
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use chatstream::attachment::load_image;
///
/// # async fn example() -> chatstream::error::Result<()> {
/// let image = load_image(Path::new("cat.png"), 5 * 1024 * 1024).await?;
/// assert!(image.data_url.starts_with("data:image/png;base64,"));
/// # Ok(())
/// # }
/// ```
pub async fn load_image(path: &Path, max_bytes: u64) -> Result<ImageAttachment> {
    let metadata = tokio::fs::metadata(path).await.map_err(|e| {
        ChatError::Attachment(format!("Cannot read {}: {}", path.display(), e))
    })?;
    if !metadata.is_file() {
        return Err(ChatError::Attachment(format!("{} is not a file", path.display())).into());
    }
    if metadata.len() > max_bytes {
        return Err(ChatError::Attachment(format!(
            "{} is {} bytes, the limit is {} bytes",
            path.display(),
            metadata.len(),
            max_bytes
        ))
        .into());
    }

    let bytes = tokio::fs::read(path).await.map_err(|e| {
        ChatError::Attachment(format!("Cannot read {}: {}", path.display(), e))
    })?;
    let attachment = encode_image(&bytes)?;
    tracing::debug!(
        path = %path.display(),
        mime = %attachment.mime_type,
        width = attachment.width,
        height = attachment.height,
        "Loaded image attachment"
    );
    Ok(attachment)
}

/// Encode in-memory image bytes as an attachment
///
/// # Errors
///
/// Returns `ChatError::Attachment` for unrecognised or undecodable data
pub fn encode_image(bytes: &[u8]) -> Result<ImageAttachment> {
    let format = image::guess_format(bytes)
        .map_err(|e| ChatError::Attachment(format!("Unsupported image format: {}", e)))?;
    let decoded = image::load_from_memory_with_format(bytes, format)
        .map_err(|e| ChatError::Attachment(format!("Image decoding failed: {}", e)))?;
    let (width, height) = decoded.dimensions();

    let mime_type = format.to_mime_type().to_string();
    let payload = base64::engine::general_purpose::STANDARD.encode(bytes);

    Ok(ImageAttachment {
        data_url: format!("data:{};base64,{}", mime_type, payload),
        mime_type,
        width,
        height,
        size: bytes.len() as u64,
    })
}

/// Returns true for inline `data:` image references
pub fn is_data_url(reference: &str) -> bool {
    reference.starts_with("data:")
}
