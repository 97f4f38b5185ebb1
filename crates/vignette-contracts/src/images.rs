use std::fmt;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;

pub const DEFAULT_IMAGE_MIME: &str = "image/png";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ImageRefError {
    #[error("image reference is not a data URI")]
    MissingScheme,
    #[error("image reference has no payload separator")]
    MissingPayload,
    #[error("image reference is not base64 encoded")]
    NotBase64,
    #[error("image reference has an empty mime type")]
    EmptyMime,
    #[error("image reference payload is empty")]
    EmptyPayload,
    #[error("image reference payload failed to decode: {0}")]
    Decode(String),
}

/// A self-describing image payload: mime type plus raw bytes.
///
/// Bytes are shared, so snapshots pushed onto the history stack are cheap
/// clones and can never be mutated after the fact.
#[derive(Clone, PartialEq, Eq)]
pub struct ImageRef {
    mime_type: String,
    bytes: Arc<[u8]>,
}

impl ImageRef {
    pub fn new(mime_type: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let mime_type = mime_type.into();
        let mime_type = if mime_type.trim().is_empty() {
            DEFAULT_IMAGE_MIME.to_string()
        } else {
            mime_type.trim().to_ascii_lowercase()
        };
        Self {
            mime_type,
            bytes: Arc::from(bytes.into()),
        }
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    pub fn to_base64(&self) -> String {
        BASE64.encode(&self.bytes)
    }

    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.to_base64())
    }

    /// Splits a `data:<mime>;base64,<payload>` reference back into its parts.
    pub fn from_data_uri(raw: &str) -> Result<Self, ImageRefError> {
        let trimmed = raw.trim();
        let Some(rest) = trimmed.strip_prefix("data:") else {
            return Err(ImageRefError::MissingScheme);
        };
        let Some((header, payload)) = rest.split_once(',') else {
            return Err(ImageRefError::MissingPayload);
        };
        let Some(mime) = header.strip_suffix(";base64") else {
            return Err(ImageRefError::NotBase64);
        };
        if mime.trim().is_empty() {
            return Err(ImageRefError::EmptyMime);
        }
        if payload.trim().is_empty() {
            return Err(ImageRefError::EmptyPayload);
        }
        let bytes = BASE64
            .decode(payload.trim().as_bytes())
            .map_err(|err| ImageRefError::Decode(err.to_string()))?;
        Ok(Self::new(mime, bytes))
    }

    pub fn from_base64(mime_type: &str, data: &str) -> Result<Self, ImageRefError> {
        let bytes = BASE64
            .decode(data.trim().as_bytes())
            .map_err(|err| ImageRefError::Decode(err.to_string()))?;
        if bytes.is_empty() {
            return Err(ImageRefError::EmptyPayload);
        }
        Ok(Self::new(mime_type, bytes))
    }

    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" | "image/jpg" => "jpg",
            "image/webp" => "webp",
            "image/gif" => "gif",
            _ => "png",
        }
    }
}

impl fmt::Debug for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImageRef")
            .field("mime_type", &self.mime_type)
            .field("len", &self.bytes.len())
            .finish()
    }
}

pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.trim().to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "webp" => "image/webp",
        "gif" => "image/gif",
        _ => DEFAULT_IMAGE_MIME,
    }
}
