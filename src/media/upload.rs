//! Multipart upload intake for media analysis.
//!
//! The type check happens on the part headers and the size check while the
//! body streams in, so a bad upload is rejected before anything is sent to
//! the generative API. An oversized part is cut off at the limit; the rest
//! of it is never read.

use actix_multipart::Multipart;
use base64::{engine::general_purpose::STANDARD, Engine};
use futures_util::StreamExt;
use serde::Serialize;
use std::fmt;
use tracing::debug;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadError {
    /// `received` counts bytes read before the part was cut off
    TooLarge { received: usize, limit: usize },
    UnsupportedType(String),
    /// No part with the expected field name
    Missing,
    Read(String),
}

impl fmt::Display for UploadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UploadError::TooLarge { limit, .. } => write!(
                f,
                "File too large: exceeds the {:.1} MB limit",
                *limit as f64 / BYTES_PER_MB
            ),
            UploadError::UnsupportedType(mime) => {
                write!(f, "Unsupported media type '{}': upload an image or a video", mime)
            }
            UploadError::Missing => write!(f, "No media file provided"),
            UploadError::Read(msg) => write!(f, "Failed to read upload: {}", msg),
        }
    }
}

impl std::error::Error for UploadError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
    Video,
}

/// Only images and videos can be analysed.
pub fn classify(mime_type: &str) -> Result<MediaKind, UploadError> {
    let essence = mime_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    if essence.starts_with("image/") {
        Ok(MediaKind::Image)
    } else if essence.starts_with("video/") {
        Ok(MediaKind::Video)
    } else {
        Err(UploadError::UnsupportedType(mime_type.to_string()))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    pub max_bytes: usize,
}

impl UploadPolicy {
    pub fn new(max_bytes: usize) -> Self {
        Self { max_bytes }
    }

    pub fn check_size(&self, size: usize) -> Result<(), UploadError> {
        if size > self.max_bytes {
            Err(UploadError::TooLarge { received: size, limit: self.max_bytes })
        } else {
            Ok(())
        }
    }
}

#[derive(Debug, Clone)]
pub struct MediaUpload {
    pub kind: MediaKind,
    pub mime_type: String,
    pub filename: Option<String>,
    pub bytes: Vec<u8>,
}

impl MediaUpload {
    pub fn to_base64(&self) -> String {
        STANDARD.encode(&self.bytes)
    }
}

/// Read the part named `field_name` from a multipart body.
///
/// Returns as soon as the part grows past the limit.
pub async fn read_media_field(
    payload: &mut Multipart,
    field_name: &str,
    policy: UploadPolicy,
) -> Result<MediaUpload, UploadError> {
    while let Some(item) = payload.next().await {
        let mut field = item.map_err(|e| UploadError::Read(e.to_string()))?;

        let Some(disposition) = field.content_disposition() else {
            continue;
        };
        if disposition.get_name() != Some(field_name) {
            continue;
        }
        let filename = disposition.get_filename().map(str::to_string);

        let mime_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());
        let kind = classify(&mime_type)?;

        let mut bytes = Vec::new();
        while let Some(chunk) = field.next().await {
            let chunk = chunk.map_err(|e| UploadError::Read(e.to_string()))?;
            policy.check_size(bytes.len() + chunk.len())?;
            bytes.extend_from_slice(&chunk);
        }

        debug!(?kind, %mime_type, size = bytes.len(), "Media upload received");
        return Ok(MediaUpload { kind, mime_type, filename, bytes });
    }

    Err(UploadError::Missing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sixteen_megabytes_against_fifteen() {
        let policy = UploadPolicy::new(15 * 1024 * 1024);
        let err = policy.check_size(16 * 1024 * 1024).unwrap_err();

        assert_eq!(
            err,
            UploadError::TooLarge { received: 16 * 1024 * 1024, limit: 15 * 1024 * 1024 }
        );
        assert_eq!(err.to_string(), "File too large: exceeds the 15.0 MB limit");
    }

    #[test]
    fn test_size_at_limit_is_accepted() {
        let policy = UploadPolicy::new(1024);
        assert!(policy.check_size(1024).is_ok());
        assert!(policy.check_size(0).is_ok());
    }

    #[actix_web::test]
    async fn test_oversized_part_is_cut_off_early() {
        use actix_web::http::header::{self, HeaderMap, HeaderValue};
        use actix_web::web::Bytes;
        use futures_util::stream;
        use std::sync::atomic::{AtomicUsize, Ordering};
        use std::sync::Arc;

        const CHUNKS: usize = 4096;
        let pulled = Arc::new(AtomicUsize::new(0));

        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("multipart/form-data; boundary=cut"),
        );

        let head = Bytes::from_static(
            b"--cut\r\nContent-Disposition: form-data; name=\"media\"; filename=\"big.mp4\"\r\nContent-Type: video/mp4\r\n\r\n",
        );
        let body = (0..CHUNKS).map(|_| Bytes::from(vec![0u8; 1024]));
        let tail = Bytes::from_static(b"\r\n--cut--\r\n");

        let counter = pulled.clone();
        // One chunk per poll, so the parser cannot read ahead of the field.
        let payload = stream::iter(std::iter::once(head).chain(body).chain(std::iter::once(tail)))
            .then(|chunk| async move {
                tokio::task::yield_now().await;
                chunk
            })
            .inspect(move |_| {
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .map(Ok::<_, actix_web::error::PayloadError>);

        let mut multipart = Multipart::new(&headers, payload);
        let err = read_media_field(&mut multipart, "media", UploadPolicy::new(4096))
            .await
            .unwrap_err();

        assert!(matches!(err, UploadError::TooLarge { limit: 4096, .. }));
        assert!(pulled.load(Ordering::SeqCst) < 64, "read far past the limit");
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify("image/jpeg"), Ok(MediaKind::Image));
        assert_eq!(classify("Video/MP4; codecs=avc1"), Ok(MediaKind::Video));
        assert_eq!(
            classify("application/pdf"),
            Err(UploadError::UnsupportedType("application/pdf".to_string()))
        );
    }
}
