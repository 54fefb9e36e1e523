//! # Media Uploads
//!
//! Validation of images and videos the user uploads for script analysis.
//!
//! ## Rules:
//! - **Type**: `image/*` or `video/*`, anything else is rejected
//! - **Size**: at most `media.max_upload_bytes` (15 MB by default)

pub mod upload;

pub use upload::{read_media_field, UploadError, UploadPolicy};
