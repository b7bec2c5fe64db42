//! Image processing backend trait and shared types.
//!
//! The [`ImageBackend`] trait defines the four operations the slicer needs:
//! identify, decode, crop (with optional resize) and encode. Everything works
//! on in-memory buffers; uploads never touch the filesystem.
//!
//! The production implementation is
//! [`RustBackend`](super::rust_backend::RustBackend), built on the `image`
//! crate. Tests use the recording `MockBackend` from this module's test
//! submodule.

use super::params::{CropParams, EncodeParams};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BackendError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Unreadable image: {0}")]
    Unreadable(String),
    #[error("Processing failed: {0}")]
    ProcessingFailed(String),
}

/// Result of an identify operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// A decoded raster. Immutable once decoded; every crop produces a new one.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pixels: DynamicImage,
}

impl SourceImage {
    pub fn new(pixels: DynamicImage) -> Self {
        Self { pixels }
    }

    /// Black single-channel image, used where only the geometry matters.
    pub fn blank(width: u32, height: u32) -> Self {
        Self::new(DynamicImage::new_luma8(width, height))
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.pixels.width(),
            height: self.pixels.height(),
        }
    }

    pub fn pixels(&self) -> &DynamicImage {
        &self.pixels
    }

    pub fn into_pixels(self) -> DynamicImage {
        self.pixels
    }
}

/// Trait for image processing backends.
///
/// `Send + Sync` because slices are rendered in parallel from a shared
/// backend reference.
pub trait ImageBackend: Send + Sync {
    /// Read dimensions from the header without decoding pixels.
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError>;

    /// Decode the full image.
    fn decode(&self, bytes: &[u8]) -> Result<SourceImage, BackendError>;

    /// Crop `params.rect` (which must lie inside `image`) and apply the
    /// optional resize.
    fn crop(&self, image: &SourceImage, params: &CropParams) -> Result<SourceImage, BackendError>;

    /// Encode an image into an in-memory buffer.
    fn encode(&self, image: &SourceImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError>;
}
