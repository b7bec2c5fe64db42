//! Parameter types for image operations.
//!
//! These structs describe *what* to do, not *how* to do it. They are the
//! interface between the [`operations`](super::operations) executor (which
//! walks a geometry plan) and the [`backend`](super::backend) (which does the
//! actual pixel work). Swapping the backend for a recording mock in tests
//! leaves the executor untouched.
//!
//! ## Types
//!
//! - [`Quality`] — Lossy encoding quality (1–100, default 100). Clamped on construction.
//! - [`OutputFormat`] — The four encodable output formats and their MIME types.
//! - [`PixelRect`] — An integer rectangle, always inside the image it addresses.
//! - [`Resize`] / [`Fit`] — Target canvas for the resize step.
//! - [`CropParams`] — Crop rectangle plus an optional resize.
//! - [`EncodeParams`] — Format, quality and losslessness for one encode.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub struct Quality(u32);

impl Quality {
    pub fn new(value: u32) -> Self {
        Self(value.clamp(1, 100))
    }

    pub fn value(self) -> u32 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(100)
    }
}

impl From<u32> for Quality {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

impl From<Quality> for u32 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

/// Encodable output formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Png,
    Jpeg,
    Webp,
    Avif,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 4] = [Self::Png, Self::Jpeg, Self::Webp, Self::Avif];

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::Webp => "image/webp",
            Self::Avif => "image/avif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
            Self::Webp => "webp",
            Self::Avif => "avif",
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::Webp),
            "avif" => Ok(Self::Avif),
            other => Err(format!(
                "unknown format '{other}' (expected png, jpeg, webp or avif)"
            )),
        }
    }
}

/// An integer pixel rectangle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PixelRect {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(left: u32, top: u32, width: u32, height: u32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> u64 {
        self.left as u64 + self.width as u64
    }

    pub fn bottom(&self) -> u64 {
        self.top as u64 + self.height as u64
    }

    /// Shrink the rectangle so it lies inside a `bounds_w` × `bounds_h` image.
    ///
    /// Returns `None` when nothing is left.
    pub fn clamp_to(&self, bounds_w: u32, bounds_h: u32) -> Option<PixelRect> {
        if self.left >= bounds_w || self.top >= bounds_h {
            return None;
        }
        let width = self.width.min(bounds_w - self.left);
        let height = self.height.min(bounds_h - self.top);
        if width == 0 || height == 0 {
            return None;
        }
        Some(PixelRect::new(self.left, self.top, width, height))
    }
}

impl fmt::Display for PixelRect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{}+{}+{}",
            self.width, self.height, self.left, self.top
        )
    }
}

/// How a crop is mapped onto the resize target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fit {
    /// Stretch to the exact target, ignoring the source aspect.
    Fill,
    /// Scale to cover the target, then center-crop the overflow.
    Cover,
}

/// Target canvas for the resize step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resize {
    pub width: u32,
    pub height: u32,
    pub fit: Fit,
}

/// Crop a rectangle out of an image, optionally resizing the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropParams {
    pub rect: PixelRect,
    pub resize: Option<Resize>,
}

/// Parameters for encoding one output slice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncodeParams {
    pub format: OutputFormat,
    pub quality: Quality,
    /// Only honoured by webp and avif. For avif it means maximum quality.
    pub lossless: bool,
    /// rav1e speed preset (1 = slowest/best, 10 = fastest).
    pub avif_speed: u8,
}

impl Default for EncodeParams {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: Quality::default(),
            lossless: false,
            avif_speed: 6,
        }
    }
}
