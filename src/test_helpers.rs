//! Shared test utilities for the slicekit test suite.
//!
//! Builds small synthetic rasters in memory and encodes them, so unit tests
//! never depend on fixture files.
//!
//! # Usage
//!
//! ```ignore
//! use crate::test_helpers::*;
//!
//! let bytes = png_bytes(&quadrants(200, 200, [RED, GREEN, BLUE, WHITE]));
//! let image = RustBackend::new().decode(&bytes).unwrap();
//! ```

use image::{DynamicImage, ImageFormat, Rgb, RgbImage};
use std::io::Cursor;

pub const RED: [u8; 3] = [255, 0, 0];
pub const GREEN: [u8; 3] = [0, 255, 0];
pub const BLUE: [u8; 3] = [0, 0, 255];
pub const WHITE: [u8; 3] = [255, 255, 255];

/// Horizontal red ramp over a vertical green ramp.
pub fn gradient_image(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let r = (x * 255 / width.max(1)) as u8;
        let g = (y * 255 / height.max(1)) as u8;
        Rgb([r, g, 128])
    });
    DynamicImage::ImageRgb8(img)
}

/// Four solid quadrants: top-left, top-right, bottom-left, bottom-right.
pub fn quadrants(width: u32, height: u32, colors: [[u8; 3]; 4]) -> DynamicImage {
    let (half_w, half_h) = (width / 2, height / 2);
    let img = RgbImage::from_fn(width, height, |x, y| {
        let quadrant = (y >= half_h) as usize * 2 + (x >= half_w) as usize;
        Rgb(colors[quadrant])
    });
    DynamicImage::ImageRgb8(img)
}

/// Deterministic per-pixel noise; compresses poorly, so lossy and lossless
/// encodes come out visibly different.
pub fn noise_image(width: u32, height: u32) -> DynamicImage {
    let img = RgbImage::from_fn(width, height, |x, y| {
        let h = (x.wrapping_mul(73_856_093) ^ y.wrapping_mul(19_349_663)).wrapping_mul(2_654_435_761);
        Rgb([(h >> 24) as u8, (h >> 16) as u8, (h >> 8) as u8])
    });
    DynamicImage::ImageRgb8(img)
}

pub fn solid(width: u32, height: u32, color: [u8; 3]) -> DynamicImage {
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb(color)))
}

pub fn png_bytes(image: &DynamicImage) -> Vec<u8> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .unwrap();
    buffer
}

/// The RGB value at the center of an image.
pub fn center_pixel(image: &DynamicImage) -> [u8; 3] {
    let rgb = image.to_rgb8();
    rgb.get_pixel(rgb.width() / 2, rgb.height() / 2).0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quadrants_place_colors_clockwise_from_top_left() {
        let img = quadrants(10, 10, [RED, GREEN, BLUE, WHITE]).to_rgb8();
        assert_eq!(img.get_pixel(0, 0).0, RED);
        assert_eq!(img.get_pixel(9, 0).0, GREEN);
        assert_eq!(img.get_pixel(0, 9).0, BLUE);
        assert_eq!(img.get_pixel(9, 9).0, WHITE);
    }

    #[test]
    fn png_bytes_have_png_signature() {
        let bytes = png_bytes(&solid(4, 4, RED));
        assert_eq!(&bytes[..8], b"\x89PNG\r\n\x1a\n");
    }
}
