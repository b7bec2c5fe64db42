//! Pure Rust image processing backend.
//!
//! Everything is statically linked into the binary.
//!
//! ## Crate mapping
//!
//! | Operation | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, TIFF, WebP) | `image::ImageReader` with format sniffing |
//! | Decode (AVIF) | `avif-parse` (container) + `rav1d` (AV1 decode) + BT.601 YUV→RGB |
//! | Crop | `DynamicImage::crop_imm` |
//! | Resize (fill) | `DynamicImage::resize_exact`, `Lanczos3` |
//! | Resize (cover) | `DynamicImage::resize_to_fill`, `Lanczos3` |
//! | Encode → PNG | `PngEncoder`, fast compression, adaptive filter |
//! | Encode → JPEG | `JpegEncoder::new_with_quality` (RGB) |
//! | Encode → WebP (lossy) | `webp::Encoder::encode_simple` (libwebp), quality 1-100 |
//! | Encode → WebP (lossless) | `WebPEncoder::new_lossless` |
//! | Encode → AVIF | `AvifEncoder::new_with_speed_quality` (rav1e) |
//!
//! AVIF has no true lossless path here: `lossless` selects quality 100, which
//! still goes through YUV and is the maximum-quality setting, not bit-exact.

use super::backend::{BackendError, Dimensions, ImageBackend, SourceImage};
use super::params::{CropParams, EncodeParams, Fit, OutputFormat};
use image::codecs::avif::AvifEncoder;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::codecs::webp::WebPEncoder;
use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;

/// Pure Rust backend using the `image` crate ecosystem.
///
/// See the [module docs](self) for the crate-to-operation mapping.
pub struct RustBackend;

impl RustBackend {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RustBackend {
    fn default() -> Self {
        Self::new()
    }
}

fn is_avif(bytes: &[u8]) -> bool {
    matches!(image::guess_format(bytes), Ok(ImageFormat::Avif))
}

fn reader(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>, BackendError> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(BackendError::Io)
}

/// Extract dimensions from an AVIF container (no AV1 decode needed).
fn identify_avif(bytes: &[u8]) -> Result<Dimensions, BackendError> {
    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| BackendError::Unreadable(format!("AVIF container: {e:?}")))?;
    let meta = avif
        .primary_item_metadata()
        .map_err(|e| BackendError::Unreadable(format!("AVIF metadata: {e:?}")))?;
    Ok(Dimensions {
        width: meta.max_frame_width.get(),
        height: meta.max_frame_height.get(),
    })
}

/// Decode an AVIF buffer with rav1d.
///
/// The context opened here is closed on every path, success or failure.
fn decode_avif(bytes: &[u8]) -> Result<DynamicImage, BackendError> {
    use rav1d::include::dav1d::data::Dav1dData;
    use rav1d::include::dav1d::dav1d::Dav1dSettings;
    use rav1d::include::dav1d::picture::Dav1dPicture;
    use rav1d::src::lib as dav1d;
    use std::ptr::NonNull;

    let avif = avif_parse::read_avif(&mut Cursor::new(bytes))
        .map_err(|e| BackendError::Unreadable(format!("AVIF container: {e:?}")))?;
    let av1: &[u8] = &avif.primary_item;

    let mut settings = std::mem::MaybeUninit::<Dav1dSettings>::uninit();
    unsafe { dav1d::dav1d_default_settings(NonNull::from(&mut settings).cast()) };
    let mut settings = unsafe { settings.assume_init() };
    settings.n_threads = 1;
    settings.max_frame_delay = 1;

    let mut ctx = None;
    let rc = unsafe { dav1d::dav1d_open(NonNull::new(&mut ctx), NonNull::new(&mut settings)) };
    if rc.0 != 0 {
        return Err(BackendError::ProcessingFailed(format!(
            "rav1d open failed ({})",
            rc.0
        )));
    }

    let decoded = (|| -> Result<DynamicImage, BackendError> {
        let mut data = Dav1dData::default();
        let buf = unsafe { dav1d::dav1d_data_create(NonNull::new(&mut data), av1.len()) };
        if buf.is_null() {
            return Err(BackendError::ProcessingFailed(
                "rav1d data_create failed".into(),
            ));
        }
        unsafe { std::ptr::copy_nonoverlapping(av1.as_ptr(), buf, av1.len()) };

        let rc = unsafe { dav1d::dav1d_send_data(ctx, NonNull::new(&mut data)) };
        if rc.0 != 0 {
            unsafe { dav1d::dav1d_data_unref(NonNull::new(&mut data)) };
            return Err(BackendError::Unreadable(format!(
                "rav1d rejected AV1 payload ({})",
                rc.0
            )));
        }

        let mut pic: Dav1dPicture = unsafe { std::mem::zeroed() };
        let rc = unsafe { dav1d::dav1d_get_picture(ctx, NonNull::new(&mut pic)) };
        if rc.0 != 0 {
            return Err(BackendError::Unreadable(format!(
                "rav1d produced no picture ({})",
                rc.0
            )));
        }

        let rgb = YuvFrame::from_picture(&pic).and_then(|frame| frame.into_rgb_image());
        unsafe { dav1d::dav1d_picture_unref(NonNull::new(&mut pic)) };
        rgb
    })();

    unsafe { dav1d::dav1d_close(NonNull::new(&mut ctx)) };
    decoded
}

/// Borrowed YUV planes of a decoded rav1d picture.
struct YuvFrame {
    y: *const u8,
    u: *const u8,
    v: *const u8,
    y_stride: isize,
    uv_stride: isize,
    width: u32,
    height: u32,
    bpc: u32,
    /// Chroma subsampling (horizontal, vertical); I420 = (true, true).
    subsampling: (bool, bool),
    monochrome: bool,
}

impl YuvFrame {
    fn from_picture(
        pic: &rav1d::include::dav1d::picture::Dav1dPicture,
    ) -> Result<Self, BackendError> {
        use rav1d::include::dav1d::headers::{
            DAV1D_PIXEL_LAYOUT_I400, DAV1D_PIXEL_LAYOUT_I420, DAV1D_PIXEL_LAYOUT_I422,
            DAV1D_PIXEL_LAYOUT_I444,
        };

        let plane = |i: usize| {
            pic.data[i]
                .map(|p| p.as_ptr() as *const u8)
                .ok_or_else(|| BackendError::ProcessingFailed(format!("AVIF plane {i} missing")))
        };

        let layout = pic.p.layout;
        let y = plane(0)?;
        let (u, v, subsampling, monochrome) = match layout {
            DAV1D_PIXEL_LAYOUT_I400 => (y, y, (false, false), true),
            DAV1D_PIXEL_LAYOUT_I420 => (plane(1)?, plane(2)?, (true, true), false),
            DAV1D_PIXEL_LAYOUT_I422 => (plane(1)?, plane(2)?, (true, false), false),
            DAV1D_PIXEL_LAYOUT_I444 => (plane(1)?, plane(2)?, (false, false), false),
            _ => {
                return Err(BackendError::Unreadable(format!(
                    "unsupported AVIF pixel layout: {layout}"
                )));
            }
        };

        Ok(Self {
            y,
            u,
            v,
            y_stride: pic.stride[0],
            uv_stride: if monochrome { 0 } else { pic.stride[1] },
            width: pic.p.w as u32,
            height: pic.p.h as u32,
            bpc: pic.p.bpc as u32,
            subsampling,
            monochrome,
        })
    }

    /// Sample one plane value, 8-bit or 16-bit storage.
    fn sample(&self, plane: *const u8, stride: isize, x: u32, y: u32) -> f32 {
        if self.bpc <= 8 {
            (unsafe { *plane.offset(y as isize * stride + x as isize) }) as f32
        } else {
            let offset = y as isize * stride + x as isize * 2;
            (unsafe { *(plane.offset(offset) as *const u16) }) as f32
        }
    }

    /// BT.601 YCbCr → interleaved RGB8.
    fn into_rgb_image(self) -> Result<DynamicImage, BackendError> {
        let scale = 255.0 / ((1u32 << self.bpc) - 1) as f32;
        let center = (1u32 << (self.bpc - 1)) as f32;
        let (ss_x, ss_y) = self.subsampling;

        let mut rgb = Vec::with_capacity(self.width as usize * self.height as usize * 3);
        for row in 0..self.height {
            for col in 0..self.width {
                let luma = self.sample(self.y, self.y_stride, col, row);
                let px = if self.monochrome {
                    let v = (luma * scale).clamp(0.0, 255.0);
                    [v, v, v]
                } else {
                    let cx = if ss_x { col / 2 } else { col };
                    let cy = if ss_y { row / 2 } else { row };
                    let cb = self.sample(self.u, self.uv_stride, cx, cy) - center;
                    let cr = self.sample(self.v, self.uv_stride, cx, cy) - center;
                    [
                        ((luma + 1.402 * cr) * scale).clamp(0.0, 255.0),
                        ((luma - 0.344136 * cb - 0.714136 * cr) * scale).clamp(0.0, 255.0),
                        ((luma + 1.772 * cb) * scale).clamp(0.0, 255.0),
                    ]
                };
                rgb.extend(px.map(|c| c as u8));
            }
        }

        image::RgbImage::from_raw(self.width, self.height, rgb)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| {
                BackendError::ProcessingFailed("decoded AVIF buffer has the wrong size".into())
            })
    }
}

/// Keep alpha only when the image has it; encoders below accept RGB8/RGBA8.
fn to_rgb_family(img: &DynamicImage) -> DynamicImage {
    if img.color().has_alpha() {
        DynamicImage::ImageRgba8(img.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(img.to_rgb8())
    }
}

fn encode_image(img: &DynamicImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
    let mut buffer = Vec::new();
    let quality = params.quality.value() as u8;
    let result = match params.format {
        OutputFormat::Png => img.write_with_encoder(PngEncoder::new_with_quality(
            Cursor::new(&mut buffer),
            CompressionType::Fast,
            PngFilter::Adaptive,
        )),
        OutputFormat::Jpeg => DynamicImage::ImageRgb8(img.to_rgb8()).write_with_encoder(
            JpegEncoder::new_with_quality(Cursor::new(&mut buffer), quality),
        ),
        OutputFormat::Webp if params.lossless => to_rgb_family(img)
            .write_with_encoder(WebPEncoder::new_lossless(Cursor::new(&mut buffer))),
        OutputFormat::Webp => return encode_lossy_webp(img, quality),
        OutputFormat::Avif => {
            let quality = if params.lossless { 100 } else { quality };
            to_rgb_family(img).write_with_encoder(AvifEncoder::new_with_speed_quality(
                Cursor::new(&mut buffer),
                params.avif_speed.clamp(1, 10),
                quality,
            ))
        }
    };
    result.map_err(|e| {
        BackendError::ProcessingFailed(format!("{} encode failed: {e}", params.format))
    })?;
    Ok(buffer)
}

/// Lossy WebP through libwebp. The `image` crate only encodes lossless WebP.
fn encode_lossy_webp(img: &DynamicImage, quality: u8) -> Result<Vec<u8>, BackendError> {
    let (width, height) = (img.width(), img.height());
    let encoded = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode_simple(false, quality as f32)
    } else {
        let rgb = img.to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode_simple(false, quality as f32)
    };
    encoded
        .map(|memory| memory.to_vec())
        .map_err(|e| BackendError::ProcessingFailed(format!("webp encode failed: {e:?}")))
}

impl ImageBackend for RustBackend {
    fn identify(&self, bytes: &[u8]) -> Result<Dimensions, BackendError> {
        if is_avif(bytes) {
            return identify_avif(bytes);
        }
        let (width, height) = reader(bytes)?
            .into_dimensions()
            .map_err(|e| BackendError::Unreadable(format!("Failed to read dimensions: {e}")))?;
        Ok(Dimensions { width, height })
    }

    fn decode(&self, bytes: &[u8]) -> Result<SourceImage, BackendError> {
        let pixels = if is_avif(bytes) {
            decode_avif(bytes)?
        } else {
            reader(bytes)?
                .decode()
                .map_err(|e| BackendError::Unreadable(format!("Failed to decode: {e}")))?
        };
        Ok(SourceImage::new(pixels))
    }

    fn crop(&self, image: &SourceImage, params: &CropParams) -> Result<SourceImage, BackendError> {
        let dims = image.dimensions();
        let rect = params.rect;
        if rect.right() > dims.width as u64 || rect.bottom() > dims.height as u64 {
            return Err(BackendError::ProcessingFailed(format!(
                "crop {rect} exceeds {}x{} image",
                dims.width, dims.height
            )));
        }

        let cropped = image
            .pixels()
            .crop_imm(rect.left, rect.top, rect.width, rect.height);
        let out = match params.resize {
            None => cropped,
            Some(r) => match r.fit {
                Fit::Fill => cropped.resize_exact(r.width, r.height, FilterType::Lanczos3),
                Fit::Cover => cropped.resize_to_fill(r.width, r.height, FilterType::Lanczos3),
            },
        };
        Ok(SourceImage::new(out))
    }

    fn encode(&self, image: &SourceImage, params: &EncodeParams) -> Result<Vec<u8>, BackendError> {
        encode_image(image.pixels(), params)
    }
}
