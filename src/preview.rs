//! Preview overlay: the guides a user sees before slicing.
//!
//! The guides come from the same frame functions the resolver uses
//! ([`grid_frame`], [`carousel_frame`], [`custom_frame`]), evaluated in display
//! coordinates instead of source pixels, so what is drawn is what gets cut.
//!
//! Rendering is gated: a [`Previewer`] renders one overlay at a time and
//! refuses a second concurrent render with [`PreviewError::Busy`].

use crate::config::LimitsConfig;
use crate::imaging::geometry::{
    Region, SLICE_HEIGHT, SLICE_WIDTH, carousel_frame, custom_frame, grid_frame,
};
use crate::imaging::{Dimensions, GeometryError, Layout, Mode, SourceImage};
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

const GUIDE_COLOR: [u8; 3] = [255, 0, 0];
const GUIDE_ALPHA: f32 = 0.85;

#[derive(Error, Debug)]
pub enum PreviewError {
    #[error("a preview render is already in progress")]
    Busy,
    #[error("layout produces {count} slices, limit is {limit}")]
    TooManySlices { count: u64, limit: u64 },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}

/// A vertical guide line inside a Grid band.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Divider {
    pub x: f64,
    pub top: f64,
    pub bottom: f64,
}

/// Everything drawn on top of the preview.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Overlay {
    /// Bands, segments or cells.
    pub frames: Vec<Region>,
    /// Slice boundaries inside Grid bands; empty for other modes.
    pub dividers: Vec<Divider>,
}

/// Scale `image` into a `max_width` × `max_height` box, keeping its aspect.
/// Never enlarges.
pub fn fit_display(image: Dimensions, max_width: f64, max_height: f64) -> (f64, f64) {
    let (w, h) = (image.width as f64, image.height as f64);
    if w <= 0.0 || h <= 0.0 {
        return (0.0, 0.0);
    }
    let scale = (max_width / w).min(max_height / h).min(1.0);
    (w * scale, h * scale)
}

/// Guides for `layout` on a `width` × `height` display.
pub fn overlay(layout: &Layout, width: f64, height: f64) -> Result<Overlay, GeometryError> {
    layout.validate()?;
    let overlay = match layout.mode {
        Mode::Grid => {
            let frame = grid_frame(width, height, layout.rows, layout.gap);
            let mut overlay = Overlay::default();
            for row in 0..layout.rows {
                let band = frame.band(row);
                overlay
                    .dividers
                    .extend(frame.preset.offsets[1..].iter().map(|&offset| Divider {
                        x: frame.offset_x(offset),
                        top: band.y,
                        bottom: band.y + band.height,
                    }));
                overlay.frames.push(band);
            }
            overlay
        }
        Mode::Carousel => {
            let frame = carousel_frame(width, height, layout.cols);
            Overlay {
                frames: (0..layout.cols).map(|col| frame.segment(col)).collect(),
                dividers: Vec::new(),
            }
        }
        Mode::Custom => {
            let frame = custom_frame(width, height, layout.rows, layout.cols);
            Overlay {
                frames: (0..layout.rows)
                    .flat_map(|row| (0..layout.cols).map(move |col| frame.cell(row, col)))
                    .collect(),
                dividers: Vec::new(),
            }
        }
    };
    Ok(overlay)
}

/// Source size that slices without any upscaling. `None` for Custom, which
/// keeps cells at native size.
pub fn recommended_canvas(layout: &Layout) -> Option<Dimensions> {
    match layout.mode {
        Mode::Grid => Some(Dimensions {
            width: layout.gap.preset().composite_width,
            height: layout.rows.saturating_mul(SLICE_HEIGHT),
        }),
        Mode::Carousel => Some(Dimensions {
            width: layout.cols.saturating_mul(SLICE_WIDTH),
            height: SLICE_HEIGHT,
        }),
        Mode::Custom => None,
    }
}

/// Draw the guides for `layout` onto a copy of `image`.
pub fn render_overlay(image: &SourceImage, layout: &Layout) -> Result<SourceImage, GeometryError> {
    let mut canvas = image.pixels().to_rgb8();
    let (width, height) = canvas.dimensions();
    let guides = overlay(layout, width as f64, height as f64)?;
    let thickness = (width.max(height) / 1000).max(1);

    for frame in &guides.frames {
        let (x0, y0) = (frame.x.round() as i64, frame.y.round() as i64);
        let (x1, y1) = (
            (frame.x + frame.width).round() as i64 - 1,
            (frame.y + frame.height).round() as i64 - 1,
        );
        for t in 0..thickness as i64 {
            draw_hline(&mut canvas, y0 + t, x0, x1);
            draw_hline(&mut canvas, y1 - t, x0, x1);
            draw_vline(&mut canvas, x0 + t, y0, y1);
            draw_vline(&mut canvas, x1 - t, y0, y1);
        }
    }
    for divider in &guides.dividers {
        let x = divider.x.round() as i64;
        let (top, bottom) = (divider.top.round() as i64, divider.bottom.round() as i64 - 1);
        for t in 0..thickness as i64 {
            draw_vline(&mut canvas, x + t, top, bottom);
        }
    }
    Ok(SourceImage::new(DynamicImage::ImageRgb8(canvas)))
}

fn blend(canvas: &mut RgbImage, x: i64, y: i64) {
    if x < 0 || y < 0 || x >= canvas.width() as i64 || y >= canvas.height() as i64 {
        return;
    }
    let px = canvas.get_pixel(x as u32, y as u32).0;
    let mixed = std::array::from_fn(|c| {
        (px[c] as f32 * (1.0 - GUIDE_ALPHA) + GUIDE_COLOR[c] as f32 * GUIDE_ALPHA).round() as u8
    });
    canvas.put_pixel(x as u32, y as u32, Rgb(mixed));
}

fn draw_hline(canvas: &mut RgbImage, y: i64, x0: i64, x1: i64) {
    for x in x0..=x1 {
        blend(canvas, x, y);
    }
}

fn draw_vline(canvas: &mut RgbImage, x: i64, y0: i64, y1: i64) {
    for y in y0..=y1 {
        blend(canvas, x, y);
    }
}

/// Single permit: at most one holder at a time.
#[derive(Debug, Default)]
pub struct RenderGate {
    busy: AtomicBool,
}

/// Held while a render is in flight; releases the gate on drop.
#[derive(Debug)]
pub struct RenderPermit<'a> {
    gate: &'a RenderGate,
}

impl RenderGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the permit, or `None` if someone else holds it.
    pub fn try_acquire(&self) -> Option<RenderPermit<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .ok()
            .map(|_| RenderPermit { gate: self })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for RenderPermit<'_> {
    fn drop(&mut self) {
        self.gate.busy.store(false, Ordering::Release);
    }
}

/// Renders preview overlays, one at a time.
#[derive(Debug)]
pub struct Previewer {
    gate: RenderGate,
    max_slices: u64,
}

impl Default for Previewer {
    fn default() -> Self {
        Self::with_max_slices(LimitsConfig::default().max_slices)
    }
}

impl Previewer {
    pub fn new() -> Self {
        Self::default()
    }

    /// A previewer that refuses layouts above `max_slices`, the same ceiling
    /// slicing applies.
    pub fn with_max_slices(max_slices: u64) -> Self {
        Self {
            gate: RenderGate::default(),
            max_slices,
        }
    }

    /// Shrink `image` into `max_box` (if given) and draw the guides on it.
    pub fn render(
        &self,
        image: &SourceImage,
        layout: &Layout,
        max_box: Option<(u32, u32)>,
    ) -> Result<SourceImage, PreviewError> {
        layout.validate()?;
        let count = layout.slice_count();
        if count > self.max_slices {
            return Err(PreviewError::TooManySlices {
                count,
                limit: self.max_slices,
            });
        }
        let _permit = self.gate.try_acquire().ok_or(PreviewError::Busy)?;

        let display = match max_box {
            Some((max_w, max_h)) => {
                let (w, h) = fit_display(image.dimensions(), max_w as f64, max_h as f64);
                let (w, h) = ((w.round() as u32).max(1), (h.round() as u32).max(1));
                if (w, h) == (image.dimensions().width, image.dimensions().height) {
                    image.clone()
                } else {
                    SourceImage::new(image.pixels().resize_exact(w, h, FilterType::Triangle))
                }
            }
            None => image.clone(),
        };
        Ok(render_overlay(&display, layout)?)
    }

    pub fn gate(&self) -> &RenderGate {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::geometry::{GapStyle, WITH_GAP, resolve};
    use crate::test_helpers::{WHITE, solid};

    fn dims(width: u32, height: u32) -> Dimensions {
        Dimensions { width, height }
    }

    #[test]
    fn fit_display_shrinks_to_the_tighter_edge() {
        assert_eq!(fit_display(dims(4000, 2000), 800.0, 800.0), (800.0, 400.0));
        assert_eq!(fit_display(dims(1000, 3000), 800.0, 600.0), (200.0, 600.0));
    }

    #[test]
    fn fit_display_never_enlarges() {
        assert_eq!(fit_display(dims(300, 200), 800.0, 800.0), (300.0, 200.0));
    }

    #[test]
    fn grid_overlay_has_two_dividers_per_band() {
        let guides = overlay(&Layout::grid(3, GapStyle::WithGap), 3000.0, 3000.0).unwrap();
        assert_eq!(guides.frames.len(), 3);
        assert_eq!(guides.dividers.len(), 6);

        let band = guides.frames[0];
        let expected = band.x + 1025.0 * band.width / WITH_GAP.composite_width as f64;
        assert!((guides.dividers[0].x - expected).abs() < 1e-9);
        assert_eq!(guides.dividers[0].top, band.y);
    }

    #[test]
    fn overlay_matches_resolved_geometry_at_full_size() {
        let layout = Layout::carousel(3);
        let guides = overlay(&layout, 1000.0, 500.0).unwrap();
        let plan = resolve(&layout, dims(1000, 500)).unwrap();
        for (frame, slice) in guides.frames.iter().zip(&plan.slices) {
            assert_eq!(frame.to_pixels(1000, 500), Some(slice.source));
        }
    }

    #[test]
    fn custom_overlay_is_row_major() {
        let guides = overlay(&Layout::custom(2, 2), 200.0, 100.0).unwrap();
        let origins: Vec<(f64, f64)> = guides.frames.iter().map(|r| (r.x, r.y)).collect();
        assert_eq!(
            origins,
            vec![(0.0, 0.0), (100.0, 0.0), (0.0, 50.0), (100.0, 50.0)]
        );
        assert!(guides.dividers.is_empty());
    }

    #[test]
    fn overlay_rejects_zero_counts() {
        assert!(overlay(&Layout::custom(0, 2), 100.0, 100.0).is_err());
    }

    #[test]
    fn recommended_canvas_per_mode() {
        assert_eq!(
            recommended_canvas(&Layout::grid(2, GapStyle::WithoutGap)),
            Some(dims(3110, 2700))
        );
        assert_eq!(recommended_canvas(&Layout::carousel(3)), Some(dims(3240, 1350)));
        assert_eq!(recommended_canvas(&Layout::custom(2, 2)), None);
    }

    #[test]
    fn render_overlay_paints_frame_edges_only() {
        let image = SourceImage::new(solid(100, 100, WHITE));
        let out = render_overlay(&image, &Layout::custom(2, 2)).unwrap();
        let rgb = out.pixels().to_rgb8();

        // Cell corner is blended towards red.
        let corner = rgb.get_pixel(0, 0).0;
        assert_eq!(corner[0], 255);
        assert!(corner[1] < 100);
        // Cell interior untouched.
        assert_eq!(rgb.get_pixel(25, 25).0, WHITE);
    }

    #[test]
    fn gate_refuses_second_holder() {
        let gate = RenderGate::new();
        let permit = gate.try_acquire().unwrap();
        assert!(gate.is_busy());
        assert!(gate.try_acquire().is_none());
        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_acquire().is_some());
    }

    #[test]
    fn previewer_is_busy_while_gate_is_held() {
        let previewer = Previewer::new();
        let image = SourceImage::new(solid(40, 40, WHITE));

        let permit = previewer.gate().try_acquire().unwrap();
        let err = previewer
            .render(&image, &Layout::custom(1, 1), None)
            .unwrap_err();
        assert!(matches!(err, PreviewError::Busy));

        drop(permit);
        assert!(previewer.render(&image, &Layout::custom(1, 1), None).is_ok());
    }

    #[test]
    fn previewer_shrinks_into_the_box() {
        let previewer = Previewer::new();
        let image = SourceImage::new(solid(400, 200, WHITE));
        let out = previewer
            .render(&image, &Layout::carousel(2), Some((100, 100)))
            .unwrap();
        assert_eq!(out.dimensions(), dims(100, 50));
    }

    #[test]
    fn previewer_refuses_layouts_over_the_slice_ceiling() {
        let previewer = Previewer::with_max_slices(12);
        let image = SourceImage::new(solid(400, 400, WHITE));

        let err = previewer
            .render(&image, &Layout::grid(4_000_000_000, GapStyle::WithGap), None)
            .unwrap_err();
        assert!(matches!(
            err,
            PreviewError::TooManySlices { count: 12_000_000_000, limit: 12 }
        ));
        assert!(previewer.render(&image, &Layout::grid(4, GapStyle::WithGap), None).is_ok());
    }
}
