//! Pure geometry for the three slicing layouts.
//!
//! Nothing in here touches pixels or does I/O: given image dimensions and a
//! [`Layout`], [`resolve`] returns the exact integer rectangles every output
//! slice is cut from. The float "frames" ([`grid_frame`], [`carousel_frame`],
//! [`custom_frame`]) are shared with the [`preview`](crate::preview) overlay
//! so that the guides drawn on screen and the slices produced on the server
//! come from the same arithmetic.
//!
//! ## Layouts
//!
//! | Mode | Slices | Per-slice pipeline |
//! |---|---|---|
//! | Grid | `rows * 3` | crop band → stretch to composite × 1350 → cut 1080 × 1350 at fixed offsets |
//! | Carousel | `cols` | crop 4:5 segment → cover-resize to 1080 × 1350 |
//! | Custom | `rows * cols` | crop cell, no resize |

use super::backend::Dimensions;
use super::params::{Fit, PixelRect, Resize};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Width of every Grid and Carousel output slice.
pub const SLICE_WIDTH: u32 = 1080;
/// Height of every Grid and Carousel output slice.
pub const SLICE_HEIGHT: u32 = 1350;
/// Carousel segment aspect (width / height).
pub const CAROUSEL_ASPECT: f64 = 4.0 / 5.0;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("{mode} layout with {rows} row(s) x {cols} col(s) is degenerate: {reason}")]
    Degenerate {
        mode: Mode,
        rows: u32,
        cols: u32,
        reason: String,
    },
}

/// Slicing strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Mode {
    Grid,
    Carousel,
    Custom,
}

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Grid, Mode::Carousel, Mode::Custom];

    pub fn name(self) -> &'static str {
        match self {
            Mode::Grid => "Grid",
            Mode::Carousel => "Carousel",
            Mode::Custom => "Custom",
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Mode::ALL
            .into_iter()
            .find(|m| m.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| s.to_string())
    }
}

/// Visual style of a Grid composite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GapStyle {
    #[default]
    WithGap,
    WithoutGap,
}

impl GapStyle {
    pub fn name(self) -> &'static str {
        match self {
            GapStyle::WithGap => "with-gap",
            GapStyle::WithoutGap => "without-gap",
        }
    }

    pub fn preset(self) -> GridPreset {
        match self {
            GapStyle::WithGap => WITH_GAP,
            GapStyle::WithoutGap => WITHOUT_GAP,
        }
    }
}

impl fmt::Display for GapStyle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for GapStyle {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "with-gap" => Ok(GapStyle::WithGap),
            "without-gap" => Ok(GapStyle::WithoutGap),
            other => Err(format!(
                "unknown gap style '{other}' (expected with-gap or without-gap)"
            )),
        }
    }
}

/// Empirically derived Grid coefficients for one gap style.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridPreset {
    /// Band height divided by effective width.
    pub aspect: f64,
    /// Width a band is stretched to before it is cut.
    pub composite_width: u32,
    /// Left edge of each 1080px slice inside the composite.
    pub offsets: [u32; 3],
}

pub const WITH_GAP: GridPreset = GridPreset {
    aspect: 0.4313099041533546,
    composite_width: 3130,
    offsets: [0, 1025, 2050],
};

pub const WITHOUT_GAP: GridPreset = GridPreset {
    aspect: 0.4340836012861736,
    composite_width: 3110,
    offsets: [0, 1015, 2030],
};

/// A validated layout request, independent of any particular image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layout {
    pub mode: Mode,
    pub rows: u32,
    pub cols: u32,
    pub gap: GapStyle,
}

impl Layout {
    pub fn grid(rows: u32, gap: GapStyle) -> Self {
        Self {
            mode: Mode::Grid,
            rows,
            cols: 1,
            gap,
        }
    }

    pub fn carousel(cols: u32) -> Self {
        Self {
            mode: Mode::Carousel,
            rows: 1,
            cols,
            gap: GapStyle::default(),
        }
    }

    pub fn custom(rows: u32, cols: u32) -> Self {
        Self {
            mode: Mode::Custom,
            rows,
            cols,
            gap: GapStyle::default(),
        }
    }

    /// Number of slices a full resolution of this layout produces.
    pub fn slice_count(&self) -> u64 {
        match self.mode {
            Mode::Grid => self.rows as u64 * 3,
            Mode::Carousel => self.cols as u64,
            Mode::Custom => self.rows as u64 * self.cols as u64,
        }
    }

    /// Reject zero rows or columns where the mode uses them.
    pub fn validate(&self) -> Result<(), GeometryError> {
        let (rows_used, cols_used) = match self.mode {
            Mode::Grid => (true, false),
            Mode::Carousel => (false, true),
            Mode::Custom => (true, true),
        };
        if rows_used && self.rows == 0 {
            return Err(self.degenerate("rows must be at least 1"));
        }
        if cols_used && self.cols == 0 {
            return Err(self.degenerate("cols must be at least 1"));
        }
        Ok(())
    }

    fn degenerate(&self, reason: impl Into<String>) -> GeometryError {
        GeometryError::Degenerate {
            mode: self.mode,
            rows: self.rows,
            cols: self.cols,
            reason: reason.into(),
        }
    }
}

/// A float rectangle in image (or display) coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Region {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Region {
    /// Round to whole pixels and clamp into a `bounds_w` × `bounds_h` image.
    ///
    /// Origin and size are rounded independently (not the far edge), then the
    /// size is cut back so the rectangle ends inside the image. `None` when
    /// the result has no area.
    pub fn to_pixels(&self, bounds_w: u32, bounds_h: u32) -> Option<PixelRect> {
        let left = self.x.round().max(0.0);
        let top = self.y.round().max(0.0);
        let width = (bounds_w as f64 - left).min(self.width.round());
        let height = (bounds_h as f64 - top).min(self.height.round());
        // NaN fails both comparisons.
        if !(width >= 1.0 && height >= 1.0) {
            return None;
        }
        Some(PixelRect::new(
            left as u32,
            top as u32,
            width as u32,
            height as u32,
        ))
    }
}

/// Grid band placement inside a `width` × `height` image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GridFrame {
    pub preset: GridPreset,
    pub effective_width: f64,
    pub band_height: f64,
    pub start_x: f64,
    pub start_y: f64,
}

impl GridFrame {
    pub fn band(&self, row: u32) -> Region {
        Region {
            x: self.start_x,
            y: self.start_y + row as f64 * self.band_height,
            width: self.effective_width,
            height: self.band_height,
        }
    }

    /// Horizontal position of a composite offset mapped back into the image.
    pub fn offset_x(&self, offset: u32) -> f64 {
        self.start_x + offset as f64 * self.effective_width / self.preset.composite_width as f64
    }
}

/// Place `rows` bands of fixed aspect inside the image.
///
/// Bands start at full image width; when the stack would overflow vertically
/// the width shrinks instead of the aspect changing. The stack is centered on
/// both axes.
pub fn grid_frame(width: f64, height: f64, rows: u32, gap: GapStyle) -> GridFrame {
    let preset = gap.preset();
    let rows_f = rows as f64;

    let mut effective_width = width;
    let mut band_height = effective_width * preset.aspect;
    if band_height * rows_f > height {
        effective_width = (height / rows_f) / preset.aspect;
        band_height = effective_width * preset.aspect;
    }

    let start_x = if effective_width < width {
        (width - effective_width) / 2.0
    } else {
        0.0
    };
    let total_height = band_height * rows_f;
    let start_y = if total_height < height {
        (height - total_height) / 2.0
    } else {
        0.0
    };

    GridFrame {
        preset,
        effective_width,
        band_height,
        start_x,
        start_y,
    }
}

/// Carousel segment placement inside a `width` × `height` image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CarouselFrame {
    pub segment_width: f64,
    pub segment_height: f64,
    pub start_x: f64,
    pub start_y: f64,
}

impl CarouselFrame {
    pub fn segment(&self, col: u32) -> Region {
        Region {
            x: self.start_x + col as f64 * self.segment_width,
            y: self.start_y,
            width: self.segment_width,
            height: self.segment_height,
        }
    }
}

pub fn carousel_frame(width: f64, height: f64, cols: u32) -> CarouselFrame {
    let cols_f = cols as f64;
    let mut segment_width = width / cols_f;
    let mut segment_height = segment_width / CAROUSEL_ASPECT;
    if segment_height > height {
        segment_height = height;
        segment_width = segment_height * CAROUSEL_ASPECT;
    }
    CarouselFrame {
        segment_width,
        segment_height,
        start_x: (width - segment_width * cols_f) / 2.0,
        start_y: (height - segment_height) / 2.0,
    }
}

/// Free-form cell size; cells tile the whole image from the origin.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CustomFrame {
    pub cell_width: f64,
    pub cell_height: f64,
}

impl CustomFrame {
    pub fn cell(&self, row: u32, col: u32) -> Region {
        Region {
            x: col as f64 * self.cell_width,
            y: row as f64 * self.cell_height,
            width: self.cell_width,
            height: self.cell_height,
        }
    }
}

pub fn custom_frame(width: f64, height: f64, rows: u32, cols: u32) -> CustomFrame {
    CustomFrame {
        cell_width: width / cols as f64,
        cell_height: height / rows as f64,
    }
}

/// One output slice: where it comes from and what it becomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SliceGeometry {
    /// Position in the presentation order.
    pub index: usize,
    /// Band, segment or cell this slice is carved from. Slices sharing a group
    /// share the crop and resize step.
    pub group: usize,
    /// Rectangle read from the source image.
    pub source: PixelRect,
    pub resize: Option<Resize>,
    /// Rectangle cut out of the resized canvas.
    pub cut: Option<PixelRect>,
    pub dest_width: u32,
    pub dest_height: u32,
}

/// The ordered slice geometry for one image and layout.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeometryPlan {
    pub layout: Layout,
    pub source: Dimensions,
    /// Slice count the layout asks for; `slices` is shorter when some slices
    /// rounded down to nothing.
    pub planned: usize,
    pub slices: Vec<SliceGeometry>,
}

impl GeometryPlan {
    pub fn mode(&self) -> Mode {
        self.layout.mode
    }

    /// Planned indices that have no geometry.
    pub fn skipped(&self) -> Vec<usize> {
        let mut present = self.slices.iter().map(|s| s.index).peekable();
        (0..self.planned)
            .filter(|i| {
                if present.peek() == Some(i) {
                    present.next();
                    false
                } else {
                    true
                }
            })
            .collect()
    }
}

/// Resolve a layout against concrete image dimensions.
///
/// Fails with [`GeometryError::Degenerate`] when the layout has zero rows or
/// columns or any band/segment/cell would be smaller than one pixel. Slices
/// whose rounded rectangle is empty are left out of the plan but keep their
/// neighbours' indices stable.
pub fn resolve(layout: &Layout, dims: Dimensions) -> Result<GeometryPlan, GeometryError> {
    layout.validate()?;
    if dims.width == 0 || dims.height == 0 {
        return Err(layout.degenerate(format!(
            "source image is {}x{}",
            dims.width, dims.height
        )));
    }

    let slices = match layout.mode {
        Mode::Grid => resolve_grid(layout, dims)?,
        Mode::Carousel => resolve_carousel(layout, dims)?,
        Mode::Custom => resolve_custom(layout, dims)?,
    };

    Ok(GeometryPlan {
        layout: *layout,
        source: dims,
        planned: layout.slice_count() as usize,
        slices,
    })
}

fn check_extent(
    layout: &Layout,
    what: &str,
    width: f64,
    height: f64,
) -> Result<(), GeometryError> {
    if width >= 1.0 && height >= 1.0 {
        Ok(())
    } else {
        Err(layout.degenerate(format!(
            "{what} would be {width:.2}x{height:.2}px"
        )))
    }
}

fn resolve_grid(layout: &Layout, dims: Dimensions) -> Result<Vec<SliceGeometry>, GeometryError> {
    let frame = grid_frame(dims.width as f64, dims.height as f64, layout.rows, layout.gap);
    check_extent(layout, "band", frame.effective_width, frame.band_height)?;

    let resize = Resize {
        width: frame.preset.composite_width,
        height: SLICE_HEIGHT,
        fit: Fit::Fill,
    };
    let fan_out = frame.preset.offsets.len();

    let mut slices = Vec::with_capacity(layout.rows as usize * fan_out);
    for row in 0..layout.rows {
        let Some(source) = frame.band(row).to_pixels(dims.width, dims.height) else {
            continue;
        };
        for (i, &offset) in frame.preset.offsets.iter().enumerate() {
            slices.push(SliceGeometry {
                index: row as usize * fan_out + i,
                group: row as usize,
                source,
                resize: Some(resize),
                cut: Some(PixelRect::new(offset, 0, SLICE_WIDTH, SLICE_HEIGHT)),
                dest_width: SLICE_WIDTH,
                dest_height: SLICE_HEIGHT,
            });
        }
    }
    Ok(slices)
}

fn resolve_carousel(
    layout: &Layout,
    dims: Dimensions,
) -> Result<Vec<SliceGeometry>, GeometryError> {
    let frame = carousel_frame(dims.width as f64, dims.height as f64, layout.cols);
    check_extent(layout, "segment", frame.segment_width, frame.segment_height)?;

    Ok((0..layout.cols)
        .filter_map(|col| {
            let source = frame.segment(col).to_pixels(dims.width, dims.height)?;
            Some(SliceGeometry {
                index: col as usize,
                group: col as usize,
                source,
                resize: Some(Resize {
                    width: SLICE_WIDTH,
                    height: SLICE_HEIGHT,
                    fit: Fit::Cover,
                }),
                cut: None,
                dest_width: SLICE_WIDTH,
                dest_height: SLICE_HEIGHT,
            })
        })
        .collect())
}

fn resolve_custom(layout: &Layout, dims: Dimensions) -> Result<Vec<SliceGeometry>, GeometryError> {
    let frame = custom_frame(dims.width as f64, dims.height as f64, layout.rows, layout.cols);
    check_extent(layout, "cell", frame.cell_width, frame.cell_height)?;

    let mut slices = Vec::new();
    for row in 0..layout.rows {
        for col in 0..layout.cols {
            let index = row as usize * layout.cols as usize + col as usize;
            let Some(source) = frame.cell(row, col).to_pixels(dims.width, dims.height) else {
                continue;
            };
            slices.push(SliceGeometry {
                index,
                group: index,
                source,
                resize: None,
                cut: None,
                dest_width: source.width,
                dest_height: source.height,
            });
        }
    }
    Ok(slices)
}
