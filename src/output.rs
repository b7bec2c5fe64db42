//! CLI output formatting.
//!
//! # Output Format
//!
//! ## Plan
//!
//! ```text
//! Grid 2 rows, with-gap: 6 slices from 4000x3000
//! 001 1080x1350 ← 4000x1725+0+637 (fill 3130x1350, cut 1080x1350+0+0)
//! 002 1080x1350 ← 4000x1725+0+637 (fill 3130x1350, cut 1080x1350+1025+0)
//! ...
//! Recommended source: 3130x2700
//! ```
//!
//! ## Slice
//!
//! ```text
//! Rendering 6 of 6 slices
//!     003 rendered (212.4 KB)
//!     001 rendered (208.0 KB)
//!     ...
//! 001 → out/slice-001.png
//! ...
//! Sliced 6 of 6 images
//! ```
//!
//! Progress lines arrive in completion order; the file list is always in
//! slice order.
//!
//! # Architecture
//!
//! Each output has a `format_*` function (returns `Vec<String>`) for
//! testability and a `print_*` wrapper that writes to stdout. Format functions
//! are pure: no I/O, no side effects.

use crate::imaging::geometry::SliceGeometry;
use crate::imaging::params::Fit;
use crate::imaging::{GeometryPlan, Layout, Mode, SliceEvent};
use crate::preview::recommended_canvas;
use std::path::PathBuf;

/// Slice indices are displayed 1-based, 3-digit zero-padded.
fn format_index(index: usize) -> String {
    format!("{:0>3}", index + 1)
}

fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

fn human_bytes(bytes: usize) -> String {
    const KB: f64 = 1024.0;
    let b = bytes as f64;
    if b < KB {
        format!("{bytes} B")
    } else if b < KB * KB {
        format!("{:.1} KB", b / KB)
    } else {
        format!("{:.1} MB", b / (KB * KB))
    }
}

/// One-line description of a layout.
///
/// ```text
/// Grid 2 rows, with-gap
/// Carousel 3 columns
/// Custom 2x4
/// ```
pub fn layout_label(layout: &Layout) -> String {
    match layout.mode {
        Mode::Grid => format!("Grid {} rows, {}", layout.rows, layout.gap),
        Mode::Carousel => format!("Carousel {} columns", layout.cols),
        Mode::Custom => format!("Custom {}x{}", layout.rows, layout.cols),
    }
}

fn slice_line(slice: &SliceGeometry) -> String {
    let mut steps = Vec::new();
    if let Some(resize) = slice.resize {
        let fit = match resize.fit {
            Fit::Fill => "fill",
            Fit::Cover => "cover",
        };
        steps.push(format!("{fit} {}x{}", resize.width, resize.height));
    }
    if let Some(cut) = slice.cut {
        steps.push(format!("cut {cut}"));
    }
    let detail = if steps.is_empty() {
        String::new()
    } else {
        format!(" ({})", steps.join(", "))
    };
    format!(
        "{} {}x{} \u{2190} {}{}",
        format_index(slice.index),
        slice.dest_width,
        slice.dest_height,
        slice.source,
        detail
    )
}

// ============================================================================
// Plan output
// ============================================================================

pub fn format_plan(plan: &GeometryPlan) -> Vec<String> {
    let mut lines = vec![format!(
        "{}: {} slices from {}x{}",
        layout_label(&plan.layout),
        plan.slices.len(),
        plan.source.width,
        plan.source.height
    )];

    let mut skipped = plan.skipped().into_iter().peekable();
    for slice in &plan.slices {
        while let Some(index) = skipped.next_if(|&i| i < slice.index) {
            lines.push(format!("{} skipped (empty after rounding)", format_index(index)));
        }
        lines.push(slice_line(slice));
    }
    for index in skipped {
        lines.push(format!("{} skipped (empty after rounding)", format_index(index)));
    }

    if let Some(canvas) = recommended_canvas(&plan.layout) {
        lines.push(format!(
            "Recommended source: {}x{}",
            canvas.width, canvas.height
        ));
    }
    lines
}

pub fn print_plan(plan: &GeometryPlan) {
    for line in format_plan(plan) {
        println!("{line}");
    }
}

// ============================================================================
// Slice output
// ============================================================================

/// Format a single progress event as display lines.
pub fn format_slice_event(event: &SliceEvent) -> Vec<String> {
    match event {
        SliceEvent::Started {
            planned,
            renderable,
        } => vec![format!("Rendering {renderable} of {planned} slices")],
        SliceEvent::Rendered { index, bytes } => vec![format!(
            "{}{} rendered ({})",
            indent(1),
            format_index(*index),
            human_bytes(*bytes)
        )],
        SliceEvent::Skipped { index, reason } => vec![format!(
            "{}{} skipped: {}",
            indent(1),
            format_index(*index),
            reason
        )],
    }
}

/// File list plus summary after a slice run.
pub fn format_written(written: &[(usize, PathBuf)], planned: usize) -> Vec<String> {
    let mut lines: Vec<String> = written
        .iter()
        .map(|(index, path)| format!("{} \u{2192} {}", format_index(*index), path.display()))
        .collect();
    lines.push(format!("Sliced {} of {} images", written.len(), planned));
    lines
}

pub fn print_written(written: &[(usize, PathBuf)], planned: usize) {
    for line in format_written(written, planned) {
        println!("{line}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::geometry::{GapStyle, resolve};
    use crate::imaging::Dimensions;

    fn plan(layout: Layout, width: u32, height: u32) -> GeometryPlan {
        resolve(&layout, Dimensions { width, height }).unwrap()
    }

    #[test]
    fn format_index_is_one_based() {
        assert_eq!(format_index(0), "001");
        assert_eq!(format_index(41), "042");
    }

    #[test]
    fn human_bytes_units() {
        assert_eq!(human_bytes(512), "512 B");
        assert_eq!(human_bytes(2048), "2.0 KB");
        assert_eq!(human_bytes(3 * 1024 * 1024), "3.0 MB");
    }

    #[test]
    fn layout_labels() {
        assert_eq!(
            layout_label(&Layout::grid(2, GapStyle::WithoutGap)),
            "Grid 2 rows, without-gap"
        );
        assert_eq!(layout_label(&Layout::carousel(3)), "Carousel 3 columns");
        assert_eq!(layout_label(&Layout::custom(2, 4)), "Custom 2x4");
    }

    #[test]
    fn plan_header_and_grid_lines() {
        let lines = format_plan(&plan(Layout::grid(1, GapStyle::WithGap), 3130, 1350));
        assert_eq!(lines[0], "Grid 1 rows, with-gap: 3 slices from 3130x1350");
        assert_eq!(
            lines[2],
            "002 1080x1350 \u{2190} 3130x1350+0+0 (fill 3130x1350, cut 1080x1350+1025+0)"
        );
        assert_eq!(lines.last().unwrap(), "Recommended source: 3130x1350");
    }

    #[test]
    fn custom_plan_has_no_recommendation() {
        let lines = format_plan(&plan(Layout::custom(1, 2), 200, 100));
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[1], "001 100x100 \u{2190} 100x100+0+0");
    }

    #[test]
    fn plan_lists_skipped_slices_in_order() {
        let mut p = plan(Layout::custom(1, 3), 300, 100);
        p.slices.remove(1);
        let lines = format_plan(&p);
        let labels: Vec<&str> = lines[1..].iter().map(|l| &l[..3]).collect();
        assert_eq!(labels, vec!["001", "002", "003"]);
        assert_eq!(lines[2], "002 skipped (empty after rounding)");
    }

    #[test]
    fn slice_events() {
        assert_eq!(
            format_slice_event(&SliceEvent::Started {
                planned: 6,
                renderable: 5
            }),
            vec!["Rendering 5 of 6 slices"]
        );
        assert_eq!(
            format_slice_event(&SliceEvent::Rendered {
                index: 2,
                bytes: 2048
            }),
            vec!["    003 rendered (2.0 KB)"]
        );
        assert_eq!(
            format_slice_event(&SliceEvent::Skipped {
                index: 0,
                reason: "boom".into()
            }),
            vec!["    001 skipped: boom"]
        );
    }

    #[test]
    fn written_lists_files_then_summary() {
        let written = vec![
            (0, PathBuf::from("out/slice-001.png")),
            (2, PathBuf::from("out/slice-003.png")),
        ];
        assert_eq!(
            format_written(&written, 3),
            vec![
                "001 \u{2192} out/slice-001.png",
                "003 \u{2192} out/slice-003.png",
                "Sliced 2 of 3 images",
            ]
        );
    }
}
