//! Raster executor: turns a [`GeometryPlan`] into encoded slices.
//!
//! Slices that share a `group` (the three cuts of one Grid band) share a
//! single crop + resize; every other slice is its own group. Groups are
//! rendered in parallel on the current rayon pool and the outputs are put
//! back into plan order before returning, so callers never observe the
//! scheduling.
//!
//! Rectangles in the plan were computed from the header dimensions. They are
//! clamped again against the decoded raster (and each cut against its resized
//! canvas) before reaching the backend; anything that clamps to nothing is
//! skipped rather than failing the request.

use super::backend::{BackendError, ImageBackend, SourceImage};
use super::geometry::{GeometryPlan, SliceGeometry};
use super::params::{CropParams, EncodeParams, PixelRect, Resize};
use log::warn;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("slicing cancelled")]
    Cancelled,
    #[error("slice {index} failed: {source}")]
    Slice {
        index: usize,
        #[source]
        source: BackendError,
    },
}

/// What to do when one slice cannot be cropped or encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EncodeFailurePolicy {
    /// Fail the whole request on the first broken slice.
    #[default]
    Fail,
    /// Drop the broken slice, log it and keep going.
    Skip,
}

/// Shared cancellation flag.
///
/// Cloning hands out another handle to the same flag. Work checks it between
/// groups and before every encode.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Progress events, sent as slices finish.
///
/// Sent from worker threads, so arrival order follows completion, not index.
#[derive(Debug, Clone, PartialEq)]
pub enum SliceEvent {
    /// The plan is resolved and rendering is about to start.
    Started { planned: usize, renderable: usize },
    Rendered { index: usize, bytes: usize },
    Skipped { index: usize, reason: String },
}

/// One encoded slice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SliceOutput {
    pub index: usize,
    pub bytes: Vec<u8>,
    pub mime_type: &'static str,
}

pub struct ExecuteOptions<'a> {
    pub encode: EncodeParams,
    pub policy: EncodeFailurePolicy,
    pub cancel: &'a CancelToken,
    pub events: Option<&'a Sender<SliceEvent>>,
}

impl ExecuteOptions<'_> {
    fn check_cancelled(&self) -> Result<(), ExecuteError> {
        if self.cancel.is_cancelled() {
            Err(ExecuteError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn emit(&self, event: SliceEvent) {
        if let Some(tx) = self.events {
            // A closed receiver only means nobody is listening any more.
            tx.send(event).ok();
        }
    }

    fn skip(&self, index: usize, reason: String) {
        warn!("Skipping slice {index}: {reason}");
        self.emit(SliceEvent::Skipped { index, reason });
    }

    /// Apply the failure policy to a backend error for `index`.
    fn on_failure(&self, index: usize, error: BackendError) -> Result<(), ExecuteError> {
        match self.policy {
            EncodeFailurePolicy::Fail => Err(ExecuteError::Slice {
                index,
                source: error,
            }),
            EncodeFailurePolicy::Skip => {
                self.skip(index, error.to_string());
                Ok(())
            }
        }
    }
}

/// Slices that share one crop + resize.
#[derive(Debug)]
struct RenderJob<'p> {
    source: PixelRect,
    resize: Option<Resize>,
    slices: Vec<&'p SliceGeometry>,
}

/// Group consecutive slices by `group`. Plans are emitted band-major, so
/// members of a group are always adjacent.
fn group_jobs(plan: &GeometryPlan) -> Vec<RenderJob<'_>> {
    let mut jobs: Vec<(usize, RenderJob<'_>)> = Vec::new();
    for slice in &plan.slices {
        match jobs.last_mut() {
            Some((group, job)) if *group == slice.group => job.slices.push(slice),
            _ => jobs.push((
                slice.group,
                RenderJob {
                    source: slice.source,
                    resize: slice.resize,
                    slices: vec![slice],
                },
            )),
        }
    }
    jobs.into_iter().map(|(_, job)| job).collect()
}

/// Render every slice of `plan` out of `image`.
///
/// Returns the encoded slices in ascending index order. With
/// [`EncodeFailurePolicy::Fail`] the first backend error aborts the run;
/// with [`EncodeFailurePolicy::Skip`] the broken slice is reported through
/// `options.events` and left out.
pub fn execute(
    backend: &impl ImageBackend,
    image: &SourceImage,
    plan: &GeometryPlan,
    options: &ExecuteOptions<'_>,
) -> Result<Vec<SliceOutput>, ExecuteError> {
    for index in plan.skipped() {
        options.skip(index, "slice rounds to an empty rectangle".to_string());
    }

    let jobs = group_jobs(plan);
    let rendered: Vec<Vec<SliceOutput>> = jobs
        .par_iter()
        .map(|job| render_job(backend, image, job, options))
        .collect::<Result<_, _>>()?;

    let mut outputs: Vec<SliceOutput> = rendered.into_iter().flatten().collect();
    outputs.sort_by_key(|output| output.index);
    Ok(outputs)
}

fn render_job(
    backend: &impl ImageBackend,
    image: &SourceImage,
    job: &RenderJob<'_>,
    options: &ExecuteOptions<'_>,
) -> Result<Vec<SliceOutput>, ExecuteError> {
    options.check_cancelled()?;

    let dims = image.dimensions();
    let Some(rect) = job.source.clamp_to(dims.width, dims.height) else {
        for slice in &job.slices {
            options.skip(
                slice.index,
                format!(
                    "source {} lies outside the {}x{} image",
                    job.source, dims.width, dims.height
                ),
            );
        }
        return Ok(Vec::new());
    };

    let canvas = match backend.crop(
        image,
        &CropParams {
            rect,
            resize: job.resize,
        },
    ) {
        Ok(canvas) => canvas,
        Err(error) => {
            let reason = error.to_string();
            let mut members = job.slices.iter();
            if let Some(first) = members.next() {
                options.on_failure(first.index, error)?;
            }
            for slice in members {
                options.skip(slice.index, reason.clone());
            }
            return Ok(Vec::new());
        }
    };

    let mut outputs = Vec::with_capacity(job.slices.len());
    for slice in &job.slices {
        options.check_cancelled()?;
        match render_slice(backend, &canvas, slice, &options.encode) {
            Ok(Some(bytes)) => {
                options.emit(SliceEvent::Rendered {
                    index: slice.index,
                    bytes: bytes.len(),
                });
                outputs.push(SliceOutput {
                    index: slice.index,
                    bytes,
                    mime_type: options.encode.format.mime_type(),
                });
            }
            Ok(None) => {
                let canvas_dims = canvas.dimensions();
                options.skip(
                    slice.index,
                    format!(
                        "cut lies outside the {}x{} canvas",
                        canvas_dims.width, canvas_dims.height
                    ),
                );
            }
            Err(error) => options.on_failure(slice.index, error)?,
        }
    }
    Ok(outputs)
}

/// Cut (if needed) and encode one slice. `Ok(None)` when the cut clamps away.
fn render_slice(
    backend: &impl ImageBackend,
    canvas: &SourceImage,
    slice: &SliceGeometry,
    encode: &EncodeParams,
) -> Result<Option<Vec<u8>>, BackendError> {
    let Some(cut) = slice.cut else {
        return backend.encode(canvas, encode).map(Some);
    };
    let dims = canvas.dimensions();
    let Some(rect) = cut.clamp_to(dims.width, dims.height) else {
        return Ok(None);
    };
    let piece = backend.crop(canvas, &CropParams { rect, resize: None })?;
    backend.encode(&piece, encode).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::imaging::backend::Dimensions;
    use crate::imaging::backend::tests::{MockBackend, RecordedOp};
    use crate::imaging::geometry::{GapStyle, Layout, resolve};
    use std::sync::mpsc;

    fn plan_for(layout: Layout, width: u32, height: u32) -> GeometryPlan {
        resolve(&layout, Dimensions { width, height }).unwrap()
    }

    fn run(
        backend: &MockBackend,
        plan: &GeometryPlan,
        policy: EncodeFailurePolicy,
        cancel: &CancelToken,
        events: Option<&Sender<SliceEvent>>,
    ) -> Result<Vec<SliceOutput>, ExecuteError> {
        let dims = backend.dimensions.unwrap();
        let image = SourceImage::blank(dims.width, dims.height);
        execute(
            backend,
            &image,
            plan,
            &ExecuteOptions {
                encode: EncodeParams::default(),
                policy,
                cancel,
                events,
            },
        )
    }

    fn indices(outputs: &[SliceOutput]) -> Vec<usize> {
        outputs.iter().map(|o| o.index).collect()
    }

    #[test]
    fn grid_crops_each_band_once() {
        let backend = MockBackend::with_dimensions(4000, 3000);
        let plan = plan_for(Layout::grid(2, GapStyle::WithGap), 4000, 3000);

        let outputs = run(
            &backend,
            &plan,
            EncodeFailurePolicy::Fail,
            &CancelToken::new(),
            None,
        )
        .unwrap();

        assert_eq!(indices(&outputs), vec![0, 1, 2, 3, 4, 5]);
        assert!(outputs.iter().all(|o| o.bytes == b"1080x1350"));
        assert!(outputs.iter().all(|o| o.mime_type == "image/png"));

        let ops = backend.get_operations();
        let band_crops = ops
            .iter()
            .filter(|op| matches!(op, RecordedOp::Crop { resize: Some(_), .. }))
            .count();
        let cuts = ops
            .iter()
            .filter(|op| matches!(op, RecordedOp::Crop { resize: None, .. }))
            .count();
        assert_eq!(band_crops, 2);
        assert_eq!(cuts, 6);
    }

    #[test]
    fn grid_cuts_use_composite_offsets() {
        let backend = MockBackend::with_dimensions(4000, 3000);
        let plan = plan_for(Layout::grid(1, GapStyle::WithoutGap), 4000, 3000);
        run(
            &backend,
            &plan,
            EncodeFailurePolicy::Fail,
            &CancelToken::new(),
            None,
        )
        .unwrap();

        let lefts: Vec<u32> = backend
            .get_operations()
            .into_iter()
            .filter_map(|op| match op {
                RecordedOp::Crop { rect, resize: None } => Some(rect.left),
                _ => None,
            })
            .collect();
        assert_eq!(lefts, vec![0, 1015, 2030]);
    }

    #[test]
    fn custom_outputs_follow_row_major_order() {
        let backend = MockBackend::with_dimensions(300, 200);
        let plan = plan_for(Layout::custom(2, 3), 300, 200);

        let outputs = run(
            &backend,
            &plan,
            EncodeFailurePolicy::Fail,
            &CancelToken::new(),
            None,
        )
        .unwrap();

        assert_eq!(indices(&outputs), (0..6).collect::<Vec<_>>());
        assert!(outputs.iter().all(|o| o.bytes == b"100x100"));
    }

    #[test]
    fn fail_policy_reports_first_broken_slice() {
        let mut backend = MockBackend::with_dimensions(300, 300);
        let plan = plan_for(Layout::custom(3, 3), 300, 300);
        backend.fail_crop = Some(plan.slices[4].source);

        let err = run(
            &backend,
            &plan,
            EncodeFailurePolicy::Fail,
            &CancelToken::new(),
            None,
        )
        .unwrap_err();

        assert!(matches!(err, ExecuteError::Slice { index: 4, .. }));
    }

    #[test]
    fn skip_policy_drops_a_whole_broken_band() {
        let mut backend = MockBackend::with_dimensions(4000, 3000);
        let plan = plan_for(Layout::grid(2, GapStyle::WithGap), 4000, 3000);
        backend.fail_crop = Some(plan.slices[3].source);
        let (tx, rx) = mpsc::channel();

        let outputs = run(
            &backend,
            &plan,
            EncodeFailurePolicy::Skip,
            &CancelToken::new(),
            Some(&tx),
        )
        .unwrap();
        drop(tx);

        assert_eq!(indices(&outputs), vec![0, 1, 2]);
        let mut skipped: Vec<usize> = rx
            .iter()
            .filter_map(|event| match event {
                SliceEvent::Skipped { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        skipped.sort();
        assert_eq!(skipped, vec![3, 4, 5]);
    }

    #[test]
    fn cancelled_token_stops_before_any_crop() {
        let backend = MockBackend::with_dimensions(300, 300);
        let plan = plan_for(Layout::custom(3, 3), 300, 300);
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = run(&backend, &plan, EncodeFailurePolicy::Fail, &cancel, None).unwrap_err();

        assert!(matches!(err, ExecuteError::Cancelled));
        assert!(backend.get_operations().is_empty());
    }

    #[test]
    fn geometry_past_decoded_image_is_skipped() {
        // Header claimed 300x300, decoder delivered 300x100.
        let backend = MockBackend::with_dimensions(300, 100);
        let plan = plan_for(Layout::custom(3, 1), 300, 300);
        let (tx, rx) = mpsc::channel();

        let outputs = run(
            &backend,
            &plan,
            EncodeFailurePolicy::Fail,
            &CancelToken::new(),
            Some(&tx),
        )
        .unwrap();
        drop(tx);

        assert_eq!(indices(&outputs), vec![0]);
        let skipped = rx
            .iter()
            .filter(|e| matches!(e, SliceEvent::Skipped { .. }))
            .count();
        assert_eq!(skipped, 2);
    }

    #[test]
    fn rendered_events_carry_byte_counts() {
        let backend = MockBackend::with_dimensions(200, 100);
        let plan = plan_for(Layout::custom(1, 2), 200, 100);
        let (tx, rx) = mpsc::channel();

        run(
            &backend,
            &plan,
            EncodeFailurePolicy::Fail,
            &CancelToken::new(),
            Some(&tx),
        )
        .unwrap();
        drop(tx);

        let mut events: Vec<SliceEvent> = rx.iter().collect();
        events.sort_by_key(|e| match e {
            SliceEvent::Rendered { index, .. } => *index,
            _ => usize::MAX,
        });
        assert_eq!(
            events,
            vec![
                SliceEvent::Rendered { index: 0, bytes: 7 },
                SliceEvent::Rendered { index: 1, bytes: 7 },
            ]
        );
    }

    #[test]
    fn cancel_token_clones_share_state() {
        let token = CancelToken::new();
        let other = token.clone();
        assert!(!other.is_cancelled());
        token.cancel();
        assert!(other.is_cancelled());
    }
}
