//! Request orchestration.
//!
//! A [`Slicer`] owns the backend, the validated config and a dedicated rayon
//! pool. One call to [`Slicer::slice`] is one request:
//!
//! ```text
//! identify (header only) → limits → resolve geometry → decode → execute
//! ```
//!
//! The whole pipeline runs on the pool under `processing.timeout_secs`. The
//! caller thread only waits: when the budget runs out (or the caller's
//! [`CancelToken`] fires) it flips the pipeline's own token and returns
//! immediately. Workers notice the token between groups and encodes, so the
//! decoded source is dropped soon after. No partial result is ever returned.

use crate::config::{ConfigError, LimitsConfig, SlicerConfig, effective_threads};
use crate::imaging::{
    BackendError, CancelToken, ExecuteError, ExecuteOptions, GeometryError, GeometryPlan,
    ImageBackend, Mode, RustBackend, SliceEvent, SliceOutput, execute, resolve,
};
use crate::request::LayoutRequest;
use log::{debug, info, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How often a waiting caller re-checks its cancel token.
const POLL_INTERVAL: Duration = Duration::from_millis(25);

#[derive(Error, Debug)]
pub enum SliceError {
    #[error("invalid mode '{mode}' (expected Grid, Carousel or Custom)")]
    InvalidMode { mode: String },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("{mode} layout with {rows} row(s) x {cols} col(s) is degenerate: {reason}")]
    DegenerateGeometry {
        mode: Mode,
        rows: u32,
        cols: u32,
        reason: String,
    },
    #[error("unreadable image: {0}")]
    UnreadableImage(String),
    #[error("image is {width}x{height}, above the {max_pixels} pixel limit")]
    ImageTooLarge {
        width: u32,
        height: u32,
        max_pixels: u64,
    },
    #[error("slicing did not finish within {budget:?}")]
    Timeout { budget: Duration },
    #[error("slicing cancelled")]
    Cancelled,
    #[error("{mode} slice {index} failed: {source}")]
    EncodeFailure {
        index: usize,
        mode: Mode,
        #[source]
        source: BackendError,
    },
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("thread pool error: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<GeometryError> for SliceError {
    fn from(error: GeometryError) -> Self {
        match error {
            GeometryError::Degenerate {
                mode,
                rows,
                cols,
                reason,
            } => SliceError::DegenerateGeometry {
                mode,
                rows,
                cols,
                reason,
            },
        }
    }
}

impl SliceError {
    /// Stable machine-readable name of the variant.
    pub fn kind(&self) -> &'static str {
        match self {
            SliceError::InvalidMode { .. } => "InvalidMode",
            SliceError::InvalidRequest(_) => "InvalidRequest",
            SliceError::DegenerateGeometry { .. } => "DegenerateGeometry",
            SliceError::UnreadableImage(_) => "UnreadableImage",
            SliceError::ImageTooLarge { .. } => "ImageTooLarge",
            SliceError::Timeout { .. } => "Timeout",
            SliceError::Cancelled => "Cancelled",
            SliceError::EncodeFailure { .. } => "EncodeFailure",
            SliceError::Config(_) => "Config",
            SliceError::ThreadPool(_) => "ThreadPool",
            SliceError::Internal(_) => "Internal",
        }
    }

    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            SliceError::InvalidMode { .. }
            | SliceError::InvalidRequest(_)
            | SliceError::DegenerateGeometry { .. }
            | SliceError::UnreadableImage(_) => 400,
            SliceError::ImageTooLarge { .. } => 413,
            SliceError::Cancelled => 499,
            SliceError::Timeout { .. } => 503,
            SliceError::EncodeFailure { .. }
            | SliceError::Config(_)
            | SliceError::ThreadPool(_)
            | SliceError::Internal(_) => 500,
        }
    }

    /// Whether the same request may succeed if simply sent again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, SliceError::Timeout { .. })
    }
}

/// Resolve the geometry for `bytes` without decoding any pixels.
///
/// Checks the slice ceiling first, then reads the header and checks the
/// pixel ceiling, then resolves.
pub fn plan_request(
    backend: &impl ImageBackend,
    bytes: &[u8],
    request: &LayoutRequest,
    limits: &LimitsConfig,
) -> Result<GeometryPlan, SliceError> {
    let layout = &request.layout;
    layout.validate()?;
    let count = layout.slice_count();
    if count > limits.max_slices {
        return Err(SliceError::DegenerateGeometry {
            mode: layout.mode,
            rows: layout.rows,
            cols: layout.cols,
            reason: format!(
                "layout produces {count} slices, limit is {}",
                limits.max_slices
            ),
        });
    }

    let dims = backend
        .identify(bytes)
        .map_err(|e| SliceError::UnreadableImage(e.to_string()))?;
    if dims.pixel_count() > limits.max_pixels {
        return Err(SliceError::ImageTooLarge {
            width: dims.width,
            height: dims.height,
            max_pixels: limits.max_pixels,
        });
    }

    let plan = resolve(layout, dims)?;
    debug!(
        "Planned {} {} slice(s) from {}x{} ({} skipped)",
        plan.slices.len(),
        plan.mode(),
        dims.width,
        dims.height,
        plan.skipped().len()
    );
    Ok(plan)
}

/// The synchronous pipeline, run on a pool thread.
fn run_pipeline(
    backend: &impl ImageBackend,
    bytes: &[u8],
    request: &LayoutRequest,
    config: &SlicerConfig,
    cancel: &CancelToken,
    events: Option<&Sender<SliceEvent>>,
) -> Result<Vec<SliceOutput>, SliceError> {
    let plan = plan_request(backend, bytes, request, &config.limits)?;
    if cancel.is_cancelled() {
        return Err(SliceError::Cancelled);
    }

    let image = backend
        .decode(bytes)
        .map_err(|e| SliceError::UnreadableImage(e.to_string()))?;
    let decoded = image.dimensions();
    if decoded != plan.source {
        warn!(
            "Header said {}x{} but decoded {}x{}",
            plan.source.width, plan.source.height, decoded.width, decoded.height
        );
    }

    if let Some(tx) = events {
        tx.send(SliceEvent::Started {
            planned: plan.planned,
            renderable: plan.slices.len(),
        })
        .ok();
    }

    let options = ExecuteOptions {
        encode: request.encode,
        policy: request
            .policy
            .unwrap_or(config.processing.on_encode_failure),
        cancel,
        events,
    };
    execute(backend, &image, &plan, &options).map_err(|e| match e {
        ExecuteError::Cancelled => SliceError::Cancelled,
        ExecuteError::Slice { index, source } => SliceError::EncodeFailure {
            index,
            mode: plan.mode(),
            source,
        },
    })
}

/// The slicing engine.
///
/// Cheap to share behind an `Arc`; every call is independent.
pub struct Slicer<B: ImageBackend + 'static = RustBackend> {
    backend: Arc<B>,
    config: SlicerConfig,
    pool: Arc<rayon::ThreadPool>,
}

impl Slicer<RustBackend> {
    pub fn new(config: SlicerConfig) -> Result<Self, SliceError> {
        Self::with_backend(RustBackend::new(), config)
    }
}

impl<B: ImageBackend + 'static> Slicer<B> {
    pub fn with_backend(backend: B, config: SlicerConfig) -> Result<Self, SliceError> {
        config.validate()?;
        let threads = effective_threads(&config.processing);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("slicekit-{i}"))
            .build()?;
        debug!("Slicer pool started with {threads} thread(s)");
        Ok(Self {
            backend: Arc::new(backend),
            config,
            pool: Arc::new(pool),
        })
    }

    pub fn config(&self) -> &SlicerConfig {
        &self.config
    }

    /// Geometry only: header read, limits, resolve.
    pub fn plan(&self, bytes: &[u8], request: &LayoutRequest) -> Result<GeometryPlan, SliceError> {
        plan_request(self.backend.as_ref(), bytes, request, &self.config.limits)
    }

    /// Slice one image.
    pub fn slice(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        request: &LayoutRequest,
    ) -> Result<Vec<SliceOutput>, SliceError> {
        self.slice_with(bytes, request, &CancelToken::new(), None)
    }

    /// Slice one image, observing `cancel` and reporting progress on `events`.
    pub fn slice_with(
        &self,
        bytes: impl Into<Arc<[u8]>>,
        request: &LayoutRequest,
        cancel: &CancelToken,
        events: Option<Sender<SliceEvent>>,
    ) -> Result<Vec<SliceOutput>, SliceError> {
        let bytes: Arc<[u8]> = bytes.into();
        let budget = self.config.processing.timeout();
        let started = Instant::now();
        let deadline = started + budget;
        info!(
            "Slicing {} bytes as {} {}x{} → {}",
            bytes.len(),
            request.layout.mode,
            request.layout.rows,
            request.layout.cols,
            request.encode.format
        );

        let worker_cancel = CancelToken::new();
        let (tx, rx) = mpsc::channel();
        {
            let backend = Arc::clone(&self.backend);
            let config = self.config.clone();
            let request = *request;
            let worker_cancel = worker_cancel.clone();
            self.pool.spawn(move || {
                let result = catch_unwind(AssertUnwindSafe(|| {
                    run_pipeline(
                        backend.as_ref(),
                        &bytes,
                        &request,
                        &config,
                        &worker_cancel,
                        events.as_ref(),
                    )
                }))
                .unwrap_or_else(|_| Err(SliceError::Internal("slicing worker panicked".into())));
                // The caller may already have given up.
                tx.send(result).ok();
            });
        }

        loop {
            if cancel.is_cancelled() {
                worker_cancel.cancel();
                info!("Slicing cancelled by caller after {:?}", started.elapsed());
                return Err(SliceError::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                worker_cancel.cancel();
                warn!("Slicing exceeded its {budget:?} budget");
                return Err(SliceError::Timeout { budget });
            }
            match rx.recv_timeout((deadline - now).min(POLL_INTERVAL)) {
                Ok(result) => {
                    match &result {
                        Ok(slices) => info!(
                            "Sliced {} image(s) in {:?}",
                            slices.len(),
                            started.elapsed()
                        ),
                        Err(e) => warn!("Slicing failed: {e}"),
                    }
                    return result;
                }
                Err(RecvTimeoutError::Timeout) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SliceError::Internal(
                        "slicing worker exited without a result".into(),
                    ));
                }
            }
        }
    }
}
