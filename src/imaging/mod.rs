//! Image processing: pure Rust, no external tools.
//!
//! | Operation | Crate / function |
//! |---|---|
//! | **Identify** | `ImageReader::into_dimensions`, `avif-parse` for AVIF |
//! | **Decode** | `image` readers, `rav1d` for AVIF |
//! | **Crop + resize** | `crop_imm` + Lanczos3 (`resize_exact` / `resize_to_fill`) |
//! | **Encode** | PNG, JPEG, WebP (lossy or lossless), AVIF (rav1e) |
//!
//! The module is split into:
//! - **Geometry**: Pure layout arithmetic (unit and property tested)
//! - **Parameters**: Data structures describing image operations
//! - **Backend**: [`ImageBackend`] trait + [`RustBackend`]
//! - **Operations**: The executor that walks a plan through the backend

pub mod backend;
pub mod geometry;
pub mod operations;
pub mod params;
pub mod rust_backend;

pub use backend::{BackendError, Dimensions, ImageBackend, SourceImage};
pub use geometry::{GapStyle, GeometryError, GeometryPlan, Layout, Mode, SliceGeometry, resolve};
pub use operations::{
    CancelToken, EncodeFailurePolicy, ExecuteError, ExecuteOptions, SliceEvent, SliceOutput,
    execute,
};
pub use params::{EncodeParams, OutputFormat, PixelRect, Quality};
pub use rust_backend::RustBackend;
