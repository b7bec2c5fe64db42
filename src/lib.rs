//! # slicekit
//!
//! Slices one uploaded image into an ordered set of social-media tiles:
//! a profile **Grid** (3 columns × N rows of 1080×1350), a panoramic
//! **Carousel** (N 4:5 segments resized to 1080×1350) or a free **Custom**
//! R×C tiling at native resolution.
//!
//! # Pipeline
//!
//! ```text
//! bytes + LayoutRequest
//!   → identify (header only)          dimensions, pixel ceiling
//!   → resolve (pure geometry)         ordered integer rectangles
//!   → decode                          one shared raster
//!   → execute (rayon)                 crop → resize → cut → encode
//!   → Vec<SliceOutput>                sorted by index
//! ```
//!
//! Everything stays in memory. The only place bytes become text is
//! [`transport`], which wraps slices as `data:` URIs for an HTTP caller.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`imaging`] | Geometry, parameter types, the [`ImageBackend`](imaging::ImageBackend) seam and the raster executor |
//! | [`request`] | Wire payload → validated [`LayoutRequest`](request::LayoutRequest) |
//! | [`slicer`] | The engine: limits, timeout, cancellation, error mapping |
//! | [`transport`] | JSON success/error bodies with HTTP-equivalent status codes |
//! | [`preview`] | On-screen guides from the same geometry, behind a one-at-a-time gate |
//! | [`config`] | `slicekit.toml` loading, validation and merging |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## One Geometry, Two Consumers
//!
//! The frame functions in [`imaging::geometry`] are the only place the layout
//! arithmetic lives. The resolver rounds them to pixels for slicing; the
//! preview evaluates them at display size for the guides. The Grid constants
//! (aspect, composite width, cut offsets) are empirically derived and exact;
//! changing them breaks the seamless look of a profile grid.
//!
//! ## Bands Are Cut From One Resize
//!
//! A Grid band is cropped and stretched to the composite width once, and its
//! three slices are cut from that in-memory canvas. There is no intermediate
//! encode between the stretch and the cuts.
//!
//! ## Whole-Request Failure By Default
//!
//! A slice that fails to encode fails the request, since a grid with a hole
//! is not postable. Best-effort mode (`bestEffort: true` or
//! `processing.on_encode_failure = "skip"`) drops the slice instead and
//! reports it.

pub mod config;
pub mod imaging;
pub mod output;
pub mod preview;
pub mod request;
pub mod slicer;
pub mod transport;

pub use request::{CropPayload, LayoutRequest};
pub use slicer::{SliceError, Slicer};

#[cfg(test)]
pub(crate) mod test_helpers;
