//! Request normalisation.
//!
//! [`CropPayload`] is the loose wire shape (`{"mode": "Grid", "rows": 2, ...}`)
//! as a browser form or the CLI produces it. [`LayoutRequest`] is what the
//! engine accepts: a closed [`Mode`], positive counts, forced defaults for
//! the dimension a mode ignores, and fully resolved encode parameters.
//!
//! Normalisation rules:
//! - `mode` is matched case-insensitively; anything else is `InvalidMode`.
//! - Grid ignores `cols` (forced to 1), Carousel ignores `rows` (forced to 1).
//! - A used count that is missing defaults to 1; zero or negative is
//!   `DegenerateGeometry`.
//! - `quality` is clamped to 1..=100; `format`, `quality` and `lossless`
//!   fall back to the `[output]` config section.

use crate::config::OutputConfig;
use crate::imaging::{
    EncodeFailurePolicy, EncodeParams, GapStyle, Layout, Mode, OutputFormat, Quality,
};
use crate::slicer::SliceError;
use serde::{Deserialize, Serialize};

/// Wire format of a slicing request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CropPayload {
    pub mode: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rows: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cols: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gap: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lossless: Option<bool>,
    /// Drop slices that fail to encode instead of failing the request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub best_effort: Option<bool>,
}

/// A normalised request, ready for the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutRequest {
    pub layout: Layout,
    pub encode: EncodeParams,
    /// Overrides `processing.on_encode_failure` when set.
    pub policy: Option<EncodeFailurePolicy>,
}

impl LayoutRequest {
    /// Request with default PNG encoding and the configured failure policy.
    pub fn new(layout: Layout) -> Self {
        Self {
            layout,
            encode: EncodeParams::default(),
            policy: None,
        }
    }

    pub fn with_encode(mut self, encode: EncodeParams) -> Self {
        self.encode = encode;
        self
    }

    pub fn with_policy(mut self, policy: EncodeFailurePolicy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn from_json(json: &str, defaults: &OutputConfig) -> Result<Self, SliceError> {
        let payload: CropPayload = serde_json::from_str(json)
            .map_err(|e| SliceError::InvalidRequest(format!("malformed payload: {e}")))?;
        Self::from_payload(&payload, defaults)
    }

    pub fn from_payload(payload: &CropPayload, defaults: &OutputConfig) -> Result<Self, SliceError> {
        let mode: Mode = payload
            .mode
            .parse()
            .map_err(|mode| SliceError::InvalidMode { mode })?;

        let gap = match payload.gap.as_deref() {
            Some(gap) => gap.parse().map_err(SliceError::InvalidRequest)?,
            None => GapStyle::default(),
        };

        let layout = match mode {
            Mode::Grid => Layout::grid(count(mode, "rows", payload.rows, payload)?, gap),
            Mode::Carousel => Layout::carousel(count(mode, "cols", payload.cols, payload)?),
            Mode::Custom => Layout::custom(
                count(mode, "rows", payload.rows, payload)?,
                count(mode, "cols", payload.cols, payload)?,
            ),
        };

        let mut encode = defaults.encode_params();
        if let Some(format) = payload.format.as_deref() {
            encode.format = format
                .parse::<OutputFormat>()
                .map_err(SliceError::InvalidRequest)?;
        }
        if let Some(quality) = payload.quality {
            encode.quality = Quality::new(quality.clamp(1, 100) as u32);
        }
        if let Some(lossless) = payload.lossless {
            encode.lossless = lossless;
        }

        let policy = payload.best_effort.map(|best_effort| {
            if best_effort {
                EncodeFailurePolicy::Skip
            } else {
                EncodeFailurePolicy::Fail
            }
        });

        Ok(Self {
            layout,
            encode,
            policy,
        })
    }
}

/// Validate one used row/column count.
fn count(
    mode: Mode,
    field: &str,
    value: Option<i64>,
    payload: &CropPayload,
) -> Result<u32, SliceError> {
    let value = value.unwrap_or(1);
    if value >= 1 && value <= u32::MAX as i64 {
        return Ok(value as u32);
    }
    let reason = if value < 1 {
        format!("{field} must be a positive integer, got {value}")
    } else {
        format!("{field} is too large ({value})")
    };
    Err(SliceError::DegenerateGeometry {
        mode,
        rows: as_context(payload.rows),
        cols: as_context(payload.cols),
        reason,
    })
}

/// Counts that cannot be represented are reported as 0.
fn as_context(value: Option<i64>) -> u32 {
    value
        .and_then(|v| u32::try_from(v).ok())
        .unwrap_or(0)
}
