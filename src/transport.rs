//! JSON response shapes for an HTTP-style caller.
//!
//! The engine deals in byte buffers; this is the one place they become
//! `data:` URIs. Success:
//!
//! ```json
//! { "type": "array", "slices": [ { "index": 0, "dataUrl": "data:image/png;base64,...", "mimeType": "image/png" } ] }
//! ```
//!
//! Failure (with the status from [`SliceError::status`]):
//!
//! ```json
//! { "error": "ImageTooLarge", "detail": "image is 20000x20000, ...", "retryable": false }
//! ```

use crate::imaging::SliceOutput;
use crate::slicer::SliceError;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};

pub fn data_url(mime_type: &str, bytes: &[u8]) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

/// Split a `data:<mime>;base64,<payload>` URI back into MIME type and bytes.
pub fn decode_data_url(url: &str) -> Option<(String, Vec<u8>)> {
    let rest = url.strip_prefix("data:")?;
    let (mime_type, payload) = rest.split_once(";base64,")?;
    let bytes = STANDARD.decode(payload).ok()?;
    Some((mime_type.to_string(), bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SliceEntry {
    pub index: usize,
    pub data_url: String,
    pub mime_type: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub slices: Vec<SliceEntry>,
}

impl SliceResponse {
    pub fn from_outputs(outputs: &[SliceOutput]) -> Self {
        Self {
            kind: "array".to_string(),
            slices: outputs
                .iter()
                .map(|output| SliceEntry {
                    index: output.index,
                    data_url: data_url(output.mime_type, &output.bytes),
                    mime_type: output.mime_type.to_string(),
                })
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub detail: String,
    pub retryable: bool,
}

impl From<&SliceError> for ErrorResponse {
    fn from(error: &SliceError) -> Self {
        Self {
            error: error.kind().to_string(),
            detail: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

/// Status code plus JSON body, ready for any HTTP framework.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    pub status: u16,
    pub body: serde_json::Value,
}

impl Reply {
    pub fn from_result(result: &Result<Vec<SliceOutput>, SliceError>) -> Self {
        let (status, body) = match result {
            Ok(outputs) => (200, serde_json::to_value(SliceResponse::from_outputs(outputs))),
            Err(error) => (error.status(), serde_json::to_value(ErrorResponse::from(error))),
        };
        match body {
            Ok(body) => Self { status, body },
            Err(e) => Self {
                status: 500,
                body: serde_json::json!({
                    "error": "Internal",
                    "detail": format!("response serialization failed: {e}"),
                    "retryable": false,
                }),
            },
        }
    }
}
