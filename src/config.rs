//! Slicer configuration module.
//!
//! Handles loading, validating, and merging `slicekit.toml`. Stock defaults
//! are serialized to a TOML table and the user file is merged on top, so a
//! config file only needs the keys it wants to change.
//!
//! ## Configuration Options
//!
//! ```toml
//! # All options are optional - defaults shown below
//!
//! [limits]
//! max_pixels = 144000000    # Reject uploads above this pixel count (12000 x 12000)
//! max_slices = 100          # Reject layouts producing more slices than this
//!
//! [processing]
//! max_processes = 4         # Max parallel workers (omit for auto = CPU cores)
//! timeout_secs = 20         # Whole-request budget
//! on_encode_failure = "fail" # "fail" or "skip"
//!
//! [output]
//! format = "png"            # png, jpeg, webp or avif
//! quality = 100             # Lossy quality (1-100)
//! lossless = false          # Lossless webp; maximum quality avif
//! avif_speed = 6            # rav1e speed preset (1-10)
//! ```
//!
//! Unknown keys are rejected to catch typos early.

use crate::imaging::{EncodeFailurePolicy, EncodeParams, OutputFormat, Quality};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// File name looked up in the working directory when no `--config` is given.
pub const DEFAULT_CONFIG_FILE: &str = "slicekit.toml";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Slicer configuration loaded from `slicekit.toml`.
///
/// All fields have defaults. Unknown keys are rejected.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SlicerConfig {
    /// Input ceilings.
    pub limits: LimitsConfig,
    /// Parallelism, time budget and failure policy.
    pub processing: ProcessingConfig,
    /// Default encoding for requests that don't name one.
    pub output: OutputConfig,
}

impl SlicerConfig {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_pixels == 0 {
            return Err(ConfigError::Validation(
                "limits.max_pixels must be positive".into(),
            ));
        }
        if self.limits.max_slices == 0 {
            return Err(ConfigError::Validation(
                "limits.max_slices must be positive".into(),
            ));
        }
        if self.processing.timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "processing.timeout_secs must be positive".into(),
            ));
        }
        if self.processing.max_processes == Some(0) {
            return Err(ConfigError::Validation(
                "processing.max_processes must be at least 1".into(),
            ));
        }
        if !(1..=100).contains(&self.output.quality) {
            return Err(ConfigError::Validation(
                "output.quality must be 1-100".into(),
            ));
        }
        if !(1..=10).contains(&self.output.avif_speed) {
            return Err(ConfigError::Validation(
                "output.avif_speed must be 1-10".into(),
            ));
        }
        Ok(())
    }
}

/// Input ceilings, checked before any pixel is decoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    /// Largest accepted `width * height`.
    pub max_pixels: u64,
    /// Largest accepted slice count for one request.
    pub max_slices: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_pixels: 12_000 * 12_000,
            max_slices: 100,
        }
    }
}

/// Parallel processing settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Maximum number of parallel slice workers.
    /// When absent, defaults to the number of CPU cores.
    /// Values larger than the core count are clamped down.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_processes: Option<usize>,
    /// Budget for one request, identify through last encode.
    pub timeout_secs: u64,
    /// Policy when a single slice fails to crop or encode.
    pub on_encode_failure: EncodeFailurePolicy,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processes: None,
            timeout_secs: 20,
            on_encode_failure: EncodeFailurePolicy::Fail,
        }
    }
}

impl ProcessingConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Resolve the effective thread count from config.
///
/// - `None` → use all available cores
/// - `Some(n)` → use `min(n, cores)` (user can constrain down, not up)
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    config
        .max_processes
        .map(|n| n.clamp(1, cores))
        .unwrap_or(cores)
}

/// Default encoding settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputConfig {
    pub format: OutputFormat,
    pub quality: u32,
    pub lossless: bool,
    pub avif_speed: u8,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: OutputFormat::Png,
            quality: 100,
            lossless: false,
            avif_speed: 6,
        }
    }
}

impl OutputConfig {
    pub fn encode_params(&self) -> EncodeParams {
        EncodeParams {
            format: self.format,
            quality: Quality::new(self.quality),
            lossless: self.lossless,
            avif_speed: self.avif_speed,
        }
    }
}

// =============================================================================
// Config loading, merging, and validation
// =============================================================================

/// Returns the stock default config as a `toml::Value::Table`.
///
/// This is the base layer user overrides are merged onto.
pub fn stock_defaults_value() -> Result<toml::Value, ConfigError> {
    Ok(toml::Value::try_from(SlicerConfig::default())?)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Tables are merged key-by-key (overlay keys override base keys).
/// - Non-table values in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn merge_toml(base: toml::Value, overlay: toml::Value) -> toml::Value {
    match (base, overlay) {
        (toml::Value::Table(mut base_table), toml::Value::Table(overlay_table)) => {
            for (key, value) in overlay_table {
                let merged = match base_table.remove(&key) {
                    Some(existing) => merge_toml(existing, value),
                    None => value,
                };
                base_table.insert(key, merged);
            }
            toml::Value::Table(base_table)
        }
        (_, overlay) => overlay,
    }
}

/// Read a config file as a raw TOML value.
///
/// Returns `Ok(None)` if the file does not exist, `Err` if it exists but is
/// not valid TOML.
pub fn load_raw_config(path: &Path) -> Result<Option<toml::Value>, ConfigError> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    let value: toml::Value = toml::from_str(&content)?;
    Ok(Some(value))
}

/// Merge an optional overlay onto a base value, then deserialize and validate.
pub fn resolve_config(
    base: toml::Value,
    overlay: Option<toml::Value>,
) -> Result<SlicerConfig, ConfigError> {
    let merged = match overlay {
        Some(overlay) => merge_toml(base, overlay),
        None => base,
    };
    let config: SlicerConfig = merged.try_into()?;
    config.validate()?;
    Ok(config)
}

/// Load config from `path`, falling back to stock defaults when the file is
/// missing.
pub fn load_config(path: &Path) -> Result<SlicerConfig, ConfigError> {
    resolve_config(stock_defaults_value()?, load_raw_config(path)?)
}

/// Returns a fully-commented stock `slicekit.toml`.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# slicekit configuration
# ======================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Limits
# ---------------------------------------------------------------------------
[limits]
# Uploads whose width * height exceeds this are rejected before decoding.
max_pixels = 144000000

# Layouts that would produce more slices than this are rejected.
max_slices = 100

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Maximum parallel slice workers.
# Omit or comment out to auto-detect (= number of CPU cores).
# max_processes = 4

# Seconds one request may take, from reading the header to the last encode.
timeout_secs = 20

# What to do when one slice fails to crop or encode:
#   "fail" - the whole request fails
#   "skip" - the slice is dropped and reported, the rest are returned
on_encode_failure = "fail"

# ---------------------------------------------------------------------------
# Output encoding (requests may override each of these)
# ---------------------------------------------------------------------------
[output]
# png, jpeg, webp or avif.
format = "png"

# Lossy quality, 1 = worst, 100 = best. Used by jpeg and avif.
quality = 100

# Lossless webp. For avif this selects maximum quality (not bit-exact).
lossless = false

# rav1e speed preset for avif, 1 = slowest/smallest, 10 = fastest.
avif_speed = 6
"##
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_values() {
        let config = SlicerConfig::default();
        assert_eq!(config.limits.max_pixels, 144_000_000);
        assert_eq!(config.limits.max_slices, 100);
        assert_eq!(config.processing.timeout_secs, 20);
        assert_eq!(config.processing.on_encode_failure, EncodeFailurePolicy::Fail);
        assert_eq!(config.output.format, OutputFormat::Png);
        assert_eq!(config.output.quality, 100);
    }

    #[test]
    fn parse_partial_config() {
        let toml = r#"
[output]
format = "webp"
"#;
        let config: SlicerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.output.format, OutputFormat::Webp);
        // Defaults preserved
        assert_eq!(config.output.quality, 100);
        assert_eq!(config.processing.timeout_secs, 20);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let toml = r#"
[output]
fromat = "webp"
"#;
        assert!(toml::from_str::<SlicerConfig>(toml).is_err());
    }

    #[test]
    fn skip_policy_parses() {
        let toml = r#"
[processing]
on_encode_failure = "skip"
"#;
        let config: SlicerConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.processing.on_encode_failure, EncodeFailurePolicy::Skip);
    }

    #[test]
    fn encode_params_follow_output_section() {
        let output = OutputConfig {
            format: OutputFormat::Avif,
            quality: 70,
            lossless: true,
            avif_speed: 9,
        };
        let params = output.encode_params();
        assert_eq!(params.format, OutputFormat::Avif);
        assert_eq!(params.quality.value(), 70);
        assert!(params.lossless);
        assert_eq!(params.avif_speed, 9);
    }

    // =========================================================================
    // validate tests
    // =========================================================================

    #[test]
    fn validate_default_config_passes() {
        assert!(SlicerConfig::default().validate().is_ok());
    }

    #[test]
    fn validate_quality_range() {
        let mut config = SlicerConfig::default();
        config.output.quality = 0;
        assert!(config.validate().is_err());
        config.output.quality = 101;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_zero_timeout() {
        let mut config = SlicerConfig::default();
        config.processing.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validate_zero_limits() {
        let mut config = SlicerConfig::default();
        config.limits.max_pixels = 0;
        assert!(config.validate().is_err());

        let mut config = SlicerConfig::default();
        config.limits.max_slices = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_avif_speed_range() {
        let mut config = SlicerConfig::default();
        config.output.avif_speed = 11;
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // effective_threads tests
    // =========================================================================

    #[test]
    fn effective_threads_auto() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        assert_eq!(effective_threads(&ProcessingConfig::default()), cores);
    }

    #[test]
    fn effective_threads_clamped_to_cores() {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let config = ProcessingConfig {
            max_processes: Some(99_999),
            ..ProcessingConfig::default()
        };
        assert_eq!(effective_threads(&config), cores);
    }

    #[test]
    fn effective_threads_user_constrains_down() {
        let config = ProcessingConfig {
            max_processes: Some(1),
            ..ProcessingConfig::default()
        };
        assert_eq!(effective_threads(&config), 1);
    }

    // =========================================================================
    // merge / load tests
    // =========================================================================

    #[test]
    fn merge_toml_overlay_wins_and_base_survives() {
        let base: toml::Value = toml::from_str(
            r#"
[output]
format = "png"
quality = 100
"#,
        )
        .unwrap();
        let overlay: toml::Value = toml::from_str(
            r#"
[output]
quality = 80
"#,
        )
        .unwrap();
        let merged = merge_toml(base, overlay);
        let output = merged.get("output").unwrap();
        assert_eq!(output.get("quality").unwrap().as_integer(), Some(80));
        assert_eq!(output.get("format").unwrap().as_str(), Some("png"));
    }

    #[test]
    fn load_config_returns_default_when_no_file() {
        let tmp = TempDir::new().unwrap();
        let config = load_config(&tmp.path().join(DEFAULT_CONFIG_FILE)).unwrap();
        assert_eq!(config, SlicerConfig::default());
    }

    #[test]
    fn load_config_reads_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"
[limits]
max_pixels = 1000

[processing]
max_processes = 2
"#,
        )
        .unwrap();

        let config = load_config(&path).unwrap();
        assert_eq!(config.limits.max_pixels, 1000);
        assert_eq!(config.processing.max_processes, Some(2));
        // Unspecified values are defaults
        assert_eq!(config.limits.max_slices, 100);
        assert_eq!(config.output.format, OutputFormat::Png);
    }

    #[test]
    fn load_config_invalid_toml_is_error() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(&path, "this is not valid toml [[[").unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Toml(_))));
    }

    #[test]
    fn load_config_validates_values() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CONFIG_FILE);
        fs::write(
            &path,
            r#"
[output]
quality = 200
"#,
        )
        .unwrap();
        assert!(matches!(load_config(&path), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn stock_defaults_value_has_all_sections() {
        let value = stock_defaults_value().unwrap();
        assert!(value.is_table());
        assert!(value.get("limits").is_some());
        assert!(value.get("processing").is_some());
        assert!(value.get("output").is_some());
    }

    #[test]
    fn stock_config_toml_roundtrips_to_defaults() {
        let config: SlicerConfig = toml::from_str(stock_config_toml()).unwrap();
        assert_eq!(config, SlicerConfig::default());
    }
}
