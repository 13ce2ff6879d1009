//! Configuration types for label conversion.
//!
//! Two structs carry every knob:
//!
//! * [`ServiceConfig`]: process-wide settings covering where artifacts live, how long
//!   they may survive, how often the janitor sweeps, and the hardening caps.
//!   Built once at start-up via [`ServiceConfig::builder()`].
//! * [`ConversionParams`]: per-request geometry (margin and target canvas).
//!   Built via [`ConversionParams::builder()`] or taken from
//!   [`ConversionParams::default()`] (4in × 6in at 72pt/in, −24mm margin).

use crate::error::LabelError;
use crate::pipeline::geometry::CanvasSpec;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Process-wide configuration for a [`crate::Converter`].
///
/// # Example
/// ```rust
/// use labelcrop::{RetentionMode, ServiceConfig};
/// use std::time::Duration;
///
/// let config = ServiceConfig::builder()
///     .base_dir("/var/lib/labelcrop")
///     .retention_window(Duration::from_secs(300))
///     .sweep_interval(Duration::from_secs(60))
///     .retention_mode(RetentionMode::Eager)
///     .build()
///     .unwrap();
/// assert_eq!(config.retention_window.as_secs(), 300);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Root directory holding the `uploads/`, `outputs/` and `scratch/` areas.
    /// Default: `./storage`.
    pub base_dir: PathBuf,

    /// Maximum artifact age before the janitor reclaims it. Default: 24 h.
    pub retention_window: Duration,

    /// Time between janitor sweeps. Default: 1 h.
    pub sweep_interval: Duration,

    /// What happens to the output artifact once it has been served.
    /// Default: [`RetentionMode::Eager`].
    pub retention_mode: RetentionMode,

    /// Origins the external HTTP layer should accept. Not enforced here.
    pub allowed_origins: Vec<String>,

    /// Largest accepted upload in bytes. Default: 50 MiB.
    pub max_upload_bytes: u64,

    /// Largest accepted page count. Default: 1000.
    pub max_pages: usize,

    /// Wall-clock budget for the transform stage. Default: 120 s.
    pub conversion_timeout: Duration,

    /// How long finished job records stay queryable. Default: 1 h.
    pub job_ttl: Duration,

    /// Upper bound on retained job records. Default: 10 000.
    pub max_jobs: usize,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("storage"),
            retention_window: Duration::from_secs(24 * 60 * 60),
            sweep_interval: Duration::from_secs(60 * 60),
            retention_mode: RetentionMode::default(),
            allowed_origins: Vec::new(),
            max_upload_bytes: 50 * 1024 * 1024,
            max_pages: 1000,
            conversion_timeout: Duration::from_secs(120),
            job_ttl: Duration::from_secs(60 * 60),
            max_jobs: 10_000,
        }
    }
}

impl ServiceConfig {
    /// Create a new builder for `ServiceConfig`.
    pub fn builder() -> ServiceConfigBuilder {
        ServiceConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ServiceConfig`].
#[derive(Debug)]
pub struct ServiceConfigBuilder {
    config: ServiceConfig,
}

impl ServiceConfigBuilder {
    pub fn base_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.base_dir = dir.into();
        self
    }

    pub fn retention_window(mut self, window: Duration) -> Self {
        self.config.retention_window = window;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.config.sweep_interval = interval;
        self
    }

    pub fn retention_mode(mut self, mode: RetentionMode) -> Self {
        self.config.retention_mode = mode;
        self
    }

    pub fn allowed_origins<I, S>(mut self, origins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_origins = origins.into_iter().map(Into::into).collect();
        self
    }

    pub fn max_upload_bytes(mut self, bytes: u64) -> Self {
        self.config.max_upload_bytes = bytes;
        self
    }

    pub fn max_pages(mut self, pages: usize) -> Self {
        self.config.max_pages = pages;
        self
    }

    pub fn conversion_timeout(mut self, timeout: Duration) -> Self {
        self.config.conversion_timeout = timeout;
        self
    }

    pub fn job_ttl(mut self, ttl: Duration) -> Self {
        self.config.job_ttl = ttl;
        self
    }

    pub fn max_jobs(mut self, n: usize) -> Self {
        self.config.max_jobs = n;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ServiceConfig, LabelError> {
        let c = &self.config;
        if c.base_dir.as_os_str().is_empty() {
            return Err(LabelError::InvalidConfig("base_dir must not be empty".into()));
        }
        if c.retention_window.is_zero() {
            return Err(LabelError::InvalidConfig(
                "retention_window must be > 0".into(),
            ));
        }
        if c.sweep_interval.is_zero() {
            return Err(LabelError::InvalidConfig("sweep_interval must be > 0".into()));
        }
        if c.max_upload_bytes == 0 {
            return Err(LabelError::InvalidConfig(
                "max_upload_bytes must be > 0".into(),
            ));
        }
        if c.max_pages == 0 {
            return Err(LabelError::InvalidConfig("max_pages must be ≥ 1".into()));
        }
        if c.conversion_timeout.is_zero() {
            return Err(LabelError::InvalidConfig(
                "conversion_timeout must be > 0".into(),
            ));
        }
        if c.max_jobs == 0 {
            return Err(LabelError::InvalidConfig("max_jobs must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

/// How the output artifact is reclaimed after it has been served.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionMode {
    /// Delete the output as soon as the caller finished reading it, or
    /// dropped the handle. (default)
    #[default]
    Eager,
    /// Leave the output for the janitor's age-based sweep.
    Janitor,
}

/// Per-request geometry parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConversionParams {
    /// Signed margin in millimetres; negative values widen the clip.
    /// Default: −24.
    pub margin_mm: f64,
    /// Canvas width in inches. Default: 4.
    pub width_inches: f64,
    /// Canvas height in inches. Default: 6.
    pub height_inches: f64,
    /// Points per inch used to size the canvas. Default: 72.
    pub points_per_inch: u32,
}

impl Default for ConversionParams {
    fn default() -> Self {
        Self {
            margin_mm: -24.0,
            width_inches: 4.0,
            height_inches: 6.0,
            points_per_inch: 72,
        }
    }
}

impl ConversionParams {
    /// Create a new builder starting from the defaults.
    pub fn builder() -> ConversionParamsBuilder {
        ConversionParamsBuilder {
            params: Self::default(),
        }
    }

    /// Check every field; failures are validation errors.
    pub fn validate(&self) -> Result<(), LabelError> {
        if !self.margin_mm.is_finite() {
            return Err(LabelError::InvalidParameter {
                name: "margin_mm",
                reason: format!("must be a finite number, got {}", self.margin_mm),
            });
        }
        for (name, value) in [
            ("width_inches", self.width_inches),
            ("height_inches", self.height_inches),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(LabelError::InvalidParameter {
                    name,
                    reason: format!("must be a positive number, got {value}"),
                });
            }
        }
        if self.points_per_inch == 0 {
            return Err(LabelError::InvalidParameter {
                name: "points_per_inch",
                reason: "must be ≥ 1".into(),
            });
        }
        Ok(())
    }

    /// Target canvas for every page of this request.
    pub fn canvas(&self) -> CanvasSpec {
        CanvasSpec::from_inches(self.width_inches, self.height_inches, self.points_per_inch)
    }
}

/// Builder for [`ConversionParams`].
#[derive(Debug)]
pub struct ConversionParamsBuilder {
    params: ConversionParams,
}

impl ConversionParamsBuilder {
    pub fn margin_mm(mut self, mm: f64) -> Self {
        self.params.margin_mm = mm;
        self
    }

    pub fn width_inches(mut self, inches: f64) -> Self {
        self.params.width_inches = inches;
        self
    }

    pub fn height_inches(mut self, inches: f64) -> Self {
        self.params.height_inches = inches;
        self
    }

    pub fn points_per_inch(mut self, ppi: u32) -> Self {
        self.params.points_per_inch = ppi;
        self
    }

    /// Build the parameters, validating constraints.
    pub fn build(self) -> Result<ConversionParams, LabelError> {
        self.params.validate()?;
        Ok(self.params)
    }
}
