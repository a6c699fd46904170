//! Persisted settings for the kernel workspace.
//!
//! Kernel geometry, numeric policy, GPU preferences and telemetry are kept in a
//! single JSON document so a driver can reproduce a run exactly. Every section
//! is `#[serde(default)]`, so partial files fill in the model's fixed
//! configuration.

use crate::gpu::GpuContextOptions;

use anyhow::{Context, Result};
use log::LevelFilter;
use serde::{Deserialize, Serialize};
use std::{
    fmt, fs,
    path::Path,
    str::FromStr,
};

/// Accumulator width used by a host kernel's inner reduction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum Accumulation {
    /// Accumulate in `f16`, rounding after every multiply-add.
    #[default]
    Half,
    /// Accumulate in `f32` and round once when storing.
    Single,
}

impl fmt::Display for Accumulation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Accumulation::Half => "half",
            Accumulation::Single => "single",
        })
    }
}

impl FromStr for Accumulation {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "half" | "f16" => Ok(Accumulation::Half),
            "single" | "f32" => Ok(Accumulation::Single),
            other => Err(format!("unknown accumulation mode '{other}'")),
        }
    }
}

/// Host accumulation policy per operator.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(default)]
pub struct PrecisionSettings {
    pub linear: Accumulation,
    pub conv: Accumulation,
    pub conv_transpose: Accumulation,
}

/// Geometry of the regular convolutions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConvGeometry {
    pub stride: u32,
    pub pad: u32,
    pub dilation: u32,
}

impl Default for ConvGeometry {
    fn default() -> Self {
        Self {
            stride: 1,
            pad: 1,
            dilation: 1,
        }
    }
}

/// Geometry of the upsampling (transposed) convolutions.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ConvTransposeGeometry {
    pub stride: u32,
    pub pad: u32,
    pub dilation: u32,
    pub output_pad: u32,
}

impl Default for ConvTransposeGeometry {
    fn default() -> Self {
        Self {
            stride: 2,
            pad: 1,
            dilation: 1,
            output_pad: 1,
        }
    }
}

/// Settings controlling optional runtime telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Whether kernel timing logs are enabled.
    pub enabled: bool,
    /// Logging level for telemetry output (error, warn, info, debug, trace).
    pub level: String,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            enabled: false,
            level: "debug".to_string(),
        }
    }
}

impl TelemetrySettings {
    /// Resolve the configured level string into a `LevelFilter`.
    ///
    /// Unknown strings resolve to `Debug`.
    pub fn level_filter(&self) -> LevelFilter {
        match self.level.trim().to_ascii_lowercase().as_str() {
            "warning" => LevelFilter::Warn,
            other => LevelFilter::from_str(other).unwrap_or(LevelFilter::Debug),
        }
    }

    /// Push these settings into the global telemetry switch.
    pub fn apply(&self) {
        crate::telemetry::configure(self.enabled, self.level_filter());
    }
}

/// GPU-specific runtime preferences.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GpuSettings {
    /// Whether a GPU context should be created at all.
    pub enabled: bool,
    /// Respect `WGPU_*` environment overrides when initializing the backend.
    pub respect_env: bool,
    /// Ask wgpu for its software fallback adapter.
    pub force_fallback_adapter: bool,
}

impl Default for GpuSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            respect_env: true,
            force_fallback_adapter: false,
        }
    }
}

impl From<&GpuSettings> for GpuContextOptions {
    fn from(settings: &GpuSettings) -> Self {
        GpuContextOptions {
            enabled: settings.enabled,
            respect_env: settings.respect_env,
            force_fallback_adapter: settings.force_fallback_adapter,
            ..Default::default()
        }
    }
}

impl From<GpuSettings> for GpuContextOptions {
    fn from(settings: GpuSettings) -> Self {
        (&settings).into()
    }
}

/// Complete kernel configuration for one model.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KernelSettings {
    pub conv: ConvGeometry,
    pub conv_transpose: ConvTransposeGeometry,
    pub precision: PrecisionSettings,
    /// Negative-side slope of the leaky rectifier.
    pub leaky_relu_slope: f32,
    /// Variance floor added before the square root in batch normalization.
    pub batch_norm_epsilon: f32,
    pub telemetry: TelemetrySettings,
    pub gpu: GpuSettings,
}

impl Default for KernelSettings {
    fn default() -> Self {
        Self {
            conv: ConvGeometry::default(),
            conv_transpose: ConvTransposeGeometry::default(),
            precision: PrecisionSettings::default(),
            leaky_relu_slope: 0.01,
            batch_norm_epsilon: 1e-5,
            telemetry: TelemetrySettings::default(),
            gpu: GpuSettings::default(),
        }
    }
}

impl KernelSettings {
    /// Load settings from a JSON file.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings file {}", path.display()))?;
        let settings: KernelSettings = serde_json::from_str(&contents)
            .with_context(|| format!("failed to parse settings JSON at {}", path.display()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Serialize settings to disk in pretty-printed JSON, overwriting existing files.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let payload =
            serde_json::to_string_pretty(self).context("failed to serialize settings JSON")?;
        fs::write(path, payload)
            .with_context(|| format!("failed to write settings file {}", path.display()))?;
        Ok(())
    }

    /// Reject geometry that no kernel can execute.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(
            self.conv.stride > 0 && self.conv.dilation > 0,
            "conv stride and dilation must be > 0 (got stride={}, dilation={})",
            self.conv.stride,
            self.conv.dilation
        );
        let transpose = &self.conv_transpose;
        anyhow::ensure!(
            transpose.stride > 0 && transpose.dilation > 0,
            "conv_transpose stride and dilation must be > 0 (got stride={}, dilation={})",
            transpose.stride,
            transpose.dilation
        );
        anyhow::ensure!(
            self.batch_norm_epsilon.is_finite() && self.batch_norm_epsilon >= 0.0,
            "batch_norm_epsilon must be finite and >= 0"
        );
        anyhow::ensure!(
            self.leaky_relu_slope.is_finite(),
            "leaky_relu_slope must be finite"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn default_settings_round_trip() {
        let file = NamedTempFile::new().expect("tempfile");
        let mut settings = KernelSettings::default();
        settings.precision.conv = Accumulation::Single;
        settings.save_to_path(file.path()).expect("save");

        let loaded = KernelSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.conv, settings.conv);
        assert_eq!(loaded.conv_transpose, settings.conv_transpose);
        assert_eq!(loaded.precision, settings.precision);
        assert_eq!(loaded.leaky_relu_slope, settings.leaky_relu_slope);
        assert_eq!(loaded.batch_norm_epsilon, settings.batch_norm_epsilon);
        assert_eq!(loaded.telemetry.level, settings.telemetry.level);
        assert_eq!(loaded.gpu.enabled, settings.gpu.enabled);
    }

    #[test]
    fn partial_file_uses_model_defaults() {
        let file = NamedTempFile::new().expect("tempfile");
        let json = r#"{
            "conv": { "stride": 2 },
            "precision": { "linear": "single" }
        }"#;
        fs::write(file.path(), json).expect("write custom settings");

        let loaded = KernelSettings::load_from_path(file.path()).expect("load");
        assert_eq!(
            loaded.conv,
            ConvGeometry {
                stride: 2,
                pad: 1,
                dilation: 1
            }
        );
        assert_eq!(loaded.conv_transpose, ConvTransposeGeometry::default());
        assert_eq!(loaded.precision.linear, Accumulation::Single);
        assert_eq!(loaded.precision.conv, Accumulation::Half);
        assert!(!loaded.telemetry.enabled);
        assert!(loaded.gpu.enabled);
    }

    #[test]
    fn invalid_geometry_is_rejected() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(file.path(), r#"{ "conv_transpose": { "stride": 0 } }"#)
            .expect("write settings");
        let err = KernelSettings::load_from_path(file.path()).expect_err("zero stride");
        assert!(err.to_string().contains("stride"), "{err}");
    }

    #[test]
    fn output_pad_is_not_bounded_by_stride() {
        let file = NamedTempFile::new().expect("tempfile");
        fs::write(
            file.path(),
            r#"{ "conv_transpose": { "stride": 1, "output_pad": 3 } }"#,
        )
        .expect("write settings");
        let loaded = KernelSettings::load_from_path(file.path()).expect("load");
        assert_eq!(loaded.conv_transpose.output_pad, 3);
    }

    #[test]
    fn telemetry_level_parses_variants() {
        let telemetry = TelemetrySettings {
            level: "TRACE".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Trace);

        let telemetry = TelemetrySettings {
            level: "warning".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Warn);

        let telemetry = TelemetrySettings {
            level: "loud".into(),
            ..TelemetrySettings::default()
        };
        assert_eq!(telemetry.level_filter(), LevelFilter::Debug);
    }

    #[test]
    fn accumulation_parses_aliases() {
        assert_eq!("F16".parse::<Accumulation>(), Ok(Accumulation::Half));
        assert_eq!(" single ".parse::<Accumulation>(), Ok(Accumulation::Single));
        assert!("double".parse::<Accumulation>().is_err());
        assert_eq!(Accumulation::Single.to_string(), "single");
    }

    #[test]
    fn gpu_settings_map_to_context_options() {
        let settings = GpuSettings {
            enabled: false,
            respect_env: false,
            force_fallback_adapter: true,
        };
        let options: GpuContextOptions = (&settings).into();
        assert!(!options.enabled);
        assert!(!options.respect_env);
        assert!(options.force_fallback_adapter);
    }
}
