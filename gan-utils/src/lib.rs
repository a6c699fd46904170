//! Common helpers shared across the GAN kernel crates.

/// Persisted kernel settings (geometry, precision, GPU, telemetry).
pub mod config;
/// Shared GPU context initialization.
pub mod gpu;
/// Raw output dumps to RGB images.
pub mod image_export;
/// Kernel timing guards.
pub mod telemetry;

use anyhow::Result;
use log::LevelFilter;

pub use config::{
    Accumulation, ConvGeometry, ConvTransposeGeometry, GpuSettings, KernelSettings,
    PrecisionSettings, TelemetrySettings,
};
pub use gpu::{GpuAvailability, GpuContext, GpuContextOptions, GpuInitError};
pub use image_export::{chw_to_rgb_image, load_f32_bin, save_chw_png};
pub use telemetry::{
    TimingGuard, configure as configure_telemetry, kernel_guard, telemetry_allows,
    telemetry_enabled, telemetry_level, timing_guard, timing_guard_if,
};

/// Initialize logging once.
///
/// `RUST_LOG` wins when set; otherwise `default_filter` applies. The telemetry
/// target is always let through so enabled timing guards are visible.
pub fn init_logging(default_filter: LevelFilter) -> Result<()> {
    let mut builder = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter.as_str()),
    );
    builder.filter_module("gan::telemetry", LevelFilter::Trace);

    if builder.try_init().is_err() {
        // Logger already initialized; nothing to do.
    }
    Ok(())
}
