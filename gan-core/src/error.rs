//! Error taxonomy shared by the host and accelerator kernels.

use std::panic::Location;

use thiserror::Error;

/// Failures a kernel call can report.
///
/// None of these are recoverable inside the kernel layer: shape and geometry
/// errors are raised before any output is written, and device errors abort the
/// call after every device buffer has been released.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("{op}: shape mismatch: {detail}")]
    ShapeMismatch { op: &'static str, detail: String },
    #[error("{op}: invalid geometry: {detail}")]
    InvalidGeometry { op: &'static str, detail: String },
    #[error("{op} failed at {file}:{line}: {message}")]
    Device {
        op: &'static str,
        file: &'static str,
        line: u32,
        message: String,
    },
    #[error("invalid tensor: {0}")]
    Tensor(String),
}

impl KernelError {
    pub(crate) fn shape(op: &'static str, detail: impl Into<String>) -> Self {
        Self::ShapeMismatch {
            op,
            detail: detail.into(),
        }
    }

    pub(crate) fn geometry(op: &'static str, detail: impl Into<String>) -> Self {
        Self::InvalidGeometry {
            op,
            detail: detail.into(),
        }
    }

    /// Device failure attributed to the caller's source location.
    pub(crate) fn device(
        op: &'static str,
        location: &'static Location<'static>,
        message: impl Into<String>,
    ) -> Self {
        Self::Device {
            op,
            file: location.file(),
            line: location.line(),
            message: message.into(),
        }
    }

    /// Returns `true` for accelerator operational failures.
    pub fn is_device(&self) -> bool {
        matches!(self, Self::Device { .. })
    }
}

pub type Result<T> = std::result::Result<T, KernelError>;

/// Turns any kernel error into process termination.
///
/// Drivers that treat every failure as fatal call `.or_abort()` on each kernel
/// result; the error is logged with its operation and location first.
pub trait FatalExt<T> {
    fn or_abort(self) -> T;
}

impl<T> FatalExt<T> for Result<T> {
    fn or_abort(self) -> T {
        match self {
            Ok(value) => value,
            Err(err) => {
                log::error!(target: "gan::kernels", "fatal kernel error: {err}");
                std::process::abort()
            }
        }
    }
}
