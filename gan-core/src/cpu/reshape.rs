use super::BACKEND;
use crate::error::Result;
use crate::geometry::ReshapeDims;
use crate::tensor::Tensor;

use gan_utils::telemetry::kernel_guard;

/// Reinterpret `[N, C·H·W]` as `[N, C, H, W]`:
/// `out[n, c, h, w] = in[n, c·H·W + h·W + w]`.
///
/// Both layouts are row-major, so the relabeling is an exact element copy.
pub fn reshape(input: &Tensor, output: &mut Tensor) -> Result<()> {
    ReshapeDims::unflatten(input, output)?;
    let _timer = kernel_guard(BACKEND, "reshape");
    output.data_mut().copy_from_slice(input.data());
    Ok(())
}

/// Inverse of [`reshape`]: `[N, C, H, W]` back to `[N, C·H·W]`.
pub fn flatten(input: &Tensor, output: &mut Tensor) -> Result<()> {
    ReshapeDims::flatten(input, output)?;
    let _timer = kernel_guard(BACKEND, "flatten");
    output.data_mut().copy_from_slice(input.data());
    Ok(())
}
