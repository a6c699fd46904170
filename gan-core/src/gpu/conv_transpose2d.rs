use super::Operands;
use super::conv2d::{ConvUniforms, launch};
use super::utils::ComputeKernel;
use crate::error::Result;
use crate::geometry::ConvDims;
use crate::params::ConvTranspose2dParams;
use crate::tensor::Tensor;

use gan_utils::gpu::GpuContext;

const CONV_TRANSPOSE2D_WGSL: &str = include_str!("conv_transpose2d.wgsl");

pub(super) fn kernel(device: &wgpu::Device) -> ComputeKernel {
    ComputeKernel::new(device, "gan_conv_transpose2d", CONV_TRANSPOSE2D_WGSL, 3, 1)
}

/// `output_pad` only widens the output extent, which is already folded into
/// `dims`; the shader never reads it.
#[track_caller]
pub(super) fn run(
    kernel: &ComputeKernel,
    context: &GpuContext,
    dims: &ConvDims,
    params: &ConvTranspose2dParams,
    operands: Operands<'_>,
    output: &mut Tensor,
) -> Result<()> {
    const OP: &str = "conv_transpose2d";
    let uniforms = ConvUniforms::new(OP, dims, params.stride, params.pad, params.dilation)?;
    launch(kernel, context, OP, &uniforms, operands, output)
}
