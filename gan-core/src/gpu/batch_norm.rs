use super::Operands;
use super::dispatch::{DeviceScope, LaunchGeometry, extent};
use super::utils::ComputeKernel;
use crate::error::Result;
use crate::geometry::BatchNormDims;
use crate::params::BatchNorm2dParams;
use crate::tensor::Tensor;

use bytemuck::{Pod, Zeroable};
use gan_utils::gpu::GpuContext;

const BATCH_NORM_WGSL: &str = include_str!("batch_norm.wgsl");

pub(super) fn kernel(device: &wgpu::Device) -> ComputeKernel {
    ComputeKernel::new(device, "gan_batch_norm", BATCH_NORM_WGSL, 3, 1)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct BatchNormUniforms {
    batch: u32,
    channels: u32,
    plane: u32,
    epsilon: f32,
}

impl BatchNormUniforms {
    fn new(dims: &BatchNormDims, params: &BatchNorm2dParams) -> Result<Self> {
        const OP: &str = "batch_norm2d";
        // The shader walks N·H·W with a u32 counter.
        extent(OP, "per-channel count", dims.count())?;
        Ok(Self {
            batch: extent(OP, "batch", dims.batch)?,
            channels: extent(OP, "channels", dims.channels)?,
            plane: extent(OP, "plane", dims.plane)?,
            epsilon: params.epsilon,
        })
    }
}

#[track_caller]
pub(super) fn run(
    kernel: &ComputeKernel,
    context: &GpuContext,
    dims: &BatchNormDims,
    params: &BatchNorm2dParams,
    operands: Operands<'_>,
    output: &mut Tensor,
) -> Result<()> {
    let uniforms = BatchNormUniforms::new(dims, params)?;
    let mut scope = DeviceScope::open(context, "batch_norm2d");
    let x = scope.input(operands.input)?;
    let gamma = scope.input(operands.weight)?;
    let beta = scope.input(operands.bias)?;
    let y = scope.allocate(output.name(), output.len())?;
    let uniform = scope.uniform("gan_batch_norm_uniforms", &uniforms)?;
    scope.launch(
        kernel,
        &[x, gamma, beta, y, uniform],
        LaunchGeometry::per_group(uniforms.channels),
    )?;
    scope.download(y, output)
}
