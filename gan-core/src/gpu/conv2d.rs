use super::Operands;
use super::dispatch::{DeviceScope, LaunchGeometry, extent};
use super::utils::ComputeKernel;
use crate::error::Result;
use crate::geometry::ConvDims;
use crate::params::Conv2dParams;
use crate::tensor::Tensor;

use bytemuck::{Pod, Zeroable};
use gan_utils::gpu::GpuContext;

const CONV2D_WGSL: &str = include_str!("conv2d.wgsl");

pub(super) fn kernel(device: &wgpu::Device) -> ComputeKernel {
    ComputeKernel::new(device, "gan_conv2d", CONV2D_WGSL, 3, 1)
}

/// Uniform block shared by the forward and transposed convolution shaders.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
pub(super) struct ConvUniforms {
    batch: u32,
    in_channels: u32,
    in_height: u32,
    in_width: u32,
    out_channels: u32,
    out_height: u32,
    out_width: u32,
    kernel_height: u32,
    kernel_width: u32,
    stride: u32,
    pad: u32,
    dilation: u32,
}

impl ConvUniforms {
    pub(super) fn new(
        op: &'static str,
        dims: &ConvDims,
        stride: usize,
        pad: usize,
        dilation: usize,
    ) -> Result<Self> {
        Ok(Self {
            batch: extent(op, "batch", dims.batch)?,
            in_channels: extent(op, "in_channels", dims.in_channels)?,
            in_height: extent(op, "in_height", dims.in_height)?,
            in_width: extent(op, "in_width", dims.in_width)?,
            out_channels: extent(op, "out_channels", dims.out_channels)?,
            out_height: extent(op, "out_height", dims.out_height)?,
            out_width: extent(op, "out_width", dims.out_width)?,
            kernel_height: extent(op, "kernel_height", dims.kernel_height)?,
            kernel_width: extent(op, "kernel_width", dims.kernel_width)?,
            stride: extent(op, "stride", stride)?,
            pad: extent(op, "pad", pad)?,
            dilation: extent(op, "dilation", dilation)?,
        })
    }

    /// 16×16 spatial blocks, one grid layer per `(n, out_channel)` plane.
    pub(super) fn geometry(&self) -> LaunchGeometry {
        LaunchGeometry::grid_2d(
            self.out_width,
            self.out_height,
            self.batch.saturating_mul(self.out_channels),
        )
    }
}

/// Shared launch body: both convolution flavours bind the same five slots.
#[track_caller]
pub(super) fn launch(
    kernel: &ComputeKernel,
    context: &GpuContext,
    op: &'static str,
    uniforms: &ConvUniforms,
    operands: Operands<'_>,
    output: &mut Tensor,
) -> Result<()> {
    let mut scope = DeviceScope::open(context, op);
    let x = scope.input(operands.input)?;
    let w = scope.input(operands.weight)?;
    let b = scope.input(operands.bias)?;
    let y = scope.allocate(output.name(), output.len())?;
    let params = scope.uniform(kernel.label, uniforms)?;
    scope.launch(kernel, &[x, w, b, y, params], uniforms.geometry())?;
    scope.download(y, output)
}

#[track_caller]
pub(super) fn run(
    kernel: &ComputeKernel,
    context: &GpuContext,
    dims: &ConvDims,
    params: &Conv2dParams,
    operands: Operands<'_>,
    output: &mut Tensor,
) -> Result<()> {
    let uniforms = ConvUniforms::new("conv2d", dims, params.stride, params.pad, params.dilation)?;
    launch(kernel, context, "conv2d", &uniforms, operands, output)
}
