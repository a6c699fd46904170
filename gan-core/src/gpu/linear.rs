use super::Operands;
use super::dispatch::{DeviceScope, LaunchGeometry, extent};
use super::utils::ComputeKernel;
use crate::error::Result;
use crate::geometry::LinearDims;
use crate::tensor::Tensor;

use bytemuck::{Pod, Zeroable};
use gan_utils::gpu::GpuContext;

const LINEAR_WGSL: &str = include_str!("linear.wgsl");

pub(super) fn kernel(device: &wgpu::Device) -> ComputeKernel {
    ComputeKernel::new(device, "gan_linear", LINEAR_WGSL, 3, 1)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct LinearUniforms {
    rows: u32,
    features: u32,
    inner: u32,
    _pad: u32,
}

impl LinearUniforms {
    fn new(dims: &LinearDims) -> Result<Self> {
        Ok(Self {
            rows: extent("linear", "rows", dims.rows)?,
            features: extent("linear", "features", dims.features)?,
            inner: extent("linear", "inner", dims.inner)?,
            _pad: 0,
        })
    }
}

#[track_caller]
pub(super) fn run(
    kernel: &ComputeKernel,
    context: &GpuContext,
    dims: &LinearDims,
    operands: Operands<'_>,
    output: &mut Tensor,
) -> Result<()> {
    let uniforms = LinearUniforms::new(dims)?;
    let mut scope = DeviceScope::open(context, "linear");
    let x = scope.input(operands.input)?;
    let w = scope.input(operands.weight)?;
    let b = scope.input(operands.bias)?;
    let y = scope.allocate(output.name(), output.len())?;
    let params = scope.uniform("gan_linear_uniforms", &uniforms)?;
    scope.launch(
        kernel,
        &[x, w, b, y, params],
        LaunchGeometry::grid_2d(uniforms.features, uniforms.rows, 1),
    )?;
    scope.download(y, output)
}
