use super::dispatch::{DeviceScope, LaunchGeometry, extent};
use super::utils::ComputeKernel;
use crate::error::Result;
use crate::tensor::Tensor;

use bytemuck::{Pod, Zeroable};
use gan_utils::gpu::GpuContext;

const COPY_WGSL: &str = include_str!("copy.wgsl");

pub(super) fn kernel(device: &wgpu::Device) -> ComputeKernel {
    ComputeKernel::new(device, "gan_copy", COPY_WGSL, 1, 1)
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct CopyUniforms {
    len: u32,
    _pad: [u32; 3],
}

/// Element-for-element copy between two tensors of equal volume.
#[track_caller]
pub(super) fn run(
    kernel: &ComputeKernel,
    context: &GpuContext,
    op: &'static str,
    input: &Tensor,
    output: &mut Tensor,
) -> Result<()> {
    let uniforms = CopyUniforms {
        len: extent(op, "elements", input.len())?,
        _pad: [0; 3],
    };
    let max_groups = context.limits().max_compute_workgroups_per_dimension;
    let mut scope = DeviceScope::open(context, op);
    let x = scope.input(input)?;
    let y = scope.allocate(output.name(), output.len())?;
    let params = scope.uniform("gan_copy_uniforms", &uniforms)?;
    scope.launch(
        kernel,
        &[x, y, params],
        LaunchGeometry::flat(uniforms.len, max_groups),
    )?;
    scope.download(y, output)
}
