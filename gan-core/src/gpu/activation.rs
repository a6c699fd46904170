use super::dispatch::{DeviceScope, LaunchGeometry, extent};
use super::utils::ComputeKernel;
use crate::error::Result;
use crate::tensor::Tensor;

use bytemuck::{Pod, Zeroable};
use gan_utils::gpu::GpuContext;

const ACTIVATION_WGSL: &str = include_str!("activation.wgsl");

pub(super) fn kernel(device: &wgpu::Device) -> ComputeKernel {
    ComputeKernel::new(device, "gan_activation", ACTIVATION_WGSL, 0, 1)
}

/// Elementwise activations evaluated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Activation {
    LeakyRelu { slope: f32 },
    Tanh,
}

impl Activation {
    /// Operation name used in logs and errors.
    pub fn op(self) -> &'static str {
        match self {
            Self::LeakyRelu { .. } => "leaky_relu",
            Self::Tanh => "tanh",
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct ActivationUniforms {
    len: u32,
    mode: u32,
    slope: f32,
    _pad: u32,
}

#[track_caller]
pub(super) fn run(
    kernel: &ComputeKernel,
    context: &GpuContext,
    tensor: &mut Tensor,
    activation: Activation,
) -> Result<()> {
    let op = activation.op();
    let (mode, slope) = match activation {
        Activation::LeakyRelu { slope } => (0, slope),
        Activation::Tanh => (1, 0.0),
    };
    let uniforms = ActivationUniforms {
        len: extent(op, "elements", tensor.len())?,
        mode,
        slope,
        _pad: 0,
    };
    let max_groups = context.limits().max_compute_workgroups_per_dimension;
    let mut scope = DeviceScope::open(context, op);
    let data = scope.input(tensor)?;
    let params = scope.uniform("gan_activation_uniforms", &uniforms)?;
    scope.launch(
        kernel,
        &[data, params],
        LaunchGeometry::flat(uniforms.len, max_groups),
    )?;
    scope.download(data, tensor)
}
