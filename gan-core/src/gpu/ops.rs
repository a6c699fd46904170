use super::activation::{self, Activation};
use super::utils::ComputeKernel;
use super::{Operands, batch_norm, conv2d, conv_transpose2d, copy, linear};
use crate::error::{KernelError, Result};
use crate::geometry::{BatchNormDims, ConvDims, LinearDims, ReshapeDims};
use crate::params::{BatchNorm2dParams, Conv2dParams, ConvTranspose2dParams, LeakyReluParams};
use crate::tensor::Tensor;

use gan_utils::gpu::GpuContext;
use gan_utils::telemetry::kernel_guard;
use log::info;
use std::panic::Location;
use std::sync::Arc;

const BACKEND: &str = "gpu";

/// Compiled accelerator pipelines for every forward kernel.
///
/// Mirrors the host functions in [`crate::cpu`] with the same shape rules and
/// argument order. Pipelines are immutable and reused across calls; no
/// tensor data outlives a call. Device failures are returned as
/// [`KernelError::Device`] carrying the caller's source location.
#[derive(Debug)]
pub struct GpuKernels {
    context: Arc<GpuContext>,
    linear: ComputeKernel,
    pub(super) copy: ComputeKernel,
    conv2d: ComputeKernel,
    conv_transpose2d: ComputeKernel,
    batch_norm: ComputeKernel,
    activation: ComputeKernel,
}

impl GpuKernels {
    /// Compile every pipeline on `context`'s device.
    #[track_caller]
    pub fn new(context: Arc<GpuContext>) -> Result<Self> {
        let location = Location::caller();
        let device = context.device();
        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let linear = linear::kernel(device);
        let copy = copy::kernel(device);
        let conv2d = conv2d::kernel(device);
        let conv_transpose2d = conv_transpose2d::kernel(device);
        let batch_norm = batch_norm::kernel(device);
        let activation = activation::kernel(device);
        if let Some(err) = pollster::block_on(device.pop_error_scope()) {
            return Err(KernelError::device("pipeline", location, err.to_string()));
        }
        info!(
            target: "gan::gpu",
            "compiled kernel pipelines on '{}'",
            context.adapter_info().name
        );
        Ok(Self {
            context,
            linear,
            copy,
            conv2d,
            conv_transpose2d,
            batch_norm,
            activation,
        })
    }

    pub fn context(&self) -> &Arc<GpuContext> {
        &self.context
    }

    /// `output[M, N] = input[M, K] · weight[N, K]ᵀ + bias[N]`.
    #[track_caller]
    pub fn linear(
        &self,
        input: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        output: &mut Tensor,
    ) -> Result<()> {
        let dims = LinearDims::resolve(input, weight, bias, output)?;
        let _timer = kernel_guard(BACKEND, "linear");
        let operands = Operands {
            input,
            weight,
            bias,
        };
        linear::run(&self.linear, &self.context, &dims, operands, output)
    }

    /// `[N, C·H·W] → [N, C, H, W]`.
    #[track_caller]
    pub fn reshape(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        ReshapeDims::unflatten(input, output)?;
        let _timer = kernel_guard(BACKEND, "reshape");
        copy::run(&self.copy, &self.context, "reshape", input, output)
    }

    /// `[N, C, H, W] → [N, C·H·W]`.
    #[track_caller]
    pub fn flatten(&self, input: &Tensor, output: &mut Tensor) -> Result<()> {
        ReshapeDims::flatten(input, output)?;
        let _timer = kernel_guard(BACKEND, "flatten");
        copy::run(&self.copy, &self.context, "flatten", input, output)
    }

    #[track_caller]
    pub fn conv2d(
        &self,
        input: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        output: &mut Tensor,
        params: &Conv2dParams,
    ) -> Result<()> {
        let dims = ConvDims::conv2d(input, weight, bias, output, params)?;
        let _timer = kernel_guard(BACKEND, "conv2d");
        let operands = Operands {
            input,
            weight,
            bias,
        };
        conv2d::run(&self.conv2d, &self.context, &dims, params, operands, output)
    }

    #[track_caller]
    pub fn conv_transpose2d(
        &self,
        input: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        output: &mut Tensor,
        params: &ConvTranspose2dParams,
    ) -> Result<()> {
        let dims = ConvDims::conv_transpose2d(input, weight, bias, output, params)?;
        let _timer = kernel_guard(BACKEND, "conv_transpose2d");
        let operands = Operands {
            input,
            weight,
            bias,
        };
        conv_transpose2d::run(
            &self.conv_transpose2d,
            &self.context,
            &dims,
            params,
            operands,
            output,
        )
    }

    #[track_caller]
    pub fn batch_norm2d(
        &self,
        input: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        output: &mut Tensor,
        params: &BatchNorm2dParams,
    ) -> Result<()> {
        let dims = BatchNormDims::resolve(input, weight, bias, output)?;
        let _timer = kernel_guard(BACKEND, "batch_norm2d");
        let operands = Operands {
            input,
            weight,
            bias,
        };
        batch_norm::run(&self.batch_norm, &self.context, &dims, params, operands, output)
    }

    #[track_caller]
    pub fn leaky_relu(&self, tensor: &mut Tensor, params: &LeakyReluParams) -> Result<()> {
        self.activate(tensor, Activation::LeakyRelu { slope: params.slope })
    }

    #[track_caller]
    pub fn tanh(&self, tensor: &mut Tensor) -> Result<()> {
        self.activate(tensor, Activation::Tanh)
    }

    /// In-place elementwise activation.
    #[track_caller]
    pub fn activate(&self, tensor: &mut Tensor, kind: Activation) -> Result<()> {
        let _timer = kernel_guard(BACKEND, kind.op());
        activation::run(&self.activation, &self.context, tensor, kind)
    }
}
