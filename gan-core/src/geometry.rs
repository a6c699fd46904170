//! Shape validation and extent resolution.
//!
//! Each operator resolves its loop bounds here, from tensor shapes only,
//! before touching any buffer. Both the host and the accelerator paths use the
//! same resolved structs, so they agree on what a valid call is.

use crate::error::{KernelError, Result};
use crate::params::{Conv2dParams, ConvTranspose2dParams};
use crate::tensor::Tensor;

fn rank_n<const R: usize>(op: &'static str, role: &str, tensor: &Tensor) -> Result<[usize; R]> {
    <[usize; R]>::try_from(tensor.dims()).map_err(|_| {
        KernelError::shape(
            op,
            format!(
                "{role} '{}' must have rank {R}, got shape {}",
                tensor.name(),
                tensor.shape()
            ),
        )
    })
}

fn expect_dims(op: &'static str, role: &str, tensor: &Tensor, expected: &[usize]) -> Result<()> {
    if tensor.dims() == expected {
        Ok(())
    } else {
        Err(KernelError::shape(
            op,
            format!(
                "{role} '{}' expected shape {expected:?}, got {}",
                tensor.name(),
                tensor.shape()
            ),
        ))
    }
}

/// `out[M,N] = in[M,K] · w[N,K]ᵀ + b[N]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinearDims {
    pub rows: usize,
    pub features: usize,
    pub inner: usize,
}

impl LinearDims {
    pub fn resolve(input: &Tensor, weight: &Tensor, bias: &Tensor, output: &Tensor) -> Result<Self> {
        const OP: &str = "linear";
        let [rows, inner] = rank_n::<2>(OP, "input", input)?;
        let [features, weight_inner] = rank_n::<2>(OP, "weight", weight)?;
        if weight_inner != inner {
            return Err(KernelError::shape(
                OP,
                format!("input K={inner} does not match weight K={weight_inner}"),
            ));
        }
        expect_dims(OP, "bias", bias, &[features])?;
        expect_dims(OP, "output", output, &[rows, features])?;
        Ok(Self {
            rows,
            features,
            inner,
        })
    }
}

/// `[N, C·H·W] ↔ [N, C, H, W]` relabeling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReshapeDims {
    pub batch: usize,
    pub features: usize,
}

impl ReshapeDims {
    /// Flat `[N, D]` source into spatial `[N, C, H, W]` destination.
    pub fn unflatten(input: &Tensor, output: &Tensor) -> Result<Self> {
        Self::resolve("reshape", input, output)
    }

    /// Spatial `[N, C, H, W]` source into flat `[N, D]` destination.
    pub fn flatten(input: &Tensor, output: &Tensor) -> Result<Self> {
        Self::resolve("flatten", output, input)
    }

    fn resolve(op: &'static str, flat: &Tensor, spatial: &Tensor) -> Result<Self> {
        let [batch, features] = rank_n::<2>(op, "flat tensor", flat)?;
        let [n, c, h, w] = rank_n::<4>(op, "spatial tensor", spatial)?;
        if n != batch || c * h * w != features {
            return Err(KernelError::shape(
                op,
                format!(
                    "flat shape {} is not a relabeling of spatial shape {}",
                    flat.shape(),
                    spatial.shape()
                ),
            ));
        }
        Ok(Self { batch, features })
    }

    pub fn elements(&self) -> usize {
        self.batch * self.features
    }
}

/// Resolved extents of a (transposed) convolution call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvDims {
    pub batch: usize,
    pub in_channels: usize,
    pub in_height: usize,
    pub in_width: usize,
    pub out_channels: usize,
    pub kernel_height: usize,
    pub kernel_width: usize,
    pub out_height: usize,
    pub out_width: usize,
}

impl ConvDims {
    pub fn input_plane(&self) -> usize {
        self.in_height * self.in_width
    }

    pub fn output_plane(&self) -> usize {
        self.out_height * self.out_width
    }

    pub fn output_shape(&self) -> [usize; 4] {
        [
            self.batch,
            self.out_channels,
            self.out_height,
            self.out_width,
        ]
    }
}

/// `(size + 2·pad − dilation·(kernel − 1) − 1) / stride + 1`, or `None` when
/// the dilated kernel does not fit inside the padded input.
pub fn conv2d_output_dim(
    size: usize,
    kernel: usize,
    stride: usize,
    pad: usize,
    dilation: usize,
) -> Option<usize> {
    if stride == 0 || dilation == 0 {
        return None;
    }
    let span = dilation.checked_mul(kernel.checked_sub(1)?)?.checked_add(1)?;
    let padded = size.checked_add(pad.checked_mul(2)?)?;
    Some(padded.checked_sub(span)? / stride + 1)
}

/// `(size − 1)·stride − 2·pad + dilation·(kernel − 1) + output_pad + 1`, or
/// `None` when that is not positive.
pub fn conv_transpose2d_output_dim(
    size: usize,
    kernel: usize,
    stride: usize,
    pad: usize,
    dilation: usize,
    output_pad: usize,
) -> Option<usize> {
    if stride == 0 || dilation == 0 || size == 0 || kernel == 0 {
        return None;
    }
    let grown = (size - 1)
        .checked_mul(stride)?
        .checked_add(dilation.checked_mul(kernel - 1)?)?
        .checked_add(output_pad)?
        .checked_add(1)?;
    grown.checked_sub(pad.checked_mul(2)?).filter(|&dim| dim > 0)
}

impl Conv2dParams {
    /// Output shape for an `[N,C,H,W]` input and `[K,C,R,S]` weight.
    pub fn output_shape(&self, input: &Tensor, weight: &Tensor) -> Result<[usize; 4]> {
        const OP: &str = "conv2d";
        let [n, c, h, w] = rank_n::<4>(OP, "input", input)?;
        let [k, weight_c, r, s] = rank_n::<4>(OP, "weight", weight)?;
        if weight_c != c {
            return Err(KernelError::shape(
                OP,
                format!("input has {c} channels but weight expects {weight_c}"),
            ));
        }
        let oh = conv2d_output_dim(h, r, self.stride, self.pad, self.dilation);
        let ow = conv2d_output_dim(w, s, self.stride, self.pad, self.dilation);
        match (oh, ow) {
            (Some(oh), Some(ow)) => Ok([n, k, oh, ow]),
            _ => Err(KernelError::geometry(
                OP,
                format!(
                    "{r}x{s} kernel with stride={} pad={} dilation={} does not fit a {h}x{w} input",
                    self.stride, self.pad, self.dilation
                ),
            )),
        }
    }
}

impl ConvTranspose2dParams {
    /// Output shape for an `[N,C,H,W]` input and `[C,K,R,S]` weight.
    pub fn output_shape(&self, input: &Tensor, weight: &Tensor) -> Result<[usize; 4]> {
        const OP: &str = "conv_transpose2d";
        let [n, c, h, w] = rank_n::<4>(OP, "input", input)?;
        let [weight_c, k, r, s] = rank_n::<4>(OP, "weight", weight)?;
        if weight_c != c {
            return Err(KernelError::shape(
                OP,
                format!("input has {c} channels but weight expects {weight_c}"),
            ));
        }
        let dim = |size, kernel| {
            conv_transpose2d_output_dim(
                size,
                kernel,
                self.stride,
                self.pad,
                self.dilation,
                self.output_pad,
            )
        };
        match (dim(h, r), dim(w, s)) {
            (Some(oh), Some(ow)) => Ok([n, k, oh, ow]),
            _ => Err(KernelError::geometry(
                OP,
                format!(
                    "stride={} pad={} dilation={} output_pad={} yield an empty output for a {h}x{w} input",
                    self.stride, self.pad, self.dilation, self.output_pad
                ),
            )),
        }
    }
}

impl ConvDims {
    pub fn conv2d(
        input: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        output: &Tensor,
        params: &Conv2dParams,
    ) -> Result<Self> {
        const OP: &str = "conv2d";
        let expected = params.output_shape(input, weight)?;
        let [n, c, h, w] = rank_n::<4>(OP, "input", input)?;
        let [_, _, r, s] = rank_n::<4>(OP, "weight", weight)?;
        expect_dims(OP, "bias", bias, &[expected[1]])?;
        expect_dims(OP, "output", output, &expected)?;
        Ok(Self {
            batch: n,
            in_channels: c,
            in_height: h,
            in_width: w,
            out_channels: expected[1],
            kernel_height: r,
            kernel_width: s,
            out_height: expected[2],
            out_width: expected[3],
        })
    }

    pub fn conv_transpose2d(
        input: &Tensor,
        weight: &Tensor,
        bias: &Tensor,
        output: &Tensor,
        params: &ConvTranspose2dParams,
    ) -> Result<Self> {
        const OP: &str = "conv_transpose2d";
        let expected = params.output_shape(input, weight)?;
        let [n, c, h, w] = rank_n::<4>(OP, "input", input)?;
        let [_, _, r, s] = rank_n::<4>(OP, "weight", weight)?;
        expect_dims(OP, "bias", bias, &[expected[1]])?;
        expect_dims(OP, "output", output, &expected)?;
        Ok(Self {
            batch: n,
            in_channels: c,
            in_height: h,
            in_width: w,
            out_channels: expected[1],
            kernel_height: r,
            kernel_width: s,
            out_height: expected[2],
            out_width: expected[3],
        })
    }
}

/// Per-channel statistics layout for `[N, C, H, W]` batch normalization.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchNormDims {
    pub batch: usize,
    pub channels: usize,
    pub plane: usize,
}

impl BatchNormDims {
    pub fn resolve(input: &Tensor, weight: &Tensor, bias: &Tensor, output: &Tensor) -> Result<Self> {
        const OP: &str = "batch_norm2d";
        let [batch, channels, h, w] = rank_n::<4>(OP, "input", input)?;
        expect_dims(OP, "weight", weight, &[channels])?;
        expect_dims(OP, "bias", bias, &[channels])?;
        expect_dims(OP, "output", output, input.dims())?;
        Ok(Self {
            batch,
            channels,
            plane: h * w,
        })
    }

    /// Number of values each channel's statistics are taken over.
    pub fn count(&self) -> usize {
        self.batch * self.plane
    }
}
