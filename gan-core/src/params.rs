//! Per-call kernel parameters.
//!
//! Tensor extents always come from shape metadata; these structs carry only
//! what shapes cannot express. `Default` reproduces the model's fixed
//! configuration.

use crate::precision::Accumulation;
use gan_utils::config::KernelSettings;

/// Slope applied to negative inputs by the leaky rectifier.
pub const LEAKY_RELU_SLOPE: f32 = 0.01;
/// Variance floor used by batch normalization.
pub const BATCH_NORM_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LinearParams {
    pub accumulation: Accumulation,
}

/// Strided, padded, dilated convolution. Kernel size comes from the weight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Conv2dParams {
    pub stride: usize,
    pub pad: usize,
    pub dilation: usize,
    pub accumulation: Accumulation,
}

impl Default for Conv2dParams {
    fn default() -> Self {
        Self {
            stride: 1,
            pad: 1,
            dilation: 1,
            accumulation: Accumulation::default(),
        }
    }
}

/// Fractionally-strided (transposed) convolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConvTranspose2dParams {
    pub stride: usize,
    pub pad: usize,
    pub dilation: usize,
    pub output_pad: usize,
    pub accumulation: Accumulation,
}

impl Default for ConvTranspose2dParams {
    fn default() -> Self {
        Self {
            stride: 2,
            pad: 1,
            dilation: 1,
            output_pad: 1,
            accumulation: Accumulation::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatchNorm2dParams {
    pub epsilon: f32,
}

impl Default for BatchNorm2dParams {
    fn default() -> Self {
        Self {
            epsilon: BATCH_NORM_EPSILON,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LeakyReluParams {
    pub slope: f32,
}

impl Default for LeakyReluParams {
    fn default() -> Self {
        Self {
            slope: LEAKY_RELU_SLOPE,
        }
    }
}

/// Parameters for every operator of one model.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct KernelParams {
    pub linear: LinearParams,
    pub conv: Conv2dParams,
    pub conv_transpose: ConvTranspose2dParams,
    pub batch_norm: BatchNorm2dParams,
    pub leaky_relu: LeakyReluParams,
}

impl KernelParams {
    pub fn from_settings(settings: &KernelSettings) -> Self {
        let conv = &settings.conv;
        let transpose = &settings.conv_transpose;
        Self {
            linear: LinearParams {
                accumulation: settings.precision.linear,
            },
            conv: Conv2dParams {
                stride: conv.stride as usize,
                pad: conv.pad as usize,
                dilation: conv.dilation as usize,
                accumulation: settings.precision.conv,
            },
            conv_transpose: ConvTranspose2dParams {
                stride: transpose.stride as usize,
                pad: transpose.pad as usize,
                dilation: transpose.dilation as usize,
                output_pad: transpose.output_pad as usize,
                accumulation: settings.precision.conv_transpose,
            },
            batch_norm: BatchNorm2dParams {
                epsilon: settings.batch_norm_epsilon,
            },
            leaky_relu: LeakyReluParams {
                slope: settings.leaky_relu_slope,
            },
        }
    }
}
