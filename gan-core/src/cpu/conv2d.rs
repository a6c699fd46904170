use super::BACKEND;
use crate::error::Result;
use crate::geometry::ConvDims;
use crate::params::Conv2dParams;
use crate::precision::{Accumulation, Accumulator};
use crate::tensor::Tensor;

use gan_utils::telemetry::kernel_guard;
use half::f16;
use rayon::prelude::*;

/// Standard 2-D convolution with zero padding.
///
/// Shapes: input `[N, C, H, W]`, weight `[K, C, R, S]`, bias `[K]`, output
/// `[N, K, OH, OW]` with `OH = (H + 2·pad − dilation·(R − 1) − 1) / stride + 1`.
/// Taps that land outside the input contribute nothing.
pub fn conv2d(
    input: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    output: &mut Tensor,
    params: &Conv2dParams,
) -> Result<()> {
    let dims = ConvDims::conv2d(input, weight, bias, output, params)?;
    let _timer = kernel_guard(BACKEND, "conv2d");
    let (x, w, b) = (input.data(), weight.data(), bias.data());
    match params.accumulation {
        Accumulation::Half => conv2d_with::<f16>(&dims, params, x, w, b, output.data_mut()),
        Accumulation::Single => conv2d_with::<f32>(&dims, params, x, w, b, output.data_mut()),
    }
    Ok(())
}

/// Input coordinate read by kernel tap `k` for output coordinate `out`.
#[inline]
fn source_index(out: usize, k: usize, params: &Conv2dParams, extent: usize) -> Option<usize> {
    let pos = (out * params.stride) as isize - params.pad as isize + (k * params.dilation) as isize;
    (pos >= 0 && pos < extent as isize).then_some(pos as usize)
}

fn conv2d_with<A: Accumulator>(
    dims: &ConvDims,
    params: &Conv2dParams,
    x: &[f16],
    w: &[f16],
    b: &[f16],
    out: &mut [f16],
) {
    let in_plane = dims.input_plane();
    let kernel_area = dims.kernel_height * dims.kernel_width;
    let sample_len = dims.in_channels * in_plane;

    out.par_chunks_mut(dims.output_plane())
        .enumerate()
        .for_each(|(plane_index, out_plane)| {
            let n = plane_index / dims.out_channels;
            let oc = plane_index % dims.out_channels;
            let sample = &x[n * sample_len..(n + 1) * sample_len];
            let filters = &w[oc * dims.in_channels * kernel_area..][..dims.in_channels * kernel_area];

            for oh in 0..dims.out_height {
                for ow in 0..dims.out_width {
                    let mut acc = A::start(b[oc]);
                    for (x_plane, filter) in sample
                        .chunks_exact(in_plane)
                        .zip(filters.chunks_exact(kernel_area))
                    {
                        for r in 0..dims.kernel_height {
                            let Some(h) = source_index(oh, r, params, dims.in_height) else {
                                continue;
                            };
                            for s in 0..dims.kernel_width {
                                let Some(wi) = source_index(ow, s, params, dims.in_width) else {
                                    continue;
                                };
                                acc = acc.accumulate(
                                    x_plane[h * dims.in_width + wi],
                                    filter[r * dims.kernel_width + s],
                                );
                            }
                        }
                    }
                    out_plane[oh * dims.out_width + ow] = acc.finish();
                }
            }
        });
}
