use super::BACKEND;
use crate::error::Result;
use crate::geometry::ConvDims;
use crate::params::ConvTranspose2dParams;
use crate::precision::{Accumulation, Accumulator};
use crate::tensor::Tensor;

use gan_utils::telemetry::kernel_guard;
use half::f16;
use rayon::prelude::*;

/// Transposed (fractionally-strided) 2-D convolution.
///
/// Shapes: input `[N, C, H, W]`, weight `[C, K, R, S]`, bias `[K]`, output
/// `[N, K, OH, OW]` with
/// `OH = (H − 1)·stride − 2·pad + dilation·(R − 1) + output_pad + 1`.
///
/// Each output cell gathers from the inputs that the forward convolution
/// would have scattered into it, so no zero-stuffed input is materialized.
pub fn conv_transpose2d(
    input: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    output: &mut Tensor,
    params: &ConvTranspose2dParams,
) -> Result<()> {
    let dims = ConvDims::conv_transpose2d(input, weight, bias, output, params)?;
    let _timer = kernel_guard(BACKEND, "conv_transpose2d");
    let (x, w, b) = (input.data(), weight.data(), bias.data());
    match params.accumulation {
        Accumulation::Half => transpose_with::<f16>(&dims, params, x, w, b, output.data_mut()),
        Accumulation::Single => transpose_with::<f32>(&dims, params, x, w, b, output.data_mut()),
    }
    Ok(())
}

/// Input coordinate that kernel tap `k` maps onto output coordinate `out`.
///
/// `out − (k·dilation − pad)` must be non-negative and divisible by the
/// stride; otherwise the tap falls between input samples.
#[inline]
fn source_index(
    out: usize,
    k: usize,
    params: &ConvTranspose2dParams,
    extent: usize,
) -> Option<usize> {
    let numerator = out as isize + params.pad as isize - (k * params.dilation) as isize;
    let stride = params.stride as isize;
    if numerator < 0 || numerator % stride != 0 {
        return None;
    }
    let pos = (numerator / stride) as usize;
    (pos < extent).then_some(pos)
}

fn transpose_with<A: Accumulator>(
    dims: &ConvDims,
    params: &ConvTranspose2dParams,
    x: &[f16],
    w: &[f16],
    b: &[f16],
    out: &mut [f16],
) {
    let in_plane = dims.input_plane();
    let kernel_area = dims.kernel_height * dims.kernel_width;
    let sample_len = dims.in_channels * in_plane;
    // Weight is [C, K, R, S]: consecutive input channels are K filters apart.
    let channel_stride = dims.out_channels * kernel_area;

    out.par_chunks_mut(dims.output_plane())
        .enumerate()
        .for_each(|(plane_index, out_plane)| {
            let n = plane_index / dims.out_channels;
            let oc = plane_index % dims.out_channels;
            let sample = &x[n * sample_len..(n + 1) * sample_len];

            for oh in 0..dims.out_height {
                for ow in 0..dims.out_width {
                    let mut acc = A::start(b[oc]);
                    for (c, x_plane) in sample.chunks_exact(in_plane).enumerate() {
                        let filter = &w[c * channel_stride + oc * kernel_area..][..kernel_area];
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

#[cfg(test)]
mod tests {
    use super::*;

    /// Scatter formulation: every input sample adds `x · w` to the output
    /// positions `h·stride − pad + r·dilation`.
    fn scatter_reference(
        input: &[f32],
        weight: &[f32],
        bias: &[f32],
        [c_in, h_in, w_in]: [usize; 3],
        [k_out, r_dim, s_dim]: [usize; 3],
        params: &ConvTranspose2dParams,
        [oh_dim, ow_dim]: [usize; 2],
    ) -> Vec<f32> {
        let mut out = vec![0.0f32; k_out * oh_dim * ow_dim];
        for k in 0..k_out {
            out[k * oh_dim * ow_dim..(k + 1) * oh_dim * ow_dim].fill(bias[k]);
        }
        for c in 0..c_in {
            for h in 0..h_in {
                for w in 0..w_in {
                    let value = input[(c * h_in + h) * w_in + w];
                    for k in 0..k_out {
                        for r in 0..r_dim {
                            for s in 0..s_dim {
                                let oh = (h * params.stride + r * params.dilation) as isize
                                    - params.pad as isize;
                                let ow = (w * params.stride + s * params.dilation) as isize
                                    - params.pad as isize;
                                if oh < 0 || ow < 0 || oh >= oh_dim as isize || ow >= ow_dim as isize {
                                    continue;
                                }
                                let weight_idx = ((c * k_out + k) * r_dim + r) * s_dim + s;
                                out[(k * oh_dim + oh as usize) * ow_dim + ow as usize] +=
                                    value * weight[weight_idx];
                            }
                        }
                    }
                }
            }
        }
        out
    }

    #[test]
    fn gather_matches_scatter_formulation() {
        let (c_in, k_out, h_in, w_in) = (2usize, 3usize, 3usize, 4usize);
        let input: Vec<f32> = (0..c_in * h_in * w_in)
            .map(|i| ((i * 7) % 11) as f32 / 8.0 - 0.5)
            .collect();
        let weight: Vec<f32> = (0..c_in * k_out * 9)
            .map(|i| ((i * 5) % 13) as f32 / 16.0 - 0.375)
            .collect();
        let bias = [0.25f32, -0.5, 0.0];

        for params in [
            ConvTranspose2dParams {
                accumulation: Accumulation::Single,
                ..ConvTranspose2dParams::default()
            },
            ConvTranspose2dParams {
                stride: 3,
                pad: 2,
                dilation: 2,
                output_pad: 1,
                accumulation: Accumulation::Single,
            },
        ] {
            let x = Tensor::from_f32("x", [1, c_in, h_in, w_in], &input).unwrap();
            let w = Tensor::from_f32("w", [c_in, k_out, 3, 3], &weight).unwrap();
            let b = Tensor::from_f32("b", [k_out], &bias).unwrap();
            let shape = params.output_shape(&x, &w).unwrap();
            let mut y = Tensor::zeros("y", shape).unwrap();
            conv_transpose2d(&x, &w, &b, &mut y, &params).unwrap();

            let expected = scatter_reference(
                &x.to_f32_vec(),
                &w.to_f32_vec(),
                &b.to_f32_vec(),
                [c_in, h_in, w_in],
                [k_out, 3, 3],
                &params,
                [shape[2], shape[3]],
            );
            for (got, want) in y.to_f32_vec().iter().zip(&expected) {
                assert!((got - want).abs() < 2e-2, "{got} vs {want} ({params:?})");
            }
        }
    }

    #[test]
    fn model_config_doubles_spatial_extent() {
        let x = Tensor::from_f32("x", [1usize, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let w = Tensor::from_f32("w", [1usize, 1, 3, 3], &[1.0; 9]).unwrap();
        let b = Tensor::zeros("b", [1usize]).unwrap();
        let mut y = Tensor::zeros("y", [1usize, 1, 4, 4]).unwrap();
        conv_transpose2d(&x, &w, &b, &mut y, &ConvTranspose2dParams::default()).unwrap();

        // Output row/col 1 sees input samples 0 and 1; 0 sees 0; 2 and 3 see 1.
        #[rustfmt::skip]
        let expected = [
            1.0, 3.0, 2.0, 2.0,
            4.0, 10.0, 6.0, 6.0,
            3.0, 7.0, 4.0, 4.0,
            3.0, 7.0, 4.0, 4.0,
        ];
        assert_eq!(y.to_f32_vec(), expected);
    }

    #[test]
    fn output_pad_past_stride_adds_bias_only_border() {
        let x = Tensor::from_f32("x", [1usize, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]).unwrap();
        let w = Tensor::from_f32("w", [1usize, 1, 3, 3], &[1.0; 9]).unwrap();
        let b = Tensor::from_f32("b", [1usize], &[0.5]).unwrap();
        let params = ConvTranspose2dParams {
            stride: 1,
            pad: 0,
            output_pad: 1,
            ..ConvTranspose2dParams::default()
        };
        assert_eq!(params.output_shape(&x, &w).unwrap(), [1, 1, 5, 5]);
        let mut y = Tensor::zeros("y", [1usize, 1, 5, 5]).unwrap();
        conv_transpose2d(&x, &w, &b, &mut y, &params).unwrap();

        // Full correlation of the 2x2 input with a 3x3 box, plus a trailing
        // row and column that no tap reaches.
        #[rustfmt::skip]
        let expected = [
            1.5, 3.5, 3.5, 2.5, 0.5,
            4.5, 10.5, 10.5, 6.5, 0.5,
            4.5, 10.5, 10.5, 6.5, 0.5,
            3.5, 7.5, 7.5, 4.5, 0.5,
            0.5, 0.5, 0.5, 0.5, 0.5,
        ];
        assert_eq!(y.to_f32_vec(), expected);
    }

    #[test]
    fn source_index_skips_fractional_positions() {
        let params = ConvTranspose2dParams::default();
        // oh = 0: numerator = 0 + 1 - r
        assert_eq!(source_index(0, 0, &params, 4), None);
        assert_eq!(source_index(0, 1, &params, 4), Some(0));
        assert_eq!(source_index(0, 2, &params, 4), None);
        // oh = 7 on a 4-wide input: r = 0 -> 8 / 2 = 4 is out of range.
        assert_eq!(source_index(7, 0, &params, 4), None);
        assert_eq!(source_index(7, 2, &params, 4), Some(3));
    }
}
