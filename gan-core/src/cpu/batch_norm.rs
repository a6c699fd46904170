use super::BACKEND;
use crate::error::Result;
use crate::geometry::BatchNormDims;
use crate::params::BatchNorm2dParams;
use crate::tensor::Tensor;

use gan_utils::telemetry::kernel_guard;
use half::f16;
use rayon::prelude::*;

/// Training-mode batch normalization over `[N, C, H, W]`.
///
/// Each channel is normalized with the mean and biased variance of its own
/// `N·H·W` values, then scaled by `weight[c]` and shifted by `bias[c]`.
/// Statistics are always accumulated in `f32`.
pub fn batch_norm2d(
    input: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    output: &mut Tensor,
    params: &BatchNorm2dParams,
) -> Result<()> {
    let dims = BatchNormDims::resolve(input, weight, bias, output)?;
    let _timer = kernel_guard(BACKEND, "batch_norm2d");
    let x = input.data();

    let stats: Vec<ChannelStats> = (0..dims.channels)
        .into_par_iter()
        .map(|c| ChannelStats::measure(&dims, x, c))
        .collect();

    let (gamma, beta) = (weight.data(), bias.data());
    output
        .data_mut()
        .par_chunks_mut(dims.plane)
        .zip(x.par_chunks(dims.plane))
        .enumerate()
        .for_each(|(plane_index, (out, src))| {
            let c = plane_index % dims.channels;
            let ChannelStats { mean, variance } = stats[c];
            let scale = gamma[c].to_f32() / (variance + params.epsilon).sqrt();
            let shift = beta[c].to_f32();
            for (o, &v) in out.iter_mut().zip(src) {
                *o = f16::from_f32((v.to_f32() - mean) * scale + shift);
            }
        });
    Ok(())
}

#[derive(Debug, Clone, Copy)]
struct ChannelStats {
    mean: f32,
    variance: f32,
}

impl ChannelStats {
    /// Two passes over channel `c`: mean first, then the centered squares.
    fn measure(dims: &BatchNormDims, x: &[f16], c: usize) -> Self {
        let planes = || {
            (0..dims.batch).map(move |n| {
                let start = (n * dims.channels + c) * dims.plane;
                &x[start..start + dims.plane]
            })
        };
        let count = dims.count() as f32;
        let mean = planes()
            .flat_map(|plane| plane.iter())
            .map(|v| v.to_f32())
            .sum::<f32>()
            / count;
        let variance = planes()
            .flat_map(|plane| plane.iter())
            .map(|v| {
                let d = v.to_f32() - mean;
                d * d
            })
            .sum::<f32>()
            / count;
        Self { mean, variance }
    }
}
