use super::BACKEND;
use crate::error::Result;
use crate::geometry::LinearDims;
use crate::params::LinearParams;
use crate::precision::{Accumulation, Accumulator};
use crate::tensor::Tensor;

use gan_utils::telemetry::kernel_guard;
use half::f16;
use rayon::prelude::*;

/// `out[m, n] = bias[n] + Σ_k input[m, k] · weight[n, k]`.
///
/// Shapes: input `[M, K]`, weight `[N, K]`, bias `[N]`, output `[M, N]`.
pub fn linear(
    input: &Tensor,
    weight: &Tensor,
    bias: &Tensor,
    output: &mut Tensor,
    params: &LinearParams,
) -> Result<()> {
    let dims = LinearDims::resolve(input, weight, bias, output)?;
    let _timer = kernel_guard(BACKEND, "linear");
    let (x, w, b) = (input.data(), weight.data(), bias.data());
    match params.accumulation {
        Accumulation::Half => linear_with::<f16>(&dims, x, w, b, output.data_mut()),
        Accumulation::Single => linear_with::<f32>(&dims, x, w, b, output.data_mut()),
    }
    Ok(())
}

fn linear_with<A: Accumulator>(dims: &LinearDims, x: &[f16], w: &[f16], b: &[f16], out: &mut [f16]) {
    let k = dims.inner;
    out.par_chunks_mut(dims.features)
        .zip(x.par_chunks(k))
        .for_each(|(out_row, x_row)| {
            for ((cell, w_row), &bias) in out_row.iter_mut().zip(w.chunks_exact(k)).zip(b) {
                *cell = x_row
                    .iter()
                    .zip(w_row)
                    .fold(A::start(bias), |acc, (&xv, &wv)| acc.accumulate(xv, wv))
                    .finish();
            }
        });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_projection() {
        let input = Tensor::from_f32("x", [2usize, 3], &[1.0, 2.0, 3.0, -1.0, 0.5, 0.0]).unwrap();
        let weight =
            Tensor::from_f32("w", [2usize, 3], &[1.0, 0.0, -1.0, 0.25, 0.25, 0.25]).unwrap();
        let bias = Tensor::from_f32("b", [2usize], &[0.5, -1.0]).unwrap();
        let mut output = Tensor::zeros("y", [2usize, 2]).unwrap();

        for accumulation in [Accumulation::Half, Accumulation::Single] {
            linear(&input, &weight, &bias, &mut output, &LinearParams { accumulation }).unwrap();
            assert_eq!(output.to_f32_vec(), vec![-1.5, 0.5, -0.5, -1.125]);
        }
    }

    #[test]
    fn mismatch_leaves_output_untouched() {
        let input = Tensor::zeros("x", [2usize, 3]).unwrap();
        let weight = Tensor::zeros("w", [2usize, 4]).unwrap();
        let bias = Tensor::zeros("b", [2usize]).unwrap();
        let mut output = Tensor::from_f32("y", [2usize, 2], &[7.0; 4]).unwrap();
        assert!(linear(&input, &weight, &bias, &mut output, &LinearParams::default()).is_err());
        assert_eq!(output.to_f32_vec(), vec![7.0; 4]);
    }
}
