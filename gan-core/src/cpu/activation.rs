use super::{BACKEND, ELEMENTWISE_CHUNK};
use crate::params::LeakyReluParams;
use crate::tensor::Tensor;

use gan_utils::telemetry::kernel_guard;
use half::f16;
use rayon::prelude::*;

/// In-place leaky rectifier: `x < 0 → slope·x`, otherwise unchanged.
pub fn leaky_relu(tensor: &mut Tensor, params: &LeakyReluParams) {
    let _timer = kernel_guard(BACKEND, "leaky_relu");
    let slope = params.slope;
    map_in_place(tensor, move |v| if v < 0.0 { v * slope } else { v });
}

/// In-place hyperbolic tangent.
pub fn tanh(tensor: &mut Tensor) {
    let _timer = kernel_guard(BACKEND, "tanh");
    map_in_place(tensor, f32::tanh);
}

fn map_in_place(tensor: &mut Tensor, f: impl Fn(f32) -> f32 + Sync) {
    tensor
        .data_mut()
        .par_chunks_mut(ELEMENTWISE_CHUNK)
        .for_each(|chunk| {
            for v in chunk {
                *v = f16::from_f32(f(v.to_f32()));
            }
        });
}
