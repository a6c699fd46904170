use super::dispatch::{DeviceScope, LaunchGeometry};
use super::*;
use crate::error::KernelError;
use crate::params::{
    BatchNorm2dParams, Conv2dParams, ConvTranspose2dParams, LeakyReluParams,
};
use gan_utils::gpu::{GpuAvailability, GpuContext, GpuContextOptions};

fn gpu_kernels() -> Option<GpuKernels> {
    match GpuContext::init_with_fallback(&GpuContextOptions::default()) {
        GpuAvailability::Available(ctx) => Some(GpuKernels::new(ctx).expect("build kernels")),
        _ => None,
    }
}

macro_rules! kernels_or_skip {
    ($name:literal) => {
        match gpu_kernels() {
            Some(kernels) => kernels,
            None => {
                eprintln!("Skipping {} (no adapter)", $name);
                return;
            }
        }
    };
}

fn tensor(name: &str, dims: &[usize], values: &[f32]) -> Tensor {
    Tensor::from_f32(name, dims.to_vec(), values).expect("tensor")
}

#[test]
fn conv2d_ones_fixture() {
    let kernels = kernels_or_skip!("conv2d_ones_fixture");
    let x = tensor("x", &[1, 1, 4, 4], &[1.0; 16]);
    let w = tensor("w", &[1, 1, 3, 3], &[1.0; 9]);
    let b = tensor("b", &[1], &[0.0]);
    let mut y = Tensor::zeros("y", [1usize, 1, 4, 4]).unwrap();
    kernels
        .conv2d(&x, &w, &b, &mut y, &Conv2dParams::default())
        .expect("conv2d");

    #[rustfmt::skip]
    let expected = [
        4.0, 6.0, 6.0, 4.0,
        6.0, 9.0, 9.0, 6.0,
        6.0, 9.0, 9.0, 6.0,
        4.0, 6.0, 6.0, 4.0,
    ];
    assert_eq!(y.to_f32_vec(), expected);
}

#[test]
fn conv_transpose2d_doubles_extent() {
    let kernels = kernels_or_skip!("conv_transpose2d_doubles_extent");
    let x = tensor("x", &[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]);
    let w = tensor("w", &[1, 1, 3, 3], &[1.0; 9]);
    let b = tensor("b", &[1], &[0.0]);
    let mut y = Tensor::zeros("y", [1usize, 1, 4, 4]).unwrap();
    kernels
        .conv_transpose2d(&x, &w, &b, &mut y, &ConvTranspose2dParams::default())
        .expect("conv_transpose2d");

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
fn conv_transpose2d_output_pad_past_stride() {
    let kernels = kernels_or_skip!("conv_transpose2d_output_pad_past_stride");
    let x = tensor("x", &[1, 1, 2, 2], &[1.0, 2.0, 3.0, 4.0]);
    let w = tensor("w", &[1, 1, 3, 3], &[1.0; 9]);
    let b = tensor("b", &[1], &[0.5]);
    let params = ConvTranspose2dParams {
        stride: 1,
        pad: 0,
        output_pad: 1,
        ..ConvTranspose2dParams::default()
    };
    let mut y = Tensor::zeros("y", [1usize, 1, 5, 5]).unwrap();
    kernels
        .conv_transpose2d(&x, &w, &b, &mut y, &params)
        .expect("conv_transpose2d");

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
fn scope_round_trips_half_values() {
    let kernels = kernels_or_skip!("scope_round_trips_half_values");
    let context = kernels.context().clone();
    let source = tensor("source", &[5], &[-2.5, -0.125, 0.0, 1.0, 65504.0]);
    let mut target = Tensor::zeros("target", [5usize]).unwrap();

    let mut scope = DeviceScope::open(&context, "round_trip");
    let slot = scope.input(&source).expect("upload");
    scope.download(slot, &mut target).expect("download");
    assert_eq!(target.to_f32_vec(), source.to_f32_vec());
}

#[test]
fn linear_projection() {
    let kernels = kernels_or_skip!("linear_projection");
    let x = tensor("x", &[2, 3], &[1.0, 2.0, 3.0, -1.0, 0.5, 0.0]);
    let w = tensor("w", &[2, 3], &[0.5, 0.0, -0.5, 1.0, 1.0, 1.0]);
    let b = tensor("b", &[2], &[0.25, -1.0]);
    let mut y = Tensor::zeros("y", [2usize, 2]).unwrap();
    kernels.linear(&x, &w, &b, &mut y).expect("linear");
    // Row 0: 0.5 - 1.5 + 0.25, 6 - 1. Row 1: -0.5 + 0.25, -0.5 - 1.
    assert_eq!(y.to_f32_vec(), vec![-0.75, 5.0, -0.25, -1.5]);
}

#[test]
fn reshape_and_flatten_copy_exactly() {
    let kernels = kernels_or_skip!("reshape_and_flatten_copy_exactly");
    let values: Vec<f32> = (0..24).map(|v| v as f32 * 0.5 - 3.0).collect();
    let flat = tensor("flat", &[2, 12], &values);
    let mut image = Tensor::zeros("image", [2usize, 3, 2, 2]).unwrap();
    kernels.reshape(&flat, &mut image).expect("reshape");
    let mut back = Tensor::zeros("back", [2usize, 12]).unwrap();
    kernels.flatten(&image, &mut back).expect("flatten");
    assert_eq!(back.data(), flat.data());
}

#[test]
fn batch_norm_normalizes_each_channel() {
    let kernels = kernels_or_skip!("batch_norm_normalizes_each_channel");
    let (n, c, hw) = (2usize, 2usize, 300usize);
    let values: Vec<f32> = (0..n * c * hw)
        .map(|i| ((i * 13) % 29) as f32 * 0.25 + (i / hw % c) as f32 * 10.0)
        .collect();
    let x = tensor("x", &[n, c, 15, 20], &values);
    let gamma = tensor("gamma", &[c], &[1.0, 1.0]);
    let beta = tensor("beta", &[c], &[0.0, 0.0]);
    let mut y = Tensor::zeros("y", [n, c, 15, 20]).unwrap();
    kernels
        .batch_norm2d(&x, &gamma, &beta, &mut y, &BatchNorm2dParams::default())
        .expect("batch_norm2d");

    let out = y.to_f32_vec();
    for ch in 0..c {
        let vals: Vec<f32> = (0..n)
            .flat_map(|b| out[(b * c + ch) * hw..(b * c + ch + 1) * hw].iter().copied())
            .collect();
        let mean = vals.iter().sum::<f32>() / vals.len() as f32;
        let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / vals.len() as f32;
        assert!(mean.abs() < 1e-2, "channel {ch} mean {mean}");
        assert!((var - 1.0).abs() < 1e-2, "channel {ch} variance {var}");
    }
}

#[test]
fn activations_in_place() {
    let kernels = kernels_or_skip!("activations_in_place");
    let mut t = tensor("t", &[4], &[-2.0, -0.5, 0.0, 3.0]);
    kernels
        .leaky_relu(&mut t, &LeakyReluParams { slope: 0.5 })
        .expect("leaky_relu");
    assert_eq!(t.to_f32_vec(), vec![-1.0, -0.25, 0.0, 3.0]);

    let mut t = tensor("t", &[3], &[-40.0, 0.0, 40.0]);
    kernels.tanh(&mut t).expect("tanh");
    assert_eq!(t.to_f32_vec(), vec![-1.0, 0.0, 1.0]);
}

#[test]
fn shape_errors_precede_device_work() {
    let kernels = kernels_or_skip!("shape_errors_precede_device_work");
    let x = tensor("x", &[1, 2, 4, 4], &[1.0; 32]);
    let w = tensor("w", &[1, 3, 3, 3], &[1.0; 27]);
    let b = tensor("b", &[1], &[0.0]);
    let mut y = tensor("y", &[1, 1, 4, 4], &[7.0; 16]);
    let err = kernels
        .conv2d(&x, &w, &b, &mut y, &Conv2dParams::default())
        .unwrap_err();
    assert!(matches!(err, KernelError::ShapeMismatch { op: "conv2d", .. }));
    assert!(y.to_f32_vec().iter().all(|&v| v == 7.0));
}

#[test]
fn device_errors_carry_caller_location() {
    let kernels = kernels_or_skip!("device_errors_carry_caller_location");
    let context = kernels.context().clone();
    let mut scope = DeviceScope::open(&context, "bad_launch");
    let slot = scope.allocate("scratch", 4).expect("allocate");
    // The copy kernel needs three bindings.
    let err = scope
        .launch(&kernels.copy, &[slot], LaunchGeometry::flat(4, 65_535))
        .unwrap_err();
    match err {
        KernelError::Device { op, file, .. } => {
            assert_eq!(op, "bad_launch");
            assert!(file.ends_with("tests.rs"), "{file}");
        }
        other => panic!("expected device error, got {other:?}"),
    }
}
