//! Numeric policy for host reductions.
//!
//! Storage is always `f16`. What differs per operator is the type the inner
//! multiply-add runs in, selected with [`Accumulation`]:
//!
//! * `Half`: every partial sum is rounded back to `f16` (software emulated,
//!   each step converts through `f32`). Slow, and the error grows with the
//!   reduction length.
//! * `Single`: partial sums stay in `f32`, one rounding on store.
//!
//! Batch-norm statistics always use `f32` regardless of this setting.

use half::f16;

pub use gan_utils::config::Accumulation;

/// Running sum for one output cell.
pub(crate) trait Accumulator: Copy + Send + Sync {
    fn start(bias: f16) -> Self;
    fn accumulate(self, lhs: f16, rhs: f16) -> Self;
    fn finish(self) -> f16;
}

impl Accumulator for f16 {
    #[inline]
    fn start(bias: f16) -> Self {
        bias
    }

    #[inline]
    fn accumulate(self, lhs: f16, rhs: f16) -> Self {
        self + lhs * rhs
    }

    #[inline]
    fn finish(self) -> f16 {
        self
    }
}

impl Accumulator for f32 {
    #[inline]
    fn start(bias: f16) -> Self {
        bias.to_f32()
    }

    #[inline]
    fn accumulate(self, lhs: f16, rhs: f16) -> Self {
        self + lhs.to_f32() * rhs.to_f32()
    }

    #[inline]
    fn finish(self) -> f16 {
        f16::from_f32(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot<A: Accumulator>(values: &[f16]) -> f16 {
        values
            .iter()
            .fold(A::start(f16::ZERO), |acc, &v| acc.accumulate(v, f16::ONE))
            .finish()
    }

    #[test]
    fn half_accumulation_loses_small_terms() {
        // 2048 + 1 is not representable in f16, so each +1 is rounded away.
        let mut values = vec![f16::from_f32(2048.0)];
        values.extend(std::iter::repeat_n(f16::ONE, 8));
        assert_eq!(dot::<f16>(&values).to_f32(), 2048.0);
        assert_eq!(dot::<f32>(&values).to_f32(), 2056.0);
    }

    #[test]
    fn bias_seeds_the_sum() {
        let acc = <f32 as Accumulator>::start(f16::from_f32(1.5));
        let out = acc.accumulate(f16::from_f32(2.0), f16::from_f32(3.0)).finish();
        assert_eq!(out.to_f32(), 7.5);
    }
}
