use ndarray::{ArrayD, ArrayViewD, Axis};

use super::NormFn;

/// The infinity norm over the last axis: the largest absolute value of each row.
#[derive(Debug, Default, Clone, Copy)]
pub struct InfNorm;

impl NormFn for InfNorm {
    fn norm(&self, x: ArrayViewD<f32>) -> ArrayD<f32> {
        let Some(last) = x.ndim().checked_sub(1) else {
            return x.mapv(f32::abs);
        };

        let axis = Axis(last);
        x.fold_axis(axis, 0.0_f32, |&m, &v| m.max(v.abs()))
            .insert_axis(axis)
    }
}
