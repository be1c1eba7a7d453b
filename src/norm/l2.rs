use ndarray::{ArrayD, ArrayViewD, Axis};

use super::NormFn;

/// The euclidean norm over the last axis.
#[derive(Debug, Default, Clone, Copy)]
pub struct L2Norm;

impl NormFn for L2Norm {
    fn norm(&self, x: ArrayViewD<f32>) -> ArrayD<f32> {
        let Some(last) = x.ndim().checked_sub(1) else {
            return x.mapv(f32::abs);
        };

        let axis = Axis(last);
        x.map_axis(axis, |row| row.fold(0.0_f32, |acc, &v| acc + v * v).sqrt())
            .insert_axis(axis)
    }
}
