use ndarray::{ArrayD, ArrayViewD};

/// Maps a tensor to the norm of each of its rows, a row being a lane of the last axis.
///
/// The output keeps the last axis with length one so it broadcasts back against the input.
pub trait NormFn {
    fn norm(&self, x: ArrayViewD<f32>) -> ArrayD<f32>;
}

impl<F> NormFn for F
where
    F: Fn(ArrayViewD<f32>) -> ArrayD<f32>,
{
    fn norm(&self, x: ArrayViewD<f32>) -> ArrayD<f32> {
        self(x)
    }
}

