use ndarray::{ArrayD, ArrayViewD};

use crate::Result;

/// A differentiable, non-negative distance between the distributions induced by two score
/// tensors.
///
/// Both tensors hold unnormalized scores (logits) along their last axis. Feeding already
/// normalized probabilities is accepted but changes the meaning of the result.
pub trait Divergence {
    /// Computes the scalar divergence of `input` with respect to `target`.
    ///
    /// # Arguments
    /// * `input` - The candidate scores.
    /// * `target` - The reference scores.
    ///
    /// # Returns
    /// The reduced divergence or an error if the shapes disagree.
    fn loss(&self, input: ArrayViewD<f32>, target: ArrayViewD<f32>) -> Result<f32>;

    /// Computes the gradient of `loss` with respect to `input`, treating `target` as a constant.
    ///
    /// # Arguments
    /// * `input` - The candidate scores.
    /// * `target` - The reference scores.
    ///
    /// # Returns
    /// A tensor shaped like `input`.
    fn input_grad(&self, input: ArrayViewD<f32>, target: ArrayViewD<f32>) -> Result<ArrayD<f32>>;

    /// Computes the gradient of `loss` with respect to `target`.
    ///
    /// # Returns
    /// `None` when the divergence stops gradients on its target side.
    fn target_grad(
        &self,
        _input: ArrayViewD<f32>,
        _target: ArrayViewD<f32>,
    ) -> Result<Option<ArrayD<f32>>> {
        Ok(None)
    }
}

