use ndarray::{ArrayD, ArrayViewD};

use super::{
    Divergence, Reduction,
    kl::{directed, directed_grad},
};
use crate::Result;

/// The symmetric Kullback-Leibler divergence
/// `alpha * KL(q || p) + KL(p || q)` with `p = softmax(input)` and `q = softmax(target)`.
///
/// Each directed term stops gradients on the side it measures against, so `input` only receives
/// gradients from the `alpha`-weighted term and `target` only from the other one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymKlDiv {
    alpha: f32,
    reduction: Reduction,
}

impl SymKlDiv {
    /// Returns a new `SymKlDiv`.
    ///
    /// # Arguments
    /// * `alpha` - The weight of the term measured against the target.
    /// * `reduction` - How the pointwise terms are folded into a scalar.
    pub fn new(alpha: f32, reduction: Reduction) -> Self {
        Self { alpha, reduction }
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }
}

impl Default for SymKlDiv {
    fn default() -> Self {
        Self::new(1.0, Reduction::Sum)
    }
}

impl Divergence for SymKlDiv {
    fn loss(&self, input: ArrayViewD<f32>, target: ArrayViewD<f32>) -> Result<f32> {
        let towards_target = directed(input.view(), target.view(), self.reduction)?;
        let towards_input = directed(target, input, self.reduction)?;

        Ok(self.alpha * towards_target + towards_input)
    }

    fn input_grad(&self, input: ArrayViewD<f32>, target: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        directed_grad(input, target, self.reduction, self.alpha)
    }

    fn target_grad(
        &self,
        input: ArrayViewD<f32>,
        target: ArrayViewD<f32>,
    ) -> Result<Option<ArrayD<f32>>> {
        directed_grad(target, input, self.reduction, 1.0).map(Some)
    }
}
