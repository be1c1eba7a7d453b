use ndarray::{ArrayD, ArrayViewD, Zip};

use super::{
    Divergence, Reduction,
    softmax::{check_pair, log_softmax, softmax},
};
use crate::Result;

/// The directed Kullback-Leibler divergence `KL(softmax(target) || softmax(input))`.
///
/// The target distribution is treated as a constant, so only `input` receives gradients.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct KlDiv {
    reduction: Reduction,
}

impl KlDiv {
    /// Returns a new `KlDiv`.
    ///
    /// # Arguments
    /// * `reduction` - How the pointwise terms are folded into a scalar.
    pub fn new(reduction: Reduction) -> Self {
        Self { reduction }
    }

    pub fn reduction(&self) -> Reduction {
        self.reduction
    }
}

impl Default for KlDiv {
    fn default() -> Self {
        Self::new(Reduction::BatchMean)
    }
}

impl Divergence for KlDiv {
    fn loss(&self, input: ArrayViewD<f32>, target: ArrayViewD<f32>) -> Result<f32> {
        directed(input, target, self.reduction)
    }

    fn input_grad(&self, input: ArrayViewD<f32>, target: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
        directed_grad(input, target, self.reduction, 1.0)
    }
}

/// Reduced `sum(q * (log q - log p))` where `p = softmax(input)` and `q = softmax(target)`.
///
/// Terms where `q` vanishes contribute nothing, even if `log p` is not finite there.
pub(super) fn directed(
    input: ArrayViewD<f32>,
    target: ArrayViewD<f32>,
    reduction: Reduction,
) -> Result<f32> {
    check_pair(&input, &target)?;

    let log_p = log_softmax(input.view())?;
    let log_q = log_softmax(target)?;

    let mut total = 0.0;
    Zip::from(&log_p).and(&log_q).for_each(|&lp, &lq| {
        let q = lq.exp();
        if q > 0.0 {
            total += q * (lq - lp);
        }
    });

    Ok(total * reduction.scale(input.shape()))
}

/// Gradient of `coef * directed(input, target)` with respect to `input`:
/// `coef * scale * (softmax(input) - softmax(target))`.
pub(super) fn directed_grad(
    input: ArrayViewD<f32>,
    target: ArrayViewD<f32>,
    reduction: Reduction,
    coef: f32,
) -> Result<ArrayD<f32>> {
    check_pair(&input, &target)?;

    let scale = coef * reduction.scale(input.shape());
    let mut grad = softmax(input)?;
    let q = softmax(target)?;

    Zip::from(&mut grad)
        .and(&q)
        .for_each(|g, &q| *g = scale * (*g - q));

    Ok(grad)
}
