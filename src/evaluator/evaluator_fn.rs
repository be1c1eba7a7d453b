use ndarray::{ArrayD, ArrayViewD};
use serde::{Deserialize, Serialize};

use crate::Result;

/// Selects which of an evaluator's two outputs is regularized.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Head {
    #[default]
    Primary,
    Secondary,
}

impl Head {
    /// Picks the element of a pair of outputs this head refers to.
    pub fn select<T>(self, (primary, secondary): (T, T)) -> T {
        match self {
            Head::Primary => primary,
            Head::Secondary => secondary,
        }
    }
}

impl From<bool> for Head {
    fn from(primary: bool) -> Self {
        if primary {
            Head::Primary
        } else {
            Head::Secondary
        }
    }
}

/// How far a backward pass is allowed to reach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradScope {
    /// Only the gradient with respect to the embedding is wanted, parameter gradients must be
    /// left untouched.
    Input,
    /// The gradient with respect to the embedding is wanted and parameter gradients are
    /// accumulated as in a regular training step.
    Full,
}

/// The model, or the portion of it, mapping embeddings to a pair of output states.
///
/// Implementors cache whatever `backward` needs during `forward`; a `backward` call always refers
/// to the most recent `forward`.
pub trait Evaluator {
    /// Computes both output states for an embedding.
    ///
    /// # Arguments
    /// * `embedding` - The (possibly perturbed) embedding.
    /// * `mask` - Marks the valid positions of `embedding`.
    ///
    /// # Returns
    /// The primary and secondary output states.
    fn forward(
        &mut self,
        embedding: ArrayViewD<f32>,
        mask: ArrayViewD<f32>,
    ) -> Result<(ArrayD<f32>, ArrayD<f32>)>;

    /// Propagates the gradient of a loss with respect to one output state back to the embedding.
    ///
    /// # Arguments
    /// * `head` - The output state `d_state` refers to.
    /// * `d_state` - The gradient of the loss with respect to that output state.
    /// * `scope` - Whether parameter gradients should be accumulated along the way.
    ///
    /// # Returns
    /// The gradient with respect to the embedding, or `None` if the selected output does not
    /// depend on the embedding.
    fn backward(
        &mut self,
        head: Head,
        d_state: ArrayViewD<f32>,
        scope: GradScope,
    ) -> Result<Option<ArrayD<f32>>>;
}
