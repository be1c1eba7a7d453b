use ndarray::ArrayD;

/// The result of a perturbation search.
///
/// Gradients are the ones of the terminal loss, which is the only loss of the search meant to
/// reach the outer training step.
#[derive(Debug, Clone)]
pub struct Smoothness {
    loss: f32,
    state_grad: ArrayD<f32>,
    target_grad: Option<ArrayD<f32>>,
    embedding_grad: Option<ArrayD<f32>>,
    noise: ArrayD<f32>,
    evaluations: usize,
    skipped_steps: usize,
}

impl Smoothness {
    pub(crate) fn new(
        loss: f32,
        state_grad: ArrayD<f32>,
        target_grad: Option<ArrayD<f32>>,
        embedding_grad: Option<ArrayD<f32>>,
        noise: ArrayD<f32>,
        evaluations: usize,
        skipped_steps: usize,
    ) -> Self {
        Self {
            loss,
            state_grad,
            target_grad,
            embedding_grad,
            noise,
            evaluations,
            skipped_steps,
        }
    }

    /// Returns the divergence between the perturbed output and the target.
    pub fn loss(&self) -> f32 {
        self.loss
    }

    /// Returns the gradient of the loss with respect to the perturbed output state.
    pub fn state_grad(&self) -> &ArrayD<f32> {
        &self.state_grad
    }

    /// Returns the gradient of the loss with respect to the target state.
    ///
    /// # Returns
    /// `None` if the final divergence stops gradients on its target.
    pub fn target_grad(&self) -> Option<&ArrayD<f32>> {
        self.target_grad.as_ref()
    }

    /// Returns the gradient of the loss with respect to the embedding.
    ///
    /// # Returns
    /// `None` if the evaluator does not route gradients from the selected output back to its
    /// input.
    pub fn embedding_grad(&self) -> Option<&ArrayD<f32>> {
        self.embedding_grad.as_ref()
    }

    /// Returns the perturbation the terminal evaluation was made with.
    pub fn noise(&self) -> &ArrayD<f32> {
        &self.noise
    }

    /// Returns the amount of evaluator forward passes.
    pub fn evaluations(&self) -> usize {
        self.evaluations
    }

    /// Returns the amount of ascent iterations that had no gradient and left the noise unmoved.
    pub fn skipped_steps(&self) -> usize {
        self.skipped_steps
    }
}
