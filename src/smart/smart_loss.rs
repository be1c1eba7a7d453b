use log::{Level, debug, log_enabled, trace, warn};
use ndarray::{ArrayD, ArrayViewD, Zip};
use ndarray_rand::{RandomExt, rand_distr::StandardNormal};
use rand::Rng;

use super::Smoothness;
use crate::{
    Result, SmartErr,
    config::SmartConfig,
    divergence::Divergence,
    evaluator::{Evaluator, GradScope, Head},
    norm::NormFn,
};

/// Smoothness-inducing adversarial regularizer.
///
/// Searches a bounded perturbation of an embedding that maximizes the divergence between the
/// evaluator's output on the perturbed embedding and a target output, then reports that
/// divergence. Every call starts from fresh noise, nothing carries over between calls.
pub struct SmartLoss<E: Evaluator> {
    evaluator: E,
    step_loss: Box<dyn Divergence>,
    final_loss: Option<Box<dyn Divergence>>,
    norm: Box<dyn NormFn>,

    num_steps: usize,
    step_size: f32,
    epsilon: f32,
    noise_var: f32,
}

impl<E: Evaluator> SmartLoss<E> {
    /// Creates a new `SmartLoss`.
    ///
    /// # Arguments
    /// * `evaluator` - Maps perturbed embeddings to output states.
    /// * `config` - The search settings, including which divergences and norm to use.
    ///
    /// # Returns
    /// An error if `config` does not validate.
    pub fn new(evaluator: E, config: &SmartConfig) -> Result<Self> {
        config.validate()?;

        Ok(Self {
            evaluator,
            step_loss: config.step_loss.build(),
            final_loss: config.final_loss.as_ref().map(|loss| loss.build()),
            norm: config.norm.build(),
            num_steps: config.num_steps,
            step_size: config.step_size,
            epsilon: config.epsilon,
            noise_var: config.noise_var,
        })
    }

    /// Replaces the divergence driving the ascent iterations.
    pub fn with_step_loss<D: Divergence + 'static>(mut self, loss: D) -> Self {
        self.step_loss = Box::new(loss);
        self
    }

    /// Replaces the divergence of the terminal evaluation.
    pub fn with_final_loss<D: Divergence + 'static>(mut self, loss: D) -> Self {
        self.final_loss = Some(Box::new(loss));
        self
    }

    /// Replaces the norm the noise is projected with.
    pub fn with_norm<N: NormFn + 'static>(mut self, norm: N) -> Self {
        self.norm = Box::new(norm);
        self
    }

    pub fn num_steps(&self) -> usize {
        self.num_steps
    }

    pub fn evaluator(&self) -> &E {
        &self.evaluator
    }

    pub fn evaluator_mut(&mut self) -> &mut E {
        &mut self.evaluator
    }

    pub fn into_evaluator(self) -> E {
        self.evaluator
    }

    /// Runs the perturbation search.
    ///
    /// Makes `num_steps` ascent iterations followed by one terminal evaluation, that is,
    /// `num_steps + 1` evaluator forward passes. The terminal backward pass runs with
    /// `GradScope::Full`, so the evaluator accumulates the parameter gradients of the returned
    /// loss.
    ///
    /// # Arguments
    /// * `rng` - Source of the initial noise.
    /// * `embedding` - The clean embedding, left untouched.
    /// * `target` - The output state the perturbed output is compared against.
    /// * `mask` - Passed through to the evaluator on every pass.
    /// * `head` - Which evaluator output is regularized.
    ///
    /// # Returns
    /// The terminal loss along with its gradients, or the first error raised by the evaluator,
    /// the divergences or the projection.
    pub fn search<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        embedding: ArrayViewD<f32>,
        target: ArrayViewD<f32>,
        mask: ArrayViewD<f32>,
        head: Head,
    ) -> Result<Smoothness> {
        let mut noise =
            ArrayD::<f32>::random_using(embedding.raw_dim(), StandardNormal, rng) * self.noise_var;
        let mut skipped_steps = 0;

        for step in 0..self.num_steps {
            let state = self.evaluate(&embedding, &noise, &mask, head)?;

            if log_enabled!(Level::Debug) {
                let loss = self.step_loss.loss(state.view(), target.view())?;
                debug!(step = step, loss = loss; "ascent step");
            }

            let d_state = self.step_loss.input_grad(state.view(), target.view())?;
            let candidate = match self
                .evaluator
                .backward(head, d_state.view(), GradScope::Input)?
            {
                Some(grad) => self.ascend(noise, &grad)?,
                None => {
                    warn!(step = step; "no gradient reached the noise, the evaluator may be ignoring its input");
                    skipped_steps += 1;
                    noise
                }
            };

            noise = self.project(candidate)?;
        }

        let state = self.evaluate(&embedding, &noise, &mask, head)?;

        let final_loss = self.final_loss.as_ref().unwrap_or(&self.step_loss);
        let loss = final_loss.loss(state.view(), target.view())?;
        let state_grad = final_loss.input_grad(state.view(), target.view())?;
        let target_grad = final_loss.target_grad(state.view(), target.view())?;

        let embedding_grad = self
            .evaluator
            .backward(head, state_grad.view(), GradScope::Full)?;
        if embedding_grad.is_none() {
            warn!("terminal loss has no gradient path back to the embedding");
        }

        debug!(
            loss = loss, evaluations = self.num_steps + 1, skipped = skipped_steps;
            "perturbation search finished"
        );

        Ok(Smoothness::new(
            loss,
            state_grad,
            target_grad,
            embedding_grad,
            noise,
            self.num_steps + 1,
            skipped_steps,
        ))
    }

    /// Evaluates the perturbed embedding and keeps the output `head` refers to.
    fn evaluate(
        &mut self,
        embedding: &ArrayViewD<f32>,
        noise: &ArrayD<f32>,
        mask: &ArrayViewD<f32>,
        head: Head,
    ) -> Result<ArrayD<f32>> {
        let perturbed = embedding + noise;
        let outputs = self.evaluator.forward(perturbed.view(), mask.view())?;
        Ok(head.select(outputs))
    }

    /// Moves the noise `step_size` along `grad`.
    fn ascend(&self, mut noise: ArrayD<f32>, grad: &ArrayD<f32>) -> Result<ArrayD<f32>> {
        if grad.shape() != noise.shape() {
            return Err(SmartErr::ShapeMismatch {
                what: "noise gradient",
                got: grad.shape().to_vec(),
                expected: noise.shape().to_vec(),
            });
        }

        noise.scaled_add(self.step_size, grad);
        Ok(noise)
    }

    /// Projects a candidate into the norm induced ball: `candidate / (norm(candidate) + epsilon)`.
    fn project(&self, mut candidate: ArrayD<f32>) -> Result<ArrayD<f32>> {
        let norm = self.norm.norm(candidate.view());
        let denom = norm
            .broadcast(candidate.raw_dim())
            .ok_or_else(|| SmartErr::ShapeMismatch {
                what: "noise norm",
                got: norm.shape().to_vec(),
                expected: candidate.shape().to_vec(),
            })?;

        let epsilon = self.epsilon;
        Zip::from(&mut candidate)
            .and(&denom)
            .for_each(|c, &n| *c /= n + epsilon);

        debug_assert!(
            candidate.iter().all(|v| v.is_finite()),
            "projected noise is not finite"
        );
        trace!(max_norm = norm.fold(0.0_f32, |m, &n| m.max(n)); "projected noise");

        Ok(candidate)
    }
}
