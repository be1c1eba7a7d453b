use ndarray::{linalg, prelude::*};
use rand::Rng;
use rand_distr::Distribution;

use super::{Evaluator, GradScope, Head};
use crate::{Result, SmartErr};

/// A two headed linear classifier over masked mean pooled embeddings.
///
/// Embeddings are `[batch, seq, hidden]` and masks `[batch, seq]`. Each head maps the pooled
/// `[batch, hidden]` representation to `[batch, classes]` scores. Every parameter lives in one
/// flat buffer laid out as `w_primary, b_primary, w_secondary, b_secondary`.
#[derive(Debug, Clone)]
pub struct TwinLinear {
    dim: (usize, usize),
    params: Vec<f32>,
    grad: Vec<f32>,

    // Forward metadata
    pool: Array2<f32>,
    pooled: Array2<f32>,
}

impl TwinLinear {
    /// Creates a new `TwinLinear` from its parameters.
    ///
    /// # Arguments
    /// * `dim` - The hidden size and the amount of classes.
    /// * `params` - The flat parameter buffer.
    ///
    /// # Returns
    /// An error if `params` does not hold exactly `TwinLinear::size_for(dim)` values.
    pub fn new(dim: (usize, usize), params: Vec<f32>) -> Result<Self> {
        let size = Self::size_for(dim);
        if params.len() != size {
            return Err(SmartErr::ShapeMismatch {
                what: "twin linear params",
                got: vec![params.len()],
                expected: vec![size],
            });
        }

        Ok(Self {
            dim,
            grad: vec![0.0; size],
            params,
            pool: Array2::zeros((0, 0)),
            pooled: Array2::zeros((0, dim.0)),
        })
    }

    /// Creates a new `TwinLinear` whose parameters are sampled from `distribution`.
    pub fn random<R, D>(dim: (usize, usize), distribution: &D, rng: &mut R) -> Self
    where
        R: Rng + ?Sized,
        D: Distribution<f32>,
    {
        let size = Self::size_for(dim);
        let params: Vec<f32> = (0..size).map(|_| distribution.sample(rng)).collect();

        Self {
            dim,
            grad: vec![0.0; size],
            params,
            pool: Array2::zeros((0, 0)),
            pooled: Array2::zeros((0, dim.0)),
        }
    }

    /// Returns the amount of parameters a `TwinLinear` of the given dimensions holds.
    pub fn size_for((hidden, classes): (usize, usize)) -> usize {
        2 * (hidden + 1) * classes
    }

    pub fn dim(&self) -> (usize, usize) {
        self.dim
    }

    pub fn params(&self) -> &[f32] {
        &self.params
    }

    pub fn params_mut(&mut self) -> &mut [f32] {
        &mut self.params
    }

    /// Returns the parameter gradient accumulated by `GradScope::Full` backward passes.
    pub fn grad(&self) -> &[f32] {
        &self.grad
    }

    pub fn zero_grad(&mut self) {
        self.grad.fill(0.0);
    }

    fn head_range(&self, head: Head) -> std::ops::Range<usize> {
        let head_size = Self::size_for(self.dim) / 2;
        match head {
            Head::Primary => 0..head_size,
            Head::Secondary => head_size..2 * head_size,
        }
    }

    /// Maps the pooled representation cached by the last forward pass through one head.
    fn head_forward(&self, head: Head) -> Result<ArrayD<f32>> {
        let (w, b) = view_head(self.dim, &self.params[self.head_range(head)])?;
        let mut z = Array2::zeros((self.pooled.nrows(), self.dim.1));

        linalg::general_mat_mul(1.0, &self.pooled, &w, 0.0, &mut z);
        z += &b;

        Ok(z.into_dyn())
    }

    /// Builds the `[batch, seq]` pooling weights: each valid position gets the inverse of its
    /// row's valid count, rows without valid positions pool to zero.
    fn pooling_weights(mask: ArrayView2<f32>) -> Array2<f32> {
        let mut pool = mask.to_owned();

        for mut row in pool.rows_mut() {
            let count = row.sum();
            if count > 0.0 {
                row /= count;
            } else {
                row.fill(0.0);
            }
        }

        pool
    }
}

/// Gives a view of a head's raw parameter slice as its weights and biases.
fn view_head<'a>(
    (hidden, classes): (usize, usize),
    raw: &'a [f32],
) -> Result<(ArrayView2<'a, f32>, ArrayView1<'a, f32>)> {
    let (w_raw, b_raw) = raw.split_at(hidden * classes);
    let w = ArrayView2::from_shape((hidden, classes), w_raw)?;
    let b = ArrayView1::from_shape(classes, b_raw)?;
    Ok((w, b))
}

/// Gives a view of a head's raw gradient slice as its delta weights and delta biases.
fn view_head_mut<'a>(
    (hidden, classes): (usize, usize),
    raw: &'a mut [f32],
) -> Result<(ArrayViewMut2<'a, f32>, ArrayViewMut1<'a, f32>)> {
    let (dw_raw, db_raw) = raw.split_at_mut(hidden * classes);
    let dw = ArrayViewMut2::from_shape((hidden, classes), dw_raw)?;
    let db = ArrayViewMut1::from_shape(classes, db_raw)?;
    Ok((dw, db))
}

impl Evaluator for TwinLinear {
    fn forward(
        &mut self,
        embedding: ArrayViewD<f32>,
        mask: ArrayViewD<f32>,
    ) -> Result<(ArrayD<f32>, ArrayD<f32>)> {
        let embedding = embedding.into_dimensionality::<Ix3>()?;
        let mask = mask.into_dimensionality::<Ix2>()?;
        let (batch, seq, hidden) = embedding.dim();

        if hidden != self.dim.0 {
            return Err(SmartErr::ShapeMismatch {
                what: "embedding hidden size",
                got: vec![hidden],
                expected: vec![self.dim.0],
            });
        }
        if mask.dim() != (batch, seq) {
            return Err(SmartErr::ShapeMismatch {
                what: "mask",
                got: mask.shape().to_vec(),
                expected: vec![batch, seq],
            });
        }

        self.pool = Self::pooling_weights(mask);
        self.pooled = Array2::zeros((batch, hidden));
        for (i, mut row) in self.pooled.rows_mut().into_iter().enumerate() {
            row.assign(&self.pool.row(i).dot(&embedding.index_axis(Axis(0), i)));
        }

        let primary = self.head_forward(Head::Primary)?;
        let secondary = self.head_forward(Head::Secondary)?;
        Ok((primary, secondary))
    }

    fn backward(
        &mut self,
        head: Head,
        d_state: ArrayViewD<f32>,
        scope: GradScope,
    ) -> Result<Option<ArrayD<f32>>> {
        let d = d_state.into_dimensionality::<Ix2>()?;
        let (batch, hidden) = self.pooled.dim();
        let (seq, classes) = (self.pool.ncols(), self.dim.1);

        if d.dim() != (batch, classes) {
            return Err(SmartErr::ShapeMismatch {
                what: "state gradient",
                got: d.shape().to_vec(),
                expected: vec![batch, classes],
            });
        }

        let range = self.head_range(head);

        if scope == GradScope::Full {
            let (mut dw, mut db) = view_head_mut(self.dim, &mut self.grad[range.clone()])?;
            linalg::general_mat_mul(1.0, &self.pooled.t(), &d, 1.0, &mut dw);
            db += &d.sum_axis(Axis(0));
        }

        let (w, _) = view_head(self.dim, &self.params[range])?;
        let mut d_pooled = Array2::zeros((batch, hidden));
        linalg::general_mat_mul(1.0, &d, &w.t(), 0.0, &mut d_pooled);

        let d_embedding = Array3::from_shape_fn((batch, seq, hidden), |(i, j, k)| {
            self.pool[[i, j]] * d_pooled[[i, k]]
        });

        Ok(Some(d_embedding.into_dyn()))
    }
}
