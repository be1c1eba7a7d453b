use serde::{Deserialize, Serialize};

/// How the pointwise divergence terms are folded into a scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Plain sum over every element.
    Sum,
    /// Sum divided by the amount of elements.
    Mean,
    /// Sum divided by the size of the leading (batch) axis.
    BatchMean,
}

impl Reduction {
    /// Returns the factor the summed pointwise terms get multiplied by.
    ///
    /// # Arguments
    /// * `shape` - The shape of the reduced tensor.
    pub fn scale(self, shape: &[usize]) -> f32 {
        let denom = match self {
            Reduction::Sum => 1,
            Reduction::Mean => shape.iter().product(),
            Reduction::BatchMean => shape.first().copied().unwrap_or(1),
        };

        1.0 / denom.max(1) as f32
    }
}
