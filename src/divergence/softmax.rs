use ndarray::{ArrayD, ArrayViewD, Axis};

use crate::{Result, SmartErr};

/// Returns the axis holding the scores of `x`, that is, its last one.
pub(crate) fn score_axis(x: &ArrayViewD<f32>, what: &'static str) -> Result<Axis> {
    match x.ndim() {
        0 => Err(SmartErr::MissingScoreAxis { what }),
        n => Ok(Axis(n - 1)),
    }
}

/// Fails unless `input` and `target` share the same shape.
pub(crate) fn check_pair(input: &ArrayViewD<f32>, target: &ArrayViewD<f32>) -> Result<Axis> {
    if input.shape() != target.shape() {
        return Err(SmartErr::ShapeMismatch {
            what: "divergence target",
            got: target.shape().to_vec(),
            expected: input.shape().to_vec(),
        });
    }

    score_axis(input, "divergence input")
}

/// Normalizes each lane of the last axis into log-probabilities.
///
/// The lane maximum is subtracted before exponentiating so large scores never overflow. A lane
/// holding `+inf` scores splits all of its mass evenly among them. Lanes whose scores are all
/// `-inf`, or that hold a NaN, are not normalized and come back unchanged.
pub fn log_softmax(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    let axis = score_axis(&x, "scores")?;
    let mut out = x.to_owned();

    for mut lane in out.lanes_mut(axis) {
        if lane.iter().any(|v| v.is_nan()) {
            continue;
        }

        let max = lane.fold(f32::NEG_INFINITY, |m, &v| m.max(v));
        if max == f32::INFINITY {
            let log_count = (lane.iter().filter(|&&v| v == max).count() as f32).ln();
            lane.mapv_inplace(|v| if v == max { -log_count } else { f32::NEG_INFINITY });
            continue;
        }
        if max == f32::NEG_INFINITY {
            continue;
        }

        let log_sum = lane.fold(0.0_f32, |acc, &v| acc + (v - max).exp()).ln();
        lane.mapv_inplace(|v| v - max - log_sum);
    }

    Ok(out)
}

/// Normalizes each lane of the last axis into probabilities.
pub fn softmax(x: ArrayViewD<f32>) -> Result<ArrayD<f32>> {
    Ok(log_softmax(x)?.mapv_into(f32::exp))
}
