mod evaluator_fn;
mod twin_linear;

pub use evaluator_fn::{Evaluator, GradScope, Head};
pub use twin_linear::TwinLinear;
