mod inf;
mod l2;
mod norm_fn;

pub use inf::InfNorm;
pub use l2::L2Norm;
pub use norm_fn::NormFn;
