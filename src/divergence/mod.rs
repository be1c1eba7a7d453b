mod divergence_fn;
mod kl;
mod reduction;
mod softmax;
mod sym_kl;

pub use divergence_fn::Divergence;
pub use kl::KlDiv;
pub use reduction::Reduction;
pub use softmax::{log_softmax, softmax};
pub use sym_kl::SymKlDiv;
