mod smart_loss;
mod smoothness;

pub use smart_loss::SmartLoss;
pub use smoothness::Smoothness;
