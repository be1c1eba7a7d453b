pub mod config;
pub mod divergence;
pub mod error;
pub mod evaluator;
pub mod norm;
pub mod smart;

pub use config::SmartConfig;
pub use error::{Result, SmartErr};
pub use evaluator::{Evaluator, GradScope, Head};
pub use smart::{SmartLoss, Smoothness};
