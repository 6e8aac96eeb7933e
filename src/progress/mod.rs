pub mod estimator;
pub mod scanner;
pub mod size;

pub use estimator::{ExpectedSize, ProgressEstimator};
pub use scanner::OutputScanner;
