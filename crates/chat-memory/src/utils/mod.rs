pub mod error;
pub mod token_estimator;

pub use error::{DocumentError, MemoryError, StoreError};
pub use token_estimator::{GraphemeTokenEstimator, TokenEstimator, WordTokenEstimator};
