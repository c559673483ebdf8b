//! Single-image inference against petal checkpoints.
//!
//! Loads a checkpoint written by `petal-training`, preprocesses an image
//! exactly like the evaluation splits, and reports the most likely classes
//! under their display names.

pub mod categories;
pub mod predictor;

pub use categories::CategoryNames;
pub use predictor::{decode_top_k, Prediction, Predictor, DEFAULT_TOP_K};

/// Re-export commonly used types
pub mod prelude {
    pub use crate::categories::CategoryNames;
    pub use crate::predictor::{Prediction, Predictor};
}
