//! Core types and utilities for petal.
//!
//! This crate provides the error taxonomy, the closed set of supported
//! architectures, the label mapping persisted in checkpoints, run
//! configuration and the helpers shared by the command-line tools.

pub mod error;
pub mod types;
pub mod config;
pub mod backend;
pub mod cli;

pub use error::{Error, Result};
pub use types::*;
pub use config::*;
pub use backend::*;
pub use cli::*;

/// Re-export commonly used burn types
pub mod prelude {
    pub use burn::prelude::*;
    pub use crate::error::{Error, Result};
    pub use crate::types::*;
    pub use crate::config::*;
    pub use crate::backend::*;
}
