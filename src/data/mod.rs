pub mod dataset;

pub use dataset::Dataset;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Input/output column count mismatch: {x_cols} inputs vs {y_cols} outputs")]
    ColumnMismatch { x_cols: usize, y_cols: usize },

    #[error("Dataset must contain at least one observation")]
    Empty,

    #[error("Dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("Non-finite value in {0}")]
    NonFinite(&'static str),
}
