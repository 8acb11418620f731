use thiserror::Error;

#[derive(Debug, Error)]
pub enum GridError {
    #[error("Invalid topology: {0}")]
    InvalidTopology(String),

    #[error("Matrix size {n} must be divisible by the grid dimensions {rows}x{cols}")]
    IndivisibleSize { n: usize, rows: usize, cols: usize },

    #[error("Invalid size: {0}")]
    InvalidSize(String),

    #[error("Allocation of {elements} elements failed")]
    Allocation { elements: usize },

    #[error("Communication error: {0}")]
    Comm(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GridError>;
