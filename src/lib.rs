pub mod cli;
pub mod engine;
pub mod error;
pub mod kernel;
pub mod matrix;
pub mod output;
pub mod stats;
pub mod verify;
