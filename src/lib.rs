pub mod binary;
pub mod buffer;
pub mod build;
pub mod cli;
pub mod compiler;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod extension;
pub mod hash;
pub mod indexer;
pub mod package;
pub mod preprocess;
pub mod unit;

pub use error::{Error, Result};
