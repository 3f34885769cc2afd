pub mod commands;
pub mod config;
pub mod encoder;
pub mod error;
pub mod job;
pub mod pool;
pub mod reporter;
pub mod scanner;

pub use error::TranscodeError;
