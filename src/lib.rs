// src/lib.rs

pub mod config;
pub mod connection;
pub mod core;

// Re-export
pub use crate::config::WrapperSettings;
pub use crate::connection::{ConnectionWrapper, WrapperBuilder};
pub use crate::core::{WrapperError, WrapperRuntime};
