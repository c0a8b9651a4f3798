//! Shared configuration and error types for the dynacron workspace.

pub mod config;
pub mod error;

pub use config::DynacronConfig;
pub use error::{DynacronError, Result};
