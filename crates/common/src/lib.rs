//! Shared types for the Discord login workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
