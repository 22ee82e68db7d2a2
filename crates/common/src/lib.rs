//! Shared types for the provider client pool workspace

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
