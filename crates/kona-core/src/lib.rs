//! Shared building blocks for the Kona engine crates: configuration,
//! the platform error taxonomy and small JSON helpers.

pub mod config;
pub mod error;
pub mod util;

pub use config::KonaConfig;
pub use error::{KonaError, Result};
