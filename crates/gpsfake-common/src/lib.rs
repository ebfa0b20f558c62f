#![doc = "Common types shared across the gpsfake workspace."]

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
