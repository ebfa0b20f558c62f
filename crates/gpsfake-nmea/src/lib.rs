//! Synthetic position sources for the gpsfake harness.
//!
//! This crate provides:
//! - [`navigation`] with the dead-reckoning [`NavigationModel`]
//! - [`voyage`] with cyclic [`VoyagePlan`]s that steer the model
//! - [`sentence`] with RMC formatting and NMEA checksums
//! - [`capture`] and [`framer`] for digesting captured sessions into replayable records

pub mod capture;
pub mod framer;
pub mod navigation;
pub mod position;
pub mod sentence;
pub mod voyage;

pub use capture::*;
pub use framer::*;
pub use navigation::*;
pub use position::*;
pub use sentence::*;
pub use voyage::*;
