//! Compile-time description layer for NI PXI output boards.
//!
//! This crate declares what the supported boards can do ([`Model`], [`Capabilities`]), how their
//! channels are named ([`channel`]), and what a compiled shot looks like ([`Shot`]). The control
//! side (`pxictrl_backend`) reads nothing else from an experiment.

pub mod channel;
pub mod device;
pub mod error;
pub mod experiment;
pub mod shot;
pub mod utils;

pub use channel::*;
pub use device::*;
pub use error::*;
pub use experiment::*;
pub use shot::*;
pub use utils::*;
