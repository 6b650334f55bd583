//! Manual/buffered mode workers for NI PXI-6733 analog and PXIe-6535 digital output boards.
//!
//! A worker ([`TaskController`]) holds one DAQmx task on its board: a static task while the front
//! panel is live, a buffered task while a shot runs. [`Worker`] is the set of hooks the host calls,
//! [`Chassis`] orders them across boards sharing a clock terminal.
//!
//! The DAQmx calls go through [`DaqDriver`]. With the `nidaqmx` feature, [`nidaqmx::NiDaqmx`] links
//! the C library; [`SimDriver`] runs everything in memory. The `python` feature builds the
//! `pxictrl_backend` Python module.

pub mod board;
pub mod chassis;
pub mod config;
pub mod controller;
pub mod driver;
pub mod error;
#[cfg(feature = "nidaqmx")]
pub mod nidaqmx;
#[cfg(feature = "python")]
mod python;
pub mod sim;
pub mod utils;
pub mod worker;

pub use crate::board::*;
pub use crate::chassis::Chassis;
pub use crate::config::*;
pub use crate::controller::*;
pub use crate::driver::*;
pub use crate::error::*;
pub use crate::sim::*;
pub use crate::worker::*;
