//! The slice of the NI-DAQmx task API the board workers rely on.
//!
//! ## Overview
//!
//! Workers never talk to DAQmx directly. They receive a [`DaqDriver`] at construction time and
//! open [`DaqTask`]s through it. Two implementations exist:
//!
//! - [`crate::nidaqmx::NiDaqmx`] (feature `nidaqmx`): the C library, through FFI.
//! - [`crate::sim::SimDriver`]: an in-memory simulation that records every call.
//!
//! ## Task lifecycle
//!
//! A task is created, gets channels, optionally timing, is written, started, and eventually
//! stopped and cleared. [`DaqTask::clear`] consumes the task: once cleared the handle is gone.
//! Stopping a finite task before it has generated every sample is an error on this hardware,
//! so callers that do not know whether a task has finished must clear it without stopping.
//!
//! The trait methods map one to one onto
//! [DAQmx C-functions](https://www.ni.com/docs/en-US/bundle/ni-daqmx-c-api-ref/page/cdaqmx/help_file_title.html)
//! of the same name (`DAQmxCreateAOVoltageChan`, `DAQmxCfgSampClkTiming`, ...).

use std::fmt;
use thiserror::Error;

pub const DAQMX_VAL_RISING: i32 = 10280;
pub const DAQMX_VAL_VOLTS: i32 = 10348;
pub const DAQMX_VAL_FINITESAMPS: i32 = 10178;
pub const DAQMX_VAL_GROUPBYCHANNEL: u32 = 0;
pub const DAQMX_VAL_GROUPBYSCANNUMBER: u32 = 1;
pub const DAQMX_VAL_CHANPERLINE: i32 = 0;

/// Error reported by a DAQmx call: the negative status code and the extended error info.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("DAQmx Error {code}: {message}")]
pub struct DaqmxError {
    pub code: i32,
    pub message: String,
}

impl DaqmxError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

/// Installed NI-DAQmx version (`major.minor.update`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DriverVersion {
    pub major: u32,
    pub minor: u32,
    pub update: u32,
}

impl DriverVersion {
    pub fn new(major: u32, minor: u32, update: u32) -> Self {
        Self { major, minor, update }
    }

    /// Buffered digital shots are broken on 14.0 and 14.1; fixed in 14.2.
    pub fn has_buffered_digital_bug(&self) -> bool {
        self.major == 14 && self.minor < 2
    }
}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.update)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataLayout {
    GroupByChannel,
    GroupByScanNumber,
}

impl DataLayout {
    pub fn raw(&self) -> u32 {
        match self {
            DataLayout::GroupByChannel => DAQMX_VAL_GROUPBYCHANNEL,
            DataLayout::GroupByScanNumber => DAQMX_VAL_GROUPBYSCANNUMBER,
        }
    }
}

/// An open DAQmx task.
pub trait DaqTask {
    /// Adds AO voltage channels (`physical` may be a channel list) with the given output range.
    fn create_ao_voltage_chan(&mut self, physical: &str, min: f64, max: f64) -> Result<(), DaqmxError>;
    /// Adds digital output lines, one virtual channel per line.
    fn create_do_chan(&mut self, lines: &str) -> Result<(), DaqmxError>;
    /// Finite generation of `samps_per_chan` samples, clocked on the rising edge of `source`.
    fn cfg_samp_clk_timing(&mut self, source: &str, rate: f64, samps_per_chan: u64) -> Result<(), DaqmxError>;
    /// Returns the number of samples per channel written.
    fn write_analog_f64(
        &mut self,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        layout: DataLayout,
        data: &[f64],
    ) -> Result<usize, DaqmxError>;
    /// One byte per line per sample; non-zero drives the line high.
    fn write_digital_lines(
        &mut self,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        layout: DataLayout,
        data: &[u8],
    ) -> Result<usize, DaqmxError>;
    fn start(&mut self) -> Result<(), DaqmxError>;
    fn stop(&mut self) -> Result<(), DaqmxError>;
    fn clear(self) -> Result<(), DaqmxError>;
}

/// Entry point into a DAQmx implementation.
pub trait DaqDriver {
    type Task: DaqTask;

    fn create_task(&self, name: &str) -> Result<Self::Task, DaqmxError>;
    fn driver_version(&self) -> Result<DriverVersion, DaqmxError>;
}
