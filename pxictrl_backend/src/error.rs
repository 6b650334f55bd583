//! Error types of the board workers.
//!
//! - [`ConfigError`]: the setup is unusable. Detected before any task exists and never retried.
//! - [`DaqmxError`]: a vendor call failed mid-transition. Propagated as is; the operator decides.
//! - [`WorkerError`]: everything a worker hook can return.

use std::path::PathBuf;
use thiserror::Error;

use pxicompiler_backend::{CompileError, TaskType};

use crate::controller::ControllerState;
use crate::driver::{DaqmxError, DriverVersion};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "{description} {name} must have an even number of analog outputs in order to guarantee an even \
         total number of samples, which is a limitation of the DAQmx library. Configured with {count}."
    )]
    OddAnalogCount {
        description: &'static str,
        name: String,
        count: usize,
    },

    #[error(
        "There is a known bug with buffered shots using NI DAQmx v14.0.0. This bug does not exist on v14.2.0. \
         You are currently using v{0}. Please ensure you upgrade to v14.2.0 or higher."
    )]
    DefectiveDriver(DriverVersion),

    #[error("{name} is configured with {count} outputs but {description} only has {available}")]
    TooManyOutputs {
        description: &'static str,
        name: String,
        count: usize,
        available: usize,
    },

    #[error("{description} {name} is configured without any outputs")]
    NoOutputs { description: &'static str, name: String },

    #[error("Board {0} is configured twice")]
    DuplicateBoard(String),

    #[error("Cannot read config file {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed config: {0}")]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Daqmx(#[from] DaqmxError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error("{device}: cannot {operation} while {state:?}")]
    InvalidState {
        device: String,
        operation: &'static str,
        state: ControllerState,
    },

    #[error("{device}: front panel values are missing channel {channel}")]
    MissingValue { device: String, channel: String },

    #[error("Shot has no entry for device {0}")]
    MissingDevice(String),

    #[error("{device} is a {board} board but the shot holds {table} output data")]
    TableKind {
        device: String,
        board: TaskType,
        table: TaskType,
    },

    #[error("{device}: buffered output table has {rows} rows, needs at least {required}")]
    TooFewSamples {
        device: String,
        rows: usize,
        required: usize,
    },

    #[error("{device}: output table has {columns} columns for {channels} channels")]
    TableShape {
        device: String,
        columns: usize,
        channels: usize,
    },

    #[error("{device}: output table drives lines outside the {in_use} in use (bits {stray:#010x})")]
    StrayLines { device: String, in_use: usize, stray: u32 },

    #[error("{device}: sample rate {rate} Hz exceeds the clock limit of {limit} Hz")]
    ClockLimit { device: String, rate: f64, limit: f64 },
}

impl WorkerError {
    /// Configuration problems are not worth retrying; the setup has to change.
    pub fn is_config_error(&self) -> bool {
        matches!(self, WorkerError::Config(_) | WorkerError::Compile(_))
    }

    /// The DAQmx status code, when a vendor call failed.
    pub fn daqmx_code(&self) -> Option<i32> {
        match self {
            WorkerError::Daqmx(err) => Some(err.code),
            _ => None,
        }
    }
}
