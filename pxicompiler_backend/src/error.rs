//! Errors raised while describing and compiling a shot.
//!
//! Everything here is detected before any hardware is touched, so none of these errors are
//! retryable: the experiment description itself has to be fixed.

use thiserror::Error;

use crate::device::TaskType;

#[derive(Debug, Error)]
pub enum CompileError {
    /// DAQmx requires an even total number of samples on the 6733.
    #[error(
        "{description} {name} must have an even number of analog outputs in order to guarantee an even \
         total number of samples, which is a limitation of the DAQmx library. Found {count}. Please add a \
         dummy analog output or remove an output you're not using, so that there are an even number of \
         analog outputs."
    )]
    OddAnalogCount {
        description: String,
        name: String,
        count: usize,
    },

    #[error("Physical device {name} not found. Registered devices are {registered:?}")]
    UnknownDevice { name: String, registered: Vec<String> },

    #[error("Physical device {0} is already registered")]
    DuplicateDevice(String),

    #[error("Expecting channels of {device} to be of format '{expected}' yet received channel name {name}")]
    BadChannelName {
        device: String,
        expected: &'static str,
        name: String,
    },

    #[error("Channel {name} is not available on {description} {device}")]
    ChannelOutOfRange {
        device: String,
        description: &'static str,
        name: String,
    },

    #[error("Physical name of channel {name} already registered on {device}. Registered channels are {registered:?}")]
    DuplicateChannel {
        device: String,
        name: String,
        registered: Vec<String>,
    },

    #[error("Device {device} is a {task_type} board and cannot take {given} output data")]
    TableKind {
        device: String,
        task_type: TaskType,
        given: TaskType,
    },

    #[error("Output table for {device} has {columns} columns but {channels} channels are in use")]
    TableShape {
        device: String,
        columns: usize,
        channels: usize,
    },

    #[error("Device {device} requested {rate} Hz which exceeds its clock limit of {limit} Hz")]
    ClockLimit { device: String, rate: f64, limit: f64 },

    #[error("Packed digital words hold {available} lines, {requested} requested")]
    TooManyLines { requested: usize, available: usize },

    #[error("Malformed channel name {0}")]
    MalformedChannel(String),

    #[error("Malformed shot description: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Cannot access shot file: {0}")]
    Io(#[from] std::io::Error),
}
