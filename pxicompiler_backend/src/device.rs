//! Static description of the supported PXI output boards.
//!
//! ## Models
//! Every board is one of the [`Model`] variants. A model carries fixed [`Capabilities`]: how many
//! outputs the board has, how they are named, how fast its sample clock may run, and the front-panel
//! properties the host GUI needs for analog outputs.
//!
//! | Model          | Task type | Outputs                  | Clock limit |
//! |----------------|-----------|--------------------------|-------------|
//! | `NI_PXI_6733`  | AO        | `ao0` .. `ao7`, ±10 V     | 1 MHz       |
//! | `NI_PXIe_6535` | DO        | `port0..3/line0..7`      | 5 MHz       |
//!
//! ## Device
//! A [`Device`] is one board in a shot: its name, its model, the MAX (Measurement & Automation
//! Explorer) name used as the prefix of physical channels, the clock terminal it is timed from,
//! and the channels in use in registration order.

use indexmap::IndexMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::channel::*;
use crate::error::CompileError;

/// Output task flavour of a board.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskType {
    AO,
    DO,
}
impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}",
            match self {
                TaskType::AO => "AO",
                TaskType::DO => "DO",
            }
        )
    }
}

/// Front-panel properties of one analog output.
#[derive(Clone, Debug, PartialEq)]
pub struct AnalogProperties {
    pub base_unit: &'static str,
    pub min: f64,
    pub max: f64,
    pub step: f64,
    pub decimals: u32,
}

/// Fixed hardware capabilities of a board model.
#[derive(Clone, Debug, PartialEq)]
pub struct Capabilities {
    pub description: &'static str,
    pub task_type: TaskType,
    pub n_analogs: usize,
    pub num_ports: usize,
    pub lines_per_port: usize,
    pub clock_limit: f64,
    pub ao_range: (f64, f64),
}

impl Capabilities {
    pub fn n_digitals(&self) -> usize {
        self.num_ports * self.lines_per_port
    }

    pub fn num_outputs(&self) -> usize {
        match self.task_type {
            TaskType::AO => self.n_analogs,
            TaskType::DO => self.n_digitals(),
        }
    }
}

const PXI_6733: Capabilities = Capabilities {
    description: "NI-PXI-6733",
    task_type: TaskType::AO,
    n_analogs: 8,
    num_ports: 0,
    lines_per_port: 0,
    clock_limit: 1e6,
    ao_range: (-10.0, 10.0),
};

const PXIE_6535: Capabilities = Capabilities {
    description: "NI-PXIe-6535",
    task_type: TaskType::DO,
    n_analogs: 0,
    num_ports: 4,
    lines_per_port: 8,
    clock_limit: 5e6,
    ao_range: (0.0, 0.0),
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Model {
    #[serde(rename = "NI_PXI_6733")]
    Pxi6733,
    #[serde(rename = "NI_PXIe_6535")]
    Pxie6535,
}

impl Model {
    pub fn capabilities(&self) -> &'static Capabilities {
        match self {
            Model::Pxi6733 => &PXI_6733,
            Model::Pxie6535 => &PXIE_6535,
        }
    }

    pub fn task_type(&self) -> TaskType {
        self.capabilities().task_type
    }

    /// Every output the board offers, in hardware order.
    pub fn channel_names(&self) -> Vec<String> {
        let caps = self.capabilities();
        match caps.task_type {
            TaskType::AO => (0..caps.n_analogs).map(ao_name).collect(),
            TaskType::DO => (0..caps.num_ports)
                .flat_map(|port| (0..caps.lines_per_port).map(move |line| do_line_name(port, line)))
                .collect(),
        }
    }

    /// Front-panel properties for each analog output. Empty for digital boards.
    pub fn analog_properties(&self) -> IndexMap<String, AnalogProperties> {
        let caps = self.capabilities();
        if caps.task_type != TaskType::AO {
            return IndexMap::new();
        }
        (0..caps.n_analogs)
            .map(|i| {
                (
                    ao_name(i),
                    AnalogProperties {
                        base_unit: "V",
                        min: caps.ao_range.0,
                        max: caps.ao_range.1,
                        step: 0.1,
                        decimals: 3,
                    },
                )
            })
            .collect()
    }
}

/// One board taking part in a shot.
///
/// # Fields
/// - `name`: device name used throughout the experiment description.
/// - `model`: board model, see [`Model`].
/// - `connection`: MAX name of the board, prefix of every physical channel.
/// - `clock_terminal`: terminal the buffered task takes its sample clock from.
/// - `channels`: channels in use, in registration order. Column `i` of an output table
///   belongs to the `i`th registered channel.
#[derive(Clone, Debug)]
pub struct Device {
    name: String,
    model: Model,
    connection: String,
    clock_terminal: String,
    channels: IndexMap<String, Channel>,
}

impl Device {
    pub fn new(name: &str, model: Model, connection: &str, clock_terminal: &str) -> Self {
        Self {
            name: name.to_string(),
            model,
            connection: connection.to_string(),
            clock_terminal: clock_terminal.to_string(),
            channels: IndexMap::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn model(&self) -> Model {
        self.model
    }
    pub fn task_type(&self) -> TaskType {
        self.model.task_type()
    }
    pub fn connection(&self) -> &str {
        &self.connection
    }
    pub fn clock_terminal(&self) -> &str {
        &self.clock_terminal
    }
    pub fn channels(&self) -> &IndexMap<String, Channel> {
        &self.channels
    }

    /// Registers a channel as in use.
    ///
    /// # Naming Conventions:
    /// - For `TaskType::AO`: "ao(number)" (e.g., "ao0", "ao1").
    /// - For `TaskType::DO`: "port(number)/line(number)" (e.g., "port0/line1").
    ///
    /// The channel must also exist on the board model and must not be registered already.
    pub fn add_channel(&mut self, name: &str) -> Result<(), CompileError> {
        let (name_match_string, name_format_description) = match self.task_type() {
            TaskType::AO => (r"^ao\d+$", "ao(number)"),
            TaskType::DO => (r"^port\d+/line\d+$", "port(number)/line(number)"),
        };
        let re = Regex::new(name_match_string).map_err(|_| CompileError::MalformedChannel(name.to_string()))?;
        if !re.is_match(name) {
            return Err(CompileError::BadChannelName {
                device: self.name.clone(),
                expected: name_format_description,
                name: name.to_string(),
            });
        }
        if !self.model.channel_names().iter().any(|c| c == name) {
            return Err(CompileError::ChannelOutOfRange {
                device: self.name.clone(),
                description: self.model.capabilities().description,
                name: name.to_string(),
            });
        }
        if self.channels.contains_key(name) {
            return Err(CompileError::DuplicateChannel {
                device: self.name.clone(),
                name: name.to_string(),
                registered: self.channels.keys().cloned().collect(),
            });
        }
        let channel = Channel::new(self.task_type(), name, &self.connection)?;
        self.channels.insert(name.to_string(), channel);
        Ok(())
    }

    /// Board-level checks run when the shot is compiled.
    pub fn validate(&self) -> Result<(), CompileError> {
        let caps = self.model.capabilities();
        if self.task_type() == TaskType::AO && self.channels.len() % 2 != 0 {
            return Err(CompileError::OddAnalogCount {
                description: caps.description.to_string(),
                name: self.name.clone(),
                count: self.channels.len(),
            });
        }
        Ok(())
    }

    /// Comma-separated physical channels in registration order, e.g. `"PXI1Slot3/ao0, PXI1Slot3/ao1"`.
    pub fn physical_channel_list(&self) -> String {
        join_channel_list(self.channels.values().map(|chan| chan.physical_name()))
    }
}
