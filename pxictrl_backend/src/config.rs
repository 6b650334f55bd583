//! Chassis configuration, read from TOML.
//!
//! ```toml
//! [[boards]]
//! name = "do_board"
//! model = "NI_PXIe_6535"
//! connection = "PXI1Slot6"
//! clock_terminal = "/PXI1Slot6/PFI4"
//!
//! [[boards]]
//! name = "ao_board"
//! model = "NI_PXI_6733"
//! connection = "PXI1Slot3"
//! clock_terminal = "/PXI1Slot3/PFI0"
//! num_outputs = 4
//! limits = [-5.0, 5.0]
//! ```
//!
//! Boards are checked when their workers are built, before any task exists.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

use pxicompiler_backend::{ao_name, do_line_name, Model, TaskType};

use crate::board::{AnalogBoard, DigitalBoard};
use crate::error::ConfigError;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BoardConfig {
    pub name: String,
    pub model: Model,
    /// MAX name of the board.
    pub connection: String,
    /// Terminal the buffered task is clocked from.
    pub clock_terminal: String,
    /// Analog outputs in use, `ao0` upwards. All of them when absent.
    #[serde(default)]
    pub num_outputs: Option<usize>,
    /// Digital ports in use, `port0` upwards. All of them when absent. Buffered tables may not
    /// drive lines on the other ports.
    #[serde(default)]
    pub num_ports: Option<usize>,
    /// Analog output range in volts.
    #[serde(default)]
    pub limits: Option<[f64; 2]>,
}

impl BoardConfig {
    pub fn new(name: &str, model: Model, connection: &str, clock_terminal: &str) -> Self {
        Self {
            name: name.to_string(),
            model,
            connection: connection.to_string(),
            clock_terminal: clock_terminal.to_string(),
            num_outputs: None,
            num_ports: None,
            limits: None,
        }
    }

    /// Short names of the outputs the board's worker drives.
    pub fn channel_names(&self) -> Vec<String> {
        let caps = self.model.capabilities();
        match caps.task_type {
            TaskType::AO => (0..self.num_outputs.unwrap_or(caps.n_analogs)).map(ao_name).collect(),
            TaskType::DO => (0..self.num_ports.unwrap_or(caps.num_ports))
                .flat_map(|port| (0..caps.lines_per_port).map(move |line| do_line_name(port, line)))
                .collect(),
        }
    }

    pub fn analog_board(&self) -> Result<AnalogBoard, ConfigError> {
        let caps = self.model.capabilities();
        let [min, max] = self.limits.unwrap_or([caps.ao_range.0, caps.ao_range.1]);
        AnalogBoard::new(
            &self.name,
            &self.connection,
            self.num_outputs.unwrap_or(caps.n_analogs),
            (min, max),
        )
    }

    pub fn digital_board(&self) -> Result<DigitalBoard, ConfigError> {
        let caps = self.model.capabilities();
        DigitalBoard::new(
            &self.name,
            &self.connection,
            self.num_ports.unwrap_or(caps.num_ports),
            caps.lines_per_port,
        )
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChassisConfig {
    #[serde(default)]
    pub boards: Vec<BoardConfig>,
}

impl ChassisConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for board in &self.boards {
            if !seen.insert(board.name.as_str()) {
                return Err(ConfigError::DuplicateBoard(board.name.clone()));
            }
        }
        Ok(())
    }

    /// One board of each model, the digital one driving the analog clock terminal.
    pub fn demo() -> Self {
        Self {
            boards: vec![
                BoardConfig::new("do_board", Model::Pxie6535, "PXI1Slot6", "/PXI1Slot6/PFI4"),
                BoardConfig::new("ao_board", Model::Pxi6733, "PXI1Slot3", "/PXI1Slot3/PFI0"),
            ],
        }
    }
}
