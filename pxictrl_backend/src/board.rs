//! Board personalities: what differs between the analog and the digital worker.
//!
//! The mode-transition logic lives in [`crate::controller::TaskController`] and is shared. What it
//! delegates to an [`OutputBoard`] is:
//!
//! - which channels the static (manual-mode) task holds, and how one front-panel sample is written,
//! - turning the board's entry of a [`BoardShot`] into a [`BufferedPlan`]: validation, the sample
//!   buffer in scan order, and the final values reported back to the host,
//! - any driver preflight check run by `init`.
//!
//! ## Analog (NI PXI-6733)
//! The buffered task generates all but the last row of the table. The last row duplicates the
//! second last one; dropping it leaves one more clock tick than samples, which the 6733 needs to
//! notice that the task has completed. The final values are therefore the second last row.
//!
//! ## Digital (NI PXIe-6535)
//! Tables hold one packed word per tick. Each word is expanded to one byte per line before writing,
//! and the last expanded row is reported as the final per-line values.

use ndarray::{s, Axis};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use pxicompiler_backend::*;

use crate::driver::*;
use crate::error::{ConfigError, WorkerError};

/// Channel name (`ao0`, `port1/line3`) to value. Digital values are 0.0 or 1.0; any non-zero input
/// drives the line high.
pub type FrontPanelValues = HashMap<String, f64>;

/// Samples of a buffered task, grouped by scan number.
#[derive(Clone, Debug, PartialEq)]
pub enum SampleBuffer {
    Analog(Vec<f64>),
    Digital(Vec<u8>),
}

/// Everything needed to program one buffered run.
#[derive(Clone, Debug, PartialEq)]
pub struct BufferedPlan {
    pub channels: String,
    pub clock_terminal: String,
    pub sample_rate: f64,
    /// Samples per channel actually written.
    pub samples: usize,
    pub buffer: SampleBuffer,
    pub final_values: FrontPanelValues,
}

pub trait OutputBoard {
    fn device_name(&self) -> &str;
    /// MAX name, prefix of every physical channel.
    fn connection(&self) -> &str;
    fn capabilities(&self) -> &'static Capabilities;
    /// Short names of the static channel set, in task order.
    fn channel_names(&self) -> &[String];

    fn task_type(&self) -> TaskType {
        self.capabilities().task_type
    }

    /// Runs before any task is created.
    fn check_driver<D: DaqDriver>(&self, _driver: &D) -> Result<(), WorkerError> {
        Ok(())
    }

    fn create_static_channels<T: DaqTask>(&self, task: &mut T) -> Result<(), DaqmxError>;

    /// Writes one sample per channel to the running static task.
    fn write_manual<T: DaqTask>(&self, task: &mut T, values: &FrontPanelValues) -> Result<(), WorkerError>;

    /// Validates the shot entry and shapes its table. `Ok(None)` when the board is unused this shot.
    fn plan_buffered(&self, shot: &BoardShot) -> Result<Option<BufferedPlan>, WorkerError>;

    fn create_buffered_channels<T: DaqTask>(&self, task: &mut T, channels: &str) -> Result<(), DaqmxError>;

    /// Values for every channel of the static set, in task order.
    fn ordered_values(&self, values: &FrontPanelValues) -> Result<Vec<f64>, WorkerError> {
        self.channel_names()
            .iter()
            .map(|name| {
                values.get(name).copied().ok_or_else(|| WorkerError::MissingValue {
                    device: self.device_name().to_string(),
                    channel: name.clone(),
                })
            })
            .collect()
    }

    /// Checks shared by both boards: table kind and clock limit.
    fn check_shot<'a>(&self, shot: &'a BoardShot) -> Result<Option<&'a OutputTable>, WorkerError> {
        let Some(table) = &shot.table else {
            return Ok(None);
        };
        if table.task_type() != self.task_type() {
            return Err(WorkerError::TableKind {
                device: self.device_name().to_string(),
                board: self.task_type(),
                table: table.task_type(),
            });
        }
        let limit = self.capabilities().clock_limit;
        if shot.sample_rate <= 0.0 || shot.sample_rate > limit {
            return Err(WorkerError::ClockLimit {
                device: self.device_name().to_string(),
                rate: shot.sample_rate,
                limit,
            });
        }
        Ok(Some(table))
    }
}

/// NI PXI-6733: `ao0..ao<n>` voltage outputs.
#[derive(Clone, Debug)]
pub struct AnalogBoard {
    device_name: String,
    connection: String,
    channel_names: Vec<String>,
    limits: (f64, f64),
}

impl AnalogBoard {
    /// Fails when `num_ao` is zero, odd or larger than the board: DAQmx needs an even total sample count.
    pub fn new(device_name: &str, connection: &str, num_ao: usize, limits: (f64, f64)) -> Result<Self, ConfigError> {
        let caps = Model::Pxi6733.capabilities();
        if num_ao == 0 {
            return Err(ConfigError::NoOutputs {
                description: caps.description,
                name: device_name.to_string(),
            });
        }
        if num_ao > caps.n_analogs {
            return Err(ConfigError::TooManyOutputs {
                description: caps.description,
                name: device_name.to_string(),
                count: num_ao,
                available: caps.n_analogs,
            });
        }
        if num_ao % 2 != 0 {
            return Err(ConfigError::OddAnalogCount {
                description: caps.description,
                name: device_name.to_string(),
                count: num_ao,
            });
        }
        Ok(Self {
            device_name: device_name.to_string(),
            connection: connection.to_string(),
            channel_names: (0..num_ao).map(ao_name).collect(),
            limits,
        })
    }

    /// All eight outputs at ±10 V.
    pub fn pxi_6733(device_name: &str, connection: &str) -> Result<Self, ConfigError> {
        let caps = Model::Pxi6733.capabilities();
        Self::new(device_name, connection, caps.n_analogs, caps.ao_range)
    }

    pub fn limits(&self) -> (f64, f64) {
        self.limits
    }
}

impl OutputBoard for AnalogBoard {
    fn device_name(&self) -> &str {
        &self.device_name
    }
    fn connection(&self) -> &str {
        &self.connection
    }
    fn capabilities(&self) -> &'static Capabilities {
        Model::Pxi6733.capabilities()
    }
    fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    fn create_static_channels<T: DaqTask>(&self, task: &mut T) -> Result<(), DaqmxError> {
        for name in &self.channel_names {
            task.create_ao_voltage_chan(&format!("{}/{}", self.connection, name), self.limits.0, self.limits.1)?;
        }
        Ok(())
    }

    fn write_manual<T: DaqTask>(&self, task: &mut T, values: &FrontPanelValues) -> Result<(), WorkerError> {
        let data = self.ordered_values(values)?;
        task.write_analog_f64(1, true, 1.0, DataLayout::GroupByChannel, &data)?;
        Ok(())
    }

    fn plan_buffered(&self, shot: &BoardShot) -> Result<Option<BufferedPlan>, WorkerError> {
        let Some(OutputTable::Analog(table)) = self.check_shot(shot)? else {
            return Ok(None);
        };
        let channels = expand_physical_channels(&shot.channels)?;
        if channels.len() % 2 != 0 {
            return Err(ConfigError::OddAnalogCount {
                description: self.capabilities().description,
                name: self.device_name.clone(),
                count: channels.len(),
            }
            .into());
        }
        if table.ncols() != channels.len() {
            return Err(WorkerError::TableShape {
                device: self.device_name.clone(),
                columns: table.ncols(),
                channels: channels.len(),
            });
        }
        if table.nrows() < 2 {
            return Err(WorkerError::TooFewSamples {
                device: self.device_name.clone(),
                rows: table.nrows(),
                required: 2,
            });
        }
        // One clock tick more than samples marks the task as done.
        let written = table.slice(s![..-1, ..]);
        let last = written.row(written.nrows() - 1);
        let final_values = channels
            .iter()
            .zip(last.iter())
            .map(|(chan, &value)| (short_channel_name(chan).to_string(), value))
            .collect();
        debug!("{}: {} of {} analog rows buffered", self.device_name, written.nrows(), table.nrows());
        Ok(Some(BufferedPlan {
            channels: shot.channels.clone(),
            clock_terminal: shot.clock_terminal.clone(),
            sample_rate: shot.sample_rate,
            samples: written.nrows(),
            buffer: SampleBuffer::Analog(written.iter().copied().collect()),
            final_values,
        }))
    }

    fn create_buffered_channels<T: DaqTask>(&self, task: &mut T, channels: &str) -> Result<(), DaqmxError> {
        task.create_ao_voltage_chan(channels, self.limits.0, self.limits.1)
    }
}

/// NI PXIe-6535: `port<p>/line<l>` outputs, driven one channel per line.
#[derive(Clone, Debug)]
pub struct DigitalBoard {
    device_name: String,
    connection: String,
    num_ports: usize,
    lines_per_port: usize,
    channel_names: Vec<String>,
    /// Bit of each line in a packed word, in `channel_names` order.
    bits: Vec<usize>,
}

impl DigitalBoard {
    pub fn new(device_name: &str, connection: &str, num_ports: usize, lines_per_port: usize) -> Result<Self, ConfigError> {
        let caps = Model::Pxie6535.capabilities();
        if num_ports == 0 || lines_per_port == 0 {
            return Err(ConfigError::NoOutputs {
                description: caps.description,
                name: device_name.to_string(),
            });
        }
        if num_ports > caps.num_ports || lines_per_port > caps.lines_per_port {
            return Err(ConfigError::TooManyOutputs {
                description: caps.description,
                name: device_name.to_string(),
                count: num_ports * lines_per_port,
                available: caps.n_digitals(),
            });
        }
        Ok(Self {
            device_name: device_name.to_string(),
            connection: connection.to_string(),
            num_ports,
            lines_per_port,
            channel_names: (0..num_ports)
                .flat_map(|port| (0..lines_per_port).map(move |line| do_line_name(port, line)))
                .collect(),
            bits: (0..num_ports)
                .flat_map(|port| (0..lines_per_port).map(move |line| port * LINES_PER_PORT + line))
                .collect(),
        })
    }

    /// All 32 lines: four ports of eight.
    pub fn pxie_6535(device_name: &str, connection: &str) -> Result<Self, ConfigError> {
        let caps = Model::Pxie6535.capabilities();
        Self::new(device_name, connection, caps.num_ports, caps.lines_per_port)
    }

    pub fn num_lines(&self) -> usize {
        self.num_ports * self.lines_per_port
    }

    fn port_lines(&self, port: usize) -> String {
        format!("{}/port{}/line0:{}", self.connection, port, self.lines_per_port - 1)
    }
}

impl OutputBoard for DigitalBoard {
    fn device_name(&self) -> &str {
        &self.device_name
    }
    fn connection(&self) -> &str {
        &self.connection
    }
    fn capabilities(&self) -> &'static Capabilities {
        Model::Pxie6535.capabilities()
    }
    fn channel_names(&self) -> &[String] {
        &self.channel_names
    }

    fn check_driver<D: DaqDriver>(&self, driver: &D) -> Result<(), WorkerError> {
        let version = driver.driver_version()?;
        if version.has_buffered_digital_bug() {
            return Err(ConfigError::DefectiveDriver(version).into());
        }
        debug!("{}: NI-DAQmx v{}", self.device_name, version);
        Ok(())
    }

    fn create_static_channels<T: DaqTask>(&self, task: &mut T) -> Result<(), DaqmxError> {
        for port in 0..self.num_ports {
            task.create_do_chan(&self.port_lines(port))?;
        }
        Ok(())
    }

    fn write_manual<T: DaqTask>(&self, task: &mut T, values: &FrontPanelValues) -> Result<(), WorkerError> {
        let data: Vec<u8> = self
            .ordered_values(values)?
            .into_iter()
            .map(|v| (v != 0.0) as u8)
            .collect();
        task.write_digital_lines(1, true, 1.0, DataLayout::GroupByChannel, &data)?;
        Ok(())
    }

    fn plan_buffered(&self, shot: &BoardShot) -> Result<Option<BufferedPlan>, WorkerError> {
        let Some(OutputTable::Digital(bitfield)) = self.check_shot(shot)? else {
            return Ok(None);
        };
        let listed: HashSet<String> = expand_physical_channels(&shot.channels)?
            .iter()
            .map(|chan| short_channel_name(chan).to_string())
            .collect();
        if !self.channel_names.iter().all(|name| listed.contains(name)) {
            return Err(WorkerError::TableShape {
                device: self.device_name.clone(),
                columns: self.num_lines(),
                channels: listed.len(),
            });
        }
        // Compiled shots span the whole board; lines outside the ports in use must stay low.
        let in_use = self.bits.iter().fold(0u32, |mask, &bit| mask | (1 << bit));
        if let Some(stray) = bitfield.iter().map(|&word| word & !in_use).find(|&stray| stray != 0) {
            return Err(WorkerError::StrayLines {
                device: self.device_name.clone(),
                in_use: self.num_lines(),
                stray,
            });
        }
        if bitfield.is_empty() {
            return Err(WorkerError::TooFewSamples {
                device: self.device_name.clone(),
                rows: 0,
                required: 1,
            });
        }
        let unpacked = unpack_bitfield(bitfield, WORD_BITS)?.select(Axis(1), &self.bits);
        let last = unpacked.row(unpacked.nrows() - 1);
        let final_values = self
            .channel_names
            .iter()
            .zip(last.iter())
            .map(|(name, &state)| (name.clone(), state as f64))
            .collect();
        let channels = (0..self.num_ports)
            .map(|port| self.port_lines(port))
            .collect::<Vec<_>>()
            .join(", ");
        Ok(Some(BufferedPlan {
            channels,
            clock_terminal: shot.clock_terminal.clone(),
            sample_rate: shot.sample_rate,
            samples: unpacked.nrows(),
            buffer: SampleBuffer::Digital(unpacked.iter().copied().collect()),
            final_values,
        }))
    }

    fn create_buffered_channels<T: DaqTask>(&self, task: &mut T, channels: &str) -> Result<(), DaqmxError> {
        task.create_do_chan(channels)
    }
}
