//! Building a [`Shot`] from a description of the boards in use.
//!
//! ## Overview
//!
//! The [`Experiment`] struct collects devices and their channels, takes one output table per
//! board, and [`Experiment::compile`] turns all of it into the [`Shot`] the workers read. It is the
//! last place a description can be rejected before hardware is touched:
//!
//! - analog boards must use an even number of outputs (a DAQmx limitation on the 6733),
//! - table columns must match the channels in use,
//! - the sample rate may not exceed the board's clock limit.
//!
//! Boards without a table are still written to the shot (with `table: None`) so their workers
//! know to release the clock terminal.
//!
//! ## Example
//! ```
//! use ndarray::array;
//! use pxicompiler_backend::*;
//!
//! let mut exp = Experiment::new();
//! exp.add_ao_device("ao_board", "PXI1Slot3", "/PXI1Slot3/PFI0").unwrap();
//! exp.add_ao_channel("ao_board", 0).unwrap();
//! exp.add_ao_channel("ao_board", 1).unwrap();
//! exp.set_analog_table("ao_board", array![[0.0, 1.0], [0.5, 1.5], [0.5, 1.5]]).unwrap();
//! let shot = exp.compile().unwrap();
//! assert_eq!(shot.device("ao_board").unwrap().channels, "PXI1Slot3/ao0, PXI1Slot3/ao1");
//! ```

use indexmap::IndexMap;
use ndarray::Array2;
use tracing::debug;

use crate::channel::*;
use crate::device::*;
use crate::error::CompileError;
use crate::shot::*;
use crate::utils::pack_lines;

#[derive(Default)]
pub struct Experiment {
    devices: IndexMap<String, Device>,
    tables: IndexMap<String, OutputTable>,
    sample_rates: IndexMap<String, f64>,
}

impl Experiment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn devices(&self) -> &IndexMap<String, Device> {
        &self.devices
    }

    fn dev_(&mut self, name: &str) -> Result<&mut Device, CompileError> {
        let registered: Vec<String> = self.devices.keys().cloned().collect();
        self.devices
            .get_mut(name)
            .ok_or_else(|| CompileError::UnknownDevice {
                name: name.to_string(),
                registered,
            })
    }

    pub fn add_device(&mut self, dev: Device) -> Result<(), CompileError> {
        if self.devices.contains_key(dev.name()) {
            return Err(CompileError::DuplicateDevice(dev.name().to_string()));
        }
        self.devices.insert(dev.name().to_string(), dev);
        Ok(())
    }

    /// Registers an NI PXI-6733 analog board.
    pub fn add_ao_device(&mut self, name: &str, connection: &str, clock_terminal: &str) -> Result<(), CompileError> {
        self.add_device(Device::new(name, Model::Pxi6733, connection, clock_terminal))
    }

    /// Registers an NI PXIe-6535 digital board.
    pub fn add_do_device(&mut self, name: &str, connection: &str, clock_terminal: &str) -> Result<(), CompileError> {
        self.add_device(Device::new(name, Model::Pxie6535, connection, clock_terminal))
    }

    pub fn add_ao_channel(&mut self, name: &str, channel_id: usize) -> Result<(), CompileError> {
        self.dev_(name)?.add_channel(&ao_name(channel_id))
    }

    pub fn add_do_channel(&mut self, name: &str, port_id: usize, line_id: usize) -> Result<(), CompileError> {
        self.dev_(name)?.add_channel(&do_line_name(port_id, line_id))
    }

    /// Overrides the buffered sample rate of a device. Defaults to the model's clock limit.
    pub fn set_sample_rate(&mut self, name: &str, rate: f64) -> Result<(), CompileError> {
        let limit = self.dev_(name)?.model().capabilities().clock_limit;
        if rate <= 0.0 || rate > limit {
            return Err(CompileError::ClockLimit {
                device: name.to_string(),
                rate,
                limit,
            });
        }
        self.sample_rates.insert(name.to_string(), rate);
        Ok(())
    }

    /// Sets the analog output table of a device: shape `(ticks, channels in use)`.
    pub fn set_analog_table(&mut self, name: &str, table: Array2<f64>) -> Result<(), CompileError> {
        let dev = self.dev_(name)?;
        if dev.task_type() != TaskType::AO {
            return Err(CompileError::TableKind {
                device: name.to_string(),
                task_type: dev.task_type(),
                given: TaskType::AO,
            });
        }
        self.check_columns(name, table.ncols())?;
        self.tables.insert(name.to_string(), OutputTable::Analog(table));
        Ok(())
    }

    /// Sets the digital output of a device from per-line states, shape `(ticks, lines in use)`.
    /// The states are packed into one word per tick.
    pub fn set_digital_table(&mut self, name: &str, lines: Array2<u8>) -> Result<(), CompileError> {
        let dev = self.dev_(name)?;
        if dev.task_type() != TaskType::DO {
            return Err(CompileError::TableKind {
                device: name.to_string(),
                task_type: dev.task_type(),
                given: TaskType::DO,
            });
        }
        let bits: Vec<usize> = dev.channels().values().map(|chan| chan.index()).collect();
        self.check_columns(name, lines.ncols())?;
        let packed = pack_lines(&lines, &bits)?;
        self.tables.insert(name.to_string(), OutputTable::Digital(packed));
        Ok(())
    }

    fn check_columns(&mut self, name: &str, columns: usize) -> Result<(), CompileError> {
        let channels = self.dev_(name)?.channels().len();
        if columns != channels {
            return Err(CompileError::TableShape {
                device: name.to_string(),
                columns,
                channels,
            });
        }
        Ok(())
    }

    /// Validates every board and produces the shot description.
    pub fn compile(&self) -> Result<Shot, CompileError> {
        let mut shot = Shot::new();
        for dev in self.devices.values() {
            dev.validate()?;
            let caps = dev.model().capabilities();
            // Digital buffered tasks always drive every line of the board; packed bits index into it.
            let channels = match dev.task_type() {
                TaskType::AO => dev.physical_channel_list(),
                TaskType::DO => (0..caps.num_ports)
                    .map(|port| format!("{}/port{}/line0:{}", dev.connection(), port, caps.lines_per_port - 1))
                    .collect::<Vec<_>>()
                    .join(", "),
            };
            let table = self.tables.get(dev.name()).cloned();
            debug!(
                "compiled {} ({}): {} ticks on {}",
                dev.name(),
                caps.description,
                table.as_ref().map_or(0, |t| t.len()),
                channels
            );
            shot.insert(
                dev.name(),
                BoardShot {
                    clock_terminal: dev.clock_terminal().to_string(),
                    sample_rate: self
                        .sample_rates
                        .get(dev.name())
                        .copied()
                        .unwrap_or(caps.clock_limit),
                    channels,
                    table,
                },
            );
        }
        Ok(shot)
    }
}
