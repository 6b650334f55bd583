//! An in-memory stand-in for NI-DAQmx.
//!
//! [`SimDriver`] implements [`DaqDriver`] without hardware. It keeps the parts of the driver's
//! behaviour the workers depend on:
//!
//! - a physical channel belongs to at most one uncleared task; a second claim fails with
//!   [`ERR_RESOURCE_RESERVED`],
//! - a terminal routed onto a physical line (see [`SimDriver::route_terminal`]) cannot be used as a
//!   sample clock source while an untimed task holds that line, and the line cannot be claimed while
//!   another task is clocked from the terminal,
//! - stopping a started finite task before it generated all samples fails with
//!   [`ERR_STOPPED_BEFORE_DONE`],
//! - writes must match the channel count and, on clocked tasks, the configured sample count.
//!
//! Every call is recorded as a [`SimEvent`]. Several drivers can share one simulated chassis:
//! [`SimDriver::for_board`] returns a handle onto the same state whose events carry another label.
//!
//! Writes to untimed tasks take effect immediately; clocked writes take effect once
//! [`SimDriver::finish_buffered`] has played them out. [`SimDriver::output`] reads back the
//! last value of a physical channel.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use pxicompiler_backend::expand_physical_channels;

use crate::driver::*;

pub const ERR_RESOURCE_RESERVED: i32 = -50103;
pub const ERR_STOPPED_BEFORE_DONE: i32 = -200010;
pub const ERR_INVALID_TASK: i32 = -200088;
pub const ERR_PHYSICAL_CHANNEL: i32 = -200170;
pub const ERR_BUFFER_MISMATCH: i32 = -200524;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    CreateTask,
    CreateAoChan,
    CreateDoChan,
    CfgSampClk,
    WriteAnalog,
    WriteDigital,
    Start,
    Stop,
    Clear,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SimCall {
    CreateTask,
    CreateAoChan { channels: String, min: f64, max: f64 },
    CreateDoChan { lines: String },
    CfgSampClk { source: String, rate: f64, samps_per_chan: u64 },
    WriteAnalog { samps_per_chan: usize, auto_start: bool, layout: DataLayout, data: Vec<f64> },
    WriteDigital { samps_per_chan: usize, auto_start: bool, layout: DataLayout, data: Vec<u8> },
    Start,
    Stop,
    Clear,
}

impl SimCall {
    pub fn op(&self) -> SimOp {
        match self {
            SimCall::CreateTask => SimOp::CreateTask,
            SimCall::CreateAoChan { .. } => SimOp::CreateAoChan,
            SimCall::CreateDoChan { .. } => SimOp::CreateDoChan,
            SimCall::CfgSampClk { .. } => SimOp::CfgSampClk,
            SimCall::WriteAnalog { .. } => SimOp::WriteAnalog,
            SimCall::WriteDigital { .. } => SimOp::WriteDigital,
            SimCall::Start => SimOp::Start,
            SimCall::Stop => SimOp::Stop,
            SimCall::Clear => SimOp::Clear,
        }
    }
}

/// One recorded call. `failed` is set when the call returned an error.
#[derive(Debug, Clone, PartialEq)]
pub struct SimEvent {
    pub label: String,
    pub task: u64,
    pub call: SimCall,
    pub failed: bool,
}

#[derive(Default)]
struct SimTaskState {
    channels: Vec<String>,
    clock: Option<(String, u64)>,
    started: bool,
    done: bool,
    pending: Vec<(String, f64)>,
}

struct SimBus {
    version: DriverVersion,
    next_id: u64,
    tasks: HashMap<u64, SimTaskState>,
    owners: HashMap<String, u64>,
    routes: HashMap<String, String>,
    outputs: HashMap<String, f64>,
    failures: HashMap<(String, SimOp), i32>,
    events: Vec<SimEvent>,
}

impl SimBus {
    fn take_failure(&mut self, label: &str, op: SimOp) -> Option<DaqmxError> {
        self.failures
            .remove(&(label.to_string(), op))
            .map(|code| DaqmxError::new(code, format!("Injected failure of {:?}", op)))
    }

    fn task(&mut self, id: u64) -> Result<&mut SimTaskState, DaqmxError> {
        self.tasks
            .get_mut(&id)
            .ok_or_else(|| DaqmxError::new(ERR_INVALID_TASK, "Task specified is invalid or does not exist."))
    }

    fn reserve(&mut self, id: u64, list: &str) -> Result<(), DaqmxError> {
        let channels = expand_physical_channels(list)
            .map_err(|err| DaqmxError::new(ERR_PHYSICAL_CHANNEL, err.to_string()))?;
        for chan in &channels {
            if let Some(&owner) = self.owners.get(chan) {
                if owner != id {
                    return Err(reserved(chan, owner));
                }
            }
            // A line carrying a terminal that another task is clocked from.
            for (terminal, line) in &self.routes {
                if line != chan {
                    continue;
                }
                if let Some((&owner, _)) = self
                    .tasks
                    .iter()
                    .find(|(tid, t)| **tid != id && t.clock.as_ref().is_some_and(|(src, _)| src == terminal))
                {
                    return Err(reserved(terminal, owner));
                }
            }
        }
        for chan in channels {
            self.owners.insert(chan.clone(), id);
            self.task(id)?.channels.push(chan);
        }
        Ok(())
    }

    fn cfg_clock(&mut self, id: u64, source: &str, samps: u64) -> Result<(), DaqmxError> {
        // A clocked task generating on the routed line is the one driving the terminal.
        if let Some(line) = self.routes.get(source) {
            if let Some(&owner) = self.owners.get(line) {
                let untimed = self.tasks.get(&owner).is_some_and(|t| t.clock.is_none());
                if owner != id && untimed {
                    return Err(reserved(source, owner));
                }
            }
        }
        self.task(id)?.clock = Some((source.to_string(), samps));
        Ok(())
    }

    fn write(&mut self, id: u64, samps: usize, auto_start: bool, layout: DataLayout, data: Vec<f64>) -> Result<(), DaqmxError> {
        let task = self.task(id)?;
        let nchans = task.channels.len();
        if nchans == 0 || samps == 0 || data.len() != samps * nchans {
            return Err(DaqmxError::new(
                ERR_BUFFER_MISMATCH,
                format!("Write of {} values does not fit {} samples on {} channels", data.len(), samps, nchans),
            ));
        }
        if let Some((_, count)) = &task.clock {
            if *count != samps as u64 {
                return Err(DaqmxError::new(
                    ERR_BUFFER_MISMATCH,
                    format!("Wrote {} samples to a task timed for {}", samps, count),
                ));
            }
        }
        let last: Vec<(String, f64)> = task
            .channels
            .iter()
            .enumerate()
            .map(|(ch, name)| {
                let value = match layout {
                    DataLayout::GroupByChannel => data[ch * samps + samps - 1],
                    DataLayout::GroupByScanNumber => data[(samps - 1) * nchans + ch],
                };
                (name.clone(), value)
            })
            .collect();
        if auto_start {
            task.started = true;
        }
        if task.clock.is_some() {
            task.pending = last;
        } else {
            self.outputs.extend(last);
        }
        Ok(())
    }

    fn stop(&mut self, id: u64) -> Result<(), DaqmxError> {
        let task = self.task(id)?;
        if task.started && task.clock.is_some() && !task.done {
            return Err(DaqmxError::new(
                ERR_STOPPED_BEFORE_DONE,
                "Finite acquisition or generation has been stopped before the requested number of samples were generated.",
            ));
        }
        task.started = false;
        Ok(())
    }

    fn clear(&mut self, id: u64) -> Result<(), DaqmxError> {
        let task = self
            .tasks
            .remove(&id)
            .ok_or_else(|| DaqmxError::new(ERR_INVALID_TASK, "Task specified is invalid or does not exist."))?;
        for chan in task.channels {
            self.owners.remove(&chan);
        }
        Ok(())
    }
}

fn reserved(resource: &str, owner: u64) -> DaqmxError {
    debug!("sim: {} is reserved by task {}", resource, owner);
    DaqmxError::new(
        ERR_RESOURCE_RESERVED,
        format!("The specified resource is reserved. Resource: {} (held by task {})", resource, owner),
    )
}

/// Simulated DAQmx driver. Cloning shares the simulated chassis and keeps the label.
#[derive(Clone)]
pub struct SimDriver {
    label: String,
    bus: Arc<Mutex<SimBus>>,
}

impl SimDriver {
    pub fn new(version: DriverVersion) -> Self {
        Self {
            label: "sim".to_string(),
            bus: Arc::new(Mutex::new(SimBus {
                version,
                next_id: 1,
                tasks: HashMap::new(),
                owners: HashMap::new(),
                routes: HashMap::new(),
                outputs: HashMap::new(),
                failures: HashMap::new(),
                events: Vec::new(),
            })),
        }
    }

    /// A handle onto the same chassis whose events are labelled `label`.
    pub fn for_board(&self, label: &str) -> Self {
        Self {
            label: label.to_string(),
            bus: self.bus.clone(),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn set_version(&self, version: DriverVersion) {
        self.bus.lock().version = version;
    }

    /// Declares that `terminal` is driven by (or drives) `line`, e.g. a PFI pin shared with a port line.
    pub fn route_terminal(&self, terminal: &str, line: &str) {
        self.bus.lock().routes.insert(terminal.to_string(), line.to_string());
    }

    /// Makes the next `op` issued through this label fail with `code`.
    pub fn fail_next(&self, op: SimOp, code: i32) {
        self.bus.lock().failures.insert((self.label.clone(), op), code);
    }

    /// Lets every started clocked task run to completion.
    pub fn finish_buffered(&self) {
        let mut bus = self.bus.lock();
        let mut played = Vec::new();
        for task in bus.tasks.values_mut() {
            if task.started && task.clock.is_some() && !task.done {
                task.done = true;
                played.append(&mut task.pending);
            }
        }
        bus.outputs.extend(played);
    }

    /// Last value generated on a physical channel.
    pub fn output(&self, physical: &str) -> Option<f64> {
        self.bus.lock().outputs.get(physical).copied()
    }

    /// Uncleared tasks created through this label.
    pub fn open_tasks(&self) -> usize {
        let bus = self.bus.lock();
        let created: Vec<u64> = bus
            .events
            .iter()
            .filter(|e| e.label == self.label && e.call == SimCall::CreateTask && !e.failed)
            .map(|e| e.task)
            .collect();
        created.iter().filter(|id| bus.tasks.contains_key(id)).count()
    }

    /// Owner task of a physical channel, if reserved.
    pub fn owner(&self, physical: &str) -> Option<u64> {
        self.bus.lock().owners.get(physical).copied()
    }

    pub fn events(&self) -> Vec<SimEvent> {
        self.bus.lock().events.clone()
    }

    /// Calls issued through this label, in order.
    pub fn calls(&self) -> Vec<SimCall> {
        self.bus
            .lock()
            .events
            .iter()
            .filter(|e| e.label == self.label)
            .map(|e| e.call.clone())
            .collect()
    }

    pub fn ops(&self) -> Vec<SimOp> {
        self.calls().iter().map(SimCall::op).collect()
    }

    pub fn clear_events(&self) {
        self.bus.lock().events.clear();
    }
}

impl DaqDriver for SimDriver {
    type Task = SimTask;

    fn create_task(&self, _name: &str) -> Result<SimTask, DaqmxError> {
        let mut bus = self.bus.lock();
        let id = bus.next_id;
        let failure = bus.take_failure(&self.label, SimOp::CreateTask);
        bus.events.push(SimEvent {
            label: self.label.clone(),
            task: id,
            call: SimCall::CreateTask,
            failed: failure.is_some(),
        });
        if let Some(err) = failure {
            return Err(err);
        }
        bus.next_id += 1;
        bus.tasks.insert(id, SimTaskState::default());
        Ok(SimTask {
            id,
            label: self.label.clone(),
            bus: self.bus.clone(),
        })
    }

    fn driver_version(&self) -> Result<DriverVersion, DaqmxError> {
        Ok(self.bus.lock().version)
    }
}

/// A task on the simulated chassis. Dropping it without [`DaqTask::clear`] leaks it, as on hardware.
pub struct SimTask {
    id: u64,
    label: String,
    bus: Arc<Mutex<SimBus>>,
}

impl SimTask {
    pub fn id(&self) -> u64 {
        self.id
    }

    fn run<R>(&self, call: SimCall, f: impl FnOnce(&mut SimBus) -> Result<R, DaqmxError>) -> Result<R, DaqmxError> {
        let mut bus = self.bus.lock();
        let op = call.op();
        let result = match bus.take_failure(&self.label, op) {
            Some(err) => Err(err),
            None => f(&mut bus),
        };
        bus.events.push(SimEvent {
            label: self.label.clone(),
            task: self.id,
            call,
            failed: result.is_err(),
        });
        result
    }
}

impl DaqTask for SimTask {
    fn create_ao_voltage_chan(&mut self, physical: &str, min: f64, max: f64) -> Result<(), DaqmxError> {
        let id = self.id;
        let call = SimCall::CreateAoChan { channels: physical.to_string(), min, max };
        self.run(call, |bus| bus.reserve(id, physical))
    }

    fn create_do_chan(&mut self, lines: &str) -> Result<(), DaqmxError> {
        let id = self.id;
        let call = SimCall::CreateDoChan { lines: lines.to_string() };
        self.run(call, |bus| bus.reserve(id, lines))
    }

    fn cfg_samp_clk_timing(&mut self, source: &str, rate: f64, samps_per_chan: u64) -> Result<(), DaqmxError> {
        let id = self.id;
        let call = SimCall::CfgSampClk { source: source.to_string(), rate, samps_per_chan };
        self.run(call, |bus| bus.cfg_clock(id, source, samps_per_chan))
    }

    fn write_analog_f64(
        &mut self,
        samps_per_chan: usize,
        auto_start: bool,
        _timeout: f64,
        layout: DataLayout,
        data: &[f64],
    ) -> Result<usize, DaqmxError> {
        let id = self.id;
        let call = SimCall::WriteAnalog { samps_per_chan, auto_start, layout, data: data.to_vec() };
        self.run(call, |bus| bus.write(id, samps_per_chan, auto_start, layout, data.to_vec()))?;
        Ok(samps_per_chan)
    }

    fn write_digital_lines(
        &mut self,
        samps_per_chan: usize,
        auto_start: bool,
        _timeout: f64,
        layout: DataLayout,
        data: &[u8],
    ) -> Result<usize, DaqmxError> {
        let id = self.id;
        let call = SimCall::WriteDigital { samps_per_chan, auto_start, layout, data: data.to_vec() };
        let values = data.iter().map(|&b| if b != 0 { 1.0 } else { 0.0 }).collect();
        self.run(call, |bus| bus.write(id, samps_per_chan, auto_start, layout, values))?;
        Ok(samps_per_chan)
    }

    fn start(&mut self) -> Result<(), DaqmxError> {
        let id = self.id;
        self.run(SimCall::Start, |bus| {
            bus.task(id)?.started = true;
            Ok(())
        })
    }

    fn stop(&mut self) -> Result<(), DaqmxError> {
        let id = self.id;
        self.run(SimCall::Stop, |bus| bus.stop(id))
    }

    fn clear(self) -> Result<(), DaqmxError> {
        let id = self.id;
        self.run(SimCall::Clear, |bus| bus.clear(id))
    }
}
