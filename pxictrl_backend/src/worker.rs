//! The hooks a host framework calls on a board worker, and their implementation on
//! [`TaskController`].
//!
//! The host drives each worker through the same sequence for every shot:
//!
//! 1. `init` once, bringing up manual mode.
//! 2. `program_manual` whenever the front panel changes.
//! 3. `transition_to_buffered` with the compiled shot, returning the values the outputs hold when
//!    the shot ends.
//! 4. `transition_to_manual(false)` once the shot is over, or `abort_buffered` /
//!    `abort_transition_to_buffered` when it is abandoned.
//! 5. `shutdown` once.

use tracing::{debug, info, warn};

use pxicompiler_backend::{Shot, TaskType};

use crate::board::{FrontPanelValues, OutputBoard, SampleBuffer};
use crate::controller::{ControllerState, OpenTask, TaskController};
use crate::driver::*;
use crate::error::WorkerError;
use crate::utils::TickTimer;

/// Timeout of buffered writes, in seconds.
pub const BUFFERED_WRITE_TIMEOUT: f64 = 10.0;

pub trait Worker {
    fn device_name(&self) -> &str;
    fn task_type(&self) -> TaskType;
    fn state(&self) -> ControllerState;

    /// Checks the driver and starts manual mode.
    fn init(&mut self) -> Result<(), WorkerError>;

    /// Stops and clears whatever task is open. The worker cannot be used afterwards.
    fn shutdown(&mut self) -> Result<(), WorkerError>;

    /// Outputs one value per channel.
    ///
    /// Returns the values the hardware coerced the request to. The boards do not report coercion, so
    /// the map is always empty.
    fn program_manual(&mut self, values: &FrontPanelValues) -> Result<FrontPanelValues, WorkerError>;

    /// Programs the shot's data for `device_name` and arms it on the external clock.
    ///
    /// `initial_values` are the front-panel values before the shot, restored if it is aborted.
    /// `fresh` asks for a full reprogram; every transition already is one, so it is ignored.
    fn transition_to_buffered(
        &mut self,
        device_name: &str,
        shot: &Shot,
        initial_values: &FrontPanelValues,
        fresh: bool,
    ) -> Result<FrontPanelValues, WorkerError>;

    /// Returns to manual mode. With `abort`, the buffered task is not stopped (it may not have
    /// finished) and the initial values are written back.
    fn transition_to_manual(&mut self, abort: bool) -> Result<bool, WorkerError>;

    fn abort_transition_to_buffered(&mut self) -> Result<bool, WorkerError> {
        self.transition_to_manual(true)
    }

    fn abort_buffered(&mut self) -> Result<bool, WorkerError> {
        self.transition_to_manual(true)
    }
}

impl<D: DaqDriver, B: OutputBoard> Worker for TaskController<D, B> {
    fn device_name(&self) -> &str {
        self.board.device_name()
    }

    fn task_type(&self) -> TaskType {
        self.board.task_type()
    }

    fn state(&self) -> ControllerState {
        self.state
    }

    fn init(&mut self) -> Result<(), WorkerError> {
        self.require("init", &[ControllerState::Uninitialized])?;
        self.board.check_driver(&self.driver)?;
        self.open_static()?;
        info!(
            "{}: manual mode on {} channels of {}",
            self.board.device_name(),
            self.board.channel_names().len(),
            self.board.connection()
        );
        Ok(())
    }

    fn shutdown(&mut self) -> Result<(), WorkerError> {
        let closed = self.close_task(true);
        self.state = ControllerState::Shutdown;
        info!("{}: shut down", self.board.device_name());
        closed
    }

    fn program_manual(&mut self, values: &FrontPanelValues) -> Result<FrontPanelValues, WorkerError> {
        self.require("program manual values", &[ControllerState::StaticRunning])?;
        self.write_static(values)?;
        debug!("{}: programmed {} manual values", self.board.device_name(), values.len());
        Ok(FrontPanelValues::new())
    }

    fn transition_to_buffered(
        &mut self,
        device_name: &str,
        shot: &Shot,
        initial_values: &FrontPanelValues,
        _fresh: bool,
    ) -> Result<FrontPanelValues, WorkerError> {
        self.require("transition to buffered", &[ControllerState::StaticRunning])?;
        let mut timer = TickTimer::new();
        self.initial_values = initial_values.clone();

        let board_shot = shot
            .device(device_name)
            .ok_or_else(|| WorkerError::MissingDevice(device_name.to_string()))?;
        let plan = self.board.plan_buffered(board_shot)?;
        timer.tick_log(&format!("{} plan", device_name));

        self.close_task(true)?;
        let Some(plan) = plan else {
            info!("{}: no output this shot", device_name);
            return Ok(FrontPanelValues::new());
        };

        let created = self.driver.create_task(&format!("{}_buffered", device_name))?;
        self.state = ControllerState::BufferedRunning;
        let task = self.task.insert(OpenTask::Buffered(created)).get_mut();
        self.board.create_buffered_channels(task, &plan.channels)?;
        task.cfg_samp_clk_timing(&plan.clock_terminal, plan.sample_rate, plan.samples as u64)?;
        match &plan.buffer {
            SampleBuffer::Analog(data) => {
                task.write_analog_f64(plan.samples, false, BUFFERED_WRITE_TIMEOUT, DataLayout::GroupByScanNumber, data)?
            }
            SampleBuffer::Digital(data) => {
                task.write_digital_lines(plan.samples, false, BUFFERED_WRITE_TIMEOUT, DataLayout::GroupByScanNumber, data)?
            }
        };
        task.start()?;
        timer.tick_log(&format!("{} cfg (channels, clock, write, start)", device_name));
        info!(
            "{}: armed {} samples at {} Hz on {}",
            device_name, plan.samples, plan.sample_rate, plan.clock_terminal
        );
        Ok(plan.final_values)
    }

    fn transition_to_manual(&mut self, abort: bool) -> Result<bool, WorkerError> {
        self.require(
            "transition to manual",
            &[
                ControllerState::StaticRunning,
                ControllerState::Idle,
                ControllerState::BufferedRunning,
                ControllerState::Aborting,
            ],
        )?;
        if abort {
            warn!("{}: aborting, restoring manual mode", self.board.device_name());
            // The buffered task may still be generating, where stopping fails.
            let closed = self.close_task(false);
            self.state = ControllerState::Aborting;
            closed?;
        } else {
            self.close_task(true)?;
        }

        self.open_static()?;
        if abort {
            if self.initial_values.is_empty() {
                debug!("{}: no initial values to restore", self.board.device_name());
            } else {
                let values = self.initial_values.clone();
                self.write_static(&values)?;
            }
        }
        info!("{}: back in manual mode", self.board.device_name());
        Ok(true)
    }
}
