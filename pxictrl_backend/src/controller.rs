//! The task controller shared by both board workers.
//!
//! A [`TaskController`] owns at most one open DAQmx task on its board's channel set:
//!
//! - a *static* task in manual mode, one sample per channel, reprogrammed on demand,
//! - a *buffered* task during a shot, a finite sequence clocked from an external terminal,
//! - nothing at all between tearing one down and creating the other, or after a shot without data.
//!
//! ```text
//! Uninitialized --init--> StaticRunning --transition_to_buffered--> BufferedRunning
//!                              ^      \                                   |
//!                              |       `--(no table)--> Idle              |
//!                              `-------- transition_to_manual <-----------'
//! ```
//!
//! The hooks the host calls are implemented in [`crate::worker`]; this module holds the state and
//! the task bookkeeping they share.
//!
//! A task is handed to the controller as soon as the driver creates it and only then configured.
//! If configuration fails half way, the task is still owned here and the next teardown (usually
//! the abort path) clears it, releasing its channels.

use tracing::{debug, warn};

use crate::board::{FrontPanelValues, OutputBoard};
use crate::driver::*;
use crate::error::WorkerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Uninitialized,
    StaticRunning,
    /// No task open: a shot without data for this board.
    Idle,
    BufferedRunning,
    /// Tearing down after an abort, until the static task is back.
    Aborting,
    Shutdown,
}

pub(crate) enum OpenTask<T> {
    Static(T),
    Buffered(T),
}

impl<T> OpenTask<T> {
    pub(crate) fn get_mut(&mut self) -> &mut T {
        match self {
            OpenTask::Static(task) | OpenTask::Buffered(task) => task,
        }
    }

    fn into_inner(self) -> T {
        match self {
            OpenTask::Static(task) | OpenTask::Buffered(task) => task,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            OpenTask::Static(_) => "static",
            OpenTask::Buffered(_) => "buffered",
        }
    }
}

/// Mode-transition state machine of one output board.
pub struct TaskController<D: DaqDriver, B: OutputBoard> {
    pub(crate) driver: D,
    pub(crate) board: B,
    pub(crate) task: Option<OpenTask<D::Task>>,
    pub(crate) state: ControllerState,
    pub(crate) initial_values: FrontPanelValues,
}

impl<D: DaqDriver, B: OutputBoard> TaskController<D, B> {
    pub fn new(driver: D, board: B) -> Self {
        Self {
            driver,
            board,
            task: None,
            state: ControllerState::Uninitialized,
            initial_values: FrontPanelValues::new(),
        }
    }

    pub fn state(&self) -> ControllerState {
        self.state
    }

    pub fn board(&self) -> &B {
        &self.board
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    /// Front-panel values captured by the last buffered transition.
    pub fn initial_values(&self) -> &FrontPanelValues {
        &self.initial_values
    }

    pub fn has_open_task(&self) -> bool {
        self.task.is_some()
    }

    pub(crate) fn require(&self, operation: &'static str, allowed: &[ControllerState]) -> Result<(), WorkerError> {
        if allowed.contains(&self.state) {
            return Ok(());
        }
        Err(WorkerError::InvalidState {
            device: self.board.device_name().to_string(),
            operation,
            state: self.state,
        })
    }

    /// Tears down the open task, if any. The task is cleared even when stopping it fails; the stop
    /// error is then returned. Leaves the controller `Idle`.
    pub(crate) fn close_task(&mut self, stop: bool) -> Result<(), WorkerError> {
        let Some(open) = self.task.take() else {
            return Ok(());
        };
        let kind = open.kind();
        let mut task = open.into_inner();
        let stopped = if stop { task.stop() } else { Ok(()) };
        if let Err(err) = &stopped {
            warn!("{}: stopping {} task failed, clearing anyway: {}", self.board.device_name(), kind, err);
        }
        let cleared = task.clear();
        debug!("{}: {} task closed", self.board.device_name(), kind);
        self.state = ControllerState::Idle;
        stopped?;
        cleared?;
        Ok(())
    }

    /// Creates and starts the static task over the full channel set.
    pub(crate) fn open_static(&mut self) -> Result<(), WorkerError> {
        let name = format!("{}_static", self.board.device_name());
        let created = self.driver.create_task(&name)?;
        self.state = ControllerState::StaticRunning;
        let task = self.task.insert(OpenTask::Static(created)).get_mut();
        self.board.create_static_channels(task)?;
        task.start()?;
        Ok(())
    }

    /// Writes one sample per channel to the static task.
    pub(crate) fn write_static(&mut self, values: &FrontPanelValues) -> Result<(), WorkerError> {
        match self.task.as_mut() {
            Some(OpenTask::Static(task)) => self.board.write_manual(task, values),
            _ => Err(WorkerError::InvalidState {
                device: self.board.device_name().to_string(),
                operation: "write front panel values",
                state: self.state,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::AnalogBoard;
    use crate::sim::*;

    fn controller() -> (SimDriver, TaskController<SimDriver, AnalogBoard>) {
        let sim = SimDriver::new(DriverVersion::new(20, 1, 0));
        let board = AnalogBoard::new("ao_board", "Dev2", 2, (-10.0, 10.0)).unwrap();
        (sim.clone(), TaskController::new(sim, board))
    }

    #[test]
    fn failed_stop_still_clears() {
        let (sim, mut ctrl) = controller();
        ctrl.open_static().unwrap();
        sim.fail_next(SimOp::Stop, ERR_STOPPED_BEFORE_DONE);
        let err = ctrl.close_task(true).unwrap_err();
        assert_eq!(err.daqmx_code(), Some(ERR_STOPPED_BEFORE_DONE));
        assert_eq!(sim.open_tasks(), 0);
        assert_eq!(sim.owner("Dev2/ao0"), None);
        assert_eq!(ctrl.state(), ControllerState::Idle);
        assert!(!ctrl.has_open_task());
    }

    #[test]
    fn half_configured_task_stays_owned() {
        let (sim, mut ctrl) = controller();
        sim.fail_next(SimOp::Start, -200000);
        assert!(ctrl.open_static().is_err());
        assert!(ctrl.has_open_task());
        assert_eq!(sim.open_tasks(), 1);

        ctrl.close_task(false).unwrap();
        assert_eq!(sim.open_tasks(), 0);
        assert_eq!(sim.ops().last(), Some(&SimOp::Clear));
    }

    #[test]
    fn closing_nothing_is_a_no_op() {
        let (sim, mut ctrl) = controller();
        ctrl.close_task(true).unwrap();
        assert!(sim.ops().is_empty());
        assert_eq!(ctrl.state(), ControllerState::Uninitialized);
    }
}
