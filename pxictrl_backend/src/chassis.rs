//! Sequencing several board workers through one shot.
//!
//! The analog board is clocked from a terminal that the digital board's static task holds while it
//! is in manual mode. The order of transitions therefore matters:
//!
//! - into buffered mode, digital workers go first, so their static tasks release the terminal
//!   before an analog worker configures its sample clock on it;
//! - back into manual mode (and on aborts and shutdown), analog workers go first, so no analog task
//!   is clocked from the terminal when a digital static task claims the line again.
//!
//! Within each kind, workers keep their registration order.

use indexmap::IndexMap;
use std::collections::HashMap;
use tracing::{error, info, warn};

use pxicompiler_backend::{Model, Shot, TaskType};

use crate::board::FrontPanelValues;
use crate::config::ChassisConfig;
use crate::controller::TaskController;
use crate::driver::DaqDriver;
use crate::error::{ConfigError, WorkerError};
use crate::worker::Worker;

#[derive(Default)]
pub struct Chassis {
    workers: IndexMap<String, Box<dyn Worker>>,
}

impl Chassis {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds one worker per configured board. `driver_for` hands each board its driver handle.
    pub fn from_config<D, F>(config: &ChassisConfig, driver_for: F) -> Result<Self, ConfigError>
    where
        D: DaqDriver + 'static,
        F: Fn(&str) -> D,
    {
        config.validate()?;
        let mut chassis = Self::new();
        for board in &config.boards {
            let driver = driver_for(&board.name);
            let worker: Box<dyn Worker> = match board.model {
                Model::Pxi6733 => Box::new(TaskController::new(driver, board.analog_board()?)),
                Model::Pxie6535 => Box::new(TaskController::new(driver, board.digital_board()?)),
            };
            chassis.add_worker(worker)?;
        }
        Ok(chassis)
    }

    pub fn add_worker(&mut self, worker: Box<dyn Worker>) -> Result<(), ConfigError> {
        let name = worker.device_name().to_string();
        if self.workers.contains_key(&name) {
            return Err(ConfigError::DuplicateBoard(name));
        }
        self.workers.insert(name, worker);
        Ok(())
    }

    pub fn worker(&self, name: &str) -> Option<&dyn Worker> {
        self.workers.get(name).map(|w| &**w)
    }

    pub fn worker_mut(&mut self, name: &str) -> Option<&mut Box<dyn Worker>> {
        self.workers.get_mut(name)
    }

    pub fn device_names(&self) -> Vec<String> {
        self.workers.keys().cloned().collect()
    }

    /// Device names in the order they enter buffered mode.
    pub fn buffered_order(&self) -> Vec<String> {
        let of_type = |task_type: TaskType| {
            self.workers
                .values()
                .filter(move |w| w.task_type() == task_type)
                .map(|w| w.device_name().to_string())
        };
        of_type(TaskType::DO).chain(of_type(TaskType::AO)).collect()
    }

    /// Device names in the order they return to manual mode.
    pub fn manual_order(&self) -> Vec<String> {
        let mut order = self.buffered_order();
        order.reverse();
        order
    }

    pub fn init(&mut self) -> Result<(), WorkerError> {
        for name in self.buffered_order() {
            if let Some(worker) = self.workers.get_mut(&name) {
                worker.init()?;
            }
        }
        info!("chassis: {} workers in manual mode", self.workers.len());
        Ok(())
    }

    /// Arms every worker for `shot`. On failure every worker already touched, the failing one
    /// included, is aborted back to manual mode and the original error is returned.
    pub fn transition_to_buffered(
        &mut self,
        shot: &Shot,
        initial_values: &HashMap<String, FrontPanelValues>,
    ) -> Result<HashMap<String, FrontPanelValues>, WorkerError> {
        let empty = FrontPanelValues::new();
        let mut final_values = HashMap::new();
        let mut touched = Vec::new();
        for name in self.buffered_order() {
            let Some(worker) = self.workers.get_mut(&name) else {
                continue;
            };
            touched.push(name.clone());
            let initial = initial_values.get(&name).unwrap_or(&empty);
            match worker.transition_to_buffered(&name, shot, initial, true) {
                Ok(values) => {
                    final_values.insert(name, values);
                }
                Err(err) => {
                    error!("chassis: {} failed to enter buffered mode: {}", name, err);
                    self.abort_workers(&touched);
                    return Err(err);
                }
            }
        }
        Ok(final_values)
    }

    fn abort_workers(&mut self, names: &[String]) {
        for name in names.iter().rev() {
            if let Some(worker) = self.workers.get_mut(name) {
                if let Err(err) = worker.abort_transition_to_buffered() {
                    warn!("chassis: aborting {} failed: {}", name, err);
                }
            }
        }
    }

    pub fn transition_to_manual(&mut self, abort: bool) -> Result<bool, WorkerError> {
        self.for_each_manual_order("transition to manual", |w| w.transition_to_manual(abort).map(|_| ()))?;
        Ok(true)
    }

    pub fn abort_buffered(&mut self) -> Result<bool, WorkerError> {
        self.for_each_manual_order("abort", |w| w.abort_buffered().map(|_| ()))?;
        Ok(true)
    }

    pub fn shutdown(&mut self) -> Result<(), WorkerError> {
        self.for_each_manual_order("shut down", |w| w.shutdown())
    }

    /// Runs `op` on every worker even when some fail; returns the first error.
    fn for_each_manual_order<F>(&mut self, operation: &str, mut op: F) -> Result<(), WorkerError>
    where
        F: FnMut(&mut dyn Worker) -> Result<(), WorkerError>,
    {
        let mut first_err = None;
        for name in self.manual_order() {
            let Some(worker) = self.workers.get_mut(&name) else {
                continue;
            };
            if let Err(err) = op(&mut **worker) {
                error!("chassis: {} failed to {}: {}", name, operation, err);
                first_err.get_or_insert(err);
            }
        }
        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
