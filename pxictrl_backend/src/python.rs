//! Python classes exposing the board workers to the host framework.
//!
//! `NiPXI6733Worker` and `NiPXIe6535Worker` carry the worker hooks under the names the host calls
//! them by. Shots are passed as the path of a JSON file written by `pxicompiler_backend`.

use numpy::{PyArray2, PyReadonlyArray1};
use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use std::collections::HashMap;

use pxicompiler_backend::{unpack_bitfield, Shot};

use crate::board::{AnalogBoard, DigitalBoard};
use crate::controller::TaskController;
use crate::nidaqmx::NiDaqmx;
use crate::worker::Worker;

fn to_py_err(err: impl std::fmt::Display) -> PyErr {
    PyRuntimeError::new_err(err.to_string())
}

macro_rules! impl_worker_boilerplate {
    ($py_type: ty) => {
        #[pymethods]
        impl $py_type {
            #[getter]
            fn device_name(&self) -> String {
                Worker::device_name(&self.inner).to_string()
            }

            #[getter]
            fn state(&self) -> String {
                format!("{:?}", Worker::state(&self.inner))
            }

            fn init(&mut self) -> PyResult<()> {
                Worker::init(&mut self.inner).map_err(to_py_err)
            }

            fn shutdown(&mut self) -> PyResult<()> {
                Worker::shutdown(&mut self.inner).map_err(to_py_err)
            }

            fn program_manual(&mut self, front_panel_values: HashMap<String, f64>) -> PyResult<HashMap<String, f64>> {
                Worker::program_manual(&mut self.inner, &front_panel_values).map_err(to_py_err)
            }

            #[pyo3(signature = (device_name, shot_file, initial_values, fresh=false))]
            fn transition_to_buffered(
                &mut self,
                device_name: &str,
                shot_file: &str,
                initial_values: HashMap<String, f64>,
                fresh: bool,
            ) -> PyResult<HashMap<String, f64>> {
                let shot = Shot::load(shot_file).map_err(to_py_err)?;
                Worker::transition_to_buffered(&mut self.inner, device_name, &shot, &initial_values, fresh)
                    .map_err(to_py_err)
            }

            #[pyo3(signature = (abort=false))]
            fn transition_to_manual(&mut self, abort: bool) -> PyResult<bool> {
                Worker::transition_to_manual(&mut self.inner, abort).map_err(to_py_err)
            }

            fn abort_transition_to_buffered(&mut self) -> PyResult<bool> {
                Worker::abort_transition_to_buffered(&mut self.inner).map_err(to_py_err)
            }

            fn abort_buffered(&mut self) -> PyResult<bool> {
                Worker::abort_buffered(&mut self.inner).map_err(to_py_err)
            }
        }
    };
}

/// Worker of an NI PXI-6733 analog output board.
#[pyclass(unsendable, name = "NiPXI6733Worker")]
pub struct PyAnalogWorker {
    inner: TaskController<NiDaqmx, AnalogBoard>,
}

impl_worker_boilerplate!(PyAnalogWorker);

#[pymethods]
impl PyAnalogWorker {
    /// Fails for an odd `num_ao`, before any task is created.
    #[new]
    #[pyo3(signature = (device_name, connection, num_ao=8, limits=(-10.0, 10.0)))]
    fn new(device_name: &str, connection: &str, num_ao: usize, limits: (f64, f64)) -> PyResult<Self> {
        let board = AnalogBoard::new(device_name, connection, num_ao, limits).map_err(to_py_err)?;
        Ok(Self {
            inner: TaskController::new(NiDaqmx, board),
        })
    }
}

/// Worker of an NI PXIe-6535 digital output board.
#[pyclass(unsendable, name = "NiPXIe6535Worker")]
pub struct PyDigitalWorker {
    inner: TaskController<NiDaqmx, DigitalBoard>,
}

impl_worker_boilerplate!(PyDigitalWorker);

#[pymethods]
impl PyDigitalWorker {
    #[new]
    #[pyo3(signature = (device_name, connection, num_ports=4))]
    fn new(device_name: &str, connection: &str, num_ports: usize) -> PyResult<Self> {
        let board = DigitalBoard::new(device_name, connection, num_ports, 8).map_err(to_py_err)?;
        Ok(Self {
            inner: TaskController::new(NiDaqmx, board),
        })
    }

    /// One row per packed word, column `i` holding bit `i`.
    #[staticmethod]
    fn unpack_bitfield<'py>(
        py: Python<'py>,
        bitfield: PyReadonlyArray1<u32>,
        num_lines: usize,
    ) -> PyResult<&'py PyArray2<u8>> {
        let unpacked = unpack_bitfield(&bitfield.as_array().to_owned(), num_lines).map_err(to_py_err)?;
        Ok(PyArray2::from_owned_array(py, unpacked))
    }
}

#[pymodule]
fn pxictrl_backend(_py: Python, m: &PyModule) -> PyResult<()> {
    m.add_class::<PyAnalogWorker>()?;
    m.add_class::<PyDigitalWorker>()?;
    Ok(())
}
