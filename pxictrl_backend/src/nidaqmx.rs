//! Provides a minimal rust wrapper for the parts of the NI-DAQmx C library used by the workers.
//!
//! ## Overview
//!
//! [`NiTask`] encapsulates a handle to an NI-DAQmx task and implements [`DaqTask`] by mapping each
//! method to the DAQmx C-function of the same name. [`NiDaqmx`] implements [`DaqDriver`]: it creates
//! tasks and reports the installed driver version.
//!
//! ## Safety and Error Handling
//!
//! Every DAQmx C-function returns an `int32` which, if negative, indicates an error. [`daqmx_call`]
//! wraps such calls, fetches the extended error info with `DAQmxGetExtendedErrorInfo`, logs it and
//! returns it as a [`DaqmxError`]. Nothing in this module panics on driver errors.
//!
//! ## Cleanup and Resource Management
//!
//! [`DaqTask::clear`] consumes the task. A `NiTask` dropped without being cleared clears itself
//! in `Drop`, logging (not propagating) any error.
//!
//! Only compiled with the `nidaqmx` feature, since it links against `NIDAQmx`.
//!
//! For more details on the driver refer to the
//! [NI-DAQmx C Reference](https://www.ni.com/docs/en-US/bundle/ni-daqmx-c-api-ref/page/cdaqmx/help_file_title.html).

use std::ffi::{CStr, CString};
use tracing::{debug, error, warn};

use crate::driver::*;

type CConstStr = *const libc::c_char;
type CCharBuf = *mut libc::c_char;
type CFloat64 = libc::c_double;
type CUint32 = libc::c_uint;
type CUint64 = libc::c_ulonglong;
type CBool32 = libc::c_uint;
type CInt32 = libc::c_int;
pub type TaskHandle = *mut libc::c_void;

/// Status used for arguments rejected before reaching the driver.
pub const ERR_INVALID_ARGUMENT: i32 = -1;

#[link(name = "NIDAQmx")]
extern "C" {
    fn DAQmxGetExtendedErrorInfo(errorString: CCharBuf, bufferSize: CUint32) -> CInt32;
    fn DAQmxGetSysNIDAQMajorVersion(data: *mut CUint32) -> CInt32;
    fn DAQmxGetSysNIDAQMinorVersion(data: *mut CUint32) -> CInt32;
    fn DAQmxGetSysNIDAQUpdateVersion(data: *mut CUint32) -> CInt32;

    fn DAQmxCreateTask(taskName: CConstStr, taskHandle_ptr: &mut TaskHandle) -> CInt32;
    fn DAQmxStartTask(handle: TaskHandle) -> CInt32;
    fn DAQmxStopTask(handle: TaskHandle) -> CInt32;
    fn DAQmxClearTask(handle: TaskHandle) -> CInt32;

    fn DAQmxCfgSampClkTiming(
        handle: TaskHandle,
        src: CConstStr,
        rate: CFloat64,
        activeEdge: CInt32,
        sampleMode: CInt32,
        sampsPerChan: CUint64,
    ) -> CInt32;

    fn DAQmxCreateAOVoltageChan(
        handle: TaskHandle,
        name: CConstStr,
        assigned_name: CConstStr,
        minVal: CFloat64,
        maxVal: CFloat64,
        units: CInt32,
        customScaleName: CConstStr,
    ) -> CInt32;
    fn DAQmxCreateDOChan(
        handle: TaskHandle,
        lines: CConstStr,
        name: CConstStr,
        lineGrouping: CInt32,
    ) -> CInt32;

    fn DAQmxWriteDigitalLines(
        handle: TaskHandle,
        seqLen: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const u8,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
    fn DAQmxWriteAnalogF64(
        handle: TaskHandle,
        seqLen: CInt32,
        autoStart: CBool32,
        timeout: CFloat64,
        dataLayout: CBool32,
        writeArray: *const CFloat64,
        sampsPerChanWritten: *mut CInt32,
        reserved: *mut CBool32,
    ) -> CInt32;
}

/// Calls a DAQmx C-function and converts a negative status into a [`DaqmxError`].
///
/// The extended error info is fetched right away, since DAQmx only keeps it for the last failing
/// call of the thread.
pub fn daqmx_call<F: FnOnce() -> CInt32>(func: F) -> Result<(), DaqmxError> {
    let err_code = func();
    if err_code < 0 {
        let mut err_buff = [0 as libc::c_char; 2048];
        unsafe {
            DAQmxGetExtendedErrorInfo(err_buff.as_mut_ptr(), 2048 as CUint32);
        }
        let error_string = unsafe { CStr::from_ptr(err_buff.as_ptr()) }
            .to_string_lossy()
            .into_owned();
        error!("DAQmx Error {}: {}", err_code, error_string);
        return Err(DaqmxError::new(err_code, error_string));
    }
    Ok(())
}

fn cstring(s: &str) -> Result<CString, DaqmxError> {
    CString::new(s).map_err(|_| DaqmxError::new(ERR_INVALID_ARGUMENT, format!("{:?} contains a NUL byte", s)))
}

fn checked_len(len: usize) -> Result<CInt32, DaqmxError> {
    CInt32::try_from(len).map_err(|_| DaqmxError::new(ERR_INVALID_ARGUMENT, format!("{} samples do not fit a DAQmx write", len)))
}

/// Represents a National Instruments (NI) DAQmx task.
pub struct NiTask {
    handle: TaskHandle,
}

impl NiTask {
    pub fn new(name: &str) -> Result<Self, DaqmxError> {
        let mut taskhandle: TaskHandle = std::ptr::null_mut();
        let task_name_cstr = cstring(name)?;
        daqmx_call(|| unsafe { DAQmxCreateTask(task_name_cstr.as_ptr(), &mut taskhandle) })?;
        Ok(Self { handle: taskhandle })
    }
}

impl DaqTask for NiTask {
    fn create_ao_voltage_chan(&mut self, physical: &str, min: f64, max: f64) -> Result<(), DaqmxError> {
        let name_cstr = cstring(physical)?;
        let assigned_name_cstr = cstring("")?;
        daqmx_call(|| unsafe {
            DAQmxCreateAOVoltageChan(
                self.handle,
                name_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                min as CFloat64,
                max as CFloat64,
                DAQMX_VAL_VOLTS,
                std::ptr::null(),
            )
        })
    }

    fn create_do_chan(&mut self, lines: &str) -> Result<(), DaqmxError> {
        let lines_cstr = cstring(lines)?;
        let assigned_name_cstr = cstring("")?;
        daqmx_call(|| unsafe {
            DAQmxCreateDOChan(
                self.handle,
                lines_cstr.as_ptr(),
                assigned_name_cstr.as_ptr(),
                DAQMX_VAL_CHANPERLINE,
            )
        })
    }

    fn cfg_samp_clk_timing(&mut self, source: &str, rate: f64, samps_per_chan: u64) -> Result<(), DaqmxError> {
        let src_cstring = cstring(source)?;
        daqmx_call(|| unsafe {
            DAQmxCfgSampClkTiming(
                self.handle,
                src_cstring.as_ptr(),
                rate as CFloat64,
                DAQMX_VAL_RISING,
                DAQMX_VAL_FINITESAMPS,
                samps_per_chan as CUint64,
            )
        })
    }

    fn write_analog_f64(
        &mut self,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        layout: DataLayout,
        data: &[f64],
    ) -> Result<usize, DaqmxError> {
        let seq_len = checked_len(samps_per_chan)?;
        let mut nwritten: CInt32 = 0;
        daqmx_call(|| unsafe {
            DAQmxWriteAnalogF64(
                self.handle,
                seq_len,
                auto_start as CBool32,
                timeout as CFloat64,
                layout.raw() as CBool32,
                data.as_ptr(),
                &mut nwritten as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nwritten as usize)
    }

    fn write_digital_lines(
        &mut self,
        samps_per_chan: usize,
        auto_start: bool,
        timeout: f64,
        layout: DataLayout,
        data: &[u8],
    ) -> Result<usize, DaqmxError> {
        let seq_len = checked_len(samps_per_chan)?;
        let mut nwritten: CInt32 = 0;
        daqmx_call(|| unsafe {
            DAQmxWriteDigitalLines(
                self.handle,
                seq_len,
                auto_start as CBool32,
                timeout as CFloat64,
                layout.raw() as CBool32,
                data.as_ptr(),
                &mut nwritten as *mut CInt32,
                std::ptr::null_mut(),
            )
        })?;
        Ok(nwritten as usize)
    }

    fn start(&mut self) -> Result<(), DaqmxError> {
        daqmx_call(|| unsafe { DAQmxStartTask(self.handle) })
    }

    fn stop(&mut self) -> Result<(), DaqmxError> {
        daqmx_call(|| unsafe { DAQmxStopTask(self.handle) })
    }

    fn clear(mut self) -> Result<(), DaqmxError> {
        let handle = std::mem::replace(&mut self.handle, std::ptr::null_mut());
        debug!("clearing DAQmx task {:?}", handle);
        daqmx_call(|| unsafe { DAQmxClearTask(handle) })
    }
}

// Define deletion behavior
impl Drop for NiTask {
    fn drop(&mut self) {
        if self.handle.is_null() {
            return;
        }
        if let Err(err) = daqmx_call(|| unsafe { DAQmxClearTask(self.handle) }) {
            warn!("failed to clear dropped DAQmx task: {}", err);
        }
    }
}

/// The NI-DAQmx C library as a [`DaqDriver`].
#[derive(Clone, Copy, Debug, Default)]
pub struct NiDaqmx;

impl DaqDriver for NiDaqmx {
    type Task = NiTask;

    fn create_task(&self, name: &str) -> Result<NiTask, DaqmxError> {
        NiTask::new(name)
    }

    fn driver_version(&self) -> Result<DriverVersion, DaqmxError> {
        let mut major: CUint32 = 0;
        let mut minor: CUint32 = 0;
        let mut update: CUint32 = 0;
        daqmx_call(|| unsafe { DAQmxGetSysNIDAQMajorVersion(&mut major) })?;
        daqmx_call(|| unsafe { DAQmxGetSysNIDAQMinorVersion(&mut minor) })?;
        daqmx_call(|| unsafe { DAQmxGetSysNIDAQUpdateVersion(&mut update) })?;
        Ok(DriverVersion::new(major, minor, update))
    }
}
