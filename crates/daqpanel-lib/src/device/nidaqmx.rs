//! NI-DAQmx backend. The driver library is resolved at run time so the rest
//! of the workspace builds and runs on machines without the NI runtime.
//!
//! Reads are software timed: every scan performs one on-demand read per task
//! and the acquisition loop provides the pacing.

use libloading::{Library, Symbol};
use log::{debug, info, warn};
use std::ffi::{c_char, c_void, CStr, CString};

use super::{DaqDevice, DeviceInfo};
use crate::channel::AnalogMode;
use crate::config::ChannelPlan;
use crate::error::{DaqError, Result};

#[cfg(windows)]
const LIBRARY_NAME: &str = "nicaiu.dll";
#[cfg(not(windows))]
const LIBRARY_NAME: &str = "libnidaqmx.so";

type TaskHandle = usize;

const DAQMX_VAL_RSE: i32 = 10083;
const DAQMX_VAL_DIFF: i32 = 10106;
const DAQMX_VAL_VOLTS: i32 = 10348;
const DAQMX_VAL_CHAN_PER_LINE: i32 = 0;
const DAQMX_VAL_GROUP_BY_SCAN_NUMBER: u32 = 1;
const READ_TIMEOUT_S: f64 = 10.0;
const WRITE_TIMEOUT_S: f64 = 10.0;
const AI_MIN_V: f64 = -10.0;
const AI_MAX_V: f64 = 10.0;

type FnCreateTask = unsafe extern "C" fn(name: *const c_char, task: *mut TaskHandle) -> i32;
type FnTask = unsafe extern "C" fn(task: TaskHandle) -> i32;
type FnCreateAIVoltageChan = unsafe extern "C" fn(
    task: TaskHandle,
    physical_channel: *const c_char,
    name_to_assign: *const c_char,
    terminal_config: i32,
    min_val: f64,
    max_val: f64,
    units: i32,
    custom_scale_name: *const c_char,
) -> i32;
type FnCreateDigitalChan = unsafe extern "C" fn(
    task: TaskHandle,
    lines: *const c_char,
    name_to_assign: *const c_char,
    line_grouping: i32,
) -> i32;
type FnReadAnalogF64 = unsafe extern "C" fn(
    task: TaskHandle,
    samps_per_chan: i32,
    timeout: f64,
    fill_mode: u32,
    read_array: *mut f64,
    array_size_in_samps: u32,
    samps_per_chan_read: *mut i32,
    reserved: *mut c_void,
) -> i32;
type FnReadDigitalLines = unsafe extern "C" fn(
    task: TaskHandle,
    samps_per_chan: i32,
    timeout: f64,
    fill_mode: u32,
    read_array: *mut u8,
    array_size_in_bytes: u32,
    samps_per_chan_read: *mut i32,
    num_bytes_per_samp: *mut i32,
    reserved: *mut c_void,
) -> i32;
type FnWriteDigitalLines = unsafe extern "C" fn(
    task: TaskHandle,
    samps_per_chan: i32,
    auto_start: u32,
    timeout: f64,
    data_layout: u32,
    write_array: *const u8,
    samps_per_chan_written: *mut i32,
    reserved: *mut c_void,
) -> i32;
type FnGetString = unsafe extern "C" fn(buffer: *mut c_char, buffer_size: u32) -> i32;
type FnGetDeviceString =
    unsafe extern "C" fn(device: *const c_char, buffer: *mut c_char, buffer_size: u32) -> i32;

struct Api {
    _lib: Library,
    create_task: FnCreateTask,
    start_task: FnTask,
    stop_task: FnTask,
    clear_task: FnTask,
    create_ai_voltage_chan: FnCreateAIVoltageChan,
    create_di_chan: FnCreateDigitalChan,
    create_do_chan: FnCreateDigitalChan,
    read_analog_f64: FnReadAnalogF64,
    read_digital_lines: FnReadDigitalLines,
    write_digital_lines: FnWriteDigitalLines,
    get_sys_dev_names: FnGetString,
    get_extended_error_info: FnGetString,
    get_dev_product_type: FnGetDeviceString,
    get_dev_ai_physical_chans: FnGetDeviceString,
    get_dev_ao_physical_chans: FnGetDeviceString,
    get_dev_di_ports: FnGetDeviceString,
    get_dev_do_ports: FnGetDeviceString,
    get_dev_di_lines: FnGetDeviceString,
}

impl Api {
    fn load() -> Result<Self> {
        // SAFETY: loading the vendor runtime runs its initialisers; the symbols
        // below are declared with the signatures from NIDAQmx.h.
        unsafe {
            let lib = Library::new(LIBRARY_NAME).map_err(|e| {
                DaqError::BackendUnavailable(format!("failed to load {LIBRARY_NAME}: {e}"))
            })?;
            macro_rules! sym {
                ($t:ty, $name:expr) => {{
                    let s: Symbol<$t> = lib.get($name).map_err(|e| {
                        DaqError::BackendUnavailable(format!(
                            "missing symbol {}: {e}",
                            String::from_utf8_lossy(&$name[..$name.len() - 1])
                        ))
                    })?;
                    *s
                }};
            }
            Ok(Self {
                create_task: sym!(FnCreateTask, b"DAQmxCreateTask\0"),
                start_task: sym!(FnTask, b"DAQmxStartTask\0"),
                stop_task: sym!(FnTask, b"DAQmxStopTask\0"),
                clear_task: sym!(FnTask, b"DAQmxClearTask\0"),
                create_ai_voltage_chan: sym!(FnCreateAIVoltageChan, b"DAQmxCreateAIVoltageChan\0"),
                create_di_chan: sym!(FnCreateDigitalChan, b"DAQmxCreateDIChan\0"),
                create_do_chan: sym!(FnCreateDigitalChan, b"DAQmxCreateDOChan\0"),
                read_analog_f64: sym!(FnReadAnalogF64, b"DAQmxReadAnalogF64\0"),
                read_digital_lines: sym!(FnReadDigitalLines, b"DAQmxReadDigitalLines\0"),
                write_digital_lines: sym!(FnWriteDigitalLines, b"DAQmxWriteDigitalLines\0"),
                get_sys_dev_names: sym!(FnGetString, b"DAQmxGetSysDevNames\0"),
                get_extended_error_info: sym!(FnGetString, b"DAQmxGetExtendedErrorInfo\0"),
                get_dev_product_type: sym!(FnGetDeviceString, b"DAQmxGetDevProductType\0"),
                get_dev_ai_physical_chans: sym!(FnGetDeviceString, b"DAQmxGetDevAIPhysicalChans\0"),
                get_dev_ao_physical_chans: sym!(FnGetDeviceString, b"DAQmxGetDevAOPhysicalChans\0"),
                get_dev_di_ports: sym!(FnGetDeviceString, b"DAQmxGetDevDIPorts\0"),
                get_dev_do_ports: sym!(FnGetDeviceString, b"DAQmxGetDevDOPorts\0"),
                get_dev_di_lines: sym!(FnGetDeviceString, b"DAQmxGetDevDILines\0"),
                _lib: lib,
            })
        }
    }

    fn check(&self, code: i32) -> Result<()> {
        if code >= 0 {
            if code > 0 {
                debug!("NI-DAQmx warning {code}");
            }
            return Ok(());
        }
        let mut buf = vec![0 as c_char; 4096];
        // SAFETY: the buffer outlives the call and its length is passed along.
        let message = unsafe {
            (self.get_extended_error_info)(buf.as_mut_ptr(), buf.len() as u32);
            CStr::from_ptr(buf.as_ptr()).to_string_lossy().trim().to_string()
        };
        Err(DaqError::Driver { code, message })
    }

    fn sys_string(&self, f: FnGetString) -> Result<String> {
        let mut buf = vec![0 as c_char; 8192];
        // SAFETY: see `check`.
        unsafe {
            self.check(f(buf.as_mut_ptr(), buf.len() as u32))?;
            Ok(CStr::from_ptr(buf.as_ptr()).to_string_lossy().trim().to_string())
        }
    }

    fn device_string(&self, f: FnGetDeviceString, device: &str) -> Result<String> {
        let device = cstring(device)?;
        let mut buf = vec![0 as c_char; 8192];
        // SAFETY: see `check`.
        unsafe {
            self.check(f(device.as_ptr(), buf.as_mut_ptr(), buf.len() as u32))?;
            Ok(CStr::from_ptr(buf.as_ptr()).to_string_lossy().trim().to_string())
        }
    }

    fn create_task(&self) -> Result<TaskHandle> {
        let mut task: TaskHandle = 0;
        // SAFETY: `task` is a valid out pointer.
        self.check(unsafe { (self.create_task)(std::ptr::null(), &mut task) })?;
        Ok(task)
    }

    fn clear(&self, task: TaskHandle) {
        // SAFETY: `task` came from `create_task` and is cleared once.
        let code = unsafe { (self.clear_task)(task) };
        if let Err(err) = self.check(code) {
            warn!("clearing NI-DAQmx task failed: {err}");
        }
    }
}

fn cstring(s: &str) -> Result<CString> {
    CString::new(s).map_err(|_| DaqError::InvalidSetting(format!("interior NUL in '{s}'")))
}

fn count_list(list: &str) -> usize {
    list.split(',').filter(|item| !item.trim().is_empty()).count()
}

pub fn list_devices() -> Result<Vec<DeviceInfo>> {
    let api = Api::load()?;
    let names = api.sys_string(api.get_sys_dev_names)?;
    let mut devices = Vec::new();
    for name in names.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        devices.push(DeviceInfo {
            name: name.to_string(),
            product_type: api.device_string(api.get_dev_product_type, name)?,
            ai_channels: count_list(&api.device_string(api.get_dev_ai_physical_chans, name)?),
            ao_channels: count_list(&api.device_string(api.get_dev_ao_physical_chans, name)?),
            di_ports: count_list(&api.device_string(api.get_dev_di_ports, name)?),
            do_ports: count_list(&api.device_string(api.get_dev_do_ports, name)?),
            di_lines: count_list(&api.device_string(api.get_dev_di_lines, name)?),
        });
    }
    Ok(devices)
}

pub struct NiDaqmxDevice {
    api: Api,
    name: String,
    ai_task: Option<TaskHandle>,
    di_task: Option<TaskHandle>,
    do_task: Option<TaskHandle>,
    ai_count: usize,
    di_count: usize,
    do_lines: Vec<u8>,
    do_state: Vec<u8>,
    ai_buf: Vec<f64>,
    di_buf: Vec<u8>,
}

impl NiDaqmxDevice {
    pub fn open(device: &str) -> Result<Self> {
        let api = Api::load()?;
        let names = api.sys_string(api.get_sys_dev_names)?;
        if !names.split(',').any(|n| n.trim() == device) {
            return Err(DaqError::BackendUnavailable(format!(
                "device {device} not found (driver reports: {names})"
            )));
        }
        info!("Opened NI-DAQmx device {device}");
        Ok(Self {
            api,
            name: device.to_string(),
            ai_task: None,
            di_task: None,
            do_task: None,
            ai_count: 0,
            di_count: 0,
            do_lines: Vec::new(),
            do_state: Vec::new(),
            ai_buf: Vec::new(),
            di_buf: Vec::new(),
        })
    }

    fn clear_tasks(&mut self) {
        for task in [self.ai_task.take(), self.di_task.take(), self.do_task.take()]
            .into_iter()
            .flatten()
        {
            self.api.clear(task);
        }
    }

    fn line_name(&self, line: u8) -> String {
        format!("{}/port0/line{}", self.name, line)
    }

    fn build_tasks(&mut self, plan: &ChannelPlan) -> Result<()> {
        if !plan.analog_inputs.is_empty() {
            let task = self.api.create_task()?;
            self.ai_task = Some(task);
            for (n, mode) in &plan.analog_inputs {
                let terminal = match mode {
                    AnalogMode::Ground => DAQMX_VAL_RSE,
                    AnalogMode::Reference => DAQMX_VAL_DIFF,
                };
                let phys = cstring(&format!("{}/ai{}", self.name, n))?;
                // SAFETY: all pointers are valid NUL-terminated strings or null.
                self.api.check(unsafe {
                    (self.api.create_ai_voltage_chan)(
                        task,
                        phys.as_ptr(),
                        std::ptr::null(),
                        terminal,
                        AI_MIN_V,
                        AI_MAX_V,
                        DAQMX_VAL_VOLTS,
                        std::ptr::null(),
                    )
                })?;
            }
        }
        if !plan.digital_inputs.is_empty() {
            let task = self.api.create_task()?;
            self.di_task = Some(task);
            for line in &plan.digital_inputs {
                let lines = cstring(&self.line_name(*line))?;
                // SAFETY: see above.
                self.api.check(unsafe {
                    (self.api.create_di_chan)(
                        task,
                        lines.as_ptr(),
                        std::ptr::null(),
                        DAQMX_VAL_CHAN_PER_LINE,
                    )
                })?;
            }
        }
        if !plan.digital_outputs.is_empty() {
            let task = self.api.create_task()?;
            self.do_task = Some(task);
            for line in &plan.digital_outputs {
                let lines = cstring(&self.line_name(*line))?;
                // SAFETY: see above.
                self.api.check(unsafe {
                    (self.api.create_do_chan)(
                        task,
                        lines.as_ptr(),
                        std::ptr::null(),
                        DAQMX_VAL_CHAN_PER_LINE,
                    )
                })?;
            }
        }
        Ok(())
    }

    fn write_outputs(&self) -> Result<()> {
        let Some(task) = self.do_task else {
            return Ok(());
        };
        let mut written = 0i32;
        // SAFETY: `do_state` holds one byte per output channel of the task.
        self.api.check(unsafe {
            (self.api.write_digital_lines)(
                task,
                1,
                1,
                WRITE_TIMEOUT_S,
                DAQMX_VAL_GROUP_BY_SCAN_NUMBER,
                self.do_state.as_ptr(),
                &mut written,
                std::ptr::null_mut(),
            )
        })
    }
}

impl DaqDevice for NiDaqmxDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, plan: &ChannelPlan) -> Result<()> {
        self.clear_tasks();
        self.ai_count = plan.analog_inputs.len();
        self.di_count = plan.digital_inputs.len();
        self.do_lines = plan.digital_outputs.clone();
        self.do_state = vec![0; self.do_lines.len()];
        self.ai_buf = vec![0.0; self.ai_count];
        self.di_buf = vec![0; self.di_count];
        if let Err(err) = self.build_tasks(plan) {
            self.clear_tasks();
            return Err(err);
        }
        debug!(
            "{}: NI-DAQmx tasks AI={} DI={} DO={}",
            self.name,
            self.ai_count,
            self.di_count,
            self.do_lines.len()
        );
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        for task in [self.ai_task, self.di_task, self.do_task].into_iter().flatten() {
            // SAFETY: task handles are live until `clear_tasks`.
            self.api.check(unsafe { (self.api.start_task)(task) })?;
        }
        self.write_outputs()
    }

    fn read_scan(&mut self) -> Result<Vec<f64>> {
        let mut scan = Vec::with_capacity(self.ai_count + self.di_count);
        if let Some(task) = self.ai_task {
            let mut read = 0i32;
            // SAFETY: `ai_buf` holds exactly one sample per channel.
            self.api.check(unsafe {
                (self.api.read_analog_f64)(
                    task,
                    1,
                    READ_TIMEOUT_S,
                    DAQMX_VAL_GROUP_BY_SCAN_NUMBER,
                    self.ai_buf.as_mut_ptr(),
                    self.ai_buf.len() as u32,
                    &mut read,
                    std::ptr::null_mut(),
                )
            })?;
            scan.extend_from_slice(&self.ai_buf);
        }
        if let Some(task) = self.di_task {
            let mut read = 0i32;
            let mut bytes_per_sample = 0i32;
            // SAFETY: one line per channel, one byte per line.
            self.api.check(unsafe {
                (self.api.read_digital_lines)(
                    task,
                    1,
                    READ_TIMEOUT_S,
                    DAQMX_VAL_GROUP_BY_SCAN_NUMBER,
                    self.di_buf.as_mut_ptr(),
                    self.di_buf.len() as u32,
                    &mut read,
                    &mut bytes_per_sample,
                    std::ptr::null_mut(),
                )
            })?;
            scan.extend(self.di_buf.iter().map(|b| if *b != 0 { 1.0 } else { 0.0 }));
        }
        Ok(scan)
    }

    fn write_output(&mut self, line: u8, high: bool) -> Result<()> {
        let Some(slot) = self.do_lines.iter().position(|l| *l == line) else {
            warn!("{}: DO{line} is not configured as an output", self.name);
            return Ok(());
        };
        self.do_state[slot] = u8::from(high);
        self.write_outputs()
    }

    fn stop(&mut self) -> Result<()> {
        for task in [self.ai_task, self.di_task, self.do_task].into_iter().flatten() {
            // SAFETY: task handles are live until `clear_tasks`.
            self.api.check(unsafe { (self.api.stop_task)(task) })?;
        }
        Ok(())
    }
}

impl Drop for NiDaqmxDevice {
    fn drop(&mut self) {
        self.clear_tasks();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_comma_separated_driver_lists() {
        assert_eq!(count_list("Dev1/ai0, Dev1/ai1, Dev1/ai2"), 3);
        assert_eq!(count_list(""), 0);
        assert_eq!(count_list("Dev1/port0"), 1);
    }
}
