use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{DaqDevice, DeviceInfo};
use crate::channel::{ANALOG_CHANNELS, DIGITAL_LINES};
use crate::config::ChannelPlan;
use crate::error::Result;

const ANALOG_RANGE_V: f64 = 5.0;

/// Stand-in for a USB multifunction device: uniform noise on the analog
/// inputs, coin flips on the digital inputs, latched digital outputs.
pub struct SimulatedDevice {
    name: String,
    rng: StdRng,
    plan: ChannelPlan,
    outputs: [bool; DIGITAL_LINES],
    running: bool,
}

impl SimulatedDevice {
    pub fn new(name: &str) -> Self {
        Self::with_rng(name, StdRng::from_entropy())
    }

    /// Deterministic variant for tests.
    pub fn seeded(name: &str, seed: u64) -> Self {
        Self::with_rng(name, StdRng::seed_from_u64(seed))
    }

    fn with_rng(name: &str, rng: StdRng) -> Self {
        Self {
            name: name.to_string(),
            rng,
            plan: ChannelPlan::default(),
            outputs: [false; DIGITAL_LINES],
            running: false,
        }
    }

    pub fn info(name: &str) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            product_type: "USB-6001 (simulated)".into(),
            ai_channels: ANALOG_CHANNELS,
            ao_channels: 2,
            di_ports: 1,
            do_ports: 1,
            di_lines: DIGITAL_LINES,
        }
    }

    pub fn output(&self, line: u8) -> bool {
        self.outputs.get(line as usize).copied().unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.running
    }
}

impl DaqDevice for SimulatedDevice {
    fn name(&self) -> &str {
        &self.name
    }

    fn configure(&mut self, plan: &ChannelPlan) -> Result<()> {
        debug!(
            "{}: simulated tasks for {} input(s), {} output(s)",
            self.name,
            plan.inputs().len(),
            plan.digital_outputs.len()
        );
        self.plan = plan.clone();
        self.outputs = [false; DIGITAL_LINES];
        Ok(())
    }

    fn start(&mut self) -> Result<()> {
        self.running = true;
        Ok(())
    }

    fn read_scan(&mut self) -> Result<Vec<f64>> {
        let mut scan = Vec::with_capacity(self.plan.inputs().len());
        for _ in &self.plan.analog_inputs {
            scan.push(self.rng.gen_range(-ANALOG_RANGE_V..=ANALOG_RANGE_V));
        }
        for _ in &self.plan.digital_inputs {
            scan.push(if self.rng.gen_bool(0.5) { 1.0 } else { 0.0 });
        }
        Ok(scan)
    }

    fn write_output(&mut self, line: u8, high: bool) -> Result<()> {
        if let Some(slot) = self.outputs.get_mut(line as usize) {
            *slot = high;
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.running = false;
        Ok(())
    }
}
