//! Background acquisition loop. A worker thread owns the device, reads one
//! scan per sample period and fans the samples out to the plot and record
//! queues.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crate::broadcast::ConfigObserver;
use crate::channel::{ChannelId, DIGITAL_LINES};
use crate::config::{ChannelPlan, DaqConfig};
use crate::device::DaqDevice;
use crate::error::{DaqError, Result};
use crate::sample::{Sample, SampleSender};
use crate::settings::interval_for_rate;

pub enum AcquisitionCommand {
    Start,
    Stop,
    Reconfigure(ChannelPlan),
    SetOutput { line: u8, high: bool },
    Shutdown,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub enum AcquisitionStatus {
    #[default]
    Idle,
    Running {
        samples: u64,
    },
    Error(String),
}

pub struct Acquisition {
    command_tx: Sender<AcquisitionCommand>,
    status_rx: Receiver<AcquisitionStatus>,
    status: AcquisitionStatus,
    samples: Arc<AtomicU64>,
    worker: Option<JoinHandle<()>>,
}

impl Acquisition {
    /// Start an idle worker that owns `device`. Samples go to `plot_tx` while
    /// running and additionally to `record_tx` while `recording` is set.
    pub fn spawn(
        device: Box<dyn DaqDevice>,
        plot_tx: SampleSender,
        record_tx: SampleSender,
        recording: Arc<AtomicBool>,
        sample_rate_hz: f64,
    ) -> Result<Self> {
        let interval = interval_for_rate(sample_rate_hz)?;
        let (command_tx, command_rx) = bounded(32);
        let (status_tx, status_rx) = unbounded();
        let samples = Arc::new(AtomicU64::new(0));
        let worker = AcquisitionWorker {
            device,
            command_rx,
            status_tx,
            plot_tx,
            record_tx,
            recording,
            samples: samples.clone(),
            interval,
            plan: ChannelPlan::default(),
            outputs: [false; DIGITAL_LINES],
            running: None,
        };
        let worker = std::thread::Builder::new()
            .name("daq-acquisition".into())
            .spawn(move || worker.run())
            .map_err(|e| DaqError::io("daq-acquisition thread", e))?;
        Ok(Self {
            command_tx,
            status_rx,
            status: AcquisitionStatus::Idle,
            samples,
            worker: Some(worker),
        })
    }

    fn send(&self, command: AcquisitionCommand) -> Result<()> {
        self.command_tx.send(command).map_err(|_| DaqError::WorkerGone)
    }

    pub fn start(&self) -> Result<()> {
        self.send(AcquisitionCommand::Start)
    }

    pub fn stop(&self) -> Result<()> {
        self.send(AcquisitionCommand::Stop)
    }

    pub fn reconfigure(&self, plan: ChannelPlan) -> Result<()> {
        self.send(AcquisitionCommand::Reconfigure(plan))
    }

    pub fn set_output(&self, line: u8, high: bool) -> Result<()> {
        self.send(AcquisitionCommand::SetOutput { line, high })
    }

    /// Apply pending status updates. Each worker error is returned exactly
    /// once.
    pub fn poll(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        while let Ok(status) = self.status_rx.try_recv() {
            if let AcquisitionStatus::Error(msg) = &status {
                errors.push(msg.clone());
            }
            self.status = status;
        }
        errors
    }

    pub fn status(&self) -> AcquisitionStatus {
        match self.status {
            AcquisitionStatus::Running { .. } => AcquisitionStatus::Running {
                samples: self.samples.load(Ordering::Relaxed),
            },
            ref other => other.clone(),
        }
    }

    pub fn is_running(&self) -> bool {
        matches!(self.status, AcquisitionStatus::Running { .. })
    }

    /// Samples acquired since the last start.
    pub fn samples(&self) -> u64 {
        self.samples.load(Ordering::Relaxed)
    }
}

impl ConfigObserver for Acquisition {
    fn apply_config(&mut self, _config: &DaqConfig, plan: &ChannelPlan) -> Result<()> {
        self.reconfigure(plan.clone())
    }
}

impl Drop for Acquisition {
    fn drop(&mut self) {
        let _ = self.command_tx.send(AcquisitionCommand::Shutdown);
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

struct AcquisitionWorker {
    device: Box<dyn DaqDevice>,
    command_rx: Receiver<AcquisitionCommand>,
    status_tx: Sender<AcquisitionStatus>,
    plot_tx: SampleSender,
    record_tx: SampleSender,
    recording: Arc<AtomicBool>,
    samples: Arc<AtomicU64>,
    interval: Duration,
    plan: ChannelPlan,
    outputs: [bool; DIGITAL_LINES],
    /// Start instant and next read deadline while running.
    running: Option<(Instant, Instant)>,
}

impl AcquisitionWorker {
    fn run(mut self) {
        loop {
            let command = match self.running.map(|(_, deadline)| deadline) {
                None => match self.command_rx.recv() {
                    Ok(command) => command,
                    Err(_) => break,
                },
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        self.tick(now);
                        continue;
                    }
                    let wait = (deadline - now).min(self.interval / 2);
                    match self.command_rx.recv_timeout(wait) {
                        Ok(command) => command,
                        Err(RecvTimeoutError::Timeout) => continue,
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
            };
            if !self.handle(command) {
                break;
            }
        }
        if self.running.is_some() {
            self.halt();
        }
        debug!("Acquisition worker for {} exited", self.device.name());
    }

    fn handle(&mut self, command: AcquisitionCommand) -> bool {
        match command {
            AcquisitionCommand::Start => self.start(),
            AcquisitionCommand::Stop => {
                if self.running.is_some() {
                    self.halt();
                    info!("Acquisition stopped on {}", self.device.name());
                }
                let _ = self.status_tx.send(AcquisitionStatus::Idle);
            }
            AcquisitionCommand::Reconfigure(plan) => self.reconfigure(plan),
            AcquisitionCommand::SetOutput { line, high } => self.set_output(line, high),
            AcquisitionCommand::Shutdown => return false,
        }
        true
    }

    fn start(&mut self) {
        if self.running.is_some() {
            return;
        }
        if let Err(err) = self.device.start() {
            self.fail(format!("Failed to start acquisition: {err}"));
            return;
        }
        let now = Instant::now();
        self.samples.store(0, Ordering::Relaxed);
        self.running = Some((now, now));
        info!(
            "Acquisition started on {} at {:.1} Hz",
            self.device.name(),
            1.0 / self.interval.as_secs_f64()
        );
        let _ = self.status_tx.send(AcquisitionStatus::Running { samples: 0 });
    }

    fn halt(&mut self) {
        self.running = None;
        if let Err(err) = self.device.stop() {
            warn!("Stopping {} failed: {err}", self.device.name());
        }
    }

    fn reconfigure(&mut self, plan: ChannelPlan) {
        let was_running = self.running.is_some();
        if was_running {
            if let Err(err) = self.device.stop() {
                warn!("Stopping {} for reconfigure failed: {err}", self.device.name());
            }
        }
        self.outputs = [false; DIGITAL_LINES];
        self.plan = plan;
        if let Err(err) = self.device.configure(&self.plan) {
            self.fail(format!("Failed to configure channels: {err}"));
            return;
        }
        if was_running {
            if let Err(err) = self.device.start() {
                self.fail(format!("Failed to restart acquisition: {err}"));
            }
        }
    }

    fn set_output(&mut self, line: u8, high: bool) {
        if !self.plan.digital_outputs.contains(&line) {
            warn!("Ignoring write to DIO{line}: not configured as an output");
            return;
        }
        match self.device.write_output(line, high) {
            Ok(()) => self.outputs[line as usize] = high,
            Err(err) => self.fail(format!("Failed to set DO{line}: {err}")),
        }
    }

    fn tick(&mut self, now: Instant) {
        let Some((started, deadline)) = self.running else {
            return;
        };
        let scan = match self.device.read_scan() {
            Ok(scan) => scan,
            Err(err) => {
                self.fail(format!("Acquisition error: {err}"));
                return;
            }
        };
        let mut sample = Sample::new(now.duration_since(started).as_secs_f64(), self.plan.generation);
        for (channel, value) in self.plan.inputs().into_iter().zip(scan) {
            sample.push(channel, value);
        }
        for line in &self.plan.digital_outputs {
            let level = if self.outputs[*line as usize] { 1.0 } else { 0.0 };
            sample.push(ChannelId::Digital(*line), level);
        }
        if self.recording.load(Ordering::Acquire) {
            self.record_tx.push(sample.clone());
        }
        self.plot_tx.push(sample);
        self.samples.fetch_add(1, Ordering::Relaxed);

        // Fall back to the current time rather than bursting to catch up.
        let mut next = deadline + self.interval;
        if next + self.interval < Instant::now() {
            next = Instant::now() + self.interval;
        }
        self.running = Some((started, next));
    }

    fn fail(&mut self, message: String) {
        error!("{message}");
        if self.running.is_some() {
            self.halt();
        }
        let _ = self.status_tx.send(AcquisitionStatus::Error(message));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::AnalogMode;
    use crate::device::SimulatedDevice;
    use crate::sample::sample_queue;
    use std::thread::sleep;

    struct FailingDevice {
        reads: u32,
    }

    impl DaqDevice for FailingDevice {
        fn name(&self) -> &str {
            "broken"
        }
        fn configure(&mut self, _plan: &ChannelPlan) -> Result<()> {
            Ok(())
        }
        fn start(&mut self) -> Result<()> {
            Ok(())
        }
        fn read_scan(&mut self) -> Result<Vec<f64>> {
            self.reads += 1;
            Err(DaqError::Driver {
                code: -200279,
                message: "buffer overflow".into(),
            })
        }
        fn write_output(&mut self, _line: u8, _high: bool) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn plan() -> ChannelPlan {
        ChannelPlan {
            generation: 3,
            analog_inputs: vec![(1, AnalogMode::Ground)],
            digital_inputs: vec![0],
            digital_outputs: vec![6],
        }
    }

    fn wait_for(mut cond: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !cond() {
            assert!(Instant::now() < deadline, "timed out");
            sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn running_loop_feeds_plot_and_respects_recording_flag() {
        let (plot_tx, plot_rx) = sample_queue(1000);
        let (record_tx, record_rx) = sample_queue(1000);
        let recording = Arc::new(AtomicBool::new(false));
        let mut acq = Acquisition::spawn(
            Box::new(SimulatedDevice::seeded("Dev1", 7)),
            plot_tx,
            record_tx,
            recording.clone(),
            500.0,
        )
        .unwrap();
        acq.reconfigure(plan()).unwrap();
        acq.start().unwrap();
        wait_for(|| plot_rx.len() >= 5);
        assert!(record_rx.is_empty());

        recording.store(true, Ordering::Release);
        acq.set_output(6, true).unwrap();
        wait_for(|| record_rx.len() >= 5);
        acq.stop().unwrap();
        acq.poll();

        let samples = plot_rx.drain();
        let first = &samples[0];
        assert_eq!(first.generation, 3);
        assert_eq!(
            first.values.iter().map(|(id, _)| *id).collect::<Vec<_>>(),
            vec![ChannelId::Analog(1), ChannelId::Digital(0), ChannelId::Digital(6)]
        );
        assert!(samples.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
        let recorded = record_rx.drain();
        assert_eq!(recorded.last().unwrap().get(ChannelId::Digital(6)), Some(1.0));
    }

    #[test]
    fn device_error_is_reported_once_and_stops() {
        let (plot_tx, plot_rx) = sample_queue(10);
        let (record_tx, _record_rx) = sample_queue(10);
        let mut acq = Acquisition::spawn(
            Box::new(FailingDevice { reads: 0 }),
            plot_tx,
            record_tx,
            Arc::new(AtomicBool::new(false)),
            1000.0,
        )
        .unwrap();
        acq.start().unwrap();
        let mut errors = Vec::new();
        wait_for(|| {
            errors.extend(acq.poll());
            !errors.is_empty()
        });
        sleep(Duration::from_millis(20));
        errors.extend(acq.poll());
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("buffer overflow"));
        assert!(!acq.is_running());
        assert!(plot_rx.is_empty());
    }

    #[test]
    fn writes_to_non_output_lines_are_ignored() {
        let (plot_tx, plot_rx) = sample_queue(100);
        let (record_tx, _record_rx) = sample_queue(100);
        let mut acq = Acquisition::spawn(
            Box::new(SimulatedDevice::seeded("Dev1", 1)),
            plot_tx,
            record_tx,
            Arc::new(AtomicBool::new(false)),
            500.0,
        )
        .unwrap();
        acq.reconfigure(plan()).unwrap();
        acq.set_output(2, true).unwrap();
        acq.start().unwrap();
        wait_for(|| !plot_rx.is_empty());
        acq.stop().unwrap();
        assert!(acq.poll().is_empty());
        let sample = plot_rx.try_pop().unwrap();
        assert_eq!(sample.get(ChannelId::Digital(2)), None);
        assert_eq!(sample.get(ChannelId::Digital(6)), Some(0.0));
    }

    #[test]
    fn rejects_non_positive_rate() {
        let (plot_tx, _p) = sample_queue(1);
        let (record_tx, _r) = sample_queue(1);
        assert!(Acquisition::spawn(
            Box::new(SimulatedDevice::new("Dev1")),
            plot_tx,
            record_tx,
            Arc::new(AtomicBool::new(false)),
            0.0,
        )
        .is_err());
    }

    #[test]
    fn rejects_rate_too_low_to_schedule() {
        let (plot_tx, _p) = sample_queue(1);
        let (record_tx, _r) = sample_queue(1);
        let result = Acquisition::spawn(
            Box::new(SimulatedDevice::new("Dev1")),
            plot_tx,
            record_tx,
            Arc::new(AtomicBool::new(false)),
            1e-20,
        );
        assert!(matches!(result, Err(DaqError::InvalidSetting(_))));
    }

    #[test]
    fn reconfigure_while_running_resets_outputs_and_stamps_new_generation() {
        let (plot_tx, plot_rx) = sample_queue(10_000);
        let (record_tx, _record_rx) = sample_queue(1);
        let mut acq = Acquisition::spawn(
            Box::new(SimulatedDevice::seeded("Dev1", 11)),
            plot_tx,
            record_tx,
            Arc::new(AtomicBool::new(false)),
            500.0,
        )
        .unwrap();
        acq.reconfigure(ChannelPlan {
            generation: 1,
            ..plan()
        })
        .unwrap();
        acq.start().unwrap();
        acq.set_output(6, true).unwrap();

        let mut last: Option<Sample> = None;
        wait_for(|| {
            if let Some(sample) = plot_rx.drain().pop() {
                last = Some(sample);
            }
            last.as_ref()
                .is_some_and(|s| s.get(ChannelId::Digital(6)) == Some(1.0))
        });
        assert_eq!(last.as_ref().map(|s| s.generation), Some(1));

        acq.reconfigure(ChannelPlan {
            generation: 2,
            analog_inputs: vec![(1, AnalogMode::Ground), (3, AnalogMode::Ground)],
            ..plan()
        })
        .unwrap();
        wait_for(|| {
            if let Some(sample) = plot_rx.drain().pop() {
                last = Some(sample);
            }
            last.as_ref().is_some_and(|s| s.generation == 2)
        });
        wait_for(|| plot_rx.len() >= 3);
        acq.stop().unwrap();

        let sample = plot_rx.drain().pop().unwrap();
        assert_eq!(sample.generation, 2);
        assert!(sample.get(ChannelId::Analog(3)).is_some());
        assert_eq!(sample.get(ChannelId::Digital(6)), Some(0.0));
        assert!(acq.poll().is_empty());
    }
}
