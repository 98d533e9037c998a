use daqpanel_lib::{
    error::Result, sample_queue, Acquisition, AcquisitionStatus, ConfigBroadcaster,
    ConfigObserver, DaqConfig, DaqDevice, LivePlot, OutputPanel, Recorder, RecordingStatus,
    SampleReceiver, SampleSender, Settings,
};
use std::path::{Path, PathBuf};

/// Wires the broadcaster, acquisition loop, recorder, plot and output panel
/// together for the window.
pub struct DaqSession {
    broadcaster: ConfigBroadcaster,
    recorder: Recorder,
    acquisition: Acquisition,
    plot: LivePlot,
    outputs: OutputPanel,
    plot_rx: SampleReceiver,
    record_tx: SampleSender,
}

impl DaqSession {
    pub fn new(settings: &Settings, device: Box<dyn DaqDevice>, config: DaqConfig) -> Result<Self> {
        let (plot_tx, plot_rx) = sample_queue(settings.queue_capacity);
        let (record_tx, record_rx) = sample_queue(settings.queue_capacity);
        let recorder = Recorder::new(record_rx, settings.recorder_poll());
        let acquisition = Acquisition::spawn(
            device,
            plot_tx,
            record_tx.clone(),
            recorder.recording_flag(),
            settings.sample_rate_hz,
        )?;
        let mut session = Self {
            broadcaster: ConfigBroadcaster::new(config),
            recorder,
            acquisition,
            plot: LivePlot::new(settings.plot_max_points),
            outputs: OutputPanel::default(),
            plot_rx,
            record_tx,
        };
        session.broadcast()?;
        Ok(session)
    }

    fn broadcast(&mut self) -> Result<()> {
        let Self {
            broadcaster,
            recorder,
            acquisition,
            plot,
            outputs,
            ..
        } = self;
        let observers: &mut [&mut dyn ConfigObserver] = &mut [recorder, acquisition, plot, outputs];
        broadcaster.broadcast(observers).map(|_| ())
    }

    pub fn config(&self) -> &DaqConfig {
        self.broadcaster.config()
    }

    /// Normalize and broadcast an edited configuration. Any active recording
    /// is closed.
    pub fn update_config(&mut self, config: DaqConfig) -> Result<Option<(PathBuf, u64)>> {
        let closed = self.recorder.stop();
        let Self {
            broadcaster,
            recorder,
            acquisition,
            plot,
            outputs,
            ..
        } = self;
        let observers: &mut [&mut dyn ConfigObserver] = &mut [recorder, acquisition, plot, outputs];
        broadcaster.update(config, observers)?;
        Ok(closed)
    }

    /// Re-apply the configuration and start acquiring. Returns the recording
    /// closed by the re-broadcast, if one was active.
    pub fn start(&mut self) -> Result<Option<(PathBuf, u64)>> {
        let closed = self.recorder.stop();
        self.broadcast()?;
        self.acquisition.start()?;
        Ok(closed)
    }

    /// Stop acquiring. Returns the closed recording, if one was active.
    pub fn stop(&mut self) -> Result<Option<(PathBuf, u64)>> {
        let closed = self.recorder.stop();
        self.acquisition.stop()?;
        Ok(closed)
    }

    pub fn start_recording(&mut self, path: &Path) -> Result<()> {
        self.recorder.start(path)
    }

    pub fn stop_recording(&mut self) -> Option<(PathBuf, u64)> {
        self.recorder.stop()
    }

    pub fn toggle_output(&mut self, line: u8) -> Result<()> {
        if let Some(high) = self.outputs.toggle(line) {
            self.acquisition.set_output(line, high)?;
        }
        Ok(())
    }

    /// Move queued samples into the plot and collect worker errors.
    pub fn pump(&mut self) -> Vec<String> {
        let mut errors = self.acquisition.poll();
        errors.extend(self.recorder.poll());
        self.plot.drain(&self.plot_rx);
        errors
    }

    pub fn plot(&self) -> &LivePlot {
        &self.plot
    }

    pub fn outputs(&self) -> &OutputPanel {
        &self.outputs
    }

    pub fn acquisition_status(&self) -> AcquisitionStatus {
        self.acquisition.status()
    }

    pub fn is_running(&self) -> bool {
        self.acquisition.is_running()
    }

    pub fn recording_status(&self) -> RecordingStatus {
        self.recorder.status()
    }

    pub fn is_recording(&self) -> bool {
        self.recorder.is_recording()
    }

    /// Samples dropped on the plot and record queues.
    pub fn dropped(&self) -> (u64, u64) {
        (self.plot_rx.dropped(), self.record_tx.dropped())
    }
}
