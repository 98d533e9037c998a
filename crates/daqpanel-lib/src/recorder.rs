//! CSV recorder. Samples arrive on the record queue while the shared
//! recording flag is set; a writer thread turns them into rows.

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use csv::WriterBuilder;
use log::{debug, error, info};
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::broadcast::ConfigObserver;
use crate::channel::ChannelId;
use crate::config::{ChannelPlan, DaqConfig};
use crate::error::{DaqError, Result};
use crate::sample::{Sample, SampleReceiver};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum RecordingStatus {
    #[default]
    Idle,
    Active {
        path: PathBuf,
        rows: u64,
    },
    Stopped {
        path: PathBuf,
        rows: u64,
    },
    Error(String),
}

struct ActiveRecording {
    path: PathBuf,
    stop_tx: Sender<()>,
    handle: Option<JoinHandle<()>>,
}

impl ActiveRecording {
    fn finish(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub struct Recorder {
    record_rx: SampleReceiver,
    recording: Arc<AtomicBool>,
    columns: Vec<ChannelId>,
    poll_interval: Duration,
    rows: Arc<AtomicU64>,
    status_tx: Sender<RecordingStatus>,
    status_rx: Receiver<RecordingStatus>,
    status: RecordingStatus,
    active: Option<ActiveRecording>,
}

impl Recorder {
    pub fn new(record_rx: SampleReceiver, poll_interval: Duration) -> Self {
        let (status_tx, status_rx) = unbounded();
        Self {
            record_rx,
            recording: Arc::new(AtomicBool::new(false)),
            columns: Vec::new(),
            poll_interval,
            rows: Arc::new(AtomicU64::new(0)),
            status_tx,
            status_rx,
            status: RecordingStatus::Idle,
            active: None,
        }
    }

    /// Flag the acquisition loop checks before feeding the record queue.
    pub fn recording_flag(&self) -> Arc<AtomicBool> {
        self.recording.clone()
    }

    pub fn columns(&self) -> &[ChannelId] {
        &self.columns
    }

    pub fn header(&self) -> Vec<String> {
        std::iter::once("timestamp".to_string())
            .chain(self.columns.iter().map(ChannelId::to_string))
            .collect()
    }

    pub fn is_recording(&self) -> bool {
        self.active.is_some()
    }

    pub fn start(&mut self, path: &Path) -> Result<()> {
        if let Some(active) = &self.active {
            return Err(DaqError::RecorderBusy {
                path: active.path.clone(),
            });
        }
        let file = File::create(path).map_err(|e| DaqError::io(path, e))?;
        self.start_writing(path, BufWriter::new(file))
    }

    fn start_writing<W: Write + Send + 'static>(&mut self, path: &Path, sink: W) -> Result<()> {
        let mut writer = WriterBuilder::new().from_writer(sink);
        writer.write_record(self.header())?;
        writer.flush().map_err(|e| DaqError::io(path, e))?;

        let stale = self.record_rx.drain().len();
        if stale > 0 {
            debug!("Discarded {stale} stale sample(s) before recording");
        }
        self.rows.store(0, Ordering::Relaxed);
        self.recording.store(true, Ordering::Release);

        let (stop_tx, stop_rx) = bounded(1);
        let worker = RecorderWorker {
            writer,
            path: path.to_path_buf(),
            columns: self.columns.clone(),
            record_rx: self.record_rx.clone(),
            recording: self.recording.clone(),
            rows: self.rows.clone(),
            status_tx: self.status_tx.clone(),
            poll_interval: self.poll_interval,
        };
        let handle = std::thread::Builder::new()
            .name("daq-recorder".into())
            .spawn(move || worker.run(stop_rx))
            .map_err(|e| {
                self.recording.store(false, Ordering::Release);
                DaqError::io(path, e)
            })?;
        info!("Recording {} column(s) to {}", self.columns.len(), path.display());
        self.active = Some(ActiveRecording {
            path: path.to_path_buf(),
            stop_tx,
            handle: Some(handle),
        });
        self.status = RecordingStatus::Active {
            path: path.to_path_buf(),
            rows: 0,
        };
        Ok(())
    }

    /// Stop recording, write out what is still queued and close the file.
    /// Returns the file and its row count when a recording was active.
    pub fn stop(&mut self) -> Option<(PathBuf, u64)> {
        let active = self.active.take()?;
        self.recording.store(false, Ordering::Release);
        let path = active.path.clone();
        active.finish();
        let rows = self.rows.load(Ordering::Relaxed);
        info!("Recording stopped: {rows} row(s) in {}", path.display());
        self.status = RecordingStatus::Stopped {
            path: path.clone(),
            rows,
        };
        Some((path, rows))
    }

    /// Apply worker status updates. A write failure is returned exactly once
    /// and ends the recording.
    pub fn poll(&mut self) -> Vec<String> {
        let mut errors = Vec::new();
        while let Ok(status) = self.status_rx.try_recv() {
            if let RecordingStatus::Error(msg) = &status {
                errors.push(msg.clone());
                if let Some(active) = self.active.take() {
                    active.finish();
                }
            }
            self.status = status;
        }
        errors
    }

    pub fn status(&self) -> RecordingStatus {
        match &self.status {
            RecordingStatus::Active { path, .. } => RecordingStatus::Active {
                path: path.clone(),
                rows: self.rows.load(Ordering::Relaxed),
            },
            other => other.clone(),
        }
    }
}

impl ConfigObserver for Recorder {
    fn apply_config(&mut self, config: &DaqConfig, _plan: &ChannelPlan) -> Result<()> {
        if let Some((path, _)) = self.stop() {
            info!("Configuration changed; closed {}", path.display());
        }
        self.columns = config.recorded_columns();
        Ok(())
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        self.stop();
    }
}

struct RecorderWorker<W: Write> {
    writer: csv::Writer<W>,
    path: PathBuf,
    columns: Vec<ChannelId>,
    record_rx: SampleReceiver,
    recording: Arc<AtomicBool>,
    rows: Arc<AtomicU64>,
    status_tx: Sender<RecordingStatus>,
    poll_interval: Duration,
}

impl<W: Write> RecorderWorker<W> {
    fn run(mut self, stop_rx: Receiver<()>) {
        loop {
            let stopping = match stop_rx.recv_timeout(self.poll_interval) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => true,
                Err(RecvTimeoutError::Timeout) => false,
            };
            if let Err(err) = self.write_pending() {
                let message = format!("Recording to {} failed: {err}", self.path.display());
                error!("{message}");
                self.recording.store(false, Ordering::Release);
                let _ = self.status_tx.send(RecordingStatus::Error(message));
                return;
            }
            if stopping {
                break;
            }
        }
        debug!("Recorder writer for {} exited", self.path.display());
    }

    fn write_pending(&mut self) -> Result<()> {
        let pending = self.record_rx.drain();
        if pending.is_empty() {
            return Ok(());
        }
        for sample in &pending {
            self.writer.write_record(format_row(&self.columns, sample))?;
        }
        self.writer
            .flush()
            .map_err(|e| DaqError::io(&self.path, e))?;
        self.rows.fetch_add(pending.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

fn format_row(columns: &[ChannelId], sample: &Sample) -> Vec<String> {
    let mut row = Vec::with_capacity(columns.len() + 1);
    row.push(sample.timestamp.to_string());
    for column in columns {
        row.push(match sample.get(*column) {
            None => String::new(),
            Some(v) if column.is_digital() => (if v != 0.0 { "1" } else { "0" }).to_string(),
            Some(v) => v.to_string(),
        });
    }
    row
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AnalogMode, DigitalMode};
    use crate::sample::sample_queue;
    use std::fs;
    use std::io;

    /// Accepts the header, then fails every write.
    struct FullDisk {
        writes: u32,
    }

    impl Write for FullDisk {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.writes > 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "no space left on device"));
            }
            self.writes += 1;
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn config() -> DaqConfig {
        let mut config = DaqConfig::default();
        config.analog[0].enabled = true;
        config.analog[2].enabled = true;
        config.analog[2].mode = AnalogMode::Reference;
        config.digital[1].enabled = true;
        config.digital[3].enabled = true;
        config.digital[3].mode = DigitalMode::Output;
        config
    }

    fn sample(t: f64) -> Sample {
        let mut s = Sample::new(t, 1);
        s.push(ChannelId::Analog(0), 1.25);
        s.push(ChannelId::Digital(1), 1.0);
        s.push(ChannelId::Digital(3), 0.0);
        s
    }

    #[test]
    fn writes_header_and_rows_with_blank_missing_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.csv");
        let (tx, rx) = sample_queue(100);
        let mut recorder = Recorder::new(rx, Duration::from_millis(1));
        recorder.apply_config(&config(), &ChannelPlan::default()).unwrap();

        tx.push(sample(99.0));
        recorder.start(&path).unwrap();
        assert!(recorder.recording_flag().load(Ordering::Acquire));
        tx.push(sample(0.5));
        tx.push(sample(0.52));
        let (written, rows) = recorder.stop().unwrap();

        assert_eq!(written, path);
        assert_eq!(rows, 2);
        assert!(!recorder.recording_flag().load(Ordering::Acquire));
        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "timestamp,AI0,AI2,DIO1,DIO3");
        assert_eq!(lines[1], "0.5,1.25,,1,0");
        assert_eq!(lines[2], "0.52,1.25,,1,0");
        assert_eq!(lines.len(), 3);
        assert_eq!(
            recorder.status(),
            RecordingStatus::Stopped { path, rows: 2 }
        );
    }

    #[test]
    fn second_start_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = sample_queue(10);
        let mut recorder = Recorder::new(rx, Duration::from_millis(5));
        recorder.start(&dir.path().join("a.csv")).unwrap();
        let err = recorder.start(&dir.path().join("b.csv")).unwrap_err();
        assert!(matches!(err, DaqError::RecorderBusy { .. }));
        assert!(!dir.path().join("b.csv").exists());
    }

    #[test]
    fn open_failure_leaves_recorder_idle() {
        let dir = tempfile::tempdir().unwrap();
        let (_tx, rx) = sample_queue(10);
        let mut recorder = Recorder::new(rx, Duration::from_millis(5));
        let err = recorder.start(&dir.path().join("missing/run.csv")).unwrap_err();
        assert!(matches!(err, DaqError::Io { .. }));
        assert!(!recorder.is_recording());
        assert!(!recorder.recording_flag().load(Ordering::Acquire));
        assert_eq!(recorder.status(), RecordingStatus::Idle);
    }

    #[test]
    fn config_change_stops_recording_and_rebuilds_columns() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, rx) = sample_queue(10);
        let mut recorder = Recorder::new(rx, Duration::from_millis(5));
        recorder.apply_config(&config(), &ChannelPlan::default()).unwrap();
        recorder.start(&dir.path().join("run.csv")).unwrap();
        tx.push(sample(0.0));

        let mut next = DaqConfig::default();
        next.digital[7].enabled = true;
        recorder.apply_config(&next, &ChannelPlan::default()).unwrap();
        assert!(!recorder.is_recording());
        assert_eq!(recorder.columns(), &[ChannelId::Digital(7)]);
        assert!(matches!(
            recorder.status(),
            RecordingStatus::Stopped { rows: 1, .. }
        ));
    }

    #[test]
    fn write_failure_is_reported_once_and_ends_recording() {
        let (tx, rx) = sample_queue(10);
        let mut recorder = Recorder::new(rx, Duration::from_millis(1));
        recorder.apply_config(&config(), &ChannelPlan::default()).unwrap();
        recorder
            .start_writing(Path::new("full.csv"), FullDisk { writes: 0 })
            .unwrap();
        assert!(recorder.is_recording());
        tx.push(sample(0.0));

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        let mut errors = Vec::new();
        while errors.is_empty() {
            assert!(std::time::Instant::now() < deadline, "timed out");
            std::thread::sleep(Duration::from_millis(2));
            errors.extend(recorder.poll());
        }
        std::thread::sleep(Duration::from_millis(20));
        errors.extend(recorder.poll());
        errors.extend(recorder.poll());

        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("no space left on device"));
        assert!(!recorder.recording_flag().load(Ordering::Acquire));
        assert!(!recorder.is_recording());
        assert!(matches!(recorder.status(), RecordingStatus::Error(_)));
        assert_eq!(recorder.stop(), None);
    }
}
