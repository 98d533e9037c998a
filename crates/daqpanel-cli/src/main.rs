use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use daqpanel_lib::{
    channel::{AnalogMode, ChannelId, DigitalMode},
    list_devices, open_device, sample_queue, Acquisition, Backend, ConfigBroadcaster, DaqConfig,
    Recorder, Settings,
};
use env_logger::Env;
use log::info;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread::sleep;
use std::time::{Duration, Instant};

#[derive(Parser)]
#[command(
    name = "daqpanel",
    version,
    about = "NI DAQ acquisition, recording and device tools"
)]
struct Cli {
    /// TOML settings file (defaults to $DAQPANEL_SETTINGS, then built-in values)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// auto, simulated or nidaqmx
    #[arg(long, global = true)]
    backend: Option<Backend>,
    #[arg(long, global = true)]
    device: Option<String>,
    #[arg(long, global = true)]
    sample_rate: Option<f64>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List connected devices with their channel counts
    Devices {
        #[arg(long)]
        json: bool,
    },
    /// Stream samples to stdout, one line per sample
    Watch {
        #[arg(long)]
        config: Option<PathBuf>,
        /// Extra channels to enable, e.g. AI0 or DIO3
        #[arg(long = "enable")]
        enable: Vec<ChannelId>,
        #[arg(long)]
        seconds: Option<f64>,
        #[arg(long)]
        samples: Option<u64>,
    },
    /// Record enabled channels to CSV for a fixed duration
    Record {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long = "enable")]
        enable: Vec<ChannelId>,
        #[arg(long)]
        out: PathBuf,
        #[arg(long)]
        seconds: f64,
    },
    /// Write a channel configuration file
    InitConfig {
        #[arg(long)]
        out: PathBuf,
        #[arg(long = "enable")]
        enable: Vec<ChannelId>,
        /// Analog channels measured against their paired channel
        #[arg(long = "reference")]
        reference: Vec<ChannelId>,
        /// Digital lines driven as outputs
        #[arg(long = "output")]
        output: Vec<ChannelId>,
    },
}

#[derive(Serialize)]
struct RecordSummary {
    path: PathBuf,
    rows: u64,
    columns: Vec<String>,
    seconds: f64,
    sample_rate_hz: f64,
    dropped: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    let mut settings = Settings::load(cli.settings.as_deref()).context("Failed to load settings")?;
    if let Some(backend) = cli.backend {
        settings.backend = backend;
    }
    if let Some(device) = cli.device {
        settings.device = device;
    }
    if let Some(rate) = cli.sample_rate {
        settings.sample_rate_hz = rate;
    }
    settings.validate()?;

    match cli.command {
        Commands::Devices { json } => devices(&settings, json),
        Commands::Watch {
            config,
            enable,
            seconds,
            samples,
        } => {
            let config = resolve_config(config.as_deref(), &enable)?;
            watch(&settings, config, seconds, samples)
        }
        Commands::Record {
            config,
            enable,
            out,
            seconds,
        } => {
            let config = resolve_config(config.as_deref(), &enable)?;
            record(&settings, config, &out, seconds)
        }
        Commands::InitConfig {
            out,
            enable,
            reference,
            output,
        } => init_config(&out, &enable, &reference, &output),
    }
}

fn resolve_config(path: Option<&Path>, enable: &[ChannelId]) -> Result<DaqConfig> {
    let mut config = match path {
        Some(path) => DaqConfig::load(path)
            .with_context(|| format!("Failed to load configuration {}", path.display()))?,
        None => DaqConfig::default(),
    };
    for channel in enable {
        config.enable(*channel);
    }
    config.normalize();
    if config.recorded_columns().is_empty() {
        bail!("No channels enabled; pass --config or --enable");
    }
    Ok(config)
}

fn devices(settings: &Settings, json: bool) -> Result<()> {
    let devices = list_devices(settings.backend).context("Failed to list devices")?;
    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }
    if devices.is_empty() {
        println!("No devices found");
    }
    for dev in &devices {
        println!(
            "{}: {} | AI {} | AO {} | DI ports {} | DO ports {} | DI lines {}",
            dev.name,
            dev.product_type,
            dev.ai_channels,
            dev.ao_channels,
            dev.di_ports,
            dev.do_ports,
            dev.di_lines
        );
    }
    Ok(())
}

fn watch(
    settings: &Settings,
    config: DaqConfig,
    seconds: Option<f64>,
    samples: Option<u64>,
) -> Result<()> {
    let device = open_device(settings)?;
    let (plot_tx, plot_rx) = sample_queue(settings.queue_capacity);
    let (record_tx, _record_rx) = sample_queue(1);
    let mut acquisition = Acquisition::spawn(
        device,
        plot_tx,
        record_tx,
        Default::default(),
        settings.sample_rate_hz,
    )?;
    let mut broadcaster = ConfigBroadcaster::new(config);
    broadcaster.broadcast(&mut [&mut acquisition])?;
    acquisition.start()?;

    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs_f64(s.max(0.0)));
    let mut printed = 0u64;
    loop {
        if let Some(msg) = acquisition.poll().into_iter().next() {
            return Err(anyhow!(msg));
        }
        for sample in plot_rx.drain() {
            let fields: Vec<String> = sample
                .values
                .iter()
                .map(|(id, v)| {
                    if id.is_digital() {
                        format!("{id}={}", u8::from(*v != 0.0))
                    } else {
                        format!("{id}={v:.4}")
                    }
                })
                .collect();
            println!("{:.6}\t{}", sample.timestamp, fields.join("\t"));
            printed += 1;
            if samples.is_some_and(|limit| printed >= limit) {
                break;
            }
        }
        let done_samples = samples.is_some_and(|limit| printed >= limit);
        let done_time = deadline.is_some_and(|d| Instant::now() >= d);
        if done_samples || done_time {
            break;
        }
        sleep(settings.plot_refresh());
    }
    acquisition.stop()?;
    info!("Printed {printed} sample(s); {} dropped", plot_rx.dropped());
    Ok(())
}

fn record(settings: &Settings, config: DaqConfig, out: &Path, seconds: f64) -> Result<()> {
    if !(seconds.is_finite() && seconds > 0.0) {
        bail!("--seconds must be positive");
    }
    let device = open_device(settings)?;
    let (plot_tx, _plot_rx) = sample_queue(1);
    let (record_tx, record_rx) = sample_queue(settings.queue_capacity);
    let record_stats = record_tx.clone();
    let mut recorder = Recorder::new(record_rx, settings.recorder_poll());
    let mut acquisition = Acquisition::spawn(
        device,
        plot_tx,
        record_tx,
        recorder.recording_flag(),
        settings.sample_rate_hz,
    )?;
    let mut broadcaster = ConfigBroadcaster::new(config);
    broadcaster.broadcast(&mut [&mut recorder, &mut acquisition])?;

    acquisition.start()?;
    recorder
        .start(out)
        .with_context(|| format!("Failed to start recording to {}", out.display()))?;
    let deadline = Instant::now() + Duration::from_secs_f64(seconds);
    while Instant::now() < deadline {
        sleep(Duration::from_millis(20));
        if let Some(msg) = acquisition.poll().into_iter().next() {
            recorder.stop();
            return Err(anyhow!(msg));
        }
        if let Some(msg) = recorder.poll().into_iter().next() {
            return Err(anyhow!(msg));
        }
    }
    let (path, rows) = recorder
        .stop()
        .ok_or_else(|| anyhow!("Recording ended before the requested duration"))?;
    acquisition.stop()?;

    let summary = RecordSummary {
        path,
        rows,
        columns: recorder.header().into_iter().skip(1).collect(),
        seconds,
        sample_rate_hz: settings.sample_rate_hz,
        dropped: record_stats.dropped(),
    };
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn init_config(
    out: &Path,
    enable: &[ChannelId],
    reference: &[ChannelId],
    output: &[ChannelId],
) -> Result<()> {
    let mut config = DaqConfig::default();
    for channel in enable {
        config.enable(*channel);
    }
    for channel in reference {
        match channel {
            ChannelId::Analog(n) if AnalogMode::choices(*n as usize).len() > 1 => {
                config.analog[*n as usize].mode = AnalogMode::Reference;
            }
            other => bail!("{other} cannot be measured against a reference"),
        }
    }
    for channel in output {
        match channel {
            ChannelId::Digital(n) => config.digital[*n as usize].mode = DigitalMode::Output,
            other => bail!("{other} is not a digital line"),
        }
    }
    config.normalize();
    config
        .save(out)
        .with_context(|| format!("Failed to write {}", out.display()))?;
    info!("Wrote configuration to {}", out.display());
    Ok(())
}
