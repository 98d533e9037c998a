//! Scrolling plot state fed from the plot queue.

use std::collections::VecDeque;

use super::{channel_color, Axis, Figure, LineSeries, Series, Style};
use crate::broadcast::ConfigObserver;
use crate::channel::{ChannelId, DigitalMode};
use crate::config::{ChannelPlan, DaqConfig};
use crate::error::Result;
use crate::sample::{Sample, SampleReceiver};

pub const DEFAULT_MAX_POINTS: usize = 500;

/// Half-height of a digital trace around its lane centre.
const LANE_SWING: f64 = 1.0 / 3.0;

struct Trace {
    channel: ChannelId,
    label: String,
    values: VecDeque<f64>,
}

impl Trace {
    fn new(channel: ChannelId, label: String) -> Self {
        Self {
            channel,
            label,
            values: VecDeque::new(),
        }
    }
}

pub struct LivePlot {
    max_points: usize,
    generation: u64,
    x: VecDeque<f64>,
    analog: Vec<Trace>,
    digital: Vec<Trace>,
}

impl Default for LivePlot {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_POINTS)
    }
}

/// Y coordinate of a digital level drawn in `lane`.
pub fn binary_plot_value(lane: usize, value: f64) -> f64 {
    let centre = lane as f64 + 0.5;
    if value != 0.0 {
        centre + LANE_SWING
    } else {
        centre - LANE_SWING
    }
}

impl LivePlot {
    pub fn new(max_points: usize) -> Self {
        Self {
            max_points: max_points.max(2),
            generation: 0,
            x: VecDeque::new(),
            analog: Vec::new(),
            digital: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.x.len()
    }

    pub fn is_empty(&self) -> bool {
        self.x.is_empty()
    }

    pub fn clear(&mut self) {
        self.x.clear();
        for trace in self.analog.iter_mut().chain(self.digital.iter_mut()) {
            trace.values.clear();
        }
    }

    /// Append one sample. Samples from an older channel plan are ignored.
    pub fn ingest(&mut self, sample: &Sample) -> bool {
        if sample.generation < self.generation {
            return false;
        }
        self.x.push_back(sample.timestamp);
        for trace in self.analog.iter_mut().chain(self.digital.iter_mut()) {
            trace.values.push_back(sample.get(trace.channel).unwrap_or(0.0));
        }
        true
    }

    fn truncate(&mut self) {
        let excess = self.x.len().saturating_sub(self.max_points);
        if excess == 0 {
            return;
        }
        self.x.drain(..excess);
        for trace in self.analog.iter_mut().chain(self.digital.iter_mut()) {
            let n = excess.min(trace.values.len());
            trace.values.drain(..n);
        }
    }

    /// Ingest everything queued. Returns whether the plot changed.
    pub fn drain(&mut self, rx: &SampleReceiver) -> bool {
        let mut changed = false;
        while let Some(sample) = rx.try_pop() {
            changed |= self.ingest(&sample);
        }
        self.truncate();
        changed
    }

    fn origin(&self) -> f64 {
        self.x.front().copied().unwrap_or(0.0)
    }

    pub fn analog_figure(&self) -> Figure {
        let mut fig = Figure::new(Some("Analog Inputs".to_string()));
        fig.x = Axis::labelled("Time (s)");
        fig.y = Axis::labelled("Voltage (V)");
        let x0 = self.origin();
        for trace in &self.analog {
            fig.add_series(Series::Line(LineSeries {
                name: trace.label.clone(),
                points: self
                    .x
                    .iter()
                    .zip(&trace.values)
                    .map(|(x, v)| [x - x0, *v])
                    .collect(),
                style: Style {
                    width: 1.4,
                    color: channel_color(trace.channel.index()),
                },
            }));
        }
        fig
    }

    /// Lane tick positions and labels, bottom lane first.
    pub fn digital_ticks(&self) -> Vec<(f64, String)> {
        self.digital
            .iter()
            .enumerate()
            .map(|(lane, trace)| (lane as f64 + 0.5, trace.label.clone()))
            .collect()
    }

    /// Digital traces as step waveforms stacked one lane per line.
    pub fn digital_figure(&self) -> Figure {
        let mut fig = Figure::new(Some("Digital I/O".to_string()));
        fig.x = Axis::labelled("Time (s)");
        fig.y = Axis {
            label: Some("Line".into()),
            range: Some([0.0, self.digital.len() as f64]),
            ticks: self.digital_ticks(),
        };
        let x0 = self.origin();
        for (lane, trace) in self.digital.iter().enumerate() {
            let mut points = Vec::with_capacity(trace.values.len() * 2);
            let mut previous: Option<f64> = None;
            for (x, v) in self.x.iter().zip(&trace.values) {
                let x = x - x0;
                let y = binary_plot_value(lane, *v);
                if let Some(prev) = previous {
                    if prev != y {
                        points.push([x, prev]);
                    }
                }
                points.push([x, y]);
                previous = Some(y);
            }
            fig.add_series(Series::Line(LineSeries {
                name: trace.label.clone(),
                points,
                style: Style {
                    width: 1.6,
                    color: channel_color(trace.channel.index()),
                },
            }));
        }
        fig
    }
}

impl ConfigObserver for LivePlot {
    fn apply_config(&mut self, config: &DaqConfig, plan: &ChannelPlan) -> Result<()> {
        self.generation = plan.generation;
        self.x.clear();
        self.analog = config
            .enabled_analog()
            .into_iter()
            .map(|n| Trace::new(ChannelId::Analog(n), format!("AI{n}")))
            .collect();
        self.digital = config
            .enabled_digital()
            .into_iter()
            .map(|n| {
                let prefix = match config.digital[n as usize].mode {
                    DigitalMode::Input => "DI",
                    DigitalMode::Output => "DO",
                };
                Trace::new(ChannelId::Digital(n), format!("{prefix}{n}"))
            })
            .collect();
        Ok(())
    }
}
