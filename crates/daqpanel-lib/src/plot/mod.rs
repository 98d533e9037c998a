use serde::{Deserialize, Serialize};

pub mod live;

pub use live::LivePlot;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Axis {
    pub label: Option<String>,
    /// Fixed `[min, max]`; auto-scaled when `None`.
    pub range: Option<[f64; 2]>,
    /// Labelled tick positions replacing the numeric ones.
    pub ticks: Vec<(f64, String)>,
}

impl Axis {
    pub fn labelled(label: &str) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Style {
    pub width: f32,
    pub color: Color,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Color(pub u32);

impl Color {
    pub fn rgb(self) -> [u8; 3] {
        [(self.0 >> 16) as u8, (self.0 >> 8) as u8, self.0 as u8]
    }
}

const PALETTE: [u32; 8] = [
    0x1F77B4, 0xFF7F0E, 0x2CA02C, 0xD62728, 0x9467BD, 0x8C564B, 0xE377C2, 0x17BECF,
];

/// Stable per-channel trace color.
pub fn channel_color(index: usize) -> Color {
    Color(PALETTE[index % PALETTE.len()])
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LineSeries {
    pub name: String,
    pub points: Vec<[f64; 2]>,
    pub style: Style,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Series {
    Line(LineSeries),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Figure {
    pub title: Option<String>,
    pub x: Axis,
    pub y: Axis,
    pub series: Vec<Series>,
}

impl Figure {
    pub fn new(title: impl Into<Option<String>>) -> Self {
        Self {
            title: title.into(),
            x: Axis::default(),
            y: Axis::default(),
            series: Vec::new(),
        }
    }

    pub fn add_series(&mut self, series: Series) {
        self.series.push(series);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn color_splits_into_channels() {
        assert_eq!(Color(0x1F77B4).rgb(), [0x1F, 0x77, 0xB4]);
        assert_eq!(channel_color(9), channel_color(1));
    }
}
