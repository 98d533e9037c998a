use crate::broadcast::ConfigObserver;
use crate::channel::DIGITAL_LINES;
use crate::config::{ChannelPlan, DaqConfig};
use crate::error::Result;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct OutputToggle {
    pub enabled: bool,
    pub high: bool,
}

/// Operator-facing state of the DO0..DO7 toggles.
#[derive(Debug, Clone, Default)]
pub struct OutputPanel {
    toggles: [OutputToggle; DIGITAL_LINES],
}

impl OutputPanel {
    pub fn toggles(&self) -> &[OutputToggle; DIGITAL_LINES] {
        &self.toggles
    }

    pub fn is_enabled(&self, line: u8) -> bool {
        self.toggles
            .get(line as usize)
            .map(|t| t.enabled)
            .unwrap_or(false)
    }

    /// Flip an enabled line and return its new level.
    pub fn toggle(&mut self, line: u8) -> Option<bool> {
        let toggle = self.toggles.get_mut(line as usize)?;
        if !toggle.enabled {
            return None;
        }
        toggle.high = !toggle.high;
        Some(toggle.high)
    }
}

impl ConfigObserver for OutputPanel {
    fn apply_config(&mut self, _config: &DaqConfig, plan: &ChannelPlan) -> Result<()> {
        self.toggles = [OutputToggle::default(); DIGITAL_LINES];
        for line in &plan.digital_outputs {
            if let Some(toggle) = self.toggles.get_mut(*line as usize) {
                toggle.enabled = true;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::DigitalMode;

    #[test]
    fn only_enabled_output_lines_toggle() {
        let mut config = DaqConfig::default();
        config.digital[2].enabled = true;
        config.digital[2].mode = DigitalMode::Output;
        config.digital[3].mode = DigitalMode::Output;
        config.digital[4].enabled = true;
        let mut panel = OutputPanel::default();
        panel.apply_config(&config, &config.plan(1)).unwrap();

        assert_eq!(panel.toggle(2), Some(true));
        assert_eq!(panel.toggle(2), Some(false));
        assert_eq!(panel.toggle(3), None);
        assert_eq!(panel.toggle(4), None);
        assert_eq!(panel.toggle(9), None);
    }

    #[test]
    fn broadcast_resets_levels() {
        let mut config = DaqConfig::default();
        config.digital[0].enabled = true;
        config.digital[0].mode = DigitalMode::Output;
        let mut panel = OutputPanel::default();
        panel.apply_config(&config, &config.plan(1)).unwrap();
        panel.toggle(0);
        assert!(panel.toggles()[0].high);
        panel.apply_config(&config, &config.plan(2)).unwrap();
        assert_eq!(panel.toggles()[0], OutputToggle { enabled: true, high: false });
    }
}
