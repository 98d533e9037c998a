//! Single source of truth for the channel configuration.

use log::{info, warn};

use crate::config::{ChannelPlan, DaqConfig};
use crate::error::{DaqError, Result};

/// Anything that must react when the channel configuration changes.
pub trait ConfigObserver {
    fn apply_config(&mut self, config: &DaqConfig, plan: &ChannelPlan) -> Result<()>;
}

/// Owns the current configuration and pushes every change, whole, to the
/// observers in the order given by the caller (recorder, acquisition, plot,
/// outputs).
#[derive(Debug, Default)]
pub struct ConfigBroadcaster {
    config: DaqConfig,
    generation: u64,
}

impl ConfigBroadcaster {
    pub fn new(config: DaqConfig) -> Self {
        Self {
            config: config.normalized(),
            generation: 0,
        }
    }

    pub fn config(&self) -> &DaqConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Normalize and store `config`, then broadcast it.
    pub fn update(
        &mut self,
        config: DaqConfig,
        observers: &mut [&mut dyn ConfigObserver],
    ) -> Result<ChannelPlan> {
        self.config = config.normalized();
        self.broadcast(observers)
    }

    /// Re-send the current configuration under a fresh generation. Every
    /// observer is visited even if an earlier one fails; the first failure is
    /// returned.
    pub fn broadcast(&mut self, observers: &mut [&mut dyn ConfigObserver]) -> Result<ChannelPlan> {
        self.generation += 1;
        let plan = self.config.plan(self.generation);
        info!(
            "Broadcasting configuration generation {} ({} input(s), {} output(s))",
            plan.generation,
            plan.inputs().len(),
            plan.digital_outputs.len()
        );
        let mut first_error: Option<DaqError> = None;
        for observer in observers.iter_mut() {
            if let Err(err) = observer.apply_config(&self.config, &plan) {
                warn!("Observer rejected configuration: {err}");
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(plan),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{AnalogMode, ChannelId};
    use std::cell::RefCell;
    use std::rc::Rc;

    struct Listener {
        name: &'static str,
        log: Rc<RefCell<Vec<(&'static str, u64)>>>,
        fail: bool,
    }

    impl ConfigObserver for Listener {
        fn apply_config(&mut self, config: &DaqConfig, plan: &ChannelPlan) -> Result<()> {
            assert!(!config.analog_locked(4) || !config.analog[4].enabled);
            self.log.borrow_mut().push((self.name, plan.generation));
            if self.fail {
                Err(DaqError::InvalidSetting(self.name.into()))
            } else {
                Ok(())
            }
        }
    }

    fn listener(name: &'static str, log: &Rc<RefCell<Vec<(&'static str, u64)>>>) -> Listener {
        Listener {
            name,
            log: log.clone(),
            fail: false,
        }
    }

    #[test]
    fn observers_receive_normalized_config_in_order() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut recorder = listener("recorder", &log);
        let mut acquisition = listener("acquisition", &log);
        let mut plot = listener("plot", &log);
        let mut broadcaster = ConfigBroadcaster::default();

        let mut config = DaqConfig::default();
        config.enable(ChannelId::Analog(0));
        config.enable(ChannelId::Analog(4));
        config.analog[0].mode = AnalogMode::Reference;
        let plan = broadcaster
            .update(config, &mut [&mut recorder, &mut acquisition, &mut plot])
            .unwrap();

        assert!(!broadcaster.config().analog[4].enabled);
        assert_eq!(plan.generation, 1);
        assert_eq!(plan.analog_inputs, vec![(0, AnalogMode::Reference)]);
        assert_eq!(
            *log.borrow(),
            vec![("recorder", 1), ("acquisition", 1), ("plot", 1)]
        );
    }

    #[test]
    fn failing_observer_does_not_starve_the_rest() {
        let log = Rc::new(RefCell::new(Vec::new()));
        let mut bad = Listener {
            name: "bad",
            log: log.clone(),
            fail: true,
        };
        let mut good = listener("good", &log);
        let mut broadcaster = ConfigBroadcaster::default();
        broadcaster.broadcast(&mut [&mut good]).unwrap();
        let err = broadcaster.broadcast(&mut [&mut bad, &mut good]).unwrap_err();
        assert!(matches!(err, DaqError::InvalidSetting(_)));
        assert_eq!(broadcaster.generation(), 2);
        assert_eq!(*log.borrow(), vec![("good", 1), ("bad", 2), ("good", 2)]);
    }
}
