use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::channel::ChannelId;

pub const DEFAULT_QUEUE_CAPACITY: usize = 1000;

/// One timestamped reading across the channels of the active plan.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Seconds since acquisition started.
    pub timestamp: f64,
    /// Generation of the channel plan the sample was acquired under.
    pub generation: u64,
    pub values: Vec<(ChannelId, f64)>,
}

impl Sample {
    pub fn new(timestamp: f64, generation: u64) -> Self {
        Self {
            timestamp,
            generation,
            values: Vec::new(),
        }
    }

    pub fn push(&mut self, channel: ChannelId, value: f64) {
        self.values.push((channel, value));
    }

    pub fn get(&self, channel: ChannelId) -> Option<f64> {
        self.values
            .iter()
            .find(|(id, _)| *id == channel)
            .map(|(_, value)| *value)
    }
}

/// Producer half of a bounded sample queue. Pushing never blocks; a full
/// queue drops the new sample and counts it.
#[derive(Clone)]
pub struct SampleSender {
    tx: Sender<Sample>,
    dropped: Arc<AtomicU64>,
}

#[derive(Clone)]
pub struct SampleReceiver {
    rx: Receiver<Sample>,
    dropped: Arc<AtomicU64>,
}

pub fn sample_queue(capacity: usize) -> (SampleSender, SampleReceiver) {
    let (tx, rx) = bounded(capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    (
        SampleSender {
            tx,
            dropped: dropped.clone(),
        },
        SampleReceiver { rx, dropped },
    )
}

impl SampleSender {
    /// Returns `true` when the sample was queued.
    pub fn push(&self, sample: Sample) -> bool {
        match self.tx.try_send(sample) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl SampleReceiver {
    pub fn try_pop(&self) -> Option<Sample> {
        self.rx.try_recv().ok()
    }

    /// Take everything currently queued.
    pub fn drain(&self) -> Vec<Sample> {
        self.rx.try_iter().collect()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(t: f64) -> Sample {
        let mut s = Sample::new(t, 0);
        s.push(ChannelId::Analog(0), t * 2.0);
        s
    }

    #[test]
    fn full_queue_drops_newest_and_counts() {
        let (tx, rx) = sample_queue(2);
        assert!(tx.push(sample(0.0)));
        assert!(tx.push(sample(1.0)));
        assert!(!tx.push(sample(2.0)));
        assert_eq!(rx.dropped(), 1);
        let kept: Vec<f64> = rx.drain().iter().map(|s| s.timestamp).collect();
        assert_eq!(kept, vec![0.0, 1.0]);
        assert!(rx.is_empty());
        assert!(tx.push(sample(3.0)));
        assert_eq!(tx.dropped(), 1);
    }

    #[test]
    fn sample_lookup_by_channel() {
        let s = sample(1.5);
        assert_eq!(s.get(ChannelId::Analog(0)), Some(3.0));
        assert_eq!(s.get(ChannelId::Digital(0)), None);
    }
}
