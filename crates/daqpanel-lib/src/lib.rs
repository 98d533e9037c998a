pub mod acquisition;
pub mod broadcast;
pub mod channel;
pub mod config;
pub mod device;
pub mod error;
pub mod outputs;
pub mod plot;
pub mod recorder;
pub mod sample;
pub mod settings;

pub use acquisition::{Acquisition, AcquisitionStatus};
pub use broadcast::{ConfigBroadcaster, ConfigObserver};
pub use channel::{AnalogMode, ChannelId, DigitalMode};
pub use config::{ChannelPlan, DaqConfig};
pub use device::{list_devices, open_device, DaqDevice, DeviceInfo};
pub use error::{DaqError, Result};
pub use outputs::OutputPanel;
pub use plot::LivePlot;
pub use recorder::{Recorder, RecordingStatus};
pub use sample::{sample_queue, Sample, SampleReceiver, SampleSender};
pub use settings::{Backend, Settings};
