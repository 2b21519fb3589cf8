//! Audio output plumbing for the real decoder.

pub mod device;
pub mod output;
pub mod resampler;

pub use device::{DeviceCapabilities, DeviceManager};
pub use output::{AudioOutput, SampleQueue};
pub use resampler::{remap_channels, LinearResampler};
