use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use log::{debug, error};

use super::device::DeviceManager;
use crate::error::DecoderError;

/// Interleaved samples handed from the decode thread to the output callback
pub struct SampleQueue {
    samples: Mutex<VecDeque<f32>>,
    channels: usize,
    capacity: usize,
    playing: AtomicBool,
    frames_played: AtomicU64,
}

impl SampleQueue {
    /// `capacity_frames` bounds how far decoding may run ahead of playback
    pub fn new(channels: usize, capacity_frames: usize) -> Self {
        let channels = channels.max(1);
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity_frames * channels)),
            channels,
            capacity: capacity_frames * channels,
            playing: AtomicBool::new(false),
            frames_played: AtomicU64::new(0),
        }
    }

    fn samples(&self) -> MutexGuard<'_, VecDeque<f32>> {
        self.samples.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn push(&self, samples: &[f32]) {
        self.samples().extend(samples.iter().copied());
    }

    /// Free room in samples; may be zero when decoding is ahead
    pub fn free_space(&self) -> usize {
        self.capacity.saturating_sub(self.samples().len())
    }

    pub fn is_empty(&self) -> bool {
        self.samples().is_empty()
    }

    pub fn clear(&self) {
        self.samples().clear();
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn frames_played(&self) -> u64 {
        self.frames_played.load(Ordering::SeqCst)
    }

    pub fn reset_frames_played(&self) {
        self.frames_played.store(0, Ordering::SeqCst);
    }

    /// Fill one device buffer. Paused or starved output is silence.
    pub fn fill<T>(&self, out: &mut [T])
    where
        T: cpal::Sample + cpal::FromSample<f32>,
    {
        if !self.is_playing() {
            out.fill(T::from_sample(0.0f32));
            return;
        }

        let mut samples = self.samples();
        let available = samples.len().min(out.len());
        let available = available - available % self.channels;
        for (slot, sample) in out.iter_mut().zip(samples.drain(..available)) {
            *slot = T::from_sample(sample);
        }
        for slot in out[available..].iter_mut() {
            *slot = T::from_sample(0.0f32);
        }
        drop(samples);

        self.frames_played
            .fetch_add((available / self.channels) as u64, Ordering::SeqCst);
    }
}

/// A running cpal output stream fed from a [`SampleQueue`].
///
/// cpal streams are not `Send` on every platform, so an output lives and
/// dies on the thread that opened it.
pub struct AudioOutput {
    _stream: Stream,
    queue: Arc<SampleQueue>,
    sample_rate: u32,
}

impl AudioOutput {
    pub fn open(preferred_device: Option<&str>, buffer_ms: u32) -> Result<Self, DecoderError> {
        let mut devices = DeviceManager::new()?;
        devices.select_device_with_fallback(preferred_device)?;
        let default_config = devices.current_config()?;
        let device = devices
            .current_device()
            .ok_or_else(|| DecoderError::Output("No output device selected".to_string()))?;

        let config: StreamConfig = default_config.config();
        let sample_rate = config.sample_rate.0;
        let capacity_frames = (sample_rate as usize * buffer_ms as usize / 1000).max(1024);
        let queue = Arc::new(SampleQueue::new(config.channels as usize, capacity_frames));

        let stream = match default_config.sample_format() {
            SampleFormat::F32 => build_stream::<f32>(device, &config, &queue)?,
            SampleFormat::I16 => build_stream::<i16>(device, &config, &queue)?,
            SampleFormat::U16 => build_stream::<u16>(device, &config, &queue)?,
            other => {
                return Err(DecoderError::Output(format!(
                    "Unsupported sample format: {:?}",
                    other
                )))
            }
        };
        stream
            .play()
            .map_err(|e| DecoderError::Output(format!("Failed to start output stream: {}", e)))?;

        debug!(
            "Output open on {} at {} Hz, {} channels",
            devices.current_device_name().unwrap_or_else(|| "unknown device".to_string()),
            sample_rate,
            config.channels
        );
        Ok(Self {
            _stream: stream,
            queue,
            sample_rate,
        })
    }

    pub fn queue(&self) -> &Arc<SampleQueue> {
        &self.queue
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn channels(&self) -> usize {
        self.queue.channels()
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    queue: &Arc<SampleQueue>,
) -> Result<Stream, DecoderError>
where
    T: cpal::Sample + cpal::SizedSample + cpal::FromSample<f32> + Send + 'static,
{
    let queue = Arc::clone(queue);
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| queue.fill(data),
            move |err| error!("Audio stream error: {}", err),
            None,
        )
        .map_err(|e| DecoderError::Output(format!("Failed to build output stream: {}", e)))
}
