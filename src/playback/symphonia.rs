//! [`Decoder`] backed by symphonia for demuxing/decoding and cpal for output.
//!
//! Each prepare runs on its own thread: open the source, probe it, open the
//! output device, report `Prepared`, then decode ahead of the output
//! callback until the source ends or the session is stopped.

use std::fs::File;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{mpsc, Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use log::{debug, info, warn};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{Decoder as CodecDecoder, DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::{FormatOptions, FormatReader, SeekMode, SeekTo};
use symphonia::core::io::{MediaSourceStream, ReadOnlySource};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use symphonia::core::units::Time;

use super::{Decoder, DecoderSink, SessionId};
use crate::audio::{remap_channels, AudioOutput, LinearResampler, SampleQueue};
use crate::error::DecoderError;

const DEFAULT_BUFFER_MS: u32 = 2000;
const IDLE_WAIT: Duration = Duration::from_millis(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

enum SessionCommand {
    Seek(u64),
    Stop,
}

/// State shared between the decoder handle and one session thread
#[derive(Default)]
struct SessionShared {
    playing: AtomicBool,
    stopped: AtomicBool,
    position_ms: AtomicU64,
    duration_ms: AtomicU64,
    queue: Mutex<Option<Arc<SampleQueue>>>,
}

impl SessionShared {
    fn queue(&self) -> MutexGuard<'_, Option<Arc<SampleQueue>>> {
        self.queue.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn set_playing(&self, playing: bool) {
        let queue = self.queue();
        let playing = playing && !self.stopped.load(Ordering::SeqCst);
        self.playing.store(playing, Ordering::SeqCst);
        if let Some(queue) = queue.as_ref() {
            queue.set_playing(playing);
        }
    }

    fn attach(&self, queue: Arc<SampleQueue>) {
        let mut slot = self.queue();
        queue.set_playing(self.playing.load(Ordering::SeqCst));
        *slot = Some(queue);
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::SeqCst);
        self.set_playing(false);
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }
}

struct SessionThread {
    id: SessionId,
    commands: mpsc::Sender<SessionCommand>,
    shared: Arc<SessionShared>,
}

impl SessionThread {
    /// Silence the session at once; the thread exits at its next command check
    fn stop(self) {
        self.shared.stop();
        if self.commands.send(SessionCommand::Stop).is_err() {
            debug!("Decoder session {} already finished", self.id);
        }
    }
}

pub struct SymphoniaDecoder {
    preferred_device: Option<String>,
    buffer_ms: u32,
    sink: Option<DecoderSink>,
    source: Option<String>,
    session: Option<SessionThread>,
}

impl SymphoniaDecoder {
    pub fn new(preferred_device: Option<String>) -> Self {
        Self {
            preferred_device,
            buffer_ms: DEFAULT_BUFFER_MS,
            sink: None,
            source: None,
            session: None,
        }
    }

    /// How far decoding may run ahead of the output, in milliseconds
    pub fn with_buffer_ms(mut self, buffer_ms: u32) -> Self {
        self.buffer_ms = buffer_ms.max(100);
        self
    }

    fn stop_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.stop();
        }
    }

    fn shared(&self) -> Option<&Arc<SessionShared>> {
        self.session.as_ref().map(|s| &s.shared)
    }
}

impl Decoder for SymphoniaDecoder {
    fn set_event_sink(&mut self, sink: DecoderSink) {
        self.sink = Some(sink);
    }

    fn reset(&mut self) {
        self.stop_session();
        self.source = None;
    }

    fn set_data_source(&mut self, url: &str) -> Result<(), DecoderError> {
        if url.trim().is_empty() {
            return Err(DecoderError::NoDataSource);
        }
        self.source = Some(url.to_string());
        Ok(())
    }

    fn prepare_async(&mut self, session: SessionId) -> Result<(), DecoderError> {
        let url = self.source.clone().ok_or(DecoderError::NoDataSource)?;
        let sink = self
            .sink
            .clone()
            .ok_or_else(|| DecoderError::Open("no event sink attached".to_string()))?;
        self.stop_session();

        let (commands, receiver) = mpsc::channel();
        let shared = Arc::new(SessionShared::default());
        let context = SessionContext {
            session,
            url,
            sink,
            shared: Arc::clone(&shared),
            commands: receiver,
            preferred_device: self.preferred_device.clone(),
            buffer_ms: self.buffer_ms,
        };

        thread::Builder::new()
            .name(format!("decoder-session-{}", session))
            .spawn(move || run_session(context))
            .map_err(|e| DecoderError::Open(format!("Failed to spawn decoder thread: {}", e)))?;

        self.session = Some(SessionThread {
            id: session,
            commands,
            shared,
        });
        Ok(())
    }

    fn start(&mut self) {
        if let Some(shared) = self.shared() {
            shared.set_playing(true);
        }
    }

    fn pause(&mut self) {
        if let Some(shared) = self.shared() {
            shared.set_playing(false);
        }
    }

    fn stop(&mut self) {
        self.stop_session();
    }

    fn seek_to(&mut self, position_ms: u64) {
        if let Some(session) = &self.session {
            session.shared.position_ms.store(position_ms, Ordering::SeqCst);
            if session.commands.send(SessionCommand::Seek(position_ms)).is_err() {
                debug!("Seek after decoder session {} ended", session.id);
            }
        }
    }

    fn current_position(&self) -> u64 {
        self.shared()
            .map_or(0, |shared| shared.position_ms.load(Ordering::SeqCst))
    }

    fn duration(&self) -> u64 {
        self.shared()
            .map_or(0, |shared| shared.duration_ms.load(Ordering::SeqCst))
    }

    fn is_playing(&self) -> bool {
        self.shared()
            .map_or(false, |shared| shared.playing.load(Ordering::SeqCst))
    }

    fn release(&mut self) {
        self.stop_session();
        self.source = None;
        self.sink = None;
    }
}

impl Drop for SymphoniaDecoder {
    fn drop(&mut self) {
        self.stop_session();
    }
}

struct SessionContext {
    session: SessionId,
    url: String,
    sink: DecoderSink,
    shared: Arc<SessionShared>,
    commands: mpsc::Receiver<SessionCommand>,
    preferred_device: Option<String>,
    buffer_ms: u32,
}

fn run_session(context: SessionContext) {
    raise_thread_priority();

    if let Err(e) = play_session(&context) {
        if context.shared.is_stopped() {
            debug!("Session {} stopped while failing: {}", context.session, e);
        } else {
            warn!("Decoder session {} failed: {}", context.session, e);
            context.shared.set_playing(false);
            context.sink.decoder_error(context.session, &e);
        }
    }
    debug!("Decoder session {} finished", context.session);
}

/// Raise the priority of the decoding thread where the platform allows it
#[cfg(target_os = "macos")]
fn raise_thread_priority() {
    unsafe {
        let thread = libc::pthread_self();
        let mut policy: libc::c_int = 0;
        let mut param: libc::sched_param = std::mem::zeroed();
        if libc::pthread_getschedparam(thread, &mut policy, &mut param) == 0 {
            param.sched_priority = 47;
            let _ = libc::pthread_setschedparam(thread, libc::SCHED_RR, &param);
        }
    }
}

#[cfg(not(target_os = "macos"))]
fn raise_thread_priority() {}

/// An opened and probed source, ready to decode
pub(crate) struct MediaTrack {
    format: Box<dyn FormatReader>,
    decoder: Box<dyn CodecDecoder>,
    track_id: u32,
    pub sample_rate: u32,
    pub duration_ms: u64,
}

pub(crate) fn open_media(
    url: &str,
    sink: &DecoderSink,
    session: SessionId,
) -> Result<MediaTrack, DecoderError> {
    let reader = open_source(url, sink, session)?;
    let stream = MediaSourceStream::new(Box::new(ReadOnlySource::new(reader)), Default::default());

    let mut hint = Hint::new();
    if let Some(extension) = extension_of(url) {
        hint.with_extension(extension);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, stream, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| DecoderError::Unsupported(e.to_string()))?;
    let format = probed.format;

    let track = format
        .default_track()
        .filter(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .or_else(|| {
            format
                .tracks()
                .iter()
                .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        })
        .ok_or_else(|| DecoderError::Unsupported("no audio track".to_string()))?;
    let track_id = track.id;
    let params = track.codec_params.clone();

    let decoder = symphonia::default::get_codecs()
        .make(&params, &DecoderOptions::default())
        .map_err(|e| DecoderError::Unsupported(e.to_string()))?;

    let sample_rate = params.sample_rate.unwrap_or(44_100);
    let duration_ms = params
        .n_frames
        .map_or(0, |frames| frames * 1000 / sample_rate as u64);

    Ok(MediaTrack {
        format,
        decoder,
        track_id,
        sample_rate,
        duration_ms,
    })
}

fn play_session(context: &SessionContext) -> Result<(), DecoderError> {
    let MediaTrack {
        mut format,
        mut decoder,
        track_id,
        sample_rate,
        duration_ms,
    } = open_media(&context.url, &context.sink, context.session)?;
    if context.shared.is_stopped() {
        return Ok(());
    }
    context.shared.duration_ms.store(duration_ms, Ordering::SeqCst);

    let output = AudioOutput::open(context.preferred_device.as_deref(), context.buffer_ms)?;
    let queue = Arc::clone(output.queue());
    let out_rate = output.sample_rate().max(1);
    let out_channels = output.channels();
    context.shared.attach(Arc::clone(&queue));

    info!(
        "Session {} prepared: {} Hz source, {} ms",
        context.session, sample_rate, duration_ms
    );
    context.sink.prepared(context.session);

    let mut resampler: Option<LinearResampler> = None;
    let mut base_ms = 0u64;
    let mut finished = false;
    let mut completed = false;
    let mut resampled = Vec::new();

    loop {
        let idle = finished || queue.free_space() == 0;
        match context
            .commands
            .recv_timeout(if idle { IDLE_WAIT } else { Duration::ZERO })
        {
            Ok(SessionCommand::Stop) | Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
            Ok(SessionCommand::Seek(position_ms)) => {
                let time = Time::new(position_ms / 1000, (position_ms % 1000) as f64 / 1000.0);
                match format.seek(
                    SeekMode::Coarse,
                    SeekTo::Time {
                        time,
                        track_id: Some(track_id),
                    },
                ) {
                    Ok(_) => base_ms = position_ms,
                    Err(e) => warn!("Seek to {} ms failed: {}", position_ms, e),
                }
                queue.clear();
                queue.reset_frames_played();
                decoder.reset();
                if let Some(resampler) = resampler.as_mut() {
                    resampler.reset();
                }
                finished = false;
                completed = false;
            }
            Err(mpsc::RecvTimeoutError::Timeout) => {}
        }

        let played_ms = queue.frames_played() * 1000 / out_rate as u64;
        context
            .shared
            .position_ms
            .store(base_ms + played_ms, Ordering::SeqCst);

        if finished {
            if !completed && queue.is_empty() {
                completed = true;
                context.shared.set_playing(false);
                context.sink.completed(context.session);
            }
            continue;
        }
        if queue.free_space() == 0 {
            continue;
        }

        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                debug!("Session {} reached end of stream", context.session);
                finished = true;
                continue;
            }
            Err(SymphoniaError::ResetRequired) => {
                debug!("Session {} stream changed, ending", context.session);
                finished = true;
                continue;
            }
            Err(e) => return Err(DecoderError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                let spec = *decoded.spec();
                let mut samples = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                samples.copy_interleaved_ref(decoded);

                let mapped = remap_channels(samples.samples(), spec.channels.count(), out_channels);
                let resampler = resampler
                    .get_or_insert_with(|| LinearResampler::new(spec.rate, out_rate, out_channels));
                resampled.clear();
                resampler.process_into(&mapped, &mut resampled);
                queue.push(&resampled);
            }
            Err(SymphoniaError::DecodeError(e)) => debug!("Skipping bad packet: {}", e),
            Err(SymphoniaError::IoError(e)) => {
                debug!("Session {} read error, ending: {}", context.session, e);
                finished = true;
            }
            Err(e) => return Err(DecoderError::Decode(e.to_string())),
        }
    }
}

/// Reader that reports download progress through the sink
struct CountingReader {
    inner: Mutex<Box<dyn Read + Send>>,
    total: Option<u64>,
    read: u64,
    last_percent: Option<u8>,
    sink: DecoderSink,
    session: SessionId,
}

impl CountingReader {
    fn new(inner: Box<dyn Read + Send>, total: Option<u64>, sink: &DecoderSink, session: SessionId) -> Self {
        Self {
            inner: Mutex::new(inner),
            total: total.filter(|t| *t > 0),
            read: 0,
            last_percent: None,
            sink: sink.clone(),
            session,
        }
    }
}

impl Read for CountingReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let inner = self.inner.get_mut().unwrap_or_else(|p| p.into_inner());
        let n = inner.read(buf)?;
        self.read += n as u64;

        if let Some(total) = self.total {
            let percent = (self.read.saturating_mul(100) / total).min(100) as u8;
            if self.last_percent != Some(percent) {
                self.last_percent = Some(percent);
                self.sink.buffering(self.session, percent);
            }
        }
        Ok(n)
    }
}

fn open_source(url: &str, sink: &DecoderSink, session: SessionId) -> Result<CountingReader, DecoderError> {
    if url.starts_with("http://") || url.starts_with("https://") {
        // No overall timeout: live streams never finish
        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(None)
            .build()
            .map_err(|e| DecoderError::Open(e.to_string()))?;
        let response = client
            .get(url)
            .send()
            .and_then(|response| response.error_for_status())
            .map_err(|e| DecoderError::Open(format!("{}: {}", url, e)))?;
        let total = response.content_length();
        debug!("Opened {} ({:?} bytes)", url, total);
        Ok(CountingReader::new(Box::new(response), total, sink, session))
    } else {
        let path = url.strip_prefix("file://").unwrap_or(url);
        let file = File::open(path).map_err(|e| DecoderError::Open(format!("{}: {}", path, e)))?;
        let total = file.metadata().ok().map(|m| m.len());
        Ok(CountingReader::new(Box::new(file), total, sink, session))
    }
}

/// File extension of the path part of a URL, used as a probe hint
fn extension_of(url: &str) -> Option<&str> {
    let path = url.split(|c| c == '?' || c == '#').next().unwrap_or(url);
    let name = path.rsplit('/').next()?;
    let (_, extension) = name.rsplit_once('.')?;
    let plausible = !extension.is_empty()
        && extension.len() <= 5
        && extension.chars().all(|c| c.is_ascii_alphanumeric());
    plausible.then_some(extension)
}
