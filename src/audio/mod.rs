//! Audio output shared by the bell engine and networked speech providers.
//!
//! The output device is a process-wide resource: [`AudioContext`] opens it
//! lazily on first use and releases it on [`AudioContext::close`]. Playback
//! goes through the [`AudioOutput`] / [`PlaybackHandle`] seams so providers
//! and bells never touch rodio directly.

pub mod bell;

use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use rodio::buffer::SamplesBuffer;
use rodio::{Decoder, OutputStream, OutputStreamBuilder, Sink, Source};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::{Result, SpeechError};

/// Fade length for stops and volume changes, short enough to be inaudible
/// as a delay but long enough to avoid clicks.
pub const FADE: Duration = Duration::from_millis(100);

const RAMP_STEPS: u32 = 10;
const OPEN_RETRIES: u32 = 3;
const OPEN_BACKOFF: Duration = Duration::from_secs(1);

/// Decoded PCM audio, cheap to clone.
#[derive(Clone)]
pub struct AudioClip {
    channels: u16,
    sample_rate: u32,
    samples: Arc<[f32]>,
}

impl AudioClip {
    pub fn new(channels: u16, sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            channels: channels.max(1),
            sample_rate: sample_rate.max(1),
            samples: samples.into(),
        }
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn duration(&self) -> Duration {
        let frames = self.samples.len() as f64 / self.channels as f64;
        Duration::from_secs_f64(frames / self.sample_rate as f64)
    }
}

impl std::fmt::Debug for AudioClip {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AudioClip")
            .field("channels", &self.channels)
            .field("sample_rate", &self.sample_rate)
            .field("duration", &self.duration())
            .finish()
    }
}

/// One playing sound.
pub trait PlaybackHandle: Send + Sync {
    fn set_volume(&self, volume: f32);
    fn volume(&self) -> f32;
    fn is_finished(&self) -> bool;
    /// Halt immediately and release the output node. Idempotent.
    fn stop(&self);
}

pub trait AudioOutput: Send + Sync {
    /// Decode an encoded file (mp3, wav, ogg, flac) into PCM.
    fn decode(&self, bytes: Vec<u8>) -> Result<AudioClip>;
    fn play(&self, clip: &AudioClip, volume: f32) -> Result<Arc<dyn PlaybackHandle>>;
}

/// Clamp a user volume into `[0, 1]`; NaN counts as silence.
pub fn clamp_volume(volume: f32) -> f32 {
    if volume.is_nan() {
        0.0
    } else {
        volume.clamp(0.0, 1.0)
    }
}

/// Linearly ramp a handle's gain to `target` over `over`.
pub async fn ramp_volume(handle: &dyn PlaybackHandle, target: f32, over: Duration) {
    let start = handle.volume();
    let step = over / RAMP_STEPS;
    for i in 1..=RAMP_STEPS {
        tokio::time::sleep(step).await;
        let t = i as f32 / RAMP_STEPS as f32;
        handle.set_volume(start + (target - start) * t);
    }
}

// --- rodio backend ---

/// rodio-backed output on the default device.
pub struct RodioOutput {
    stream: OutputStream,
}

impl RodioOutput {
    pub fn open() -> Result<Self> {
        let mut stream = OutputStreamBuilder::open_default_stream()
            .map_err(|e| SpeechError::Audio(format!("Failed to open audio output: {e}")))?;
        stream.log_on_drop(false);
        Ok(Self { stream })
    }
}

impl AudioOutput for RodioOutput {
    fn decode(&self, bytes: Vec<u8>) -> Result<AudioClip> {
        let decoder = Decoder::new(Cursor::new(bytes))
            .map_err(|e| SpeechError::Audio(format!("Failed to decode audio: {e}")))?;
        let channels = decoder.channels();
        let sample_rate = decoder.sample_rate();
        let samples: Vec<f32> = decoder.collect();

        if samples.is_empty() {
            return Err(SpeechError::Audio("decoded audio has no samples".into()));
        }
        debug!(
            "Decoded {} samples ({channels}ch @ {sample_rate}Hz)",
            samples.len()
        );
        Ok(AudioClip::new(channels, sample_rate, samples))
    }

    fn play(&self, clip: &AudioClip, volume: f32) -> Result<Arc<dyn PlaybackHandle>> {
        // rodio 0.21: Sink::connect_new takes &Mixer
        let sink = Sink::connect_new(self.stream.mixer());
        sink.set_volume(clamp_volume(volume));
        sink.append(SamplesBuffer::new(
            clip.channels(),
            clip.sample_rate(),
            clip.samples().to_vec(),
        ));
        Ok(Arc::new(RodioHandle { sink }))
    }
}

struct RodioHandle {
    sink: Sink,
}

impl PlaybackHandle for RodioHandle {
    fn set_volume(&self, volume: f32) {
        self.sink.set_volume(clamp_volume(volume));
    }

    fn volume(&self) -> f32 {
        self.sink.volume()
    }

    fn is_finished(&self) -> bool {
        self.sink.empty()
    }

    fn stop(&self) {
        self.sink.stop();
    }
}

// --- process-wide context ---

pub type OutputFactory = Box<dyn Fn() -> Result<Arc<dyn AudioOutput>> + Send + Sync>;

/// Lazily opened, explicitly closed audio device.
///
/// Once closed the context stays closed; it is never reopened behind the
/// caller's back.
pub struct AudioContext {
    factory: OutputFactory,
    state: AsyncMutex<ContextState>,
}

enum ContextState {
    Unopened,
    Open(Arc<dyn AudioOutput>),
    Closed,
}

impl AudioContext {
    pub fn new(factory: OutputFactory) -> Self {
        Self {
            factory,
            state: AsyncMutex::new(ContextState::Unopened),
        }
    }

    /// Context over the default rodio device.
    pub fn rodio() -> Self {
        Self::new(Box::new(|| {
            let output: Arc<dyn AudioOutput> = Arc::new(RodioOutput::open()?);
            Ok(output)
        }))
    }

    /// Context over an already constructed output.
    pub fn with_output(output: Arc<dyn AudioOutput>) -> Self {
        Self::new(Box::new(move || Ok(output.clone())))
    }

    /// Get the output, opening the device on first use.
    pub async fn acquire(&self) -> Result<Arc<dyn AudioOutput>> {
        let mut state = self.state.lock().await;
        match &*state {
            ContextState::Open(output) => return Ok(output.clone()),
            ContextState::Closed => {
                return Err(SpeechError::Audio("audio context has been closed".into()))
            }
            ContextState::Unopened => {}
        }

        let mut attempt = 0;
        let output = loop {
            match (self.factory)() {
                Ok(output) => break output,
                Err(e) if attempt < OPEN_RETRIES => {
                    attempt += 1;
                    warn!("Audio init failed: {e}, retrying ({attempt}/{OPEN_RETRIES})");
                    tokio::time::sleep(OPEN_BACKOFF).await;
                }
                Err(e) => return Err(e),
            }
        };

        info!("Audio output opened");
        *state = ContextState::Open(output.clone());
        Ok(output)
    }

    pub async fn is_open(&self) -> bool {
        matches!(&*self.state.lock().await, ContextState::Open(_))
    }

    /// Release the device. Safe to call repeatedly.
    pub async fn close(&self) {
        let mut state = self.state.lock().await;
        if matches!(&*state, ContextState::Open(_)) {
            info!("Audio output closed");
        }
        *state = ContextState::Closed;
    }
}
