#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use metta_voice::audio::bell::SoundSource;
use metta_voice::audio::{AudioClip, AudioOutput, PlaybackHandle};
use metta_voice::settings::{MemorySettings, Settings};
use metta_voice::speech::{ProviderKind, ProviderSelection, SpeechProvider, Voice, VoiceCatalog};
use metta_voice::{Result, SpeechError};

pub const VOICE: &str = "test-voice";

/// Settings with an enabled provider and a selected voice.
pub fn ready_settings() -> Arc<MemorySettings> {
    Arc::new(MemorySettings::new(Settings {
        tts: ProviderSelection {
            kind: ProviderKind::OpenAi,
            enabled: true,
            voice: Some(VOICE.into()),
            ..Default::default()
        },
        ..Default::default()
    }))
}

// --- speech ---

/// Scriptable provider that records what it was asked to speak.
pub struct FakeProvider {
    kind: ProviderKind,
    voices: Vec<Voice>,
    default_delay: Duration,
    delays: Mutex<HashMap<String, Duration>>,
    failure: Mutex<Option<(usize, SpeechError)>>,
    hang: AtomicBool,
    pub calls: Mutex<Vec<String>>,
    pub completed: Mutex<Vec<String>>,
    active: AtomicUsize,
    pub max_active: AtomicUsize,
    pub stops: AtomicUsize,
    pub nudges: AtomicUsize,
}

impl FakeProvider {
    pub fn new(kind: ProviderKind) -> Arc<Self> {
        Self::with_voices(kind, vec![Voice::new(VOICE, "Test Voice", Some("en-US"))])
    }

    pub fn with_voices(kind: ProviderKind, voices: Vec<Voice>) -> Arc<Self> {
        Arc::new(Self {
            kind,
            voices,
            default_delay: Duration::from_millis(200),
            delays: Mutex::new(HashMap::new()),
            failure: Mutex::new(None),
            hang: AtomicBool::new(false),
            calls: Mutex::new(Vec::new()),
            completed: Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            stops: AtomicUsize::new(0),
            nudges: AtomicUsize::new(0),
        })
    }

    pub fn delay(&self, text: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(text.to_string(), delay);
    }

    /// Fail the `call`-th synthesize call (1-based) with `error`.
    pub fn fail_on(&self, call: usize, error: SpeechError) {
        *self.failure.lock().unwrap() = Some((call, error));
    }

    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn completed(&self) -> Vec<String> {
        self.completed.lock().unwrap().clone()
    }

    pub fn stops(&self) -> usize {
        self.stops.load(Ordering::SeqCst)
    }
}

struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl SpeechProvider for FakeProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn list_voices(&self) -> Result<VoiceCatalog> {
        Ok(VoiceCatalog::new(self.voices.clone()))
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<()> {
        if !self.voices.iter().any(|v| v.id == voice_id) {
            return Err(SpeechError::InvalidVoice(voice_id.to_string()));
        }
        let call = {
            let mut calls = self.calls.lock().unwrap();
            calls.push(text.to_string());
            calls.len()
        };
        if let Some((n, error)) = self.failure.lock().unwrap().clone() {
            if n == call {
                return Err(error);
            }
        }

        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
        let _guard = ActiveGuard(&self.active);

        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        let delay = self
            .delays
            .lock()
            .unwrap()
            .get(text)
            .copied()
            .unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;

        self.completed.lock().unwrap().push(text.to_string());
        Ok(())
    }

    fn stop(&self) {
        self.stops.fetch_add(1, Ordering::SeqCst);
    }

    fn keep_alive(&self) {
        self.nudges.fetch_add(1, Ordering::SeqCst);
    }
}

// --- audio ---

pub struct FakeHandle {
    volume: Mutex<f32>,
    pub started: Instant,
    duration: Duration,
    stopped_at: Mutex<Option<Instant>>,
}

impl FakeHandle {
    pub fn stopped_at(&self) -> Option<Instant> {
        *self.stopped_at.lock().unwrap()
    }
}

impl PlaybackHandle for FakeHandle {
    fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = volume;
    }

    fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    fn is_finished(&self) -> bool {
        self.stopped_at().is_some() || Instant::now() >= self.started + self.duration
    }

    fn stop(&self) {
        self.stopped_at.lock().unwrap().get_or_insert_with(Instant::now);
    }
}

/// Output where every encoded byte is one millisecond of mono audio.
#[derive(Default)]
pub struct FakeOutput {
    handles: Mutex<Vec<Arc<FakeHandle>>>,
}

impl FakeOutput {
    pub fn handles(&self) -> Vec<Arc<FakeHandle>> {
        self.handles.lock().unwrap().clone()
    }
}

impl AudioOutput for FakeOutput {
    fn decode(&self, bytes: Vec<u8>) -> Result<AudioClip> {
        if bytes.is_empty() || bytes.starts_with(b"garbage") {
            return Err(SpeechError::Audio("undecodable".into()));
        }
        Ok(AudioClip::new(1, 1000, vec![0.0; bytes.len()]))
    }

    fn play(&self, clip: &AudioClip, volume: f32) -> Result<Arc<dyn PlaybackHandle>> {
        let handle = Arc::new(FakeHandle {
            volume: Mutex::new(volume),
            started: Instant::now(),
            duration: clip.duration(),
            stopped_at: Mutex::new(None),
        });
        self.handles.lock().unwrap().push(handle.clone());
        Ok(handle)
    }
}

/// Sound source serving fixed-length clips, optionally failing first.
pub struct FakeSoundSource {
    clip_ms: usize,
    failures_left: AtomicUsize,
    pub fetches: AtomicUsize,
}

impl FakeSoundSource {
    pub fn new(clip_ms: usize) -> Arc<Self> {
        Self::failing(clip_ms, 0)
    }

    pub fn failing(clip_ms: usize, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            clip_ms,
            failures_left: AtomicUsize::new(failures),
            fetches: AtomicUsize::new(0),
        })
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SoundSource for FakeSoundSource {
    async fn fetch(&self, sound_id: &str) -> Result<Vec<u8>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(SpeechError::SoundUnavailable(format!("{sound_id}: HTTP 503")));
        }
        Ok(vec![1; self.clip_ms])
    }
}
