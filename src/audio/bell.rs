//! Meditation bells: fetch, decode, cache and play short sound effects.
//!
//! Bells are cosmetic next to the reading flow. Callers log and swallow
//! their failures instead of aborting a session.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{clamp_volume, ramp_volume, AudioClip, AudioContext, PlaybackHandle, FADE};
use crate::error::{Result, SpeechError};

pub const BELL_SOUNDS: &[&str] = &["tibetan-bowl", "zen-bell", "meditation-bell", "temple-bell"];
pub const DEFAULT_BELL_SOUND: &str = "tibetan-bowl";
pub const DEFAULT_BELL_SOURCE: &str =
    "https://raw.githubusercontent.com/betmig/mindmint/main/public/sounds";

const MAX_LOAD_RETRIES: u32 = 3;
const LOAD_BACKOFF: Duration = Duration::from_secs(1);
/// Bells ring on after the samples end; completion waits this long.
const REVERB_TAIL: Duration = Duration::from_secs(1);
/// Extra slack before the fallback timer declares a bell finished.
const ENDED_GRACE: Duration = Duration::from_millis(500);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Where encoded bell files come from.
#[async_trait]
pub trait SoundSource: Send + Sync {
    async fn fetch(&self, sound_id: &str) -> Result<Vec<u8>>;
}

/// `{base_url}/{sound_id}.mp3` over HTTPS.
pub struct HttpSoundSource {
    base_url: String,
    client: Client,
}

impl HttpSoundSource {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| SpeechError::SoundUnavailable(format!("HTTP client: {e}")))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }
}

#[async_trait]
impl SoundSource for HttpSoundSource {
    async fn fetch(&self, sound_id: &str) -> Result<Vec<u8>> {
        let url = format!("{}/{sound_id}.mp3", self.base_url);
        debug!("Fetching bell {url}");

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| SpeechError::SoundUnavailable(format!("{sound_id}: {e}")))?;

        if !resp.status().is_success() {
            return Err(SpeechError::SoundUnavailable(format!(
                "{sound_id}: HTTP {}",
                resp.status()
            )));
        }

        let bytes = resp
            .bytes()
            .await
            .map_err(|e| SpeechError::SoundUnavailable(format!("{sound_id}: {e}")))?;
        Ok(bytes.to_vec())
    }
}

/// `{dir}/{sound_id}.mp3` on disk.
pub struct DirSoundSource {
    dir: PathBuf,
}

impl DirSoundSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SoundSource for DirSoundSource {
    async fn fetch(&self, sound_id: &str) -> Result<Vec<u8>> {
        let path = self.dir.join(format!("{sound_id}.mp3"));
        tokio::fs::read(&path)
            .await
            .map_err(|e| SpeechError::SoundUnavailable(format!("{}: {e}", path.display())))
    }
}

/// Pick a source from a config string: URLs go over HTTP, anything else is a
/// directory.
pub fn sound_source(spec: &str) -> Result<Arc<dyn SoundSource>> {
    if spec.starts_with("http://") || spec.starts_with("https://") {
        Ok(Arc::new(HttpSoundSource::new(spec)?))
    } else {
        Ok(Arc::new(DirSoundSource::new(spec)))
    }
}

struct ActiveBell {
    id: u64,
    handle: Arc<dyn PlaybackHandle>,
    stopped: CancellationToken,
}

async fn fade_out(active: ActiveBell) {
    active.stopped.cancel();
    ramp_volume(active.handle.as_ref(), 0.0, FADE).await;
    active.handle.stop();
    debug!("Bell {} stopped", active.id);
}

/// Loads and plays bells on the shared audio context.
///
/// The engine's master volume plays the role of the persistent output gain;
/// each playing bell's handle gain is its fade envelope, scaled by the
/// master volume.
pub struct BellEngine {
    context: Arc<AudioContext>,
    source: Arc<dyn SoundSource>,
    cache: Mutex<HashMap<String, AudioClip>>,
    /// One lock per sound id so loads of different bells run side by side.
    load_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
    play_lock: AsyncMutex<()>,
    active: Mutex<Option<ActiveBell>>,
    volume: Mutex<f32>,
    next_id: AtomicU64,
}

impl BellEngine {
    pub fn new(context: Arc<AudioContext>, source: Arc<dyn SoundSource>) -> Self {
        Self {
            context,
            source,
            cache: Mutex::new(HashMap::new()),
            load_locks: Mutex::new(HashMap::new()),
            play_lock: AsyncMutex::new(()),
            active: Mutex::new(None),
            volume: Mutex::new(1.0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Return the decoded bell, fetching it on first use.
    ///
    /// Failed fetches or decodes are retried up to three times, one second
    /// apart, before giving up with `SoundUnavailable`.
    pub async fn load(&self, sound_id: &str) -> Result<AudioClip> {
        if let Some(clip) = self.cached(sound_id) {
            return Ok(clip);
        }

        // Concurrent loads of the same sound share one fetch.
        let lock = self.load_lock(sound_id);
        let _guard = lock.lock().await;
        if let Some(clip) = self.cached(sound_id) {
            return Ok(clip);
        }

        let mut retries = 0;
        loop {
            match self.fetch_and_decode(sound_id).await {
                Ok(clip) => {
                    info!("Loaded bell '{sound_id}' ({:.1}s)", clip.duration().as_secs_f32());
                    self.cache
                        .lock()
                        .unwrap()
                        .insert(sound_id.to_string(), clip.clone());
                    return Ok(clip);
                }
                Err(e) if retries < MAX_LOAD_RETRIES => {
                    retries += 1;
                    warn!("Failed to load bell '{sound_id}': {e}, retrying ({retries}/{MAX_LOAD_RETRIES})");
                    tokio::time::sleep(LOAD_BACKOFF).await;
                }
                Err(SpeechError::SoundUnavailable(msg)) => {
                    return Err(SpeechError::SoundUnavailable(msg))
                }
                Err(e) => return Err(SpeechError::SoundUnavailable(format!("{sound_id}: {e}"))),
            }
        }
    }

    fn load_lock(&self, sound_id: &str) -> Arc<AsyncMutex<()>> {
        self.load_locks
            .lock()
            .unwrap()
            .entry(sound_id.to_string())
            .or_default()
            .clone()
    }

    fn cached(&self, sound_id: &str) -> Option<AudioClip> {
        self.cache.lock().unwrap().get(sound_id).cloned()
    }

    async fn fetch_and_decode(&self, sound_id: &str) -> Result<AudioClip> {
        let output = self.context.acquire().await?;
        let bytes = self.source.fetch(sound_id).await?;
        output.decode(bytes)
    }

    /// Play a decoded bell, stopping any bell already ringing.
    ///
    /// Resolves once the sound plus its reverb tail has elapsed, or early if
    /// [`BellEngine::stop`] interrupts it.
    pub async fn play(&self, clip: &AudioClip) -> Result<()> {
        let (id, handle, stopped) = {
            let _guard = self.play_lock.lock().await;
            self.stop().await;

            let output = self.context.acquire().await?;
            let handle = output.play(clip, self.volume())?;
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            let stopped = CancellationToken::new();
            *self.active.lock().unwrap() = Some(ActiveBell {
                id,
                handle: handle.clone(),
                stopped: stopped.clone(),
            });
            (id, handle, stopped)
        };

        let ended = async {
            while !handle.is_finished() {
                tokio::time::sleep(POLL_INTERVAL).await;
            }
            tokio::time::sleep(REVERB_TAIL).await;
        };
        // Guards against the end of playback never being observed.
        let fallback = tokio::time::sleep(clip.duration() + REVERB_TAIL + ENDED_GRACE);

        tokio::select! {
            _ = stopped.cancelled() => return Ok(()),
            _ = ended => {}
            _ = fallback => debug!("Bell end not observed, releasing after fallback timer"),
        }

        self.release(id);
        Ok(())
    }

    /// Load and play a bell by id.
    pub async fn play_bell(&self, sound_id: &str) -> Result<()> {
        let clip = self.load(sound_id).await?;
        self.play(&clip).await
    }

    /// Fade out and release the ringing bell. No-op when silent.
    pub async fn stop(&self) {
        let Some(active) = self.active.lock().unwrap().take() else {
            return;
        };
        fade_out(active).await;
    }

    /// Like [`stop`](Self::stop), but returns at once: the bell is released
    /// immediately and its fade runs in the background.
    pub fn interrupt(&self) {
        let Some(active) = self.active.lock().unwrap().take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(fade_out(active));
            }
            Err(_) => {
                active.stopped.cancel();
                active.handle.stop();
            }
        }
    }

    fn release(&self, id: u64) {
        let mut active = self.active.lock().unwrap();
        if active.as_ref().is_some_and(|a| a.id == id) {
            if let Some(done) = active.take() {
                done.handle.stop();
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.active.lock().unwrap().is_some()
    }

    pub fn volume(&self) -> f32 {
        *self.volume.lock().unwrap()
    }

    /// Set the master volume, clamped to `[0, 1]`. A ringing bell ramps to the
    /// new level instead of stepping.
    pub fn set_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        *self.volume.lock().unwrap() = volume;

        let Some(handle) = self.active.lock().unwrap().as_ref().map(|a| a.handle.clone()) else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move { ramp_volume(handle.as_ref(), volume, FADE).await });
            }
            Err(_) => handle.set_volume(volume),
        }
    }

    pub fn clear_cache(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Stop playback, drop cached buffers and close the audio context.
    pub async fn shutdown(&self) {
        self.stop().await;
        self.clear_cache();
        self.context.close().await;
    }
}
