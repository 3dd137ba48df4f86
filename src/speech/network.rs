use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use tracing::{debug, warn};

use super::{ProviderKind, SpeechProvider, Voice, VoiceCatalog};
use crate::audio::{clamp_volume, ramp_volume, AudioContext, PlaybackHandle, FADE};
use crate::error::{Result, SpeechError};

pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Vendor-specific HTTP half of a networked provider.
#[async_trait]
pub trait VendorClient: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Voice list; doubles as the credential check.
    async fn voices(&self) -> Result<Vec<Voice>>;

    /// Encoded audio (mp3) for `text`.
    async fn synthesize_audio(&self, text: &str, voice_id: &str) -> Result<Vec<u8>>;
}

/// Map an unsuccessful vendor response to an error kind.
pub fn classify_status(status: StatusCode, body: &str) -> SpeechError {
    match status.as_u16() {
        401 | 403 => SpeechError::AuthenticationFailed,
        429 => SpeechError::RateLimited,
        500..=599 => SpeechError::ServiceUnavailable(format!("HTTP {status}")),
        _ => SpeechError::Upstream(vendor_message(body).unwrap_or_else(|| format!("HTTP {status}"))),
    }
}

pub fn classify_transport(err: reqwest::Error) -> SpeechError {
    if err.is_timeout() {
        SpeechError::Timeout
    } else {
        SpeechError::ServiceUnavailable(err.to_string())
    }
}

/// Pull a human-readable message out of a vendor JSON error body.
fn vendor_message(body: &str) -> Option<String> {
    let json: serde_json::Value = serde_json::from_str(body).ok()?;
    let candidates = [
        json.pointer("/error/message"),
        json.pointer("/detail/message"),
        json.pointer("/message"),
        json.pointer("/error"),
        json.pointer("/detail"),
    ];
    let found = candidates
        .into_iter()
        .flatten()
        .find_map(|v| v.as_str().map(str::to_string));
    found
}

struct Playing {
    id: u64,
    handle: Arc<dyn PlaybackHandle>,
}

/// Fetches audio from a vendor and plays it on the shared audio context.
pub struct NetworkProvider {
    client: Box<dyn VendorClient>,
    context: Arc<AudioContext>,
    catalog: RwLock<Option<VoiceCatalog>>,
    current: Arc<Mutex<Option<Playing>>>,
    volume: Mutex<f32>,
    next_id: AtomicU64,
}

impl NetworkProvider {
    pub fn new(client: Box<dyn VendorClient>, context: Arc<AudioContext>) -> Self {
        Self {
            client,
            context,
            catalog: RwLock::new(None),
            current: Arc::new(Mutex::new(None)),
            volume: Mutex::new(1.0),
            next_id: AtomicU64::new(1),
        }
    }

    fn knows_voice(&self, voice_id: &str) -> bool {
        self.catalog
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|c| c.contains(voice_id))
    }

    async fn fetch_audio(&self, text: &str, voice_id: &str) -> Result<Vec<u8>> {
        let bytes = tokio::time::timeout(REQUEST_TIMEOUT, self.client.synthesize_audio(text, voice_id))
            .await
            .map_err(|_| SpeechError::Timeout)??;
        if bytes.is_empty() {
            return Err(SpeechError::NoAudioReturned);
        }
        Ok(bytes)
    }
}

/// Stops and forgets a playback handle when the utterance ends or is
/// abandoned.
struct ReleaseOnDrop {
    slot: Arc<Mutex<Option<Playing>>>,
    id: u64,
}

impl Drop for ReleaseOnDrop {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap();
        if slot.as_ref().is_some_and(|p| p.id == self.id) {
            if let Some(playing) = slot.take() {
                playing.handle.stop();
            }
        }
    }
}

#[async_trait]
impl SpeechProvider for NetworkProvider {
    fn kind(&self) -> ProviderKind {
        self.client.kind()
    }

    async fn list_voices(&self) -> Result<VoiceCatalog> {
        let catalog = VoiceCatalog::new(self.client.voices().await?);
        debug!("{} offers {} voices", self.kind(), catalog.len());
        *self.catalog.write().unwrap() = Some(catalog.clone());
        Ok(catalog)
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<()> {
        if !self.knows_voice(voice_id) {
            return Err(SpeechError::InvalidVoice(voice_id.to_string()));
        }
        self.stop();

        let bytes = self.fetch_audio(text, voice_id).await?;
        let output = self.context.acquire().await?;
        let clip = output.decode(bytes).map_err(|e| {
            warn!("Undecodable audio from {}: {e}", self.kind());
            SpeechError::NoAudioReturned
        })?;

        let volume = *self.volume.lock().unwrap();
        let handle = output.play(&clip, volume)?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        *self.current.lock().unwrap() = Some(Playing {
            id,
            handle: handle.clone(),
        });
        let _release = ReleaseOnDrop {
            slot: self.current.clone(),
            id,
        };

        while !handle.is_finished() {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
        Ok(())
    }

    fn stop(&self) {
        if let Some(playing) = self.current.lock().unwrap().take() {
            playing.handle.stop();
        }
    }

    fn set_volume(&self, volume: f32) {
        let volume = clamp_volume(volume);
        *self.volume.lock().unwrap() = volume;
        let Some(handle) = self
            .current
            .lock()
            .unwrap()
            .as_ref()
            .map(|p| p.handle.clone())
        else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                rt.spawn(async move { ramp_volume(handle.as_ref(), volume, FADE).await });
            }
            Err(_) => handle.set_volume(volume),
        }
    }
}
