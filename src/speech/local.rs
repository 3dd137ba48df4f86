use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::{ProviderKind, SpeechProvider, Voice, VoiceCatalog};
use crate::audio::clamp_volume;
use crate::error::{Result, SpeechError};

/// How long to wait for the host to populate its voice list.
const VOICE_WAIT: Duration = Duration::from_secs(5);
const VOICE_POLL: Duration = Duration::from_millis(100);

/// The host's built-in synthesizer.
///
/// `speak` resolves when the utterance ends; `cancel` must make a pending
/// `speak` resolve promptly.
#[async_trait]
pub trait SpeechEngine: Send + Sync {
    /// Currently known voices. May be empty while the host is still loading.
    fn voices(&self) -> Vec<Voice>;
    async fn speak(&self, text: &str, voice_id: &str, volume: f32) -> Result<()>;
    fn is_speaking(&self) -> bool;
    /// Keep-alive hooks. Engines without a pause control keep the no-op
    /// defaults.
    fn pause(&self) {}
    fn resume(&self) {}
    fn cancel(&self);
}

pub struct LocalProvider {
    engine: Arc<dyn SpeechEngine>,
    catalog: RwLock<Option<VoiceCatalog>>,
    volume: Mutex<f32>,
}

impl LocalProvider {
    pub fn new(engine: Arc<dyn SpeechEngine>) -> Self {
        Self {
            engine,
            catalog: RwLock::new(None),
            volume: Mutex::new(1.0),
        }
    }

    fn knows_voice(&self, voice_id: &str) -> bool {
        self.catalog
            .read()
            .unwrap()
            .as_ref()
            .is_some_and(|c| c.contains(voice_id))
    }
}

/// Cancels the engine if a `speak` future is dropped before it finishes.
struct CancelOnDrop<'a> {
    engine: &'a dyn SpeechEngine,
    armed: bool,
}

impl Drop for CancelOnDrop<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("Utterance abandoned, cancelling host speech");
            self.engine.cancel();
        }
    }
}

#[async_trait]
impl SpeechProvider for LocalProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    async fn list_voices(&self) -> Result<VoiceCatalog> {
        let deadline = tokio::time::Instant::now() + VOICE_WAIT;
        let voices = loop {
            let voices = self.engine.voices();
            if !voices.is_empty() {
                break voices;
            }
            if tokio::time::Instant::now() >= deadline {
                warn!("Host voices did not load within {VOICE_WAIT:?}");
                return Err(SpeechError::Timeout);
            }
            tokio::time::sleep(VOICE_POLL).await;
        };

        let catalog = VoiceCatalog::new(voices);
        *self.catalog.write().unwrap() = Some(catalog.clone());
        Ok(catalog)
    }

    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<()> {
        if !self.knows_voice(voice_id) {
            return Err(SpeechError::InvalidVoice(voice_id.to_string()));
        }

        let volume = *self.volume.lock().unwrap();
        let mut guard = CancelOnDrop {
            engine: self.engine.as_ref(),
            armed: true,
        };
        let result = self.engine.speak(text, voice_id, volume).await;
        guard.armed = false;
        result
    }

    fn stop(&self) {
        self.engine.cancel();
    }

    /// Some host engines stall on long utterances unless nudged.
    fn keep_alive(&self) {
        if self.engine.is_speaking() {
            self.engine.pause();
            self.engine.resume();
        }
    }

    fn set_volume(&self, volume: f32) {
        *self.volume.lock().unwrap() = clamp_volume(volume);
    }
}

fn locale_matches(voice: &Voice, locale: &str) -> bool {
    voice
        .locale
        .as_deref()
        .is_some_and(|l| l.replace('_', "-").eq_ignore_ascii_case(locale))
}

fn is_english(voice: &Voice) -> bool {
    voice
        .locale
        .as_deref()
        .is_some_and(|l| l.to_ascii_lowercase().starts_with("en"))
}

/// Preferred voice when none is selected: Daniel (en-GB), then the host
/// default for en-GB, any en-GB, the default for en-US, any en-US and
/// finally any English voice.
pub fn default_local_voice(catalog: &VoiceCatalog) -> Option<&Voice> {
    let voices = catalog.voices();
    let pick = |pred: &dyn Fn(&Voice) -> bool| voices.iter().find(|v| pred(v));

    pick(&|v| v.name.contains("Daniel") && locale_matches(v, "en-GB"))
        .or_else(|| pick(&|v| v.is_default && locale_matches(v, "en-GB")))
        .or_else(|| pick(&|v| locale_matches(v, "en-GB")))
        .or_else(|| pick(&|v| v.is_default && locale_matches(v, "en-US")))
        .or_else(|| pick(&|v| locale_matches(v, "en-US")))
        .or_else(|| pick(&is_english))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct FakeEngine {
        voices: Mutex<Vec<Voice>>,
        spoken: Mutex<Vec<String>>,
        cancels: AtomicU32,
        hang: AtomicBool,
        speaking: AtomicBool,
        nudges: Mutex<Vec<&'static str>>,
    }

    #[async_trait]
    impl SpeechEngine for FakeEngine {
        fn voices(&self) -> Vec<Voice> {
            self.voices.lock().unwrap().clone()
        }

        async fn speak(&self, text: &str, _voice_id: &str, _volume: f32) -> Result<()> {
            self.spoken.lock().unwrap().push(text.to_string());
            if self.hang.load(Ordering::SeqCst) {
                std::future::pending::<()>().await;
            }
            Ok(())
        }

        fn is_speaking(&self) -> bool {
            self.speaking.load(Ordering::SeqCst)
        }

        fn pause(&self) {
            self.nudges.lock().unwrap().push("pause");
        }

        fn resume(&self) {
            self.nudges.lock().unwrap().push("resume");
        }

        fn cancel(&self) {
            self.cancels.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn voice(id: &str, name: &str, locale: &str, is_default: bool) -> Voice {
        Voice {
            is_default,
            ..Voice::new(id, name, Some(locale))
        }
    }

    #[test]
    fn default_voice_prefers_daniel_then_british() {
        let catalog = VoiceCatalog::new(vec![
            voice("us", "Samantha", "en-US", true),
            voice("gb", "Kate", "en-GB", false),
            voice("dan", "Daniel", "en_GB", false),
        ]);
        assert_eq!(default_local_voice(&catalog).unwrap().id, "dan");

        let catalog = VoiceCatalog::new(vec![
            voice("us", "Samantha", "en-US", true),
            voice("au", "Karen", "en-AU", false),
        ]);
        assert_eq!(default_local_voice(&catalog).unwrap().id, "us");

        let catalog = VoiceCatalog::new(vec![
            voice("de", "Anna", "de-DE", true),
            voice("au", "Karen", "en-AU", false),
        ]);
        assert_eq!(default_local_voice(&catalog).unwrap().id, "au");

        let catalog = VoiceCatalog::new(vec![voice("de", "Anna", "de-DE", true)]);
        assert!(default_local_voice(&catalog).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn voice_list_times_out_when_host_never_loads() {
        let provider = LocalProvider::new(Arc::new(FakeEngine::default()));
        assert_eq!(provider.list_voices().await, Err(SpeechError::Timeout));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_voice_fails_without_speaking() {
        let engine = Arc::new(FakeEngine::default());
        engine.voices.lock().unwrap().push(voice("a", "A", "en-US", true));
        let provider = LocalProvider::new(engine.clone());
        provider.list_voices().await.unwrap();

        let err = provider.synthesize("hello", "missing").await.unwrap_err();
        assert_eq!(err, SpeechError::InvalidVoice("missing".into()));
        assert!(engine.spoken.lock().unwrap().is_empty());

        provider.synthesize("hello", "a").await.unwrap();
        assert_eq!(*engine.spoken.lock().unwrap(), vec!["hello"]);
    }

    #[tokio::test(start_paused = true)]
    async fn dropping_an_utterance_cancels_the_engine() {
        let engine = Arc::new(FakeEngine::default());
        engine.voices.lock().unwrap().push(voice("a", "A", "en-US", true));
        engine.hang.store(true, Ordering::SeqCst);
        let provider = LocalProvider::new(engine.clone());
        provider.list_voices().await.unwrap();

        let speak = provider.synthesize("a long phrase", "a");
        let timed_out = tokio::time::timeout(Duration::from_secs(1), speak).await;
        assert!(timed_out.is_err());
        assert_eq!(engine.cancels.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn keep_alive_pauses_and_resumes_only_while_speaking() {
        let engine = Arc::new(FakeEngine::default());
        let provider = LocalProvider::new(engine.clone());

        provider.keep_alive();
        assert!(engine.nudges.lock().unwrap().is_empty());

        engine.speaking.store(true, Ordering::SeqCst);
        provider.keep_alive();
        assert_eq!(*engine.nudges.lock().unwrap(), vec!["pause", "resume"]);
    }
}
