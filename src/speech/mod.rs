//! Speech synthesis providers.
//!
//! Every backend implements [`SpeechProvider`]. Backends are built through a
//! [`ProviderRegistry`] keyed by [`ProviderKind`], and the single active one
//! lives in [`ActiveProvider`]. [`ProviderManager`] applies a user's
//! provider selection: build, validate credentials, load the voice catalog,
//! write it back to settings and swap the active provider.

pub mod local;
#[cfg(feature = "native-tts")]
pub mod native;
pub mod network;
pub mod sigv4;
pub mod vendors;

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::AudioContext;
use crate::error::{Result, SpeechError};
use crate::settings::SettingsStore;

pub use local::{default_local_voice, LocalProvider, SpeechEngine};
pub use network::{NetworkProvider, VendorClient};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Local,
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "elevenlabs")]
    ElevenLabs,
    Azure,
    Polly,
    #[serde(rename = "wellsaid")]
    WellSaid,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::OpenAi => write!(f, "openai"),
            Self::ElevenLabs => write!(f, "elevenlabs"),
            Self::Azure => write!(f, "azure"),
            Self::Polly => write!(f, "polly"),
            Self::WellSaid => write!(f, "wellsaid"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub locale: Option<String>,
    #[serde(default)]
    pub is_default: bool,
}

impl Voice {
    pub fn new(id: impl Into<String>, name: impl Into<String>, locale: Option<&str>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            locale: locale.map(str::to_string),
            is_default: false,
        }
    }
}

/// Voices a provider offers, optionally grouped by locale code.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceCatalog {
    voices: Vec<Voice>,
}

impl VoiceCatalog {
    pub fn new(voices: Vec<Voice>) -> Self {
        Self { voices }
    }

    pub fn voices(&self) -> &[Voice] {
        &self.voices
    }

    pub fn get(&self, id: &str) -> Option<&Voice> {
        self.voices.iter().find(|v| v.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.voices.is_empty()
    }

    pub fn len(&self) -> usize {
        self.voices.len()
    }

    /// Group by locale (e.g. "en-US"); voices without one land under "".
    pub fn by_locale(&self) -> BTreeMap<String, Vec<&Voice>> {
        let mut groups: BTreeMap<String, Vec<&Voice>> = BTreeMap::new();
        for voice in &self.voices {
            groups
                .entry(voice.locale.clone().unwrap_or_default())
                .or_default()
                .push(voice);
        }
        groups
    }
}

/// Opaque per-vendor credential bundle. Vendors validate the format.
///
/// Key-based vendors read `api_key` (Azure also `region`); Polly reads
/// `access_key`, `secret_key` and optionally `region`.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    pub api_key: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mask = |v: &Option<String>| v.as_ref().map(|_| "***");
        f.debug_struct("Credentials")
            .field("api_key", &mask(&self.api_key))
            .field("access_key", &mask(&self.access_key))
            .field("secret_key", &mask(&self.secret_key))
            .field("region", &self.region)
            .finish()
    }
}

/// The user's provider choice as stored in settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSelection {
    pub kind: ProviderKind,
    pub enabled: bool,
    pub credentials: Credentials,
    pub voice: Option<String>,
    pub locale: Option<String>,
    /// Catalog written back after the provider was last initialized.
    pub voices: Option<VoiceCatalog>,
}

impl ProviderSelection {
    /// Check that reading may start; returns the resolved voice id.
    pub fn validate(&self) -> Result<&str> {
        if !self.enabled {
            return Err(SpeechError::Validation(
                "Text-to-speech is not enabled. Please enable it in settings.".into(),
            ));
        }
        match self.voice.as_deref() {
            Some(voice) if !voice.trim().is_empty() => Ok(voice),
            _ => Err(SpeechError::Validation(
                "Please select a voice in settings before reading.".into(),
            )),
        }
    }
}

/// One phrase to speak. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaybackRequest {
    text: String,
    voice_id: String,
}

impl PlaybackRequest {
    pub fn new(text: impl Into<String>, voice_id: impl Into<String>) -> Result<Self> {
        let text = text.into();
        let voice_id = voice_id.into();
        if text.trim().is_empty() {
            return Err(SpeechError::Validation("nothing to speak".into()));
        }
        if voice_id.trim().is_empty() {
            return Err(SpeechError::Validation(
                "Please select a voice in settings before reading.".into(),
            ));
        }
        Ok(Self { text, voice_id })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn voice_id(&self) -> &str {
        &self.voice_id
    }
}

/// Uniform synthesis contract over local and networked backends.
#[async_trait]
pub trait SpeechProvider: Send + Sync {
    fn kind(&self) -> ProviderKind;

    /// Fetch (and remember) the voices this provider can speak with.
    async fn list_voices(&self) -> Result<VoiceCatalog>;

    /// Speak `text` and resolve once it has audibly finished.
    ///
    /// Fails with `InvalidVoice` without any I/O when `voice_id` was not
    /// returned by an earlier [`SpeechProvider::list_voices`].
    async fn synthesize(&self, text: &str, voice_id: &str) -> Result<()>;

    /// Halt in-flight speech and release its output handle. Idempotent.
    fn stop(&self);

    /// Periodic nudge while an utterance is active, for engines that stall.
    fn keep_alive(&self) {}

    fn set_volume(&self, _volume: f32) {}
}

pub type ProviderBuilder =
    Box<dyn Fn(&Credentials) -> Result<Arc<dyn SpeechProvider>> + Send + Sync>;

/// Builders per provider kind. New backends register here.
#[derive(Default)]
pub struct ProviderRegistry {
    builders: HashMap<ProviderKind, ProviderBuilder>,
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the networked vendors, plus the local provider when a
    /// host engine is available.
    pub fn with_defaults(
        context: Arc<AudioContext>,
        engine: Option<Arc<dyn SpeechEngine>>,
    ) -> Self {
        let mut registry = Self::new();

        if let Some(engine) = engine {
            registry.register(ProviderKind::Local, move |_| {
                let provider: Arc<dyn SpeechProvider> = Arc::new(LocalProvider::new(engine.clone()));
                Ok(provider)
            });
        }

        let ctx = context.clone();
        registry.register(ProviderKind::OpenAi, move |creds| {
            let client = vendors::OpenAiClient::new(creds)?;
            let provider: Arc<dyn SpeechProvider> =
                Arc::new(NetworkProvider::new(Box::new(client), ctx.clone()));
            Ok(provider)
        });

        let ctx = context.clone();
        registry.register(ProviderKind::ElevenLabs, move |creds| {
            let client = vendors::ElevenLabsClient::new(creds)?;
            let provider: Arc<dyn SpeechProvider> =
                Arc::new(NetworkProvider::new(Box::new(client), ctx.clone()));
            Ok(provider)
        });

        let ctx = context.clone();
        registry.register(ProviderKind::Azure, move |creds| {
            let client = vendors::AzureClient::new(creds)?;
            let provider: Arc<dyn SpeechProvider> =
                Arc::new(NetworkProvider::new(Box::new(client), ctx.clone()));
            Ok(provider)
        });

        let ctx = context.clone();
        registry.register(ProviderKind::Polly, move |creds| {
            let client = vendors::PollyClient::new(creds)?;
            let provider: Arc<dyn SpeechProvider> =
                Arc::new(NetworkProvider::new(Box::new(client), ctx.clone()));
            Ok(provider)
        });

        registry.register(ProviderKind::WellSaid, move |creds| {
            let client = vendors::WellSaidClient::new(creds)?;
            let provider: Arc<dyn SpeechProvider> =
                Arc::new(NetworkProvider::new(Box::new(client), context.clone()));
            Ok(provider)
        });

        registry
    }

    pub fn register<F>(&mut self, kind: ProviderKind, builder: F)
    where
        F: Fn(&Credentials) -> Result<Arc<dyn SpeechProvider>> + Send + Sync + 'static,
    {
        self.builders.insert(kind, Box::new(builder));
    }

    pub fn supports(&self, kind: ProviderKind) -> bool {
        self.builders.contains_key(&kind)
    }

    pub fn build(&self, selection: &ProviderSelection) -> Result<Arc<dyn SpeechProvider>> {
        let builder = self.builders.get(&selection.kind).ok_or_else(|| {
            SpeechError::Validation(format!("Unsupported TTS provider: {}", selection.kind))
        })?;
        builder(&selection.credentials)
    }
}

/// Holder of the one provider allowed to own an output handle.
#[derive(Default)]
pub struct ActiveProvider {
    current: RwLock<Option<Arc<dyn SpeechProvider>>>,
}

impl ActiveProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<dyn SpeechProvider>> {
        self.current.read().unwrap().clone()
    }

    /// Install `provider`, stopping whatever was active before.
    pub fn install(&self, provider: Arc<dyn SpeechProvider>) {
        let previous = self.current.write().unwrap().replace(provider);
        if let Some(previous) = previous {
            previous.stop();
        }
    }

    pub fn clear(&self) {
        let previous = self.current.write().unwrap().take();
        if let Some(previous) = previous {
            previous.stop();
        }
    }
}

pub struct ProviderManager {
    registry: ProviderRegistry,
    active: Arc<ActiveProvider>,
    settings: Arc<dyn SettingsStore>,
}

impl ProviderManager {
    pub fn new(
        registry: ProviderRegistry,
        active: Arc<ActiveProvider>,
        settings: Arc<dyn SettingsStore>,
    ) -> Self {
        Self {
            registry,
            active,
            settings,
        }
    }

    pub fn active(&self) -> Arc<ActiveProvider> {
        self.active.clone()
    }

    /// Make `selection` the active provider.
    ///
    /// The previous provider is stopped first. On success the voice catalog
    /// (and a default local voice, if none was chosen) is written back to
    /// settings.
    pub async fn apply(&self, selection: ProviderSelection) -> Result<ProviderSelection> {
        self.active.clear();

        if !selection.enabled {
            info!("Text-to-speech disabled");
            self.store(&selection);
            return Ok(selection);
        }

        let provider = self.registry.build(&selection)?;
        let catalog = provider.list_voices().await?;
        info!("Provider {} ready with {} voices", selection.kind, catalog.len());

        let mut updated = selection;
        if let Some(voice) = updated.voice.as_deref() {
            if !catalog.contains(voice) {
                warn!("Selected voice '{voice}' is not offered by {}", updated.kind);
                updated.voice = None;
            }
        }
        if updated.voice.is_none() && updated.kind == ProviderKind::Local {
            if let Some(voice) = default_local_voice(&catalog) {
                info!("Using default voice {} ({})", voice.name, voice.id);
                updated.locale = voice.locale.clone();
                updated.voice = Some(voice.id.clone());
            }
        }
        updated.voices = Some(catalog);

        provider.set_volume(self.settings.get().volume);
        self.active.install(provider);
        self.store(&updated);
        Ok(updated)
    }

    /// Re-apply whatever provider is stored in settings.
    pub async fn apply_stored(&self) -> Result<ProviderSelection> {
        self.apply(self.settings.get().tts).await
    }

    fn store(&self, selection: &ProviderSelection) {
        let selection = selection.clone();
        self.settings.update(&mut |s| s.tts = selection.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_requires_enabled_and_voice() {
        let mut selection = ProviderSelection::default();
        let err = selection.validate().unwrap_err();
        assert!(err.to_string().contains("not enabled"));

        selection.enabled = true;
        let err = selection.validate().unwrap_err();
        assert!(err.to_string().contains("select a voice"));

        selection.voice = Some("alloy".into());
        assert_eq!(selection.validate().unwrap(), "alloy");
    }

    #[test]
    fn playback_request_rejects_blank_text() {
        assert!(PlaybackRequest::new("  ", "v").is_err());
        assert!(PlaybackRequest::new("hello", "").is_err());
        let req = PlaybackRequest::new("hello", "v").unwrap();
        assert_eq!(req.text(), "hello");
        assert_eq!(req.voice_id(), "v");
    }

    #[test]
    fn catalog_groups_by_locale() {
        let catalog = VoiceCatalog::new(vec![
            Voice::new("a", "A", Some("en-GB")),
            Voice::new("b", "B", Some("en-US")),
            Voice::new("c", "C", Some("en-GB")),
            Voice::new("d", "D", None),
        ]);
        let groups = catalog.by_locale();
        assert_eq!(groups["en-GB"].len(), 2);
        assert_eq!(groups["en-US"].len(), 1);
        assert_eq!(groups[""].len(), 1);
        assert!(catalog.contains("c"));
        assert!(!catalog.contains("z"));
    }

    #[test]
    fn provider_kind_uses_config_names() {
        let kind: ProviderKind = serde_yml::from_str("openai").unwrap();
        assert_eq!(kind, ProviderKind::OpenAi);
        assert_eq!(ProviderKind::ElevenLabs.to_string(), "elevenlabs");
    }

    #[test]
    fn credentials_debug_masks_secrets() {
        let creds = Credentials {
            api_key: Some("sk-secret".into()),
            ..Default::default()
        };
        assert!(!format!("{creds:?}").contains("sk-secret"));
    }

    #[test]
    fn unregistered_kind_is_a_validation_error() {
        let registry = ProviderRegistry::new();
        let selection = ProviderSelection {
            kind: ProviderKind::Azure,
            enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            registry.build(&selection),
            Err(SpeechError::Validation(_))
        ));
    }
}
