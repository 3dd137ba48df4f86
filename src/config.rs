//! Configuration management for metta-voice.
//!
//! Loads config from YAML files in standard locations. Every field has a
//! default, so a partial file (or none at all) is fine.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::info;

use crate::audio::bell::{DEFAULT_BELL_SOUND, DEFAULT_BELL_SOURCE};
use crate::queue::QueueTimings;
use crate::segmenter::{PhrasePauses, Segmenter, DEFAULT_LONG_PHRASE_CHARS, DEFAULT_SHORT_PHRASE_CHARS};
use crate::settings::{Settings, DEFAULT_TIMER_SECS};
use crate::speech::{Credentials, ProviderKind, ProviderSelection};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TtsConfig {
    pub provider: ProviderKind,
    pub enabled: bool,
    pub api_key: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub region: Option<String>,
    pub voice: Option<String>,
    pub locale: Option<String>,
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Local,
            enabled: true,
            api_key: None,
            access_key: None,
            secret_key: None,
            region: None,
            voice: None,
            locale: None,
        }
    }
}

impl TtsConfig {
    pub fn selection(&self) -> ProviderSelection {
        ProviderSelection {
            kind: self.provider,
            enabled: self.enabled,
            credentials: Credentials {
                api_key: self.api_key.clone(),
                access_key: self.access_key.clone(),
                secret_key: self.secret_key.clone(),
                region: self.region.clone(),
            },
            voice: self.voice.clone(),
            locale: self.locale.clone(),
            voices: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    pub volume: f32,
    pub bell_sound: String,
    /// Base URL or local directory holding `<sound>.mp3` files.
    pub bell_source: String,
    pub play_bell_at_start: bool,
    pub play_bell_at_end: bool,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            volume: 1.0,
            bell_sound: DEFAULT_BELL_SOUND.into(),
            bell_source: DEFAULT_BELL_SOURCE.into(),
            play_bell_at_start: true,
            play_bell_at_end: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReadingConfig {
    pub long_phrase_chars: usize,
    pub short_phrase_chars: usize,
    pub sentence_pause_ms: u64,
    pub clause_pause_ms: u64,
    pub dash_pause_ms: u64,
    pub phrase_pause_ms: u64,
    pub utterance_gap_ms: u64,
    pub utterance_timeout_secs: u64,
    pub keep_alive_secs: u64,
}

impl Default for ReadingConfig {
    fn default() -> Self {
        Self {
            long_phrase_chars: DEFAULT_LONG_PHRASE_CHARS,
            short_phrase_chars: DEFAULT_SHORT_PHRASE_CHARS,
            sentence_pause_ms: 1000,
            clause_pause_ms: 500,
            dash_pause_ms: 300,
            phrase_pause_ms: 150,
            utterance_gap_ms: 500,
            utterance_timeout_secs: 30,
            keep_alive_secs: 5,
        }
    }
}

impl ReadingConfig {
    pub fn segmenter(&self) -> Segmenter {
        Segmenter::new(self.long_phrase_chars, self.short_phrase_chars)
    }

    pub fn pauses(&self) -> PhrasePauses {
        PhrasePauses {
            sentence: Duration::from_millis(self.sentence_pause_ms),
            clause: Duration::from_millis(self.clause_pause_ms),
            dash: Duration::from_millis(self.dash_pause_ms),
            phrase: Duration::from_millis(self.phrase_pause_ms),
        }
    }

    pub fn queue_timings(&self) -> QueueTimings {
        QueueTimings {
            gap: Duration::from_millis(self.utterance_gap_ms),
            timeout: Duration::from_secs(self.utterance_timeout_secs.max(1)),
            keep_alive: Duration::from_secs(self.keep_alive_secs.max(1)),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub auto_start_after_sutta: bool,
    pub last_duration_secs: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            auto_start_after_sutta: false,
            last_duration_secs: DEFAULT_TIMER_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 8768,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub tts: TtsConfig,
    pub audio: AudioConfig,
    pub reading: ReadingConfig,
    pub timer: TimerConfig,
    pub api: ApiConfig,
    /// Where user settings are persisted. Defaults to
    /// `~/.config/metta-voice/settings.yaml`.
    pub settings_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from YAML file.
    ///
    /// Searches standard locations if no path is provided:
    /// 1. ./config.yaml
    /// 2. ~/.config/metta-voice/config.yaml
    /// 3. /etc/metta-voice/config.yaml
    pub fn load(path: Option<&Path>) -> Self {
        let resolved = path.map(PathBuf::from).or_else(|| {
            let candidates = [
                std::env::current_dir().ok().map(|d| d.join("config.yaml")),
                dirs::home_dir().map(|h| h.join(".config/metta-voice/config.yaml")),
                Some(PathBuf::from("/etc/metta-voice/config.yaml")),
            ];
            candidates.into_iter().flatten().find(|p| p.exists())
        });

        let Some(config_path) = resolved else {
            info!("No config file found, using defaults");
            return Self::default();
        };

        match std::fs::read_to_string(&config_path) {
            Ok(contents) => match Self::parse(&contents) {
                Ok(config) => {
                    info!("Loaded config from {}", config_path.display());
                    config
                }
                Err(e) => {
                    tracing::warn!("Failed to parse {}: {e}, using defaults", config_path.display());
                    Self::default()
                }
            },
            Err(e) => {
                tracing::warn!("Failed to read {}: {e}, using defaults", config_path.display());
                Self::default()
            }
        }
    }

    pub fn parse(yaml: &str) -> Result<Self, serde_yml::Error> {
        serde_yml::from_str(yaml)
    }

    pub fn settings_path(&self) -> PathBuf {
        self.settings_file.clone().unwrap_or_else(|| {
            dirs::config_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("metta-voice/settings.yaml")
        })
    }

    /// Settings to start from when no settings file exists yet.
    pub fn initial_settings(&self) -> Settings {
        Settings {
            tts: self.tts.selection(),
            volume: self.audio.volume,
            bell_sound: self.audio.bell_sound.clone(),
            play_bell_at_start: self.audio.play_bell_at_start,
            play_bell_at_end: self.audio.play_bell_at_end,
            auto_start_timer_after_sutta: self.timer.auto_start_after_sutta,
            last_timer_duration: self.timer.last_duration_secs,
        }
    }
}
