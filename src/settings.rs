//! User preferences the core reads and writes back.
//!
//! Storage is an external concern; the core only needs a synchronous
//! get/set contract.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::bell::DEFAULT_BELL_SOUND;
use crate::speech::ProviderSelection;

pub const DEFAULT_TIMER_SECS: u64 = 600;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tts: ProviderSelection,
    pub volume: f32,
    pub bell_sound: String,
    pub play_bell_at_start: bool,
    pub play_bell_at_end: bool,
    pub auto_start_timer_after_sutta: bool,
    pub last_timer_duration: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            tts: ProviderSelection::default(),
            volume: 1.0,
            bell_sound: DEFAULT_BELL_SOUND.into(),
            play_bell_at_start: true,
            play_bell_at_end: true,
            auto_start_timer_after_sutta: false,
            last_timer_duration: DEFAULT_TIMER_SECS,
        }
    }
}

pub trait SettingsStore: Send + Sync {
    fn get(&self) -> Settings;
    fn set(&self, settings: Settings);

    /// Read-modify-write. Stores with shared state override this to hold
    /// their lock across the whole change.
    fn update(&self, apply: &mut dyn FnMut(&mut Settings)) {
        let mut settings = self.get();
        apply(&mut settings);
        self.set(settings);
    }
}

#[derive(Default)]
pub struct MemorySettings {
    inner: RwLock<Settings>,
}

impl MemorySettings {
    pub fn new(settings: Settings) -> Self {
        Self {
            inner: RwLock::new(settings),
        }
    }
}

impl SettingsStore for MemorySettings {
    fn get(&self) -> Settings {
        self.inner.read().unwrap().clone()
    }

    fn set(&self, settings: Settings) {
        *self.inner.write().unwrap() = settings;
    }

    fn update(&self, apply: &mut dyn FnMut(&mut Settings)) {
        apply(&mut self.inner.write().unwrap());
    }
}

/// Settings persisted to a YAML file on every write.
pub struct YamlSettings {
    path: PathBuf,
    inner: RwLock<Settings>,
}

impl YamlSettings {
    /// Open `path`, starting from `fallback` when it does not exist or
    /// cannot be parsed.
    pub fn open(path: &Path, fallback: Settings) -> Self {
        let settings = match std::fs::read_to_string(path) {
            Ok(contents) => match serde_yml::from_str(&contents) {
                Ok(settings) => {
                    info!("Loaded settings from {}", path.display());
                    settings
                }
                Err(e) => {
                    warn!("Failed to parse {}: {e}, using defaults", path.display());
                    fallback
                }
            },
            Err(_) => fallback,
        };

        Self {
            path: path.to_path_buf(),
            inner: RwLock::new(settings),
        }
    }

    fn persist(&self, settings: &Settings) {
        if let Some(dir) = self.path.parent() {
            if let Err(e) = std::fs::create_dir_all(dir) {
                warn!("Failed to create settings dir {}: {e}", dir.display());
                return;
            }
        }
        match serde_yml::to_string(settings) {
            Ok(yaml) => {
                if let Err(e) = std::fs::write(&self.path, yaml) {
                    warn!("Failed to write {}: {e}", self.path.display());
                }
            }
            Err(e) => warn!("Failed to serialize settings: {e}"),
        }
    }
}

impl SettingsStore for YamlSettings {
    fn get(&self) -> Settings {
        self.inner.read().unwrap().clone()
    }

    fn set(&self, settings: Settings) {
        let mut inner = self.inner.write().unwrap();
        self.persist(&settings);
        *inner = settings;
    }

    fn update(&self, apply: &mut dyn FnMut(&mut Settings)) {
        let mut inner = self.inner.write().unwrap();
        apply(&mut inner);
        self.persist(&inner);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::ProviderKind;

    #[test]
    fn update_applies_in_place() {
        let store = MemorySettings::default();
        store.update(&mut |s| s.volume = 0.25);
        assert_eq!(store.get().volume, 0.25);
    }

    fn bump_concurrently(store: &dyn SettingsStore) {
        std::thread::scope(|scope| {
            for _ in 0..8 {
                scope.spawn(|| {
                    for _ in 0..50 {
                        store.update(&mut |s| s.last_timer_duration += 1);
                    }
                });
            }
        });
    }

    #[test]
    fn concurrent_updates_are_not_lost() {
        let store = MemorySettings::new(Settings {
            last_timer_duration: 0,
            ..Default::default()
        });
        bump_concurrently(&store);
        assert_eq!(store.get().last_timer_duration, 400);
    }

    #[test]
    fn concurrent_yaml_updates_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        let store = YamlSettings::open(
            &path,
            Settings {
                last_timer_duration: 0,
                ..Default::default()
            },
        );
        bump_concurrently(&store);
        assert_eq!(store.get().last_timer_duration, 400);
        let reopened = YamlSettings::open(&path, Settings::default());
        assert_eq!(reopened.get().last_timer_duration, 400);
    }

    #[test]
    fn yaml_settings_round_trip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/settings.yaml");

        let store = YamlSettings::open(&path, Settings::default());
        store.update(&mut |s| {
            s.tts.kind = ProviderKind::OpenAi;
            s.tts.voice = Some("nova".into());
            s.bell_sound = "zen-bell".into();
        });

        let reopened = YamlSettings::open(&path, Settings::default());
        let settings = reopened.get();
        assert_eq!(settings.tts.kind, ProviderKind::OpenAi);
        assert_eq!(settings.tts.voice.as_deref(), Some("nova"));
        assert_eq!(settings.bell_sound, "zen-bell");
    }

    #[test]
    fn unparsable_file_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.yaml");
        std::fs::write(&path, "volume: [not, a, number").unwrap();

        let fallback = Settings {
            volume: 0.3,
            ..Default::default()
        };
        assert_eq!(YamlSettings::open(&path, fallback).get().volume, 0.3);
    }
}
