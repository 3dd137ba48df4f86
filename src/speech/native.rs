//! Host speech engine backed by the `tts` crate (Speech Dispatcher, AVFoundation,
//! WinRT).
//!
//! `tts::Tts` is not `Send` on every platform, so it lives on a dedicated
//! thread and is driven over a command channel.
//!
//! `tts` has no pause control, so this engine keeps the no-op keep-alive
//! hooks and queue nudges do nothing here.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::oneshot;
use tracing::{debug, error, info, warn};
use tts::Tts;

use super::{SpeechEngine, Voice};
use crate::error::{Result, SpeechError};

const POLL_INTERVAL: Duration = Duration::from_millis(50);

enum Command {
    Speak {
        text: String,
        voice_id: String,
        volume: f32,
        done: oneshot::Sender<Result<()>>,
    },
    Cancel,
}

pub struct NativeEngine {
    commands: Mutex<Sender<Command>>,
    voices: Arc<Mutex<Vec<Voice>>>,
    speaking: Arc<AtomicBool>,
}

impl NativeEngine {
    /// Spawn the engine thread. Fails if the platform backend cannot start.
    pub fn spawn() -> Result<Self> {
        let (tx, rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let voices = Arc::new(Mutex::new(Vec::new()));
        let speaking = Arc::new(AtomicBool::new(false));

        let worker = Worker {
            voices: voices.clone(),
            speaking: speaking.clone(),
        };
        thread::Builder::new()
            .name("native-tts".into())
            .spawn(move || match Tts::default() {
                Ok(tts) => {
                    let _ = ready_tx.send(Ok(()));
                    worker.run(tts, rx);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(SpeechError::ServiceUnavailable(format!(
                        "Failed to initialize TTS: {e}"
                    ))));
                }
            })
            .map_err(|e| SpeechError::ServiceUnavailable(format!("TTS thread: {e}")))?;

        ready_rx
            .recv()
            .map_err(|_| SpeechError::ServiceUnavailable("TTS thread exited".into()))??;
        info!("Native TTS backend ready");

        Ok(Self {
            commands: Mutex::new(tx),
            voices,
            speaking,
        })
    }

    fn send(&self, cmd: Command) -> bool {
        self.commands.lock().unwrap().send(cmd).is_ok()
    }
}

#[async_trait]
impl SpeechEngine for NativeEngine {
    fn voices(&self) -> Vec<Voice> {
        self.voices.lock().unwrap().clone()
    }

    async fn speak(&self, text: &str, voice_id: &str, volume: f32) -> Result<()> {
        let (done, finished) = oneshot::channel();
        let sent = self.send(Command::Speak {
            text: text.to_string(),
            voice_id: voice_id.to_string(),
            volume,
            done,
        });
        if !sent {
            return Err(SpeechError::ServiceUnavailable("TTS thread exited".into()));
        }
        finished.await.unwrap_or(Err(SpeechError::Cancelled))
    }

    fn is_speaking(&self) -> bool {
        self.speaking.load(Ordering::SeqCst)
    }

    fn cancel(&self) {
        self.send(Command::Cancel);
    }
}

struct Worker {
    voices: Arc<Mutex<Vec<Voice>>>,
    speaking: Arc<AtomicBool>,
}

impl Worker {
    fn run(&self, mut tts: Tts, rx: Receiver<Command>) {
        self.load_voices(&tts);

        let mut next = None;
        loop {
            let cmd = match next.take() {
                Some(cmd) => cmd,
                None => match rx.recv() {
                    Ok(cmd) => cmd,
                    Err(_) => break,
                },
            };

            match cmd {
                Command::Cancel => {
                    let _ = tts.stop();
                }
                Command::Speak {
                    text,
                    voice_id,
                    volume,
                    done,
                } => {
                    next = self.utter(&mut tts, &rx, &text, &voice_id, volume, done);
                }
            }
        }
        debug!("Native TTS thread exiting");
    }

    fn load_voices(&self, tts: &Tts) {
        match tts.voices() {
            Ok(list) => {
                let voices: Vec<Voice> = list
                    .iter()
                    .map(|v| Voice::new(v.id(), v.name(), Some(&v.language().to_string())))
                    .collect();
                info!("Host offers {} voices", voices.len());
                *self.voices.lock().unwrap() = voices;
            }
            Err(e) => warn!("Failed to list host voices: {e}"),
        }
    }

    /// Speak one utterance, returning a command that interrupted it.
    fn utter(
        &self,
        tts: &mut Tts,
        rx: &Receiver<Command>,
        text: &str,
        voice_id: &str,
        volume: f32,
        done: oneshot::Sender<Result<()>>,
    ) -> Option<Command> {
        if let Err(e) = self.configure(tts, voice_id, volume) {
            let _ = done.send(Err(e));
            return None;
        }
        if let Err(e) = tts.speak(text, true) {
            error!("Failed to speak: {e}");
            let _ = done.send(Err(SpeechError::ServiceUnavailable(format!("Speak failed: {e}"))));
            return None;
        }
        self.speaking.store(true, Ordering::SeqCst);

        let interrupted = loop {
            match rx.recv_timeout(POLL_INTERVAL) {
                Ok(cmd) => {
                    let _ = tts.stop();
                    let _ = done.send(Err(SpeechError::Cancelled));
                    break Some(cmd).filter(|c| !matches!(c, Command::Cancel));
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !tts.is_speaking().unwrap_or(false) {
                        let _ = done.send(Ok(()));
                        break None;
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    let _ = tts.stop();
                    break None;
                }
            }
        };

        self.speaking.store(false, Ordering::SeqCst);
        interrupted
    }

    fn configure(&self, tts: &mut Tts, voice_id: &str, volume: f32) -> Result<()> {
        let voices = tts
            .voices()
            .map_err(|e| SpeechError::ServiceUnavailable(format!("Failed to get voices: {e}")))?;
        let voice = voices
            .iter()
            .find(|v| v.id() == voice_id)
            .ok_or_else(|| SpeechError::InvalidVoice(voice_id.to_string()))?;
        tts.set_voice(voice)
            .map_err(|e| SpeechError::ServiceUnavailable(format!("Failed to set voice: {e}")))?;

        if tts.supported_features().volume {
            let (min, max) = (tts.min_volume(), tts.max_volume());
            if let Err(e) = tts.set_volume(min + (max - min) * volume) {
                warn!("Failed to set volume: {e}");
            }
        }
        Ok(())
    }
}
