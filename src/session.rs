//! Phrase-by-phrase reading of one sutta.
//!
//! [`ReadingSession`] walks the segmented phrases through the
//! [`SpeechQueue`], publishing index and scroll events for highlighting.
//! A failed phrase halts the whole reading; a completed reading may arm
//! the timer's auto-start signal.

use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{ErrorKind, Result, SpeechError};
use crate::queue::{HostEvent, SpeechQueue};
use crate::segmenter::{prepare_speech_text, PhrasePauses, Segmenter};
use crate::settings::SettingsStore;
use crate::speech::PlaybackRequest;
use crate::timer::AutoStartSignal;

const EVENT_CAPACITY: usize = 64;
const PREVIEW_TEXT: &str = "Hello! This is a preview of how I sound.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    Idle,
    Reading,
    Completed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "value", rename_all = "snake_case")]
pub enum SessionEvent {
    PhraseIndexChanged(usize),
    ScrollRequested(usize),
    SessionCompleted,
    SessionFailed(ErrorKind),
    SessionStopped,
    TimerAutoStart,
}

#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub phrase_count: usize,
    /// -1 while no phrase is active.
    pub current_index: isize,
    pub phase: SessionPhase,
    pub last_error: Option<String>,
}

struct SessionState {
    phrases: Arc<[String]>,
    current_index: isize,
    phase: SessionPhase,
    last_error: Option<SpeechError>,
    token: CancellationToken,
    /// Bumped by every start and stop; a reading loop only touches state
    /// while its generation is current.
    generation: u64,
}

pub struct ReadingSession {
    queue: SpeechQueue,
    settings: Arc<dyn SettingsStore>,
    segmenter: Segmenter,
    pauses: PhrasePauses,
    auto_start: AutoStartSignal,
    state: Mutex<SessionState>,
    events: broadcast::Sender<SessionEvent>,
}

impl ReadingSession {
    pub fn new(
        queue: SpeechQueue,
        settings: Arc<dyn SettingsStore>,
        segmenter: Segmenter,
        pauses: PhrasePauses,
        auto_start: AutoStartSignal,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            queue,
            settings,
            segmenter,
            pauses,
            auto_start,
            state: Mutex::new(SessionState {
                phrases: Arc::from(Vec::new()),
                current_index: -1,
                phase: SessionPhase::Idle,
                last_error: None,
                token: CancellationToken::new(),
                generation: 0,
            }),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Replace the text, stopping any reading in progress.
    pub fn load_text(&self, text: &str) -> usize {
        self.stop_reading();
        let phrases = self.segmenter.segment(text);
        let count = phrases.len();

        let mut state = self.state.lock().unwrap();
        state.phrases = phrases.into();
        state.current_index = -1;
        state.phase = SessionPhase::Idle;
        state.last_error = None;
        debug!("Loaded text as {count} phrases");
        count
    }

    /// Load `text` and read it to the end.
    pub async fn read(&self, text: &str) -> Result<()> {
        self.load_text(text);
        self.start_reading().await
    }

    /// Read the loaded phrases from the first one.
    ///
    /// Resolves when the reading completes, fails or is stopped. Stopping
    /// yields `Err(Cancelled)`, which callers should not show as a failure.
    pub async fn start_reading(&self) -> Result<()> {
        let settings = self.settings.get();
        let voice = settings.tts.validate()?.to_string();

        self.auto_start.disarm();
        let (phrases, token, generation, was_reading) = {
            let mut state = self.state.lock().unwrap();
            state.token.cancel();
            state.token = CancellationToken::new();
            state.generation += 1;
            let was_reading = state.phase == SessionPhase::Reading;
            state.phase = SessionPhase::Reading;
            state.current_index = -1;
            state.last_error = None;
            (state.phrases.clone(), state.token.clone(), state.generation, was_reading)
        };
        if was_reading {
            self.queue.cancel();
        }
        // Host events cancel the queue without going through the session.
        let queue_token = self.queue.cancellation();

        if phrases.is_empty() {
            info!("Nothing to read");
            self.finish(generation, SessionPhase::Idle);
            return Ok(());
        }
        info!("Reading {} phrases", phrases.len());

        for (index, phrase) in phrases.iter().enumerate() {
            if token.is_cancelled() {
                return Err(SpeechError::Cancelled);
            }
            self.advance(generation, index);

            let text = prepare_speech_text(phrase);
            if !text.is_empty() {
                let request = PlaybackRequest::new(text, voice.as_str())?;
                let spoken = tokio::select! {
                    biased;
                    _ = token.cancelled() => Err(SpeechError::Cancelled),
                    _ = queue_token.cancelled() => Err(SpeechError::Cancelled),
                    result = self.queue.speak(request) => result,
                };
                if let Err(e) = spoken {
                    return Err(self.fail(generation, e));
                }
            }

            if index + 1 < phrases.len() {
                tokio::select! {
                    _ = token.cancelled() => return Err(SpeechError::Cancelled),
                    _ = queue_token.cancelled() => return Err(self.interrupted(generation)),
                    _ = tokio::time::sleep(self.pauses.after(phrase)) => {}
                }
            }
        }

        if self.finish(generation, SessionPhase::Completed) {
            info!("Reading completed");
            self.emit(SessionEvent::SessionCompleted);
            if self.settings.get().auto_start_timer_after_sutta {
                self.auto_start.arm();
                self.emit(SessionEvent::TimerAutoStart);
            }
        }
        Ok(())
    }

    /// Speak a short sample with the selected voice, interrupting any
    /// reading.
    pub async fn preview_voice(&self) -> Result<()> {
        let settings = self.settings.get();
        let voice = settings.tts.validate()?.to_string();
        self.stop_reading();
        self.queue.speak(PlaybackRequest::new(PREVIEW_TEXT, voice)?).await
    }

    /// Halt reading immediately and discard the remaining phrases. Safe to
    /// call at any time.
    pub fn stop_reading(&self) {
        let was_reading = {
            let mut state = self.state.lock().unwrap();
            state.token.cancel();
            state.token = CancellationToken::new();
            state.generation += 1;
            state.current_index = -1;
            std::mem::replace(&mut state.phase, SessionPhase::Idle) == SessionPhase::Reading
        };

        self.queue.cancel();
        self.auto_start.disarm();
        if was_reading {
            info!("Reading stopped");
            self.emit(SessionEvent::SessionStopped);
        }
    }

    /// Forward a host lifecycle change to the queue. Hiding or unloading
    /// the host ends any reading in progress.
    pub fn handle_host_event(&self, event: HostEvent) {
        self.queue.handle_host_event(event);
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.state.lock().unwrap();
        SessionSnapshot {
            phrase_count: state.phrases.len(),
            current_index: state.current_index,
            phase: state.phase,
            last_error: state.last_error.as_ref().map(ToString::to_string),
        }
    }

    pub fn phrases(&self) -> Vec<String> {
        self.state.lock().unwrap().phrases.to_vec()
    }

    pub fn current_index(&self) -> isize {
        self.state.lock().unwrap().current_index
    }

    pub fn phase(&self) -> SessionPhase {
        self.state.lock().unwrap().phase
    }

    pub fn last_error(&self) -> Option<SpeechError> {
        self.state.lock().unwrap().last_error.clone()
    }

    fn advance(&self, generation: u64, index: usize) {
        {
            let mut state = self.state.lock().unwrap();
            if state.generation != generation {
                return;
            }
            state.current_index = index as isize;
        }
        self.emit(SessionEvent::PhraseIndexChanged(index));
        self.emit(SessionEvent::ScrollRequested(index));
    }

    /// Record a phrase failure. The index stays on the failed phrase.
    fn fail(&self, generation: u64, error: SpeechError) -> SpeechError {
        if error.is_cancelled() {
            return self.interrupted(generation);
        }
        {
            let mut state = self.state.lock().unwrap();
            if state.generation != generation {
                return SpeechError::Cancelled;
            }
            state.phase = SessionPhase::Idle;
            state.last_error = Some(error.clone());
        }
        warn!("Reading halted: {error}");
        // Leave no queued or playing audio behind.
        self.queue.cancel();
        self.emit(SessionEvent::SessionFailed(error.kind()));
        error
    }

    /// The queue was cancelled underneath a reading that is still current:
    /// end it as a stop.
    fn interrupted(&self, generation: u64) -> SpeechError {
        {
            let mut state = self.state.lock().unwrap();
            if state.generation != generation {
                return SpeechError::Cancelled;
            }
            state.token.cancel();
            state.token = CancellationToken::new();
            state.generation += 1;
            state.current_index = -1;
            state.phase = SessionPhase::Idle;
        }
        self.auto_start.disarm();
        info!("Reading interrupted");
        self.emit(SessionEvent::SessionStopped);
        SpeechError::Cancelled
    }

    fn finish(&self, generation: u64, phase: SessionPhase) -> bool {
        let mut state = self.state.lock().unwrap();
        if state.generation != generation {
            return false;
        }
        state.phase = phase;
        state.current_index = -1;
        true
    }

    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

impl Drop for ReadingSession {
    fn drop(&mut self) {
        if let Ok(state) = self.state.lock() {
            state.token.cancel();
        }
    }
}
