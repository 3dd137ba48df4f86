//! Meditation countdown with bells at start and end, plus the signal a
//! finished reading uses to start it automatically.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::audio::bell::BellEngine;
use crate::settings::{SettingsStore, DEFAULT_TIMER_SECS};

const TICK: Duration = Duration::from_secs(1);

/// Set by a completed reading when the timer should start on its own.
#[derive(Clone)]
pub struct AutoStartSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for AutoStartSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl AutoStartSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn arm(&self) {
        self.tx.send_replace(true);
    }

    pub fn disarm(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_armed(&self) -> bool {
        *self.tx.borrow()
    }

    /// Wait until armed, then disarm and return.
    pub async fn take(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so wait_for cannot fail.
        let _ = rx.wait_for(|armed| *armed).await;
        self.disarm();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimerState {
    pub duration_secs: u64,
    pub remaining_secs: u64,
    pub running: bool,
}

pub struct MeditationTimer {
    bells: Arc<BellEngine>,
    settings: Arc<dyn SettingsStore>,
    state: Arc<watch::Sender<TimerState>>,
    task: Mutex<Option<JoinHandle<()>>>,
    /// Set while the countdown task waits on the end bell.
    ringing_end: Arc<AtomicBool>,
}

impl MeditationTimer {
    pub fn new(bells: Arc<BellEngine>, settings: Arc<dyn SettingsStore>) -> Self {
        let duration = match settings.get().last_timer_duration {
            0 => DEFAULT_TIMER_SECS,
            secs => secs,
        };
        let (state, _) = watch::channel(TimerState {
            duration_secs: duration,
            remaining_secs: duration,
            running: false,
        });
        Self {
            bells,
            settings,
            state: Arc::new(state),
            task: Mutex::new(None),
            ringing_end: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> TimerState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<TimerState> {
        self.state.subscribe()
    }

    /// Start or resume the countdown. The start bell only rings on a fresh
    /// start and is not waited for; the end bell is.
    pub fn start(&self) {
        let mut guard = self.task.lock().unwrap();
        if self.state().running {
            return;
        }

        let settings = self.settings.get();
        self.state.send_modify(|s| {
            if s.remaining_secs == 0 {
                s.remaining_secs = s.duration_secs;
            }
            s.running = true;
        });
        let current = self.state();
        let fresh = current.remaining_secs == current.duration_secs;
        info!("Timer started ({}s remaining)", current.remaining_secs);

        if fresh && settings.play_bell_at_start {
            let bells = self.bells.clone();
            let sound = settings.bell_sound.clone();
            tokio::spawn(async move {
                if let Err(e) = bells.play_bell(&sound).await {
                    warn!("Start bell failed: {e}");
                }
            });
        }

        let state = self.state.clone();
        let bells = self.bells.clone();
        let settings_store = self.settings.clone();
        let ringing_end = self.ringing_end.clone();
        *guard = Some(tokio::spawn(async move {
            loop {
                tokio::time::sleep(TICK).await;
                state.send_modify(|s| s.remaining_secs = s.remaining_secs.saturating_sub(1));
                if state.borrow().remaining_secs == 0 {
                    break;
                }
            }

            info!("Timer finished");
            let settings = settings_store.get();
            if settings.play_bell_at_end {
                ringing_end.store(true, Ordering::SeqCst);
                if let Err(e) = bells.play_bell(&settings.bell_sound).await {
                    warn!("End bell failed: {e}");
                }
                ringing_end.store(false, Ordering::SeqCst);
            }
            state.send_modify(|s| s.running = false);
        }));
    }

    pub fn pause(&self) {
        self.halt();
        self.state.send_modify(|s| s.running = false);
    }

    pub fn reset(&self) {
        self.halt();
        self.state.send_modify(|s| {
            s.running = false;
            s.remaining_secs = s.duration_secs;
        });
    }

    /// Change the duration, resetting the countdown and remembering it as
    /// the last used duration.
    pub fn set_duration(&self, secs: u64) {
        self.halt();
        self.state.send_replace(TimerState {
            duration_secs: secs,
            remaining_secs: secs,
            running: false,
        });
        self.settings.update(&mut |s| s.last_timer_duration = secs);
    }

    /// Abort the countdown task. An end bell it was waiting on is
    /// interrupted too.
    fn halt(&self) {
        if let Some(task) = self.task.lock().unwrap().take() {
            task.abort();
            if self.ringing_end.swap(false, Ordering::SeqCst) {
                self.bells.interrupt();
            }
        }
    }

    /// Start the timer every time `signal` is armed. Runs until aborted.
    pub async fn run_when_armed(self: Arc<Self>, signal: AutoStartSignal) {
        loop {
            signal.take().await;
            info!("Reading finished, auto-starting timer");
            self.reset();
            self.start();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn auto_start_signal_is_consumed_once() {
        let signal = AutoStartSignal::new();
        assert!(!signal.is_armed());

        let waiter = tokio::spawn({
            let signal = signal.clone();
            async move { signal.take().await }
        });
        tokio::task::yield_now().await;
        signal.arm();
        waiter.await.unwrap();
        assert!(!signal.is_armed());
    }
}
