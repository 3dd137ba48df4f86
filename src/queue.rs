//! One-at-a-time speech playback.
//!
//! [`SpeechQueue`] accepts any number of concurrent `speak` calls and plays
//! them strictly in submission order on the active provider, with a short
//! silence between utterances. A worker task drains the queue and exits
//! when it runs dry.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Result, SpeechError};
use crate::speech::{ActiveProvider, PlaybackRequest};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueTimings {
    /// Silence after each utterance.
    pub gap: Duration,
    /// Hard ceiling on one utterance.
    pub timeout: Duration,
    /// Interval between keep-alive nudges while an utterance plays.
    pub keep_alive: Duration,
}

impl Default for QueueTimings {
    fn default() -> Self {
        Self {
            gap: Duration::from_millis(500),
            timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(5),
        }
    }
}

/// Host lifecycle changes the queue reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostEvent {
    Hidden,
    Visible,
    Unload,
}

struct QueueItem {
    request: PlaybackRequest,
    done: oneshot::Sender<Result<()>>,
}

struct QueueState {
    items: VecDeque<QueueItem>,
    processing: bool,
    token: CancellationToken,
}

struct Inner {
    provider: Arc<ActiveProvider>,
    timings: QueueTimings,
    state: Mutex<QueueState>,
}

#[derive(Clone)]
pub struct SpeechQueue {
    inner: Arc<Inner>,
}

impl SpeechQueue {
    pub fn new(provider: Arc<ActiveProvider>, timings: QueueTimings) -> Self {
        Self {
            inner: Arc::new(Inner {
                provider,
                timings,
                state: Mutex::new(QueueState {
                    items: VecDeque::new(),
                    processing: false,
                    token: CancellationToken::new(),
                }),
            }),
        }
    }

    /// Enqueue `request` and wait until it has been spoken, including the
    /// trailing gap.
    ///
    /// Fails with the provider's error, or `Cancelled` if the queue is
    /// cancelled before the item finishes.
    pub async fn speak(&self, request: PlaybackRequest) -> Result<()> {
        let (done, finished) = oneshot::channel();

        let start_worker = {
            let mut state = self.inner.state.lock().unwrap();
            state.items.push_back(QueueItem { request, done });
            !std::mem::replace(&mut state.processing, true)
        };
        if start_worker {
            tokio::spawn(self.inner.clone().run());
        }

        finished.await.unwrap_or(Err(SpeechError::Cancelled))
    }

    /// Drop everything queued and halt the active utterance. Safe to call
    /// when idle.
    pub fn cancel(&self) {
        let (pending, token) = {
            let mut state = self.inner.state.lock().unwrap();
            let pending: Vec<QueueItem> = state.items.drain(..).collect();
            let token = std::mem::replace(&mut state.token, CancellationToken::new());
            (pending, token)
        };

        token.cancel();
        if !pending.is_empty() {
            debug!("Rejecting {} queued utterances", pending.len());
        }
        for item in pending {
            let _ = item.done.send(Err(SpeechError::Cancelled));
        }
        if let Some(provider) = self.inner.provider.current() {
            provider.stop();
        }
    }

    /// A token cancelled by the next [`cancel`](Self::cancel), from whatever
    /// source.
    pub fn cancellation(&self) -> CancellationToken {
        self.inner.state.lock().unwrap().token.child_token()
    }

    pub fn handle_host_event(&self, event: HostEvent) {
        match event {
            HostEvent::Hidden | HostEvent::Unload => {
                info!("Host {event:?}, cancelling speech");
                self.cancel();
            }
            HostEvent::Visible => {}
        }
    }

    pub fn is_idle(&self) -> bool {
        let state = self.inner.state.lock().unwrap();
        !state.processing && state.items.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.inner.state.lock().unwrap().items.len()
    }
}

impl Inner {
    async fn run(self: Arc<Self>) {
        loop {
            let (item, token) = {
                let mut state = self.state.lock().unwrap();
                match state.items.pop_front() {
                    Some(item) => (item, state.token.clone()),
                    None => {
                        state.processing = false;
                        return;
                    }
                }
            };

            let result = match self.utter(&item.request, &token).await {
                Ok(()) => {
                    // A cancel during the gap still counts as spoken.
                    tokio::select! {
                        _ = token.cancelled() => {}
                        _ = tokio::time::sleep(self.timings.gap) => {}
                    }
                    Ok(())
                }
                Err(_) if token.is_cancelled() => Err(SpeechError::Cancelled),
                Err(e) => {
                    warn!("Utterance failed: {e}");
                    Err(e)
                }
            };
            let _ = item.done.send(result);
        }
    }

    async fn utter(&self, request: &PlaybackRequest, token: &CancellationToken) -> Result<()> {
        if token.is_cancelled() {
            return Err(SpeechError::Cancelled);
        }
        let provider = self.provider.current().ok_or_else(|| {
            SpeechError::Validation("No speech provider is active. Please check your settings.".into())
        })?;

        let synth = provider.synthesize(request.text(), request.voice_id());
        tokio::pin!(synth);
        let deadline = tokio::time::sleep(self.timings.timeout);
        tokio::pin!(deadline);
        let mut nudge = tokio::time::interval_at(
            Instant::now() + self.timings.keep_alive,
            self.timings.keep_alive,
        );

        loop {
            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    provider.stop();
                    return Err(SpeechError::Cancelled);
                }
                result = &mut synth => return result,
                _ = &mut deadline => {
                    warn!("Utterance exceeded {:?}, forcing completion", self.timings.timeout);
                    provider.stop();
                    return Err(SpeechError::Timeout);
                }
                _ = nudge.tick() => provider.keep_alive(),
            }
        }
    }
}
