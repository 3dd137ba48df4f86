//! Local HTTP control API.
//!
//! Lets a UI (or curl) drive readings, bells, volume and the timer, and poll
//! status for highlighting. Runs on 127.0.0.1, port 8768 by default.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::audio::bell::{BellEngine, BELL_SOUNDS};
use crate::audio::clamp_volume;
use crate::session::{ReadingSession, SessionSnapshot};
use crate::settings::SettingsStore;
use crate::speech::{ActiveProvider, ProviderKind, Voice};
use crate::timer::{MeditationTimer, TimerState};

#[derive(Clone)]
pub struct ApiState {
    pub session: Arc<ReadingSession>,
    pub bells: Arc<BellEngine>,
    pub timer: Arc<MeditationTimer>,
    pub provider: Arc<ActiveProvider>,
    pub settings: Arc<dyn SettingsStore>,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct ReadRequest {
    text: String,
}

#[derive(Deserialize, Default)]
struct BellRequest {
    #[serde(default)]
    sound: Option<String>,
}

#[derive(Deserialize)]
struct VolumeRequest {
    volume: f32,
}

#[derive(Deserialize, Default)]
struct TimerStartRequest {
    #[serde(default)]
    duration_secs: Option<u64>,
}

#[derive(Serialize)]
struct StatusResponse {
    session: SessionSnapshot,
    timer: TimerState,
    bell_playing: bool,
    volume: f32,
    provider: ProviderKind,
    provider_enabled: bool,
    voice: Option<String>,
}

#[derive(Serialize)]
struct VoicesResponse {
    provider: ProviderKind,
    selected: Option<String>,
    voices: BTreeMap<String, Vec<Voice>>,
}

#[derive(Serialize)]
struct SimpleResponse {
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    phrases: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    volume: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl SimpleResponse {
    fn ok(status: &str) -> Self {
        Self {
            status: status.into(),
            phrases: None,
            volume: None,
            error: None,
        }
    }

    fn err(message: impl Into<String>) -> Self {
        Self {
            status: "error".into(),
            error: Some(message.into()),
            phrases: None,
            volume: None,
        }
    }
}

/// Build the axum router.
pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/read", post(handle_read))
        .route("/stop", post(handle_stop))
        .route("/bell", post(handle_bell))
        .route("/bell/stop", post(handle_bell_stop))
        .route("/volume", post(handle_volume))
        .route("/voices", get(handle_voices))
        .route("/timer/start", post(handle_timer_start))
        .route("/timer/stop", post(handle_timer_stop))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_api(state: ApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind control API on {addr}: {e}");
            return;
        }
    };
    info!("Control API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Control API server error: {e}");
        }
    });
}

/// Parse an optional JSON body; an empty body means all defaults.
fn optional_json<T: DeserializeOwned + Default>(body: &[u8]) -> Result<T, String> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))
}

// --- Handlers ---

async fn handle_status(State(state): State<ApiState>) -> Json<StatusResponse> {
    let settings = state.settings.get();
    Json(StatusResponse {
        session: state.session.snapshot(),
        timer: state.timer.state(),
        bell_playing: state.bells.is_playing(),
        volume: settings.volume,
        provider: settings.tts.kind,
        provider_enabled: settings.tts.enabled,
        voice: settings.tts.voice,
    })
}

async fn handle_read(
    State(state): State<ApiState>,
    Json(req): Json<ReadRequest>,
) -> Json<SimpleResponse> {
    // Report precondition failures here rather than from the spawned task.
    if let Err(e) = state.settings.get().tts.validate() {
        return Json(SimpleResponse::err(e.to_string()));
    }

    let phrases = state.session.load_text(&req.text);
    if phrases == 0 {
        return Json(SimpleResponse::ok("nothing to read"));
    }
    info!("HTTP /read: {phrases} phrases");

    let session = state.session.clone();
    tokio::spawn(async move {
        match session.start_reading().await {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => warn!("Reading failed: {e}"),
        }
    });

    Json(SimpleResponse {
        phrases: Some(phrases),
        ..SimpleResponse::ok("reading")
    })
}

async fn handle_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.session.stop_reading();
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_bell(
    State(state): State<ApiState>,
    body: Bytes,
) -> Json<SimpleResponse> {
    let req: BellRequest = match optional_json(&body) {
        Ok(req) => req,
        Err(e) => return Json(SimpleResponse::err(e)),
    };
    let sound = req.sound.unwrap_or_else(|| state.settings.get().bell_sound);
    if !BELL_SOUNDS.contains(&sound.as_str()) {
        return Json(SimpleResponse::err(format!("Unknown bell sound: {sound}")));
    }

    let bells = state.bells.clone();
    tokio::spawn(async move {
        if let Err(e) = bells.play_bell(&sound).await {
            warn!("Bell failed: {e}");
        }
    });
    Json(SimpleResponse::ok("playing"))
}

async fn handle_bell_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.bells.stop().await;
    Json(SimpleResponse::ok("stopped"))
}

async fn handle_volume(
    State(state): State<ApiState>,
    Json(req): Json<VolumeRequest>,
) -> Json<SimpleResponse> {
    let volume = clamp_volume(req.volume);
    state.settings.update(&mut |s| s.volume = volume);
    state.bells.set_volume(volume);
    if let Some(provider) = state.provider.current() {
        provider.set_volume(volume);
    }
    Json(SimpleResponse {
        volume: Some(volume),
        ..SimpleResponse::ok("ok")
    })
}

async fn handle_voices(State(state): State<ApiState>) -> Json<VoicesResponse> {
    let selection = state.settings.get().tts;
    let voices = selection
        .voices
        .as_ref()
        .map(|catalog| {
            catalog
                .by_locale()
                .into_iter()
                .map(|(locale, voices)| (locale, voices.into_iter().cloned().collect()))
                .collect()
        })
        .unwrap_or_default();

    Json(VoicesResponse {
        provider: selection.kind,
        selected: selection.voice,
        voices,
    })
}

async fn handle_timer_start(
    State(state): State<ApiState>,
    body: Bytes,
) -> Json<SimpleResponse> {
    let req: TimerStartRequest = match optional_json(&body) {
        Ok(req) => req,
        Err(e) => return Json(SimpleResponse::err(e)),
    };
    if let Some(secs) = req.duration_secs {
        if secs == 0 {
            return Json(SimpleResponse::err("duration must be positive"));
        }
        state.timer.set_duration(secs);
    }
    state.timer.start();
    Json(SimpleResponse::ok("started"))
}

async fn handle_timer_stop(State(state): State<ApiState>) -> Json<SimpleResponse> {
    state.timer.pause();
    Json(SimpleResponse::ok("stopped"))
}
