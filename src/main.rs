//! metta-voice: sutta reader with meditation bells.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use metta_voice::api::{self, ApiState};
use metta_voice::audio::bell::{sound_source, BellEngine};
use metta_voice::audio::AudioContext;
use metta_voice::config::Config;
use metta_voice::session::ReadingSession;
use metta_voice::settings::{SettingsStore, YamlSettings};
use metta_voice::speech::{ActiveProvider, ProviderManager, ProviderRegistry, SpeechEngine};
use metta_voice::timer::{AutoStartSignal, MeditationTimer};
use metta_voice::{HostEvent, SessionEvent, SpeechQueue};

#[derive(Parser, Debug)]
#[command(name = "metta-voice", about = "Read suttas aloud with meditation bells")]
struct Args {
    /// Path to config.yaml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose (debug) logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Read a text file aloud, printing each phrase as it is spoken
    Read { file: PathBuf },
    /// Ring a bell (defaults to the configured sound)
    Bell { sound: Option<String> },
    /// List the voices of the configured provider
    Voices,
    /// Speak a short sample with the selected voice
    Preview,
    /// Run the HTTP control API until Ctrl-C
    Serve,
}

struct App {
    config: Config,
    settings: Arc<dyn SettingsStore>,
    bells: Arc<BellEngine>,
    provider: Arc<ActiveProvider>,
    manager: ProviderManager,
    queue: SpeechQueue,
    session: Arc<ReadingSession>,
    timer: Arc<MeditationTimer>,
    auto_start: AutoStartSignal,
}

impl App {
    fn build(config: Config) -> Result<Self, Box<dyn std::error::Error>> {
        let settings: Arc<dyn SettingsStore> = Arc::new(YamlSettings::open(
            &config.settings_path(),
            config.initial_settings(),
        ));

        let context = Arc::new(AudioContext::rodio());
        let bells = Arc::new(BellEngine::new(
            context.clone(),
            sound_source(&config.audio.bell_source)?,
        ));
        bells.set_volume(settings.get().volume);

        let registry = ProviderRegistry::with_defaults(context, local_engine());
        let provider = Arc::new(ActiveProvider::new());
        let manager = ProviderManager::new(registry, provider.clone(), settings.clone());

        let queue = SpeechQueue::new(provider.clone(), config.reading.queue_timings());
        let auto_start = AutoStartSignal::new();
        let session = Arc::new(ReadingSession::new(
            queue.clone(),
            settings.clone(),
            config.reading.segmenter(),
            config.reading.pauses(),
            auto_start.clone(),
        ));
        let timer = Arc::new(MeditationTimer::new(bells.clone(), settings.clone()));

        Ok(Self {
            config,
            settings,
            bells,
            provider,
            manager,
            queue,
            session,
            timer,
            auto_start,
        })
    }

    /// Ctrl-C behaves like the host unloading: speech stops at once.
    fn stop_on_ctrl_c(&self) {
        let session = self.session.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                session.handle_host_event(HostEvent::Unload);
            }
        });
    }

    async fn shutdown(&self) {
        self.session.stop_reading();
        self.queue.handle_host_event(HostEvent::Unload);
        self.provider.clear();
        self.bells.shutdown().await;
        info!("metta-voice stopped");
    }
}

#[cfg(feature = "native-tts")]
fn local_engine() -> Option<Arc<dyn SpeechEngine>> {
    match metta_voice::speech::native::NativeEngine::spawn() {
        Ok(engine) => Some(Arc::new(engine)),
        Err(e) => {
            warn!("Local speech unavailable: {e}");
            None
        }
    }
}

#[cfg(not(feature = "native-tts"))]
fn local_engine() -> Option<Arc<dyn SpeechEngine>> {
    None
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Initialize logging (suppress noisy decoder/http internals)
    let filter = if args.verbose {
        EnvFilter::new("debug,symphonia=warn,reqwest=info,hyper=info")
    } else {
        EnvFilter::new("info,symphonia=warn,reqwest=warn,hyper=warn")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let config = Config::load(args.config.as_deref());
    let app = App::build(config)?;

    let result = match args.command {
        Command::Read { file } => read(&app, &file).await,
        Command::Bell { sound } => bell(&app, sound).await,
        Command::Voices => voices(&app).await,
        Command::Preview => preview(&app).await,
        Command::Serve => serve(&app).await,
    };

    app.shutdown().await;
    result
}

async fn read(app: &App, file: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let text = tokio::fs::read_to_string(file).await?;
    app.manager.apply_stored().await?;
    app.stop_on_ctrl_c();

    let mut events = app.session.subscribe();
    let session = app.session.clone();
    let printer = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            match event {
                SessionEvent::PhraseIndexChanged(index) => {
                    if let Some(phrase) = session.phrases().get(index) {
                        println!("{phrase}");
                    }
                }
                SessionEvent::SessionFailed(kind) => warn!("Reading failed ({kind:?})"),
                _ => {}
            }
        }
    });

    let outcome = app.session.read(&text).await;
    printer.abort();

    match outcome {
        Ok(()) => {}
        Err(e) if e.is_cancelled() => {
            info!("Reading stopped");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    if app.auto_start.is_armed() {
        app.auto_start.disarm();
        run_timer(app).await;
    }
    Ok(())
}

/// Run the meditation timer in the foreground until it finishes or Ctrl-C.
async fn run_timer(app: &App) {
    let mut state = app.timer.subscribe();
    app.timer.reset();
    app.timer.start();
    println!("Timer: {} minutes", app.timer.state().duration_secs / 60);

    tokio::select! {
        _ = state.wait_for(|s| !s.running) => {}
        _ = tokio::signal::ctrl_c() => app.timer.pause(),
    }
}

async fn bell(app: &App, sound: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let sound = sound.unwrap_or_else(|| app.settings.get().bell_sound);
    app.bells.play_bell(&sound).await?;
    Ok(())
}

async fn voices(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    let selection = app.manager.apply_stored().await?;
    let Some(catalog) = selection.voices else {
        println!("Text-to-speech is disabled");
        return Ok(());
    };

    for (locale, voices) in catalog.by_locale() {
        println!("{}", if locale.is_empty() { "(unknown)" } else { &locale });
        for voice in voices {
            let marker = if selection.voice.as_deref() == Some(voice.id.as_str()) {
                "*"
            } else {
                " "
            };
            println!("  {marker} {} ({})", voice.name, voice.id);
        }
    }
    Ok(())
}

async fn preview(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    app.manager.apply_stored().await?;
    app.session.preview_voice().await?;
    Ok(())
}

async fn serve(app: &App) -> Result<(), Box<dyn std::error::Error>> {
    if let Err(e) = app.manager.apply_stored().await {
        warn!("Speech provider not ready: {e}");
    }

    let timer_task = tokio::spawn(app.timer.clone().run_when_armed(app.auto_start.clone()));

    if app.config.api.enabled {
        let state = ApiState {
            session: app.session.clone(),
            bells: app.bells.clone(),
            timer: app.timer.clone(),
            provider: app.provider.clone(),
            settings: app.settings.clone(),
        };
        api::start_api(state, app.config.api.port).await;
    } else {
        info!("Control API disabled");
    }

    info!("metta-voice running, press Ctrl-C to exit");
    tokio::signal::ctrl_c().await?;
    timer_task.abort();
    Ok(())
}
