mod common;

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use common::{FakeOutput, FakeSoundSource};
use metta_voice::audio::bell::BellEngine;
use metta_voice::audio::{AudioContext, PlaybackHandle};
use metta_voice::SpeechError;

fn engine(source: Arc<FakeSoundSource>) -> (Arc<BellEngine>, Arc<FakeOutput>) {
    let output = Arc::new(FakeOutput::default());
    let context = Arc::new(AudioContext::with_output(output.clone()));
    (Arc::new(BellEngine::new(context, source)), output)
}

#[tokio::test(start_paused = true)]
async fn play_resolves_after_sound_and_reverb_tail() {
    let (bells, _) = engine(FakeSoundSource::new(2000));
    let clip = bells.load("tibetan-bowl").await.unwrap();

    let start = Instant::now();
    bells.play(&clip).await.unwrap();
    let elapsed = start.elapsed();

    assert!(elapsed >= Duration::from_secs(3), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(3500), "{elapsed:?}");
    assert!(!bells.is_playing());
}

#[tokio::test(start_paused = true)]
async fn second_bell_fades_out_the_first() {
    let source = FakeSoundSource::new(2000);
    let (bells, output) = engine(source.clone());

    let first = tokio::spawn({
        let bells = bells.clone();
        async move { bells.play_bell("zen-bell").await }
    });
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(bells.is_playing());

    let second = tokio::spawn({
        let bells = bells.clone();
        async move { bells.play_bell("zen-bell").await }
    });

    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert_eq!(source.fetches(), 1);
    let handles = output.handles();
    assert_eq!(handles.len(), 2);
    let stopped = handles[0].stopped_at().expect("first bell stopped");
    assert!(stopped <= handles[1].started);
    assert_eq!(handles[0].volume(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn load_retries_transient_failures() {
    let source = FakeSoundSource::failing(500, 2);
    let (bells, _) = engine(source.clone());

    let start = Instant::now();
    let clip = bells.load("temple-bell").await.unwrap();
    assert_eq!(clip.duration(), Duration::from_millis(500));
    assert_eq!(source.fetches(), 3);
    // Two one-second backoffs.
    assert!(start.elapsed() >= Duration::from_secs(2));

    bells.load("temple-bell").await.unwrap();
    assert_eq!(source.fetches(), 3);
}

#[tokio::test(start_paused = true)]
async fn load_gives_up_after_three_retries() {
    let source = FakeSoundSource::failing(500, 10);
    let (bells, _) = engine(source.clone());

    let err = bells.play_bell("temple-bell").await.unwrap_err();
    assert!(matches!(err, SpeechError::SoundUnavailable(_)), "{err:?}");
    assert_eq!(source.fetches(), 4);
    assert!(!bells.is_playing());
}

#[tokio::test(start_paused = true)]
async fn concurrent_loads_share_one_fetch() {
    let source = FakeSoundSource::new(500);
    let (bells, _) = engine(source.clone());

    let (a, b) = tokio::join!(bells.load("meditation-bell"), bells.load("meditation-bell"));
    assert_eq!(a.unwrap().duration(), b.unwrap().duration());
    assert_eq!(source.fetches(), 1);

    bells.clear_cache();
    bells.load("meditation-bell").await.unwrap();
    assert_eq!(source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn different_sounds_load_side_by_side() {
    let source = FakeSoundSource::new(500);
    let (bells, _) = engine(source.clone());

    let started = Instant::now();
    let (a, b) = tokio::join!(bells.load("zen-bell"), bells.load("temple-bell"));
    a.unwrap();
    b.unwrap();

    // Each fetch takes 20ms; run one after the other they would take 40ms.
    assert!(started.elapsed() < Duration::from_millis(40));
    assert_eq!(source.fetches(), 2);
}

#[tokio::test(start_paused = true)]
async fn interrupt_releases_the_bell_at_once() {
    let (bells, output) = engine(FakeSoundSource::new(5000));
    bells.interrupt();

    let ringing = tokio::spawn({
        let bells = bells.clone();
        async move { bells.play_bell("zen-bell").await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert!(bells.is_playing());

    bells.interrupt();
    assert!(!bells.is_playing());
    ringing.await.unwrap().unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    let handle = &output.handles()[0];
    assert!(handle.stopped_at().is_some());
    assert_eq!(handle.volume(), 0.0);
}

#[tokio::test(start_paused = true)]
async fn stop_is_idempotent() {
    let (bells, output) = engine(FakeSoundSource::new(5000));
    bells.stop().await;
    bells.stop().await;

    let ringing = tokio::spawn({
        let bells = bells.clone();
        async move { bells.play_bell("tibetan-bowl").await }
    });
    tokio::time::sleep(Duration::from_millis(500)).await;

    bells.stop().await;
    bells.stop().await;
    ringing.await.unwrap().unwrap();

    assert!(!bells.is_playing());
    assert!(output.handles()[0].stopped_at().is_some());
}

#[tokio::test(start_paused = true)]
async fn volume_is_clamped() {
    let (bells, _) = engine(FakeSoundSource::new(100));
    for (requested, expected) in [(-1.0, 0.0), (0.0, 0.0), (0.5, 0.5), (1.0, 1.0), (2.0, 1.0)] {
        bells.set_volume(requested);
        assert_eq!(bells.volume(), expected, "requested {requested}");
    }
}

#[tokio::test(start_paused = true)]
async fn bells_start_at_master_volume() {
    let (bells, output) = engine(FakeSoundSource::new(100));
    bells.set_volume(0.4);
    bells.play_bell("zen-bell").await.unwrap();
    // Released handles are stopped but keep their last gain.
    assert_eq!(output.handles()[0].volume(), 0.4);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_context() {
    let output = Arc::new(FakeOutput::default());
    let context = Arc::new(AudioContext::with_output(output));
    let bells = BellEngine::new(context.clone(), FakeSoundSource::new(100));

    bells.load("zen-bell").await.unwrap();
    assert!(context.is_open().await);

    bells.shutdown().await;
    assert!(!context.is_open().await);
    assert!(bells.load("zen-bell").await.is_err());
}
