//! End-to-end pipeline tests with a scripted engine.

use std::time::Duration;

use vodmill_models::{
    ChunkPolicy, FailureKind, MediaId, PriorityTier, ProfileCatalog, SetStatus, TaskStatus,
};
use vodmill_worker::Orchestrator;

use super::{probed_720p, EngineScript, Harness, ScriptedEngine};

fn orchestrator(harness: &Harness) -> Orchestrator {
    Orchestrator::new(
        harness.scheduler.clone(),
        ProfileCatalog::standard(),
        ChunkPolicy::default(),
    )
}

#[tokio::test(flavor = "multi_thread")]
async fn test_all_tasks_succeed_then_assembly_verdict_is_recorded() {
    let engine = ScriptedEngine::new(EngineScript::Succeed);
    let harness = Harness::new(engine.clone());
    harness.start();
    let orch = orchestrator(&harness);
    let media = MediaId::from_string("it-success");

    let receipt = orch
        .submit(
            media.clone(),
            "/srv/in/it-success.mp4",
            Some(probed_720p(60.0)),
            PriorityTier::Normal,
        )
        .await
        .unwrap();
    assert!(receipt.enqueued > 0);

    let tasks = harness
        .wait_for_tasks_terminal(&media, Duration::from_secs(15))
        .await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Success));
    assert_eq!(engine.invocations() as usize, tasks.len());

    // The scripted outputs are not real media, so sprite generation fails
    // and the assembler must record an assembly failure on the set rather
    // than publish a manifest.
    let status = harness
        .wait_for_terminal(&media, Duration::from_secs(15))
        .await;
    assert_eq!(status, SetStatus::Fail);
    let set = harness.tracker.load_set(&media).unwrap();
    assert_eq!(set.failure.unwrap().kind, FailureKind::AssemblyFailure);
    assert!(set.artifacts.is_none());

    harness.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_engine_failure_exhausts_attempts() {
    let harness = Harness::new(ScriptedEngine::new(EngineScript::AlwaysFail));
    harness.start();
    let orch = orchestrator(&harness);
    let media = MediaId::from_string("it-exhaust");

    orch.submit(
        media.clone(),
        "/srv/in/it-exhaust.mp4",
        Some(probed_720p(60.0)),
        PriorityTier::Normal,
    )
    .await
    .unwrap();

    let status = harness
        .wait_for_terminal(&media, Duration::from_secs(30))
        .await;
    assert_eq!(status, SetStatus::Fail);

    let tasks = harness.tracker.load_tasks(&media).unwrap();
    let exhausted = tasks
        .iter()
        .find(|t| t.status == TaskStatus::Fail)
        .expect("at least one task exhausted its attempts");
    assert_eq!(exhausted.attempts, exhausted.max_attempts);
    assert_eq!(
        exhausted.error.as_ref().unwrap().kind,
        FailureKind::EngineFailure
    );

    harness.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_transient_failure_recovers_on_retry() {
    let engine = ScriptedEngine::new(EngineScript::FailTimes(1));
    let harness = Harness::new(engine.clone());
    harness.start();
    let orch = orchestrator(&harness);
    let media = MediaId::from_string("it-transient");

    orch.submit(
        media.clone(),
        "/srv/in/it-transient.mp4",
        Some(probed_720p(60.0)),
        PriorityTier::Normal,
    )
    .await
    .unwrap();

    let tasks = harness
        .wait_for_tasks_terminal(&media, Duration::from_secs(30))
        .await;
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Success));
    // Exactly one task needed a second attempt
    let retried: Vec<_> = tasks.iter().filter(|t| t.attempts == 2).collect();
    assert_eq!(retried.len(), 1);

    harness.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cancellation_stops_in_flight_tasks() {
    let harness = Harness::new(ScriptedEngine::new(EngineScript::WaitForCancel));
    harness.start();
    let orch = orchestrator(&harness);
    let media = MediaId::from_string("it-cancel");

    orch.submit(
        media.clone(),
        "/srv/in/it-cancel.mp4",
        Some(probed_720p(60.0)),
        PriorityTier::Normal,
    )
    .await
    .unwrap();

    // Let the workers pick tasks up before cancelling
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    loop {
        let running = harness
            .tracker
            .load_tasks(&media)
            .unwrap()
            .into_iter()
            .filter(|t| t.status == TaskStatus::Running)
            .count();
        if running > 0 {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "no task started");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }

    let in_flight = orch.cancel(&media).unwrap();
    assert!(!in_flight.is_empty());
    harness.executor.signal_cancel(&in_flight);

    let status = harness
        .wait_for_terminal(&media, Duration::from_secs(10))
        .await;
    assert_eq!(status, SetStatus::Cancelled);
    let tasks = harness.tracker.load_tasks(&media).unwrap();
    assert!(tasks
        .iter()
        .all(|t| t.status == TaskStatus::Cancelled));

    harness.stop();
}

/// Full pipeline against a real ffmpeg install: encode a generated test
/// pattern into every eligible profile and assemble the delivery set.
#[tokio::test(flavor = "multi_thread")]
#[ignore = "requires ffmpeg"]
async fn test_real_ffmpeg_pipeline_produces_artifacts() {
    use vodmill_worker::{FfmpegEngine, WorkerResult};

    async fn generate_source(path: &std::path::Path) -> WorkerResult<()> {
        let status = tokio::process::Command::new("ffmpeg")
            .args([
                "-y",
                "-f",
                "lavfi",
                "-i",
                "testsrc=duration=4:size=640x360:rate=30",
                "-f",
                "lavfi",
                "-i",
                "sine=frequency=440:duration=4",
                "-c:v",
                "libx264",
                "-c:a",
                "aac",
                "-shortest",
            ])
            .arg(path)
            .status()
            .await
            .map_err(vodmill_worker::WorkerError::Io)?;
        assert!(status.success());
        Ok(())
    }

    let source_dir = tempfile::tempdir().unwrap();
    let source_path = source_dir.path().join("source.mp4");
    generate_source(&source_path).await.unwrap();

    let harness = Harness::new(std::sync::Arc::new(FfmpegEngine::new(Duration::from_secs(
        120,
    ))));
    harness.start();
    let orch = orchestrator(&harness);
    let media = MediaId::from_string("it-real");

    orch.submit(
        media.clone(),
        source_path.to_string_lossy().to_string(),
        None,
        PriorityTier::Normal,
    )
    .await
    .unwrap();

    let status = harness
        .wait_for_terminal(&media, Duration::from_secs(120))
        .await;
    assert_eq!(status, SetStatus::Success);

    let set = harness.tracker.load_set(&media).unwrap();
    let artifacts = set.artifacts.unwrap();
    assert!(std::path::Path::new(&artifacts.manifest_path).exists());
    assert!(std::path::Path::new(&artifacts.sprite_path).exists());
    assert!(std::path::Path::new(&artifacts.poster_path).exists());
    assert!(!artifacts.variants.is_empty());

    harness.stop();
}
