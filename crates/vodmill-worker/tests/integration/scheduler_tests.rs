//! Scheduler behavior across the whole stack: takeover, idempotency,
//! crash recovery.

use std::sync::Arc;
use std::time::Duration;

use vodmill_models::{
    ChunkPolicy, EncodeTask, MediaId, PriorityTier, ProfileCatalog, QueueClass, TaskStatus,
    WorkerId,
};
use vodmill_queue::{JobScheduler, SchedulerConfig};
use vodmill_state::{init_memory_pool, StateTracker};
use vodmill_worker::Orchestrator;

use super::{probed_720p, EngineScript, Harness, ScriptedEngine};

#[tokio::test(flavor = "multi_thread")]
async fn test_expired_lease_is_taken_over_by_a_live_worker() {
    let harness = Harness::new(ScriptedEngine::new(EngineScript::Succeed));
    let orch = Orchestrator::new(
        harness.scheduler.clone(),
        ProfileCatalog::standard(),
        ChunkPolicy::default(),
    );
    let media = MediaId::from_string("it-takeover");

    orch.submit(
        media.clone(),
        "/srv/in/it-takeover.mp4",
        Some(probed_720p(60.0)),
        PriorityTier::Normal,
    )
    .await
    .unwrap();

    // A worker that claims and then dies: no heartbeat, no completion
    let dead_worker = WorkerId::from_string("dead-worker");
    let (abandoned, _lease) = harness
        .scheduler
        .try_claim(QueueClass::Long, &dead_worker)
        .unwrap()
        .unwrap();
    assert_eq!(abandoned.attempts, 1);

    // Live workers start after the claim; the sweeper requeues the
    // abandoned task once its 2s lease runs out
    harness.start();
    let tasks = harness
        .wait_for_tasks_terminal(&media, Duration::from_secs(20))
        .await;

    assert!(tasks.iter().all(|t| t.status == TaskStatus::Success));
    let recovered = tasks.iter().find(|t| t.id == abandoned.id).unwrap();
    assert_eq!(recovered.attempts, 2);
    assert_ne!(recovered.worker_id, Some(dead_worker));

    harness.stop();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_concurrent_resubmission_creates_no_duplicate_tasks() {
    let harness = Harness::new(ScriptedEngine::new(EngineScript::Succeed));
    harness.start();
    let orch = Arc::new(Orchestrator::new(
        harness.scheduler.clone(),
        ProfileCatalog::standard(),
        ChunkPolicy::default(),
    ));
    let media = MediaId::from_string("it-idem");

    let first = orch
        .submit(
            media.clone(),
            "/srv/in/it-idem.mp4",
            Some(probed_720p(60.0)),
            PriorityTier::Normal,
        )
        .await
        .unwrap();
    let second = orch
        .submit(
            media.clone(),
            "/srv/in/it-idem.mp4",
            Some(probed_720p(60.0)),
            PriorityTier::Normal,
        )
        .await
        .unwrap();

    // The resubmission lands while the first batch is pending or running
    // and must add nothing
    assert_eq!(second.enqueued, 0);

    let tasks = harness
        .wait_for_tasks_terminal(&media, Duration::from_secs(15))
        .await;
    assert_eq!(tasks.len(), first.enqueued);

    harness.stop();
}

#[tokio::test]
async fn test_restart_recovery_requeues_interrupted_work() {
    let pool = init_memory_pool().unwrap();
    let tracker = Arc::new(StateTracker::new(pool));
    let config = SchedulerConfig {
        lease_ttl: Duration::from_secs(60),
        claim_poll: Duration::from_millis(50),
    };

    let media = MediaId::from_string("it-recover");
    let set = vodmill_models::MediaEncodingSet::new(
        media.clone(),
        "/srv/in/it-recover.mp4",
        probed_720p(60.0),
        vec!["240p".to_string(), "720p".to_string()],
        None,
    );
    tracker.save_set(&set).unwrap();

    // First process: one task claimed, one still pending, then it dies
    {
        let scheduler = JobScheduler::new(tracker.clone(), config.clone());
        for profile in ["240p", "720p"] {
            scheduler
                .enqueue(EncodeTask::new(
                    media.clone(),
                    profile,
                    None,
                    QueueClass::Long,
                    PriorityTier::Normal,
                    true,
                ))
                .unwrap();
        }
        let worker = WorkerId::new();
        scheduler.try_claim(QueueClass::Long, &worker).unwrap().unwrap();
    }

    // Second process rebuilds its queues from the durable store
    let scheduler = JobScheduler::new(tracker.clone(), config);
    let report = scheduler.recover().unwrap();
    assert_eq!(report.requeued_pending, 1);
    assert_eq!(report.recovered_running, 1);
    assert_eq!(report.failed_permanently, 0);

    let stats = scheduler.stats();
    assert_eq!(stats.long_depth, 2);
    assert_eq!(stats.running, 0);

    // The interrupted task carries its consumed attempt and the
    // worker-lost classification
    let tasks = tracker.load_tasks(&media).unwrap();
    let interrupted = tasks.iter().find(|t| t.attempts == 1).unwrap();
    assert_eq!(interrupted.status, TaskStatus::Pending);
    assert_eq!(
        interrupted.error.as_ref().unwrap().kind,
        vodmill_models::FailureKind::WorkerLost
    );
}
