mod common;

use colony_core::{BuildingKind, EngineConfig, ResourceKind};
use colony_runtime::{CompletionSignal, CompletionWorker, WorkerStats};
use common::{dec, line, Harness};
use std::time::Duration;
use tokio::sync::mpsc;

#[tokio::test]
async fn worker_drains_signals_until_senders_close() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;
    h.engine
        .grant_resources(sid, &[line(ResourceKind::Metal, 10_000), line(ResourceKind::Gold, 10_000)])
        .await
        .unwrap();
    let first = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    let second = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    h.advance(120);

    let (tx, rx) = mpsc::unbounded_channel();
    // delivered twice, plus one for an order that is not due yet
    tx.send(CompletionSignal::for_order(&first)).unwrap();
    tx.send(CompletionSignal::for_order(&first)).unwrap();
    tx.send(CompletionSignal::for_order(&second)).unwrap();
    drop(tx);

    let worker = CompletionWorker::new(h.engine.clone(), rx);
    let stats = worker.run(std::future::pending()).await;
    assert_eq!(
        stats,
        WorkerStats {
            completed: 1,
            duplicates: 1,
            rearmed: 1,
            failed: 0,
            sweeps: 0,
        }
    );
    assert_eq!(h.level(sid, BuildingKind::MetalMine).await, 2);
}

#[tokio::test]
async fn worker_stops_on_shutdown() {
    let h = Harness::new().await;
    let (_tx, rx) = mpsc::unbounded_channel();
    let worker = CompletionWorker::new(h.engine.clone(), rx);
    let stats = worker.run(async {}).await;
    assert_eq!(stats, WorkerStats::default());
}

#[tokio::test]
async fn sweeps_pick_up_schedules_seeded_elsewhere() {
    let config = EngineConfig {
        sweep_interval_secs: 1,
        ..EngineConfig::default()
    };
    let h = Harness::with_config(config).await;
    let sid = h.found(1, "Alpha").await;
    sqlx::query("INSERT INTO production_rates (building, level, units_per_hour) VALUES ('metal_mine', 1, 400)")
        .execute(&h.pool)
        .await
        .unwrap();

    let (_tx, rx) = mpsc::unbounded_channel();
    let worker = CompletionWorker::new(h.engine.clone(), rx);
    let stats = worker.run(tokio::time::sleep(Duration::from_millis(1_500))).await;
    assert!(stats.sweeps >= 1);

    h.advance(3_600);
    assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(900));
}
