mod common;

use chrono::Duration;
use colony_core::{
    check_partition, BuildingKind, OrderStatus, OrderType, OwnerId, ResourceKind, ValidationError,
};
use colony_runtime::{
    signal_key, CompletionSignal, EngineError, ReconcileReport, Rejection, SignalOutcome,
};
use common::{amount_of, cost, dec, line, Harness};

async fn rich(h: &Harness) -> colony_core::SettlementId {
    let sid = h.found(1, "Alpha").await;
    h.engine
        .grant_resources(
            sid,
            &[
                line(ResourceKind::Gold, 100_000),
                line(ResourceKind::Metal, 100_000),
                line(ResourceKind::Fuel, 100_000),
            ],
        )
        .await
        .unwrap();
    sid
}

#[tokio::test]
async fn upgrades_queue_and_complete_in_order() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;
    h.seed_costs(vec![
        cost(BuildingKind::MetalMine, 2, &[(ResourceKind::Metal, 100)]),
        cost(BuildingKind::MetalMine, 3, &[(ResourceKind::Metal, 50)]),
    ])
    .await;
    h.set_amount(sid, ResourceKind::Metal, 0).await;
    h.advance(3_600);

    let first = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    assert_eq!(first.status, OrderStatus::InProgress);
    assert_eq!(first.slot, 1);
    assert_eq!(first.start_time, h.now());
    assert_eq!(first.finish_time, h.now() + Duration::seconds(120));
    assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(100));

    let second = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    assert_eq!(second.status, OrderStatus::Queued);
    assert_eq!(second.slot, 2);
    assert_eq!(second.start_time, first.finish_time);
    assert_eq!(second.finish_time, first.finish_time + Duration::seconds(180));
    assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(50));

    let armed = h.signals.get(&signal_key(first.id)).unwrap();
    assert_eq!(armed.due, first.finish_time);
    assert!(h.signals.get(&signal_key(second.id)).is_none());

    h.advance(120);
    let outcomes = h.drain().await;
    assert_eq!(outcomes.len(), 1);
    match &outcomes[0] {
        SignalOutcome::Completed(applied) => {
            assert_eq!(applied.building.level, 2);
            let head = applied.head.as_ref().unwrap();
            assert_eq!(head.id, second.id);
            assert_eq!(head.status, OrderStatus::InProgress);
            assert_eq!(head.slot, 1);
        }
        other => panic!("unexpected outcome {other:?}"),
    }
    assert_eq!(h.signals.get(&signal_key(second.id)).unwrap().due, second.finish_time);

    h.advance(180);
    h.drain().await;
    assert_eq!(h.level(sid, BuildingKind::MetalMine).await, 3);
    assert!(h.engine.list_queue(sid).await.unwrap().is_empty());
    assert!(h.signals.is_empty());
}

#[tokio::test]
async fn completion_is_applied_exactly_once() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let order = h.engine.request_upgrade(sid, BuildingKind::GoldMine).await.unwrap();
    h.advance(120);

    let signal = CompletionSignal::for_order(&order);
    assert!(matches!(
        h.engine.complete_from_signal(signal).await.unwrap(),
        SignalOutcome::Completed(_)
    ));
    assert_eq!(
        h.engine.complete_from_signal(signal).await.unwrap(),
        SignalOutcome::Duplicate
    );
    // the player collecting afterwards sees the same building
    let building = h.engine.collect_order(sid, order.id).await.unwrap();
    assert_eq!(building.level, 2);
    assert_eq!(h.level(sid, BuildingKind::GoldMine).await, 2);
}

#[tokio::test]
async fn early_signals_are_rearmed() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let order = h.engine.request_upgrade(sid, BuildingKind::GoldMine).await.unwrap();
    h.signals.clear();

    let outcome = h
        .engine
        .complete_from_signal(CompletionSignal::for_order(&order))
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Rearmed);
    assert_eq!(h.signals.get(&signal_key(order.id)).unwrap().due, order.finish_time);

    h.advance(30);
    let err = h.engine.collect_order(sid, order.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(Rejection::NotYetFinished { remaining_secs: 90, .. })
    ));
    assert_eq!(h.level(sid, BuildingKind::GoldMine).await, 1);
}

#[tokio::test]
async fn signals_for_queued_orders_are_ignored() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let first = h.engine.request_upgrade(sid, BuildingKind::GoldMine).await.unwrap();
    let second = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    assert_eq!(second.status, OrderStatus::Queued);

    let outcome = h
        .engine
        .complete_from_signal(CompletionSignal::for_order(&second))
        .await
        .unwrap();
    assert_eq!(outcome, SignalOutcome::Duplicate);
    assert!(h.signals.get(&signal_key(second.id)).is_none());
    assert_eq!(h.signals.get(&signal_key(first.id)).unwrap().due, first.finish_time);
}

#[tokio::test]
async fn remaining_time_never_reads_zero_before_the_finish() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let order = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    h.clock.advance(Duration::milliseconds(119_500));

    let detail = h.engine.describe_building(sid, BuildingKind::MetalMine).await.unwrap();
    assert_eq!(detail.remaining_secs, Some(1));
    let err = h.engine.collect_order(sid, order.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(Rejection::NotYetFinished { remaining_secs: 1, .. })
    ));
}

#[tokio::test]
async fn cancelling_a_queued_order_closes_the_gap() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let o1 = h.engine.request_upgrade(sid, BuildingKind::GoldMine).await.unwrap();
    let o2 = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    let o3 = h.engine.request_upgrade(sid, BuildingKind::FuelExtractor).await.unwrap();
    assert_eq!((o1.slot, o2.slot, o3.slot), (1, 2, 3));
    let before = h.engine.get_resources(sid).await.unwrap();

    let cancelled = h.engine.cancel_order(sid, o2.id).await.unwrap();
    assert_eq!(cancelled.status, OrderStatus::Cancelled);

    let queue = h.engine.list_queue(sid).await.unwrap();
    assert_eq!(queue.len(), 2);
    assert_eq!(queue[0].id, o1.id);
    assert_eq!(queue[1].id, o3.id);
    assert_eq!(queue[1].slot, 2);
    assert_eq!(queue[1].start_time, o1.finish_time);
    assert_eq!(queue[1].finish_time, o1.finish_time + Duration::seconds(120));
    check_partition(&queue).unwrap();

    // no refund
    let after = h.engine.get_resources(sid).await.unwrap();
    for kind in ResourceKind::ALL {
        assert_eq!(amount_of(&before, kind), amount_of(&after, kind));
    }

    let again = h.engine.cancel_order(sid, o2.id).await.unwrap_err();
    assert!(matches!(
        again,
        EngineError::InvalidTransition(Rejection::Terminal {
            status: OrderStatus::Cancelled,
            ..
        })
    ));
}

#[tokio::test]
async fn active_buildings_cannot_be_cancelled() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let order = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    let err = h.engine.cancel_order(sid, order.id).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(Rejection::CancelForbidden { .. })
    ));
    assert!(!err.user_message().is_empty());
    assert_eq!(h.engine.list_queue(sid).await.unwrap()[0].status, OrderStatus::InProgress);
}

#[tokio::test]
async fn cancelling_an_active_facility_finishes_it_now() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let first = h.engine.request_upgrade(sid, BuildingKind::CommandCenter).await.unwrap();
    let second = h.engine.request_upgrade(sid, BuildingKind::CommandCenter).await.unwrap();
    assert_eq!(first.order_type, OrderType::Facility);
    assert_eq!(second.start_time, first.finish_time);
    h.advance(60);

    let done = h.engine.cancel_order(sid, first.id).await.unwrap();
    assert_eq!(done.status, OrderStatus::Completed);
    assert_eq!(done.finish_time, h.now());
    assert_eq!(h.level(sid, BuildingKind::CommandCenter).await, 1);

    let queue = h.engine.list_queue(sid).await.unwrap();
    assert_eq!(queue.len(), 1);
    let head = &queue[0];
    assert_eq!(head.id, second.id);
    assert_eq!(head.status, OrderStatus::InProgress);
    assert_eq!(head.start_time, h.now());
    assert_eq!(head.finish_time, h.now() + Duration::seconds(1_170));
    assert!(h.signals.get(&signal_key(first.id)).is_none());
    assert_eq!(h.signals.get(&signal_key(second.id)).unwrap().due, head.finish_time);
}

#[tokio::test]
async fn partitions_run_independently() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let building = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    let facility = h.engine.request_upgrade(sid, BuildingKind::CommandCenter).await.unwrap();
    assert_eq!(building.status, OrderStatus::InProgress);
    assert_eq!(facility.status, OrderStatus::InProgress);
    assert_eq!(facility.slot, 1);
    assert_eq!(h.signals.len(), 2);
}

#[tokio::test]
async fn restart_completes_expired_orders_and_rearms_the_rest() {
    let mut h = Harness::new().await;
    let sid = rich(&h).await;
    let o1 = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    let o2 = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    let o3 = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    // 120s, 180s, 240s
    assert_eq!(o3.start_time, o2.finish_time);

    h.advance(320);
    h.restart().await;
    assert!(h.signals.is_empty());

    let report = h.engine.reconcile_on_startup().await.unwrap();
    assert_eq!(
        report,
        ReconcileReport {
            synced: 1,
            expired: 2,
            repaired: 0,
            failed: 0,
        }
    );
    assert_eq!(h.level(sid, BuildingKind::MetalMine).await, 3);
    let queue = h.engine.list_queue(sid).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, o3.id);
    assert_eq!(queue[0].status, OrderStatus::InProgress);
    assert_eq!(h.signals.get(&signal_key(o3.id)).unwrap().due, queue[0].finish_time);

    // a second pass finds nothing new
    let again = h.engine.reconcile_on_startup().await.unwrap();
    assert_eq!((again.expired, again.synced), (0, 1));
    assert!(o1.finish_time < h.now());
}

#[tokio::test]
async fn headless_partitions_are_repaired() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let o1 = h.engine.request_upgrade(sid, BuildingKind::GoldMine).await.unwrap();
    let o2 = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    sqlx::query("UPDATE construction_orders SET status = 'cancelled' WHERE id = ?")
        .bind(o1.id.0)
        .execute(&h.pool)
        .await
        .unwrap();

    let report = h.engine.reconcile_on_startup().await.unwrap();
    assert_eq!(report.repaired, 1);
    assert_eq!(report.synced, 1);
    let queue = h.engine.list_queue(sid).await.unwrap();
    assert_eq!(queue.len(), 1);
    assert_eq!(queue[0].id, o2.id);
    assert_eq!(queue[0].status, OrderStatus::InProgress);
    assert_eq!(queue[0].slot, 1);
    assert_eq!(queue[0].start_time, h.now());
    assert_eq!(queue[0].finish_time, h.now() + Duration::seconds(120));
}

#[tokio::test]
async fn empty_energy_store_stalls_production() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;
    h.set_level(sid, BuildingKind::PowerPlant, 0).await;
    h.advance(3_600);

    let views = h.engine.get_resources(sid).await.unwrap();
    assert!(views.iter().all(|v| v.gated));
    assert_eq!(amount_of(&views, ResourceKind::Metal), dec(500));
    assert_eq!(amount_of(&views, ResourceKind::Energy), dec(0));

    // stored energy keeps the mines running while it lasts
    h.engine
        .grant_resources(sid, &[line(ResourceKind::Energy, 100)])
        .await
        .unwrap();
    h.advance(3_600);
    let views = h.engine.get_resources(sid).await.unwrap();
    assert!(!views[0].gated);
    assert_eq!(amount_of(&views, ResourceKind::Energy), dec(70));
    assert_eq!(amount_of(&views, ResourceKind::Metal), dec(700));
    assert_eq!(amount_of(&views, ResourceKind::Gold), dec(600));
}

#[tokio::test]
async fn production_accrues_between_reads() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;
    h.advance(3_600);
    let views = h.engine.get_resources(sid).await.unwrap();
    assert_eq!(views[0].kind, ResourceKind::Energy);
    assert_eq!(amount_of(&views, ResourceKind::Energy), dec(30));
    assert_eq!(amount_of(&views, ResourceKind::Metal), dec(700));
    assert_eq!(amount_of(&views, ResourceKind::Gold), dec(600));
    assert_eq!(amount_of(&views, ResourceKind::Fuel), dec(350));

    // reading twice at the same instant changes nothing
    assert_eq!(h.engine.get_resources(sid).await.unwrap(), views);
}

#[tokio::test]
async fn missing_resources_reject_without_partial_debit() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;
    h.set_amount(sid, ResourceKind::Metal, 10).await;

    let err = h.engine.request_upgrade(sid, BuildingKind::GoldMine).await.unwrap_err();
    match err {
        EngineError::InsufficientResources {
            resource,
            required,
            available,
        } => {
            assert_eq!(resource, ResourceKind::Metal);
            assert_eq!(required, dec(72));
            assert_eq!(available, dec(10));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(h.amount(sid, ResourceKind::Gold).await, dec(500));
    assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(10));
    assert!(h.engine.list_queue(sid).await.unwrap().is_empty());
}

#[tokio::test]
async fn prerequisites_and_max_level_are_enforced() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let err = h.engine.request_upgrade(sid, BuildingKind::TrainingCenter).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(Rejection::PrerequisiteUnmet {
            kind: BuildingKind::TrainingCenter,
            requires: BuildingKind::CommandCenter,
            level: 1,
        })
    ));

    h.set_level(sid, BuildingKind::CommandCenter, 10).await;
    let err = h.engine.request_upgrade(sid, BuildingKind::CommandCenter).await.unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(Rejection::MaxLevel { max_level: 10, .. })
    ));

    // the prerequisite is met now
    let order = h.engine.request_upgrade(sid, BuildingKind::TrainingCenter).await.unwrap();
    assert_eq!(order.status, OrderStatus::InProgress);
}

#[tokio::test]
async fn interleaved_requests_keep_the_queue_dense() {
    let h = Harness::new().await;
    let sid = rich(&h).await;

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let engine = h.engine.clone();
        tasks.push(tokio::spawn(async move {
            engine.request_upgrade(sid, BuildingKind::MetalMine).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let queue = h.engine.list_queue(sid).await.unwrap();
    assert_eq!(queue.len(), 4);
    check_partition(&queue).unwrap();
    let slots: Vec<u32> = queue.iter().map(|o| o.slot).collect();
    assert_eq!(slots, vec![1, 2, 3, 4]);
    assert_eq!(
        queue.iter().filter(|o| o.status == OrderStatus::InProgress).count(),
        1
    );
    for pair in queue.windows(2) {
        assert_eq!(pair[1].start_time, pair[0].finish_time);
    }

    let detail = h.engine.describe_building(sid, BuildingKind::MetalMine).await.unwrap();
    assert_eq!(detail.next_level, Some(6));
    assert_eq!(detail.queued.len(), 3);
}

#[tokio::test]
async fn grants_and_spends_are_all_or_nothing() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;

    let views = h
        .engine
        .spend_resources(sid, &[line(ResourceKind::Metal, 100), line(ResourceKind::Gold, 50)])
        .await
        .unwrap();
    assert_eq!(amount_of(&views, ResourceKind::Metal), dec(400));
    assert_eq!(amount_of(&views, ResourceKind::Gold), dec(450));

    let err = h
        .engine
        .spend_resources(sid, &[line(ResourceKind::Metal, 1), line(ResourceKind::Fuel, 1_000)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InsufficientResources {
            resource: ResourceKind::Fuel,
            ..
        }
    ));
    assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(400));

    let err = h
        .engine
        .grant_resources(sid, &[line(ResourceKind::Metal, -5)])
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::InvalidTransition(Rejection::Invalid(ValidationError::NegativeAmount(
            ResourceKind::Metal
        )))
    ));
}

#[tokio::test]
async fn balances_never_pass_the_storage_cap() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;

    let views = h
        .engine
        .grant_resources(sid, &[line(ResourceKind::Metal, 50_000)])
        .await
        .unwrap();
    let metal = views.iter().find(|v| v.kind == ResourceKind::Metal).unwrap();
    assert_eq!(metal.capacity, dec(15_000));
    assert_eq!(metal.amount, dec(15_000));

    h.advance(3_600);
    let views = h.engine.get_resources(sid).await.unwrap();
    for view in &views {
        assert!(view.amount <= view.capacity, "{:?} over its cap", view.kind);
    }
    assert_eq!(amount_of(&views, ResourceKind::Metal), dec(15_000));

    // spending below the cap lets production resume
    h.engine
        .spend_resources(sid, &[line(ResourceKind::Metal, 200)])
        .await
        .unwrap();
    h.advance(1_800);
    assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(14_900));
}

#[tokio::test]
async fn building_detail_shows_the_next_step() {
    let h = Harness::new().await;
    let sid = rich(&h).await;
    let order = h.engine.request_upgrade(sid, BuildingKind::MetalMine).await.unwrap();
    h.advance(20);

    let detail = h.engine.describe_building(sid, BuildingKind::MetalMine).await.unwrap();
    assert_eq!(detail.level, 1);
    assert_eq!(detail.max_level, 50);
    assert_eq!(detail.rate_per_hour, 200.0);
    assert_eq!(detail.next_level, Some(3));
    assert_eq!(detail.next_duration_secs, Some(180));
    assert_eq!(
        detail.next_cost,
        vec![line(ResourceKind::Metal, 135), line(ResourceKind::Gold, 33)]
    );
    assert_eq!(detail.active.as_ref().map(|o| o.id), Some(order.id));
    assert_eq!(detail.remaining_secs, Some(100));
    assert!(detail.queued.is_empty());
    assert!(detail.prerequisite_met);

    let lab = h.engine.describe_building(sid, BuildingKind::ResearchLab).await.unwrap();
    assert!(!lab.prerequisite_met);
    assert_eq!(lab.requires, Some((BuildingKind::CommandCenter, 3)));
}

#[tokio::test]
async fn capitals_and_sweeps() {
    let h = Harness::new().await;
    let a = h.found(1, "Alpha").await;
    let b = h.found(1, "Beta").await;
    assert_eq!(h.engine.capital_of(OwnerId(1)).await.unwrap().id, a);
    assert!(matches!(
        h.engine.capital_of(OwnerId(2)).await.unwrap_err(),
        EngineError::NotFound { .. }
    ));

    h.advance(3_600);
    let report = h.engine.sweep().await.unwrap();
    assert_eq!((report.refreshed, report.failed), (2, 0));
    for sid in [a, b] {
        assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(700));
    }

    let unknown = colony_core::SettlementId(999);
    assert!(matches!(
        h.engine.get_resources(unknown).await.unwrap_err(),
        EngineError::NotFound { .. }
    ));
}

#[tokio::test]
async fn reloaded_rates_drive_production() {
    let h = Harness::new().await;
    let sid = h.found(1, "Alpha").await;
    sqlx::query("INSERT INTO production_rates (building, level, units_per_hour) VALUES ('metal_mine', 1, 400)")
        .execute(&h.pool)
        .await
        .unwrap();
    assert_eq!(h.engine.reload_schedules().await.unwrap(), 1);

    h.advance(3_600);
    assert_eq!(h.amount(sid, ResourceKind::Metal).await, dec(900));
    let detail = h.engine.describe_building(sid, BuildingKind::MetalMine).await.unwrap();
    assert_eq!(detail.rate_per_hour, 400.0);
}
