mod common;

use common::{HOST_A, HOST_B, Harness, Person, client_for};
use reliabledb::journal::{
    MACHINE_ID_ATTR, PAYLOAD_ATTR, STEP_TYPE, TYPE_ATTR, VERSION_ATTR, WriteBatch,
};
use reliabledb::store::{FailureRule, PutRequest, Store, StoreOp, StoreRequest, apply_request};
use reliabledb::version::format_timestamp;
use reliabledb::{Attributes, CallContext, Clock, DaemonState, DbError, ReliableConfig};
use std::time::Duration;
use tokio_test::assert_ok;

/// Commits one person put whose propagation fails, leaving its step stranded.
async fn strand_person(h: &Harness, id: &str) -> String {
    h.store
        .inject_failure(FailureRule::new(StoreOp::Put).in_domain("Person").for_item(id))
        .unwrap();

    let mut ctx = CallContext::new();
    h.client.open_write_coordinator(&mut ctx);
    h.client
        .put(&mut ctx, &mut Person::new(id, "Ada"))
        .await
        .unwrap();
    let reliable_write_id = ctx.coordinator().unwrap().reliable_write_id().to_string();
    assert!(h.client.commit(&mut ctx).await.is_err());
    reliable_write_id
}

#[tokio::test]
async fn cycle_replays_stranded_step_after_reprocess_delay() {
    let h = Harness::new();
    let reliable_write_id = strand_person(&h, "42").await;
    assert_eq!(h.log_rows(), 1);

    // Still inside the grace period: untouched.
    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(h.log_rows(), 1);

    h.clock.advance_ms(60_001);
    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(report.failed, 0);

    assert!(
        h.client
            .intent_log()
            .pending_for(&reliable_write_id)
            .await
            .unwrap()
            .is_empty()
    );
    let person = h.store.item("Person", "42").unwrap().unwrap();
    assert_eq!(person.get("name").map(String::as_str), Some("Ada"));

    let stats = h.client.daemon().stats().unwrap();
    assert_eq!(stats.cycles, 2);
    assert_eq!(stats.applied, 1);
    assert!(stats.last_cycle_at.is_some());
}

#[tokio::test]
async fn partially_propagated_batch_is_finished_by_one_cycle() {
    let h = Harness::new();
    h.store
        .inject_failure(
            FailureRule::new(StoreOp::Put)
                .in_domain("Person")
                .for_item("42")
                .times(1),
        )
        .unwrap();

    let mut ctx = CallContext::new();
    h.client.open_write_coordinator(&mut ctx);
    h.client
        .put(&mut ctx, &mut Person::new("41", "Ada"))
        .await
        .unwrap();
    h.client
        .put(&mut ctx, &mut Person::new("42", "Grace"))
        .await
        .unwrap();
    let reliable_write_id = ctx.coordinator().unwrap().reliable_write_id().to_string();

    let err = h.client.commit(&mut ctx).await.unwrap_err();
    assert!(matches!(err, DbError::CommitFailed { .. }));
    assert_eq!(err.step_failures().len(), 1);
    assert_eq!(h.log_rows(), 1);
    assert!(h.store.item("Person", "41").unwrap().is_some());
    assert!(h.store.item("Person", "42").unwrap().is_none());

    let pending = h
        .client
        .intent_log()
        .pending_for(&reliable_write_id)
        .await
        .unwrap();
    assert_eq!(pending.len(), 1);
    assert_eq!(pending[0].id, err.step_failures()[0].step_id);

    // Too young to be replayed yet.
    assert_eq!(h.client.daemon().run_cycle().await.unwrap().scanned, 0);
    assert_eq!(h.log_rows(), 1);

    h.clock.advance_ms(60_001);
    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.scanned, 1);
    assert_eq!(report.applied, 1);
    assert_eq!(h.log_rows(), 0);

    let stored = h.store.item("Person", "42").unwrap().unwrap();
    assert_eq!(stored.get("name").map(String::as_str), Some("Grace"));
}

#[tokio::test]
async fn cycle_reads_the_log_strongly() {
    let h = Harness::new();
    strand_person(&h, "42").await;
    h.clock.advance_ms(60_001);

    h.client.daemon().run_cycle().await.unwrap();
    let stats = h.store.stats().unwrap();
    assert!(stats.consistent_selects >= 1);
    assert_eq!(stats.selects, stats.consistent_selects);
}

#[tokio::test]
async fn failing_replay_keeps_the_row() {
    let h = Harness::new();
    strand_person(&h, "42").await;
    h.clock.advance_ms(60_001);

    h.store
        .inject_failure(FailureRule::new(StoreOp::Put).in_domain("Person"))
        .unwrap();
    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.failed, 1);
    assert_eq!(h.log_rows(), 1);

    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(h.log_rows(), 0);
}

#[tokio::test]
async fn replay_pages_through_old_steps_in_order() {
    let h = Harness::with_config(ReliableConfig::new().scan_page_size(2));
    h.store
        .inject_failure(FailureRule::new(StoreOp::Put).in_domain("Person").times(5))
        .unwrap();

    let mut ctx = CallContext::new();
    h.client.open_write_coordinator(&mut ctx);
    for id in 1..=5 {
        h.client
            .put(&mut ctx, &mut Person::new(&id.to_string(), "Ada"))
            .await
            .unwrap();
    }
    let err = h.client.commit(&mut ctx).await.unwrap_err();
    assert_eq!(err.step_failures().len(), 5);
    assert_eq!(h.log_rows(), 5);

    h.clock.advance_ms(60_001);
    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.pages, 3);
    assert_eq!(report.scanned, 5);
    assert_eq!(report.applied, 5);
    assert_eq!(h.log_rows(), 0);
    assert_eq!(h.store.domain_len("Person").unwrap(), 5);
}

#[tokio::test]
async fn replaying_an_applied_step_is_harmless() {
    let h = Harness::new();

    let mut batch = WriteBatch::new(25);
    let mut attributes = Attributes::new();
    attributes.insert("name".to_string(), "Ada".to_string());
    batch
        .push(StoreRequest::Put(PutRequest {
            domain: "Person".to_string(),
            item_name: "42".to_string(),
            attributes,
            condition: None,
        }))
        .unwrap();
    let steps = h.client.intent_log().seal(batch).unwrap();
    h.client.intent_log().append(&steps).await.unwrap();

    // Applied once, but the process died before deleting the row.
    apply_request(&*h.store, steps[0].request.clone())
        .await
        .unwrap();
    let before = h.store.item("Person", "42").unwrap();

    h.clock.advance_ms(60_001);
    let report = assert_ok!(h.client.daemon().run_cycle().await);
    assert_eq!(report.applied, 1);
    assert_eq!(h.log_rows(), 0);
    assert_eq!(h.store.item("Person", "42").unwrap(), before);

    // Deleting the row again is fine too.
    assert_ok!(h.client.intent_log().delete(&steps[0].id).await);
}

#[tokio::test]
async fn replayed_conditional_put_that_already_landed_is_dropped() {
    let h = Harness::new();
    h.store
        .inject_failure(FailureRule::new(StoreOp::Delete).in_domain("ReliableWrites"))
        .unwrap();

    let mut ctx = CallContext::new();
    h.client.open_write_coordinator(&mut ctx);
    h.client
        .put(&mut ctx, &mut common::Account::new("X", "ada", 100))
        .await
        .unwrap();
    let report = h.client.commit(&mut ctx).await.unwrap();
    assert_eq!(report.cleanup_pending, 1);
    assert_eq!(h.log_rows(), 1);
    let before = h.store.item("Account", "X").unwrap();

    h.clock.advance_ms(60_001);
    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.conflicts, 1);
    assert_eq!(h.log_rows(), 0);
    assert_eq!(h.store.item("Account", "X").unwrap(), before);
}

#[tokio::test]
async fn undecodable_rows_are_skipped() {
    let h = Harness::new();
    let mut attributes = Attributes::new();
    attributes.insert(TYPE_ATTR.to_string(), STEP_TYPE.to_string());
    attributes.insert(MACHINE_ID_ATTR.to_string(), HOST_A.to_string());
    attributes.insert(
        VERSION_ATTR.to_string(),
        format_timestamp(&(h.clock.now() - chrono::Duration::hours(1))),
    );
    attributes.insert(PAYLOAD_ATTR.to_string(), "<not json>".to_string());
    h.store
        .put(PutRequest {
            domain: "ReliableWrites".to_string(),
            item_name: "broken".to_string(),
            attributes,
            condition: None,
        })
        .await
        .unwrap();

    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.undecodable, 1);
    assert_eq!(report.applied, 0);
    assert_eq!(h.client.daemon().stats().unwrap().undecodable, 1);
}

#[tokio::test]
async fn other_hosts_steps_wait_for_drain() {
    let h = Harness::new();
    let other = client_for(&h.store, &h.clock, ReliableConfig::default(), HOST_B);

    h.store
        .inject_failure(FailureRule::new(StoreOp::Put).in_domain("Person"))
        .unwrap();
    let mut ctx = CallContext::new();
    other.open_write_coordinator(&mut ctx);
    other
        .put(&mut ctx, &mut Person::new("7", "Bob"))
        .await
        .unwrap();
    assert!(other.commit(&mut ctx).await.is_err());

    h.clock.advance_ms(60_001);
    let report = h.client.daemon().run_cycle().await.unwrap();
    assert_eq!(report.scanned, 0);
    assert_eq!(h.log_rows(), 1);

    let report = h.client.daemon().drain_host(HOST_B).await.unwrap();
    assert_eq!(report.applied, 1);
    assert_eq!(h.log_rows(), 0);
    assert!(h.store.item("Person", "7").unwrap().is_some());

    assert!(matches!(
        h.client.daemon().drain_host(" ").await,
        Err(DbError::InvalidArgument(_))
    ));
}

#[tokio::test]
async fn start_twice_is_rejected() {
    let h = Harness::new();
    let daemon = h.client.daemon();

    daemon.start().unwrap();
    assert_eq!(daemon.state().unwrap(), DaemonState::Running);
    assert!(matches!(daemon.start(), Err(DbError::InvalidState(_))));

    daemon.stop().await.unwrap();
    assert_eq!(daemon.state().unwrap(), DaemonState::Stopped);

    // Restartable once stopped.
    daemon.start().unwrap();
    daemon.stop().await.unwrap();
}

#[tokio::test]
async fn stop_interrupts_the_sleep() {
    let h = Harness::with_config(ReliableConfig::new().retry_interval_ms(3_600_000));
    let daemon = h.client.daemon();

    daemon.start().unwrap();
    let stopped = tokio::time::timeout(Duration::from_secs(5), daemon.stop()).await;
    assert!(matches!(stopped, Ok(Ok(()))));
    assert_eq!(daemon.state().unwrap(), DaemonState::Stopped);
    // At least one full cycle ran before the loop honored the stop.
    assert!(daemon.stats().unwrap().cycles >= 1);

    // Stopping again is a no-op.
    assert_ok!(daemon.stop().await);
}

#[tokio::test]
async fn background_loop_reconciles_stranded_steps() {
    let h = Harness::with_config(ReliableConfig::new().retry_interval_ms(20));
    let reliable_write_id = strand_person(&h, "42").await;
    h.clock.advance_ms(60_001);

    h.client.daemon().start().unwrap();
    let mut reconciled = false;
    for _ in 0..250 {
        let pending = h
            .client
            .intent_log()
            .pending_for(&reliable_write_id)
            .await
            .unwrap();
        if pending.is_empty() {
            reconciled = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    h.client.shutdown().await.unwrap();

    assert!(reconciled);
    assert!(h.store.item("Person", "42").unwrap().is_some());
}

#[tokio::test]
async fn concurrent_stops_both_wait_for_the_loop() {
    let h = Harness::with_config(ReliableConfig::new().retry_interval_ms(3_600_000));
    let daemon = h.client.daemon();
    daemon.start().unwrap();

    let (first, (second, state_after_second)) = tokio::join!(daemon.stop(), async {
        let stopped = daemon.stop().await;
        (stopped, daemon.state())
    });
    assert_ok!(first);
    assert_ok!(second);
    assert_eq!(state_after_second.unwrap(), DaemonState::Stopped);
}

#[test]
fn start_outside_runtime_is_rejected() {
    let h = Harness::new();
    assert!(matches!(
        h.client.daemon().start(),
        Err(DbError::InvalidState(_))
    ));
    assert_eq!(h.client.daemon().state().unwrap(), DaemonState::Stopped);
}
