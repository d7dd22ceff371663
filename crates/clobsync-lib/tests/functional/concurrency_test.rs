//! Per-path exclusion and batch notifications under a busy worker pool.

use std::time::Duration;

use clobsync_lib::operations::{Phase, SyncAction};
use clobsync_lib::{MappingRule, SyncError, SyncOutcome};

use crate::common::{table, wait_until, SyncHarnessBuilder};

#[test]
fn test_writes_to_one_path_never_overlap() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_workers(4)
        .with_store(|store| {
            store.add_row(&reports, "a.xml", b"a");
            store.add_row(&reports, "b.xml", b"b");
            store.set_write_delay(Duration::from_millis(30));
        })
        .build();
    let a = h.write_file("src/a.xml", b"local a");
    let b = h.write_file("src/b.xml", b"local b");

    let mut replies = Vec::new();
    for _ in 0..5 {
        replies.push(h.orchestrator.submit(a.clone(), SyncAction::Push).unwrap());
        replies.push(h.orchestrator.submit(b.clone(), SyncAction::Push).unwrap());
    }
    for reply in replies {
        let report = reply.recv_timeout(Duration::from_secs(10)).unwrap();
        assert!(matches!(report.outcome, SyncOutcome::Updated(_)), "{}", report.outcome);
    }

    let writes = h.store.writes();
    assert_eq!(writes.len(), 10);
    for (i, first) in writes.iter().enumerate() {
        for second in &writes[i + 1..] {
            if first.table == second.table && first.key == second.key {
                assert!(
                    !first.overlaps(second),
                    "overlapping writes on {} {}",
                    first.table,
                    first.key
                );
            }
        }
    }
}

#[test]
fn test_timed_out_write_keeps_path_until_it_returns() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_io_timeout(Duration::from_millis(50))
        .with_store(|store| {
            store.add_row(&reports, "a.xml", b"remote");
            store.set_write_delay(Duration::from_millis(300));
        })
        .build();
    let a = h.write_file("src/a.xml", b"local");

    for _ in 0..2 {
        let report = h.orchestrator.run(a.clone(), SyncAction::Push).unwrap();
        assert!(
            matches!(
                &report.outcome,
                SyncOutcome::Failed { phase: Phase::Writing, error }
                    if matches!(**error, SyncError::Timeout { .. })
            ),
            "{}",
            report.outcome
        );
    }

    // Both late writes still land, one after the other
    assert!(wait_until(Duration::from_secs(5), || h.store.write_count() == 2));
    let writes = h.store.writes();
    assert!(!writes[0].overlaps(&writes[1]), "late writes overlapped");
    assert!(h.wait_for_idle());
}

#[test]
fn test_requests_for_one_path_run_in_submission_order() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_store(|store| {
            store.add_row(&reports, "a.xml", b"remote");
            store.set_write_delay(Duration::from_millis(20));
        })
        .build();
    let a = h.write_file("src/a.xml", b"local");

    let first = h.orchestrator.submit(a.clone(), SyncAction::Push).unwrap();
    let second = h.orchestrator.submit(a.clone(), SyncAction::Download).unwrap();

    let first = first.recv_timeout(Duration::from_secs(5)).unwrap();
    let second = second.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(first.outcome, SyncOutcome::Updated(_)));
    assert!(matches!(second.outcome, SyncOutcome::Downloaded(_)));
    assert!(first.finished_at <= second.started_at);

    // The download fetched what the push wrote
    assert_eq!(h.read_file(&a), b"local");
}

#[test]
fn test_batch_notifications_bracket_operations() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_auto_insert(true)
        .with_store(|store| {
            store.add_row(&reports, "a.xml", b"remote");
            store.set_write_delay(Duration::from_millis(20));
        })
        .build();
    let a = h.write_file("src/a.xml", b"local a");
    let b = h.write_file("src/b.xml", b"local b");

    let push = h.orchestrator.submit(a, SyncAction::Push).unwrap();
    let insert = h.orchestrator.submit(b, SyncAction::Insert).unwrap();
    push.recv_timeout(Duration::from_secs(5)).unwrap();
    insert.recv_timeout(Duration::from_secs(5)).unwrap();

    assert!(h.wait_for_idle());
    assert_eq!(h.listener.outcome_count(), 2);
    let finished = h.listener.finished();
    assert!(!finished.is_empty());
    // The insert changed the synced file set, so some batch reports it
    assert!(finished.iter().any(|structural| *structural));
}

#[test]
fn test_shutdown_cancels_queued_requests() {
    let reports = table("APP", "REPORTS");
    let mut h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_workers(1)
        .with_store(|store| {
            store.add_row(&reports, "a.xml", b"remote");
            store.set_write_delay(Duration::from_millis(200));
        })
        .build();
    let a = h.write_file("src/a.xml", b"local");

    let running = h.orchestrator.submit(a.clone(), SyncAction::Push).unwrap();
    assert!(wait_until(Duration::from_secs(5), || {
        h.orchestrator.pending() == 0
    }));
    let queued = h.orchestrator.submit(a.clone(), SyncAction::Push).unwrap();

    let dropped = h.orchestrator.shutdown();
    assert_eq!(dropped.len(), 1);

    // The in-flight push finishes, the queued one is cancelled
    let running = running.recv_timeout(Duration::from_secs(5)).unwrap();
    assert!(matches!(running.outcome, SyncOutcome::Updated(_)));
    let queued = queued.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(
        queued.outcome.skip_reason(),
        Some(clobsync_lib::SkipReason::Cancelled)
    );

    assert!(h.orchestrator.submit(a, SyncAction::Push).is_none());
}
