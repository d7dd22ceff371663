//! How requests are resolved to rows, and when they are skipped or fail.

use std::time::Duration;

use clobsync_lib::operations::{Phase, SyncAction};
use clobsync_lib::watch::{fingerprint_bytes, ChangeKind};
use clobsync_lib::{MappingRule, SkipReason, SyncError, SyncOutcome};

use crate::common::{table, SyncHarnessBuilder};

fn modified(content: Option<&[u8]>) -> SyncAction {
    SyncAction::Changed {
        kind: ChangeKind::Modified,
        fingerprint: content.map(fingerprint_bytes),
    }
}

#[test]
fn test_unmapped_path_is_skipped_without_backup_or_write() {
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(table("APP", "REPORTS")))
        .build();
    let path = h.write_file("docs/readme.txt", b"hello");

    for action in [modified(Some(b"hello")), SyncAction::Push, SyncAction::Insert] {
        let report = h.orchestrator.run(path.clone(), action).unwrap();
        assert_eq!(report.outcome.skip_reason(), Some(SkipReason::NoMapping));
        assert!(report.backup.is_none());
    }

    assert_eq!(h.store.write_count(), 0);
    assert!(h.store.inserts().is_empty());
    assert!(h.backups.list_backups(&path).unwrap().is_empty());
}

#[test]
fn test_path_outside_root_is_skipped() {
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("all", "").with_table(table("APP", "REPORTS")))
        .build();

    let report = h
        .orchestrator
        .run("/definitely/not/under/root.xml".into(), SyncAction::Push)
        .unwrap();
    assert_eq!(report.outcome.skip_reason(), Some(SkipReason::NoMapping));
}

#[test]
fn test_declined_ambiguous_insert_creates_no_row() {
    let h = SyncHarnessBuilder::new()
        .with_rule(
            MappingRule::new("src", "src")
                .with_table(table("APP", "A"))
                .with_table(table("APP", "B")),
        )
        .build();
    let path = h.write_file("src/new.txt", b"fresh");

    // No scripted choice: the listener declines
    let report = h.orchestrator.run(path.clone(), SyncAction::Insert).unwrap();

    assert_eq!(report.outcome.skip_reason(), Some(SkipReason::SelectionDeclined));
    assert!(!report.outcome.is_success());
    assert!(h.store.inserts().is_empty());
    assert!(h.store.rows("APP.A").is_empty());
    assert!(h.store.rows("APP.B").is_empty());
    assert!(report.backup.is_none());

    let requests = h.listener.table_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, path);
    assert_eq!(requests[0].1, vec!["APP.A".to_string(), "APP.B".to_string()]);
}

#[test]
fn test_change_without_row_is_not_inserted_by_default() {
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(table("APP", "REPORTS")))
        .build();
    let path = h.write_file("src/unknown.xml", b"<x/>");

    let report = h.orchestrator.run(path, modified(Some(b"<x/>"))).unwrap();

    assert_eq!(report.outcome.skip_reason(), Some(SkipReason::NotInDatabase));
    assert!(h.store.inserts().is_empty());
}

#[test]
fn test_change_without_row_is_inserted_when_enabled() {
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(table("APP", "REPORTS")))
        .with_auto_insert(true)
        .build();
    let path = h.write_file("src/unknown.xml", b"<x/>");

    let report = h.orchestrator.run(path, modified(Some(b"<x/>"))).unwrap();

    match &report.outcome {
        SyncOutcome::Inserted(record) => {
            assert_eq!(record.table, "APP.REPORTS");
            assert_eq!(record.file_name, "unknown.xml");
        }
        other => panic!("expected insert, got {other}"),
    }
    assert!(report.structural_change);
    assert_eq!(h.store.inserts().len(), 1);
}

#[test]
fn test_row_created_elsewhere_is_updated_not_duplicated() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_auto_insert(true)
        .with_store(|store| {
            store.add_row(&reports, "x.xml", b"remote x");
        })
        .build();
    let x = h.write_file("src/x.xml", b"local x");

    // Caches the REPORTS listing
    let pushed = h.orchestrator.run(x, SyncAction::Push).unwrap();
    assert!(matches!(pushed.outcome, SyncOutcome::Updated(_)));

    // Another writer creates b.xml after the listing was fetched
    let existing = h.store.add_row(&reports, "b.xml", b"remote b");
    let b = h.write_file("src/b.xml", b"local b");
    let report = h.orchestrator.run(b, modified(Some(b"local b"))).unwrap();

    match &report.outcome {
        SyncOutcome::Updated(record) => assert_eq!(record.key, existing.key),
        other => panic!("expected update, got {other}"),
    }
    assert!(h.store.inserts().is_empty());
    let b_rows = h
        .store
        .rows("APP.REPORTS")
        .into_iter()
        .filter(|r| r.file_name == "b.xml")
        .count();
    assert_eq!(b_rows, 1);
    assert_eq!(h.store.payload(&existing).as_deref(), Some(b"local b".as_slice()));
}

#[test]
fn test_push_without_row_fails_while_resolving() {
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(table("APP", "REPORTS")))
        .build();
    let path = h.write_file("src/orphan.xml", b"<x/>");

    let report = h.orchestrator.run(path, SyncAction::Push).unwrap();

    match &report.outcome {
        SyncOutcome::Failed { phase, error } => {
            assert_eq!(*phase, Phase::Resolving);
            assert!(matches!(error.as_ref(), SyncError::RemoteRecordMissing(_)));
        }
        other => panic!("expected failure, got {other}"),
    }
    assert_eq!(h.store.write_count(), 0);
}

#[test]
fn test_push_of_missing_file_fails_with_not_found() {
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(table("APP", "REPORTS")))
        .build();

    let report = h
        .orchestrator
        .run(h.path("src/gone.xml"), SyncAction::Push)
        .unwrap();

    match &report.outcome {
        SyncOutcome::Failed { error, .. } => {
            assert!(matches!(error.as_ref(), SyncError::NotFound(_)))
        }
        other => panic!("expected failure, got {other}"),
    }
}

#[test]
fn test_unchanged_content_is_not_pushed_again() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_store(|store| {
            store.add_row(&reports, "report.xml", b"old");
        })
        .build();
    let path = h.write_file("src/report.xml", b"new");

    let first = h.orchestrator.run(path.clone(), modified(Some(b"new"))).unwrap();
    assert!(matches!(first.outcome, SyncOutcome::Updated(_)));

    let second = h.orchestrator.run(path.clone(), modified(Some(b"new"))).unwrap();
    assert_eq!(second.outcome.skip_reason(), Some(SkipReason::Unchanged));
    assert_eq!(h.store.write_count(), 1);

    // An explicit push always writes
    let third = h.orchestrator.run(path, SyncAction::Push).unwrap();
    assert!(matches!(third.outcome, SyncOutcome::Updated(_)));
    assert_eq!(h.store.write_count(), 2);
}

#[test]
fn test_delete_and_vanished_files_are_skipped() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_store(|store| {
            store.add_row(&reports, "report.xml", b"remote");
        })
        .build();
    let path = h.path("src/report.xml");

    let deleted = h
        .orchestrator
        .run(
            path.clone(),
            SyncAction::Changed {
                kind: ChangeKind::Deleted,
                fingerprint: None,
            },
        )
        .unwrap();
    assert_eq!(deleted.outcome.skip_reason(), Some(SkipReason::LocalDelete));
    assert!(deleted.structural_change);

    let vanished = h.orchestrator.run(path, modified(None)).unwrap();
    assert_eq!(vanished.outcome.skip_reason(), Some(SkipReason::Vanished));
    assert_eq!(h.store.write_count(), 0);
}

#[test]
fn test_remote_write_failure_leaves_local_file_intact() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_store(|store| {
            store.add_row(&reports, "report.xml", b"remote");
            store.fail_writes(true);
        })
        .build();
    let path = h.write_file("src/report.xml", b"local");

    let report = h.orchestrator.run(path.clone(), SyncAction::Push).unwrap();

    match &report.outcome {
        SyncOutcome::Failed { phase, error } => {
            assert_eq!(*phase, Phase::Writing);
            assert!(matches!(
                error.as_ref(),
                SyncError::RemoteWriteFailed { table, .. } if table == "APP.REPORTS"
            ));
        }
        other => panic!("expected failure, got {other}"),
    }
    assert_eq!(h.read_file(&path), b"local");
    let record = &h.store.rows("APP.REPORTS")[0];
    assert_eq!(h.store.payload(record).unwrap(), b"remote");

    // The listener saw the same outcome
    let outcomes = h.listener.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert!(matches!(outcomes[0].1, SyncOutcome::Failed { .. }));
}

#[test]
fn test_slow_write_times_out() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(reports.clone()))
        .with_io_timeout(Duration::from_millis(50))
        .with_store(|store| {
            store.add_row(&reports, "report.xml", b"remote");
            store.set_write_delay(Duration::from_millis(500));
        })
        .build();
    let path = h.write_file("src/report.xml", b"local");

    let report = h.orchestrator.run(path, SyncAction::Push).unwrap();

    match &report.outcome {
        SyncOutcome::Failed { phase, error } => {
            assert_eq!(*phase, Phase::Writing);
            assert!(matches!(error.as_ref(), SyncError::Timeout { .. }));
        }
        other => panic!("expected timeout, got {other}"),
    }
}

#[test]
fn test_overlapping_rules_ask_with_deepest_rule_first() {
    let general = table("APP", "DOCS");
    let specific = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("all", "").with_table(general.clone()))
        .with_rule(MappingRule::new("reports", "src/reports").with_table(specific.clone()))
        .with_store(|store| {
            store.add_row(&general, "q1.xml", b"general");
            store.add_row(&specific, "q1.xml", b"specific");
        })
        .build();
    h.listener.choose_table("APP.DOCS");
    let path = h.write_file("src/reports/q1.xml", b"local");

    let report = h.orchestrator.run(path, SyncAction::Push).unwrap();

    let requests = h.listener.table_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].1, vec!["APP.REPORTS".to_string(), "APP.DOCS".to_string()]);
    assert_eq!(report.outcome.record().unwrap().table, "APP.DOCS");
}

#[test]
fn test_only_tables_holding_the_file_are_offered() {
    let general = table("APP", "DOCS");
    let specific = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("all", "").with_table(general))
        .with_rule(MappingRule::new("reports", "src/reports").with_table(specific.clone()))
        .with_store(|store| {
            store.add_row(&specific, "Q1.XML", b"specific");
        })
        .build();
    let path = h.write_file("src/reports/q1.xml", b"local");

    let report = h.orchestrator.run(path, SyncAction::Push).unwrap();

    assert_eq!(report.outcome.record().unwrap().table, "APP.REPORTS");
    assert!(h.listener.table_requests().is_empty());
}
