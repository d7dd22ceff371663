//! End-to-end scenarios driven through debounced change events.

use clobsync_lib::operations::SyncAction;
use clobsync_lib::watch::{fingerprint, ChangeKind, DebouncedChangeEvent};
use clobsync_lib::{MappingRule, SyncOutcome};

use crate::common::{table, table_with_mime, SyncHarnessBuilder};

#[test]
fn test_modified_report_is_updated_once_with_one_backup() {
    let reports = table("APP", "REPORTS");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("reports", "src").with_table(reports.clone()))
        .with_store(|store| {
            store.add_row(&reports, "report.xml", b"<report/>");
        })
        .build();
    let path = h.write_file("src/report.xml", b"<report><row/></report>");

    let accepted = h.orchestrator.handle_event(DebouncedChangeEvent {
        path: path.clone(),
        kind: ChangeKind::Modified,
        fingerprint: Some(fingerprint(&path).unwrap()),
    });
    assert!(accepted);
    assert!(h.wait_for_outcomes(1));
    assert!(h.wait_for_idle());

    let outcomes = h.listener.outcomes();
    assert_eq!(outcomes.len(), 1);
    assert_eq!(outcomes[0].0, path);
    let record = match &outcomes[0].1 {
        SyncOutcome::Updated(record) => record.clone(),
        other => panic!("expected update, got {other}"),
    };
    assert_eq!(record.table, "APP.REPORTS");
    assert_eq!(h.store.payload(&record).unwrap(), b"<report><row/></report>");
    assert_eq!(h.backups.list_backups(&path).unwrap().len(), 1);
    assert_eq!(h.listener.finished(), vec![false]);
}

#[test]
fn test_new_file_inserted_into_selected_table() {
    let a = table("APP", "A");
    let b = table("APP", "B");
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("src", "src").with_table(a).with_table(b))
        .build();
    h.listener.choose_table("APP.B");
    let path = h.write_file("src/new.txt", b"brand new");

    let report = h.orchestrator.run(path.clone(), SyncAction::Insert).unwrap();

    let record = match &report.outcome {
        SyncOutcome::Inserted(record) => record.clone(),
        other => panic!("expected insert, got {other}"),
    };
    assert_eq!(record.table, "APP.B");
    assert_eq!(record.file_name, "new.txt");
    assert!(report.structural_change);

    assert!(h.store.rows("APP.A").is_empty());
    let rows = h.store.rows("APP.B");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].key, record.key);
    assert_eq!(h.store.payload(&record).unwrap(), b"brand new");

    let inserts = h.store.inserts();
    assert_eq!(inserts.len(), 1);
    assert_eq!(inserts[0].0, "APP.B");
    assert_eq!(inserts[0].1.mnemonic, "new.txt");

    // The inserted row is now known: a later push updates it without asking
    let push = h.orchestrator.run(path, SyncAction::Push).unwrap();
    assert_eq!(push.outcome.record(), Some(&record));
    assert_eq!(h.listener.table_requests().len(), 1);
}

#[test]
fn test_insert_asks_for_mime_type() {
    let docs = table_with_mime("APP", "DOCS", &["text/plain", "text/markdown"]);
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("docs", "docs").with_table(docs))
        .build();
    h.listener.choose_mime_type("text/markdown");
    let path = h.write_file("docs/notes.md", b"# Notes");

    let report = h.orchestrator.run(path.clone(), SyncAction::Insert).unwrap();

    let record = report.outcome.record().cloned().expect("inserted record");
    assert_eq!(h.store.mime_type(&record).as_deref(), Some("text/markdown"));

    let requests = h.listener.mime_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].0, path);
    assert_eq!(requests[0].1, vec!["text/plain".to_string(), "text/markdown".to_string()]);
    assert_eq!(h.store.inserts()[0].1.mime_type.as_deref(), Some("text/markdown"));
}

#[test]
fn test_declined_mime_type_skips_insert() {
    let docs = table_with_mime("APP", "DOCS", &["text/plain", "text/markdown"]);
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("docs", "docs").with_table(docs))
        .build();
    let path = h.write_file("docs/notes.md", b"# Notes");

    let report = h.orchestrator.run(path, SyncAction::Insert).unwrap();

    assert_eq!(
        report.outcome.skip_reason(),
        Some(clobsync_lib::SkipReason::SelectionDeclined)
    );
    assert!(h.store.inserts().is_empty());
}

#[test]
fn test_single_mime_type_is_used_without_asking() {
    let docs = table_with_mime("APP", "DOCS", &["application/xml"]);
    let h = SyncHarnessBuilder::new()
        .with_rule(MappingRule::new("docs", "docs").with_table(docs))
        .build();
    let path = h.write_file("docs/layout.xml", b"<layout/>");

    let report = h.orchestrator.run(path, SyncAction::Insert).unwrap();

    assert!(matches!(report.outcome, SyncOutcome::Inserted(_)));
    assert!(h.listener.mime_requests().is_empty());
    assert_eq!(h.store.inserts()[0].1.mime_type.as_deref(), Some("application/xml"));
}
