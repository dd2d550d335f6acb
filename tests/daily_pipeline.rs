//! End-to-end exercise of the daily crawl -> summarize -> report pipeline
//! against a real temp directory tree and catalog database.

use std::fs;
use std::path::Path;
use std::sync::Mutex;

use tempfile::tempdir;
use time::macros::date;

use phoenix_tracker::catalog::{
    CatalogDb, ConventionScheme, SummarizeOutcome, crawl, report, summarize,
};
use phoenix_tracker::config::ConventionRuleConfig;
use phoenix_tracker::notify::{Notify, NotifyError};

#[derive(Default)]
struct RecordingNotifier {
    sent: Mutex<Vec<String>>,
}

impl Notify for RecordingNotifier {
    fn send(&self, text: &str) -> Result<(), NotifyError> {
        self.sent.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

fn phoenix_scheme() -> ConventionScheme {
    ConventionScheme::compile(&[ConventionRuleConfig {
        segments: [":network", ":study", ":subject", ":modality"]
            .into_iter()
            .map(String::from)
            .collect(),
    }])
    .unwrap()
}

fn seed_file(root: &Path, relative: &str, contents: &[u8]) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, contents).unwrap();
}

#[test]
fn two_day_run_reports_per_group_growth() {
    let data = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = CatalogDb::open(db_dir.path().join("catalog.db")).unwrap();
    let scheme = phoenix_scheme();
    let day1 = date!(2025 - 04 - 21);
    let day2 = date!(2025 - 04 - 22);

    // Day one: two modalities, one subject.
    seed_file(data.path(), "ProNET/StudyA/sub-01/mri/scan.dcm", &[0u8; 1000]);
    seed_file(data.path(), "ProNET/StudyA/sub-01/eeg/rest.edf", &[0u8; 500]);
    let stats = crawl(&db, data.path(), &scheme).unwrap();
    assert_eq!(stats.added, 2);
    assert!(matches!(
        summarize(&db, day1).unwrap(),
        SummarizeOutcome::Written(_)
    ));

    // First report has nothing to compare against: baseline.
    let notifier = RecordingNotifier::default();
    let baseline = report(&db, day1, None, &notifier).unwrap();
    assert!(baseline.baseline);
    assert!(baseline.message.contains("mri: 1 files, 1000 B"));

    // Day two: MRI grows, EEG stalls, a new subject appears.
    seed_file(data.path(), "ProNET/StudyA/sub-01/mri/scan2.dcm", &[0u8; 300]);
    seed_file(data.path(), "ProNET/StudyA/sub-02/mri/scan.dcm", &[0u8; 200]);
    let stats = crawl(&db, data.path(), &scheme).unwrap();
    assert_eq!(stats.added, 2);
    assert_eq!(stats.unchanged, 2);
    assert!(matches!(
        summarize(&db, day2).unwrap(),
        SummarizeOutcome::Written(_)
    ));

    let prior = db.latest_snapshot_date_before(day2).unwrap();
    assert_eq!(prior, Some(day1));
    let outcome = report(&db, day2, prior, &notifier).unwrap();
    assert!(outcome.delivered);
    assert!(outcome.message.contains("mri: +2 files, +500 B"));
    // EEG did not move: omitted from the body, counted as a stall.
    assert!(!outcome.message.contains("eeg:"));
    assert!(outcome.message.contains("Potential data-flow issue"));
    assert!(
        outcome
            .message
            .contains("ProNET/StudyA/sub-02: new (+1 files, +200 B)")
    );

    let sent = notifier.sent.lock().unwrap();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[1], outcome.message);
}

#[test]
fn reruns_of_every_stage_are_idempotent() {
    let data = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = CatalogDb::open(db_dir.path().join("catalog.db")).unwrap();
    let scheme = phoenix_scheme();
    let day = date!(2025 - 04 - 21);

    seed_file(data.path(), "ProNET/StudyA/sub-01/mri/scan.dcm", b"payload");
    crawl(&db, data.path(), &scheme).unwrap();
    let rows_after_first = db.list_files().unwrap();

    // Crawl again with no filesystem change: no writes.
    let second = crawl(&db, data.path(), &scheme).unwrap();
    assert_eq!(second.added + second.updated, 0);
    assert_eq!(db.list_files().unwrap(), rows_after_first);

    // Summarize twice: single snapshot set, second call a no-op.
    assert!(matches!(
        summarize(&db, day).unwrap(),
        SummarizeOutcome::Written(_)
    ));
    let snapshot = db.read_snapshot(day).unwrap();
    assert_eq!(
        summarize(&db, day).unwrap(),
        SummarizeOutcome::AlreadySummarized
    );
    assert_eq!(db.read_snapshot(day).unwrap(), snapshot);
}

#[test]
fn files_outside_the_convention_are_tracked_as_unknown() {
    let data = tempdir().unwrap();
    let db_dir = tempdir().unwrap();
    let db = CatalogDb::open(db_dir.path().join("catalog.db")).unwrap();
    let scheme = phoenix_scheme();

    seed_file(data.path(), "lost+found/orphan.bin", b"???");
    seed_file(data.path(), "ProNET/StudyA/sub-01/mri/scan.dcm", b"ok");
    let stats = crawl(&db, data.path(), &scheme).unwrap();
    assert_eq!(stats.added, 2);

    let day = date!(2025 - 04 - 21);
    summarize(&db, day).unwrap();
    let snapshot = db.read_snapshot(day).unwrap();
    assert!(
        snapshot
            .iter()
            .any(|row| row.group_key == "unknown" && row.file_count == 1)
    );
}
