use std::path::Path;

use scanline_core::{
    ReportArchive, ScanRegistry, ScanSupervisor, SupervisorSettings, WorkflowVocabulary,
};
use scanline_model::{ScanId, ScanStatus};

fn write_report(dir: &Path, run_id: &str, started: &str, statuses: &[i64]) {
    let mut contents = format!(
        "{{\"entry_type\": \"start_run setup\", \"plugins.target_type\": \"huggingface\", \"plugins.target_name\": \"gpt2\", \"transient.starttime_iso\": \"{started}\"}}\n"
    );
    for status in statuses {
        contents.push_str(&format!(
            "{{\"entry_type\": \"attempt\", \"status\": {status}}}\n"
        ));
    }
    std::fs::write(dir.join(format!("garak.{run_id}.report.jsonl")), contents).unwrap();
}

fn supervisor(runs_dir: &Path) -> ScanSupervisor {
    ScanSupervisor::new(
        ScanRegistry::new(Some(ReportArchive::new(runs_dir))),
        WorkflowVocabulary::default(),
        SupervisorSettings::default(),
    )
}

#[tokio::test]
async fn archived_runs_are_listed_newest_first() {
    let dir = tempfile::tempdir().unwrap();
    write_report(dir.path(), "older", "2024-01-01T09:00:00", &[2, 1]);
    write_report(dir.path(), "newer", "2024-03-01T09:00:00", &[2, 2, 1, 0]);
    std::fs::write(dir.path().join("garak.newer.report.html"), "<html/>").unwrap();
    std::fs::write(dir.path().join("notes.txt"), "not a report").unwrap();
    std::fs::write(dir.path().join("garak.broken.report.jsonl"), "{oops\n").unwrap();

    let listed = supervisor(dir.path()).list().await;
    let ids: Vec<_> = listed.iter().map(|s| s.scan_id.as_str()).collect();
    assert_eq!(ids, vec!["newer", "older"]);

    let newer = &listed[0];
    assert_eq!(newer.status, ScanStatus::Completed);
    assert_eq!(newer.passed, 2);
    assert_eq!(newer.failed, 1);
    assert_eq!(newer.target_name.as_deref(), Some("gpt2"));
    assert!(newer.html_report_path.is_some());
    assert!(listed[1].html_report_path.is_none());
}

#[tokio::test]
async fn status_falls_back_to_report_files() {
    let dir = tempfile::tempdir().unwrap();
    write_report(dir.path(), "20240101_120000", "2024-01-01T12:00:00", &[2, 2, 2, 1]);
    let supervisor = supervisor(dir.path());

    let results = supervisor
        .results(&ScanId::from("20240101_120000"))
        .await
        .unwrap();
    assert_eq!(results.status, ScanStatus::Completed);
    assert_eq!(results.summary.total_tests, 4);
    assert_eq!(results.summary.pass_rate, 75.0);

    assert!(supervisor.status(&ScanId::from("missing")).await.is_err());
}
