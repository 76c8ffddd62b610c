use assert_cmd::cargo::cargo_bin_cmd;

#[test]
fn run_help_mentions_options() {
    let mut cmd = cargo_bin_cmd!("scanlinectl");
    let output = cmd
        .arg("run")
        .arg("--help")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let text = String::from_utf8_lossy(&output);
    assert!(text.contains("--target-type"), "run help missing --target-type");
    assert!(text.contains("--probes"), "run help missing --probes");
    assert!(
        text.contains("--workflow-format"),
        "run help missing --workflow-format"
    );
}

#[test]
fn list_reads_the_runs_directory() {
    let dir = tempfile::tempdir().unwrap();
    let runs = dir.path().join("runs");
    std::fs::create_dir(&runs).unwrap();
    std::fs::write(
        runs.join("garak.20240101_120000.report.jsonl"),
        "{\"entry_type\": \"start_run setup\", \"transient.starttime_iso\": \"2024-01-01T12:00:00\"}\n{\"status\": 2}\n{\"status\": 1}\n",
    )
    .unwrap();

    let mut cmd = cargo_bin_cmd!("scanlinectl");
    let output = cmd
        .current_dir(dir.path())
        .env_remove("SCANLINE_CONFIG")
        .env("SCANLINE_RUNS_DIR", &runs)
        .arg("list")
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let listed: serde_json::Value = serde_json::from_slice(&output).unwrap();
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["scan_id"], "20240101_120000");
    assert_eq!(listed[0]["status"], "completed");
    assert_eq!(listed[0]["passed"], 1);
    assert_eq!(listed[0]["failed"], 1);
}

#[test]
fn status_of_unknown_scan_fails() {
    let dir = tempfile::tempdir().unwrap();
    let mut cmd = cargo_bin_cmd!("scanlinectl");
    cmd.current_dir(dir.path())
        .env_remove("SCANLINE_CONFIG")
        .env("SCANLINE_RUNS_DIR", dir.path())
        .args(["status", "nope"])
        .assert()
        .failure();
}

#[cfg(unix)]
#[test]
fn run_follows_a_scan_to_completion() {
    use std::os::unix::fs::PermissionsExt;

    let dir = tempfile::tempdir().unwrap();
    let scanner = dir.path().join("garak");
    std::fs::write(
        &scanner,
        "#!/bin/sh\necho \"garak.probes.test.Blank starting\"\necho \"test.Blank always.Pass: PASS ok on 3/3\"\nexit 0\n",
    )
    .unwrap();
    std::fs::set_permissions(&scanner, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut cmd = cargo_bin_cmd!("scanlinectl");
    let output = cmd
        .current_dir(dir.path())
        .env_remove("SCANLINE_CONFIG")
        .env("SCANLINE_SCANNER_PATH", &scanner)
        .env("SCANLINE_RUNS_DIR", dir.path())
        .args([
            "run",
            "--target-type",
            "test",
            "--target-name",
            "blank",
            "--probes",
            "test.Blank",
            "--poll",
            "20ms",
            "--workflow-format",
            "mermaid",
        ])
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();

    let text = String::from_utf8_lossy(&output);
    assert!(text.starts_with("graph TD"), "{text}");
    let json_start = text.find("\n{").unwrap() + 1;
    let results: serde_json::Value = serde_json::from_str(&text[json_start..]).unwrap();
    assert_eq!(results["status"], "completed");
    assert_eq!(results["results"]["passed"], 3);
    assert_eq!(results["summary"]["pass_rate"], 100.0);
}
