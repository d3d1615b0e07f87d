//! Exit status of the daemon binary on startup failures.

use std::process::Command;

fn sessionmond() -> Command {
    Command::new(env!("CARGO_BIN_EXE_sessionmond"))
}

#[test]
fn missing_config_file_exits_with_2() {
    let dir = tempfile::tempdir().unwrap();
    let output = sessionmond()
        .arg("--config")
        .arg(dir.path().join("nope.toml"))
        .output()
        .unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to read configuration file"));
}

#[test]
fn invalid_config_reports_every_problem_and_exits_with_2() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessionmon.toml");
    std::fs::write(
        &path,
        r#"
[sinks.graylog]
type = "carrier-pigeon"

[servers.edge-1]
endpoint = "ftp://lb1/stats"
username = "admin"
sinks = ["nowhere"]
"#,
    )
    .unwrap();

    let output = sessionmond().arg("-c").arg(&path).output().unwrap();

    assert_eq!(output.status.code(), Some(2));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("invalid configuration"));
    assert!(stderr.contains("carrier-pigeon"));
    assert!(stderr.contains("nowhere"));
}

#[test]
fn unwritable_sink_exits_with_1() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("sessionmon.toml");
    let sink_path = dir.path().join("missing-dir").join("sessions.tsv");
    std::fs::write(
        &path,
        format!(
            r#"
[logging]
console = false

[sinks.local]
type = "logfile"
path = "{}"

[servers.edge-1]
endpoint = "http://127.0.0.1:1/stats;csv"
sinks = ["local"]
"#,
            sink_path.display()
        ),
    )
    .unwrap();

    let output = sessionmond().arg("-c").arg(&path).output().unwrap();

    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to create sink \"local\""));
}
