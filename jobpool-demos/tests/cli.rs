//! End-to-end runs of the `jobpool-demo` CLI

use std::path::Path;
use std::process::{Command, Output};

const DEMO: &str = env!("CARGO_BIN_EXE_jobpool-demo");

fn demo(dir: &Path, args: &[&str]) -> Output {
    Command::new(DEMO)
        .args(args)
        .arg("--project-root")
        .arg(dir)
        .current_dir(dir)
        .env_remove("RUST_LOG")
        .output()
        .expect("failed to run jobpool-demo")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn test_map_prints_json_report() {
    let dir = tempfile::tempdir().unwrap();
    let output = demo(dir.path(), &["map", "square", "1", "2", "3", "--format", "json", "-p", "2"]);
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );

    let report: serde_json::Value = serde_json::from_str(&stdout(&output)).unwrap();
    assert_eq!(report["summary"]["status"], "completed");
    assert_eq!(report["summary"]["submitted"], 3);
    // -p is capped at the machine's core count
    assert!((1..=2).contains(&report["summary"]["processes"].as_u64().unwrap()));
    let values: Vec<i64> = report["outcomes"]
        .as_array()
        .unwrap()
        .iter()
        .map(|o| o["value"].as_i64().unwrap())
        .collect();
    assert_eq!(values, vec![1, 4, 9]);
    assert!(!dir.path().join(".jobpool.guard").exists());
}

#[test]
fn test_run_batch_file_with_failure_exits_nonzero() {
    let dir = tempfile::tempdir().unwrap();
    let batch = dir.path().join("batch.toml");
    std::fs::write(
        &batch,
        r#"
[[jobs]]
function = "square"
args = [5]

[[jobs]]
function = "always_fail"
args = ["bad input"]

[[jobs]]
function = "quick_sort"
args = [[3, 1, 2]]
"#,
    )
    .unwrap();

    let output = demo(dir.path(), &["run", batch.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(1));

    let text = stdout(&output);
    assert!(text.contains("✓ [0] square = 25"), "{text}");
    assert!(text.contains("✗ [1] always_fail: error: bad input"), "{text}");
    assert!(text.contains("✓ [2] quick_sort"), "{text}");
    assert!(text.contains("3 submitted, 2 succeeded, 1 failed"), "{text}");
}

#[test]
fn test_report_written_to_output_directory() {
    let dir = tempfile::tempdir().unwrap();
    let output = demo(
        dir.path(),
        &["map", "square", "4", "--format", "json", "-o", "report.json"],
    );
    assert!(output.status.success());

    let path = dir.path().join("target/jobpool/report.json");
    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
    assert_eq!(report["outcomes"][0]["value"], 16);
}

#[test]
fn test_list_shows_demo_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let output = demo(dir.path(), &["list"]);
    assert!(output.status.success());

    let text = stdout(&output);
    for id in ["square", "delayed_square", "crash_worker", "quick_sort"] {
        assert!(text.contains(&format!("├── {id} ")), "missing {id} in {text}");
    }
    assert!(text.contains("Square an integer."));
}

#[test]
fn test_status_and_abort() {
    let dir = tempfile::tempdir().unwrap();

    let idle = demo(dir.path(), &["status"]);
    assert!(stdout(&idle).contains("Status: idle"));

    std::fs::write(dir.path().join(".jobpool.guard"), "pid=4242\n").unwrap();
    let running = demo(dir.path(), &["status"]);
    assert!(stdout(&running).contains("Status: running (pid 4242"));

    let abort = demo(dir.path(), &["abort"]);
    assert!(abort.status.success());
    assert!(stdout(&abort).contains("Abort requested"));
    assert!(!dir.path().join(".jobpool.guard").exists());

    let again = demo(dir.path(), &["abort"]);
    assert!(stdout(&again).contains("No batch running"));
}
