//! Integration test: the conformance CLI runs green and emits a well-formed
//! report pair.

use std::path::PathBuf;
use std::process::Command;

fn temp_path(name: &str) -> PathBuf {
    let mut path = std::env::temp_dir();
    path.push(format!("monoheap-conformance-{}-{name}", std::process::id()));
    path
}

#[test]
fn run_emits_a_valid_report_pair() {
    let json_path = temp_path("report.json");
    let md_path = temp_path("report.md");

    let status = Command::new(env!("CARGO_BIN_EXE_monoheap-conformance"))
        .arg("run")
        .arg("--report-json")
        .arg(&json_path)
        .arg("--report-md")
        .arg(&md_path)
        .status()
        .expect("conformance binary must run");
    assert!(status.success(), "scenario suite must pass");

    let body = std::fs::read_to_string(&json_path).expect("json report must exist");
    let report: serde_json::Value = serde_json::from_str(&body).expect("json must parse");
    assert_eq!(report["schema_version"].as_str(), Some("v1"));
    assert_eq!(report["failed"].as_u64(), Some(0));
    let scenarios = report["scenarios"].as_array().expect("scenarios must be an array");
    assert!(!scenarios.is_empty());
    for scenario in scenarios {
        assert_eq!(scenario["outcome"].as_str(), Some("pass"));
        assert!(scenario["name"].is_string());
        assert!(scenario["details"].is_string());
    }

    let markdown = std::fs::read_to_string(&md_path).expect("markdown report must exist");
    assert!(markdown.contains("# monoheap conformance report"));
    assert!(markdown.contains("| scenario | outcome | details |"));

    let _ = std::fs::remove_file(json_path);
    let _ = std::fs::remove_file(md_path);
}

#[test]
fn list_prints_every_scenario() {
    let output = Command::new(env!("CARGO_BIN_EXE_monoheap-conformance"))
        .arg("list")
        .output()
        .expect("conformance binary must run");
    assert!(output.status.success());

    let stdout = String::from_utf8(output.stdout).expect("names are utf-8");
    let names: Vec<&str> = stdout.lines().collect();
    assert_eq!(names.len(), monoheap_conformance::scenario_names().len());
    assert!(names.contains(&"first_fit_reuse"));
    assert!(names.contains(&"sole_block_unwind"));
}
