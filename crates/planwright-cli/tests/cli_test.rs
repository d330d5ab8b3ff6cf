//! End-to-end tests for the `planwright` binary using the file checkpoint
//! store, so no database is required.

use std::path::Path;
use std::process::{Command, Output};

use serde_json::Value;
use tempfile::TempDir;

fn planwright(home: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_planwright"))
        .args(args)
        .env("XDG_CONFIG_HOME", home.join("config"))
        .env_remove("PLANWRIGHT_DATABASE_URL")
        .env_remove("PLANWRIGHT_AGENT_TIMEOUT_SECS")
        .env("RUST_LOG", "warn")
        .output()
        .expect("failed to run planwright")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn write_context(dir: &Path) -> String {
    let path = dir.join("context.json");
    let body = serde_json::json!({
        "context": {
            "name": "Litware",
            "type": "healthtech",
            "scale": "smb",
            "description": "Launch a patient intake portal",
            "constraints": {
                "timelineRange": {"min": 6, "max": 18},
                "budgetRange": {"max": 5000000.0},
                "regulations": ["HIPAA"]
            }
        },
        "insights": {"phaseLabels": ["Mobilize", "Build"]}
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&body).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
fn generate_with_file_store_writes_program_and_lists_session() {
    let tmp = TempDir::new().unwrap();
    let state = tmp.path().join("state");
    let state = state.to_str().unwrap();
    let context = write_context(tmp.path());
    let program_path = tmp.path().join("program.json");

    let out = planwright(
        tmp.path(),
        &[
            "generate",
            &context,
            "--user",
            "analyst",
            "--store",
            "file",
            "--state-dir",
            state,
            "--output",
            program_path.to_str().unwrap(),
        ],
    );
    assert!(out.status.success(), "generate failed: {}", String::from_utf8_lossy(&out.stderr));
    assert!(stdout(&out).contains("Critical path:"));

    let program: Value = serde_json::from_slice(&std::fs::read(&program_path).unwrap()).unwrap();
    assert_eq!(program["status"], "finalized");
    assert_eq!(program["timeline"]["totalMonths"], 18);
    assert_eq!(program["timeline"]["phases"][0]["name"], "Mobilize");
    let session_id = program["sessionId"].as_str().unwrap().to_string();

    let out = planwright(tmp.path(), &["status", "--store", "file", "--state-dir", state]);
    assert!(out.status.success());
    let listing = stdout(&out);
    assert!(listing.contains(&session_id));
    assert!(listing.contains("completed"));

    let out = planwright(
        tmp.path(),
        &["status", &session_id, "--store", "file", "--state-dir", state],
    );
    assert!(out.status.success());
    assert!(stdout(&out).contains("Status: completed"));

    // Resuming a completed session prints the stored program.
    let out = planwright(
        tmp.path(),
        &["resume", &session_id, "--store", "file", "--state-dir", state, "--json"],
    );
    assert!(out.status.success());
    let resumed: Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(resumed, program);
}

#[test]
fn generate_json_output_is_pipeable() {
    let tmp = TempDir::new().unwrap();
    let state = tmp.path().join("state");
    let context = write_context(tmp.path());

    let out = planwright(
        tmp.path(),
        &[
            "generate",
            &context,
            "--store",
            "file",
            "--state-dir",
            state.to_str().unwrap(),
            "--json",
        ],
    );
    assert!(out.status.success(), "generate failed: {}", String::from_utf8_lossy(&out.stderr));
    let program: Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(program["status"], "finalized");
    assert!(String::from_utf8_lossy(&out.stderr).contains("Generating program for Litware"));
}

#[test]
fn unknown_session_fails() {
    let tmp = TempDir::new().unwrap();
    let state = tmp.path().join("state");
    let out = planwright(
        tmp.path(),
        &[
            "resume",
            "00000000-0000-4000-8000-000000000000",
            "--store",
            "file",
            "--state-dir",
            state.to_str().unwrap(),
        ],
    );
    assert!(!out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("not found"));
}

#[test]
fn schedule_reports_violation_as_json() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("ws.json");
    std::fs::write(
        &path,
        r#"{"workstreams": [
            {"id": "ws-a", "name": "A", "description": "", "owner": "x",
             "startMonth": 0, "endMonth": 14, "confidence": 0.8}
        ]}"#,
    )
    .unwrap();

    let out = planwright(
        tmp.path(),
        &["schedule", path.to_str().unwrap(), "--min", "6", "--max", "12", "--json"],
    );
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let timeline: Value = serde_json::from_str(&stdout(&out)).unwrap();
    assert_eq!(timeline["totalMonths"], 12);
    assert_eq!(timeline["effectiveDuration"], 15);
    assert_eq!(timeline["timelineViolation"], true);
}

#[test]
fn completions_are_printed() {
    let tmp = TempDir::new().unwrap();
    let out = planwright(tmp.path(), &["completions", "bash"]);
    assert!(out.status.success());
    assert!(stdout(&out).contains("planwright"));
}
