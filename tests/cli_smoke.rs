use std::path::Path;
use std::process::{Command, Output};

use tempfile::tempdir;

fn docsmith(state: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_docsmith"))
        .arg("--state")
        .arg(state)
        .args(args)
        .env("RUST_LOG", "off")
        .output()
        .unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).unwrap()
}

#[test]
fn types_lists_the_catalog() {
    let dir = tempdir().unwrap();
    let out = docsmith(&dir.path().join("state.sqlite"), &["types"]);
    assert!(out.status.success());

    let text = stdout(&out);
    assert_eq!(text.lines().count(), 16);
    assert!(text.lines().any(|l| l.starts_with("flowchart") && l.contains("flowchart TD")));
    assert!(text.contains("mindmap"));
}

#[test]
fn types_json_is_machine_readable() {
    let dir = tempdir().unwrap();
    let out = docsmith(&dir.path().join("state.sqlite"), &["types", "--json"]);
    assert!(out.status.success());

    let parsed: Vec<serde_json::Value> = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(parsed.len(), 16);
    assert_eq!(parsed[0]["type"], "Flowchart");
    assert_eq!(parsed[0]["syntax"], "flowchart TD");
}

#[test]
fn theme_is_persisted_between_invocations() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.sqlite");

    let out = docsmith(&state, &["theme"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), "light");

    let out = docsmith(&state, &["theme", "set", "dark"]);
    assert!(out.status.success());
    assert_eq!(stdout(&out).trim(), "dark");

    let out = docsmith(&state, &["theme", "toggle"]);
    assert_eq!(stdout(&out).trim(), "light");

    let out = docsmith(&state, &["theme", "get"]);
    assert_eq!(stdout(&out).trim(), "light");
}

#[test]
fn token_show_is_masked() {
    let dir = tempdir().unwrap();
    let state = dir.path().join("state.sqlite");

    assert!(docsmith(&state, &["token", "set", "super-secret-1234"]).status.success());
    let out = docsmith(&state, &["token", "show"]);
    let shown = stdout(&out);
    assert!(shown.trim().ends_with("1234"));
    assert!(!shown.contains("super-secret"));

    assert!(docsmith(&state, &["token", "clear"]).status.success());
    let out = docsmith(&state, &["token", "show"]);
    assert_eq!(stdout(&out).trim(), "no admin token stored");
}

#[test]
fn unknown_diagram_type_fails_before_any_call() {
    let dir = tempdir().unwrap();
    let out = docsmith(
        &dir.path().join("state.sqlite"),
        &["diagram", "--type", "venn", "--topic", "sets"],
    );
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("unknown diagram type: venn"));
}

#[test]
fn blank_topic_is_rejected_with_user_message() {
    let dir = tempdir().unwrap();
    let out_dir = dir.path().join("out");
    let out_arg = out_dir.to_string_lossy().into_owned();
    let out = docsmith(
        &dir.path().join("state.sqlite"),
        &["document", "--topic", "  ", "--out", &out_arg],
    );
    assert!(!out.status.success());
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("Please enter a document topic first."));
    assert!(!out_dir.exists());
}
