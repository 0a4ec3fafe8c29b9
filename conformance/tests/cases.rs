//! Runs the shipped case files through the conformance binary.

use std::fs;
use std::path::Path;
use std::process::{Command, Output};

fn conformance(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_conformance"))
        .args(args)
        .output()
        .expect("spawn conformance")
}

fn cases_dir() -> String {
    Path::new(env!("CARGO_MANIFEST_DIR"))
        .join("cases")
        .display()
        .to_string()
}

#[test]
fn shipped_cases_all_pass() {
    let output = conformance(&["run-all", "--cases", &cases_dir()]);
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout:\n{stdout}");
    assert!(stdout.contains("pass hello-world"));
    assert!(stdout.contains("pass pip-rejected"));
    assert!(stdout.lines().any(|line| line.starts_with("conformance: total=")
        && line.ends_with("failed=0")));
}

#[test]
fn list_prints_sorted_ids() {
    let output = conformance(&["list", "--cases", &cases_dir()]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    let ids: Vec<&str> = stdout.lines().collect();
    let mut sorted = ids.clone();
    sorted.sort_unstable();
    assert_eq!(ids, sorted);
    assert!(ids.contains(&"hunk-conflict"));
}

#[test]
fn failing_case_exits_non_zero() {
    let temp = tempfile::tempdir().expect("tempdir");
    fs::write(
        temp.path().join("wrong.toml"),
        r#"
[case]
id = "wrong"
description = "expects a conflict from a plain write"
stream = '<boltAction type="file" filePath="a.txt">x</boltAction>'

[expect]
outcome = "conflict"
"#,
    )
    .expect("write case");
    let dir = temp.path().display().to_string();

    let output = conformance(&["run", "wrong", "--cases", &dir]);
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stdout).starts_with("FAIL wrong:"));

    let output = conformance(&["run", "absent", "--cases", &dir]);
    assert_eq!(output.status.code(), Some(2));
}
