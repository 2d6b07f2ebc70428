//=====================================================
// RigVM CLI
//=====================================================
// Goal: Drive the rigvm binary end to end over the demo programs
// Objective: Assemble, run, disassemble, hash and list functions with an
//            isolated configuration directory
//=====================================================

use std::path::{Path, PathBuf};
use std::process::Output;

use assert_cmd::Command;
use tempfile::{tempdir, TempDir};

fn demo(name: &str) -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("demos").join(name)
}

/// A command whose user config directory is an empty temp dir.
fn rigvm(home: &TempDir) -> Command {
    let mut command = Command::cargo_bin("rigvm").expect("rigvm binary");
    command.env("HOME", home.path());
    command.env("XDG_CONFIG_HOME", home.path().join("config"));
    command.env_remove("RUST_LOG");
    command
}

fn stdout(output: &Output) -> String {
    String::from_utf8(output.stdout.clone()).expect("utf8 stdout")
}

fn run_json(home: &TempDir, args: &[&str]) -> serde_json::Value {
    let output = rigvm(home).args(args).output().expect("run rigvm");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    serde_json::from_str(&stdout(&output)).expect("json report")
}

#[test]
fn assembled_packages_run_like_their_source() {
    let home = tempdir().expect("tempdir");
    let package = home.path().join("counter.rvpk");
    let source = demo("counter.rvasm");

    let output = rigvm(&home)
        .arg("assemble")
        .arg(&source)
        .arg("-o")
        .arg(&package)
        .output()
        .expect("assemble");
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert!(stdout(&output).contains("8 instructions"));

    let from_source = run_json(&home, &["run", source.to_str().expect("path"), "--json"]);
    let from_package = run_json(&home, &["run", package.to_str().expect("path"), "--json"]);
    assert_eq!(from_source["work"], from_package["work"]);
    assert_eq!(from_package["work"]["total"]["Int32"], 14);
    assert_eq!(
        from_package["work"]["squares"],
        serde_json::json!([{ "Int32": 0 }, { "Int32": 1 }, { "Int32": 4 }, { "Int32": 9 }])
    );
    assert_eq!(from_package["outcome"]["exit_instruction"], serde_json::Value::Null);
}

#[test]
fn externals_can_be_overridden() {
    let home = tempdir().expect("tempdir");
    let source = demo("counter.rvasm");
    let report = run_json(
        &home,
        &["run", source.to_str().expect("path"), "--set", "limit=3", "--json", "--profile"],
    );
    assert_eq!(report["work"]["total"]["Int32"], 5);
    assert_eq!(report["externals"]["limit"]["Int32"], 3);
    assert_eq!(report["profile"]["opcodes"]["jump_if"], 3);

    rigvm(&home)
        .args(["run", source.to_str().expect("path"), "--set", "limit=many"])
        .assert()
        .failure();
    rigvm(&home)
        .args(["run", source.to_str().expect("path"), "--set", "missing=1"])
        .assert()
        .failure();
}

#[test]
fn disassembly_keeps_the_hash() {
    let home = tempdir().expect("tempdir");
    let source = demo("counter.rvasm");
    let output = rigvm(&home)
        .args(["disasm", source.to_str().expect("path")])
        .output()
        .expect("disasm");
    assert!(output.status.success());
    let text = stdout(&output);
    assert!(text.contains(".entry main\n"));

    let copy = home.path().join("copy.rvasm");
    std::fs::write(&copy, text).expect("write copy");
    let hash = |path: &Path| {
        let output = rigvm(&home)
            .args(["hash", path.to_str().expect("path")])
            .output()
            .expect("hash");
        assert!(output.status.success());
        stdout(&output).split_whitespace().next().expect("hash").to_string()
    };
    assert_eq!(hash(&source), hash(&copy));
}

#[test]
fn configured_enums_are_registered() {
    let home = tempdir().expect("tempdir");
    let source = demo("gait.rvasm");
    let config = demo("rigvm.toml");

    rigvm(&home)
        .args(["run", source.to_str().expect("path")])
        .assert()
        .failure();

    let slow = run_json(
        &home,
        &["--config", config.to_str().expect("path"), "run", source.to_str().expect("path"), "--json"],
    );
    assert_eq!(slow["work"]["gait"]["Enum"], 0);
    assert_eq!(slow["work"]["strides"]["Int32"], 1);
    assert_eq!(slow["work"]["walks"]["Int32"], 0);

    let fast = run_json(
        &home,
        &[
            "--config",
            config.to_str().expect("path"),
            "run",
            source.to_str().expect("path"),
            "--set",
            "speed=5",
            "--set",
            "mode=\"walk\"",
            "--json",
        ],
    );
    assert_eq!(fast["work"]["gait"]["Enum"], 1);
    assert_eq!(fast["work"]["walks"]["Int32"], 1);
    assert_eq!(fast["work"]["strides"]["Int32"], 0);
}

#[test]
fn functions_lists_templates_with_permutations() {
    let home = tempdir().expect("tempdir");
    let listing = run_json(&home, &["functions", "Add", "--json"]);
    let templates = listing["templates"].as_array().expect("templates");
    assert_eq!(templates.len(), 1);
    assert_eq!(templates[0]["name"], "Add");
    assert_eq!(templates[0]["permutations"].as_array().expect("permutations").len(), 4);
    assert_eq!(templates[0]["metadata"]["category"], "Math");

    let output = rigvm(&home).arg("functions").output().expect("functions");
    assert!(output.status.success());
    assert!(stdout(&output).contains("Log("));
}

#[test]
fn init_config_writes_a_loadable_file() {
    let home = tempdir().expect("tempdir");
    let path = home.path().join("nested").join("rigvm.toml");
    rigvm(&home)
        .args(["init-config", path.to_str().expect("path")])
        .assert()
        .success();
    let report = run_json(
        &home,
        &[
            "--config",
            path.to_str().expect("path"),
            "run",
            demo("counter.rvasm").to_str().expect("path"),
            "--json",
        ],
    );
    assert_eq!(report["outcome"]["entry"], "main");
}

#[test]
fn missing_inputs_fail_cleanly() {
    let home = tempdir().expect("tempdir");
    let output = rigvm(&home)
        .args(["run", home.path().join("absent.rvasm").to_str().expect("path")])
        .output()
        .expect("run");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("failed to read"));
}
