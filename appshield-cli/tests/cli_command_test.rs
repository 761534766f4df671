//! Integration tests for the `appshield` binary against temp policy stores
//! and device profiles

use anyhow::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use tempfile::TempDir;

fn appshield() -> Command {
    Command::new(env!("CARGO_BIN_EXE_appshield"))
}

/// Run with an isolated store and config so no platform directories are touched
fn run(dir: &Path, args: &[&str]) -> Result<Output> {
    let config = dir.join("shield.yml");
    if !config.exists() {
        fs::write(&config, "{}")?;
    }
    let output = appshield()
        .arg("--store")
        .arg(dir.join("policy.json"))
        .arg("--config")
        .arg(&config)
        .args(args)
        .output()?;
    Ok(output)
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

fn write_device(dir: &Path) -> Result<PathBuf> {
    let path = dir.join("device.yml");
    fs::write(
        &path,
        r#"
manufacturer: Xiaomi
launcher: com.miui.home
settings: com.android.settings
installed:
  - package_id: com.some.game
    label: Some Game
  - package_id: com.miui.powerkeeper
    system: true
    launchable: false
"#,
    )?;
    Ok(path)
}

#[test]
fn test_policy_round_trip_through_store_file() -> Result<()> {
    let dir = TempDir::new()?;

    assert!(run(dir.path(), &["policy", "enable"])?.status.success());
    assert!(run(dir.path(), &["policy", "allow", "Com.WhatsApp", "org.telegram.messenger"])?
        .status
        .success());
    assert!(run(dir.path(), &["policy", "allow", "--remove", "org.telegram.messenger"])?
        .status
        .success());
    assert!(run(dir.path(), &["policy", "feedback", "off"])?.status.success());

    let output = run(dir.path(), &["policy", "show", "--json"])?;
    assert!(output.status.success());
    let state: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(state["block_all_enabled"], true);
    assert_eq!(state["feedback_enabled"], false);
    assert_eq!(state["custom_allowed"], serde_json::json!(["com.whatsapp"]));
    Ok(())
}

#[test]
fn test_allow_without_packages_fails() -> Result<()> {
    let dir = TempDir::new()?;
    let output = run(dir.path(), &["policy", "allow"])?;
    assert!(!output.status.success());
    Ok(())
}

#[test]
fn test_allowlist_includes_device_handlers() -> Result<()> {
    let dir = TempDir::new()?;
    let device = write_device(dir.path())?;
    let device = device.to_string_lossy();

    run(dir.path(), &["policy", "allow", "com.spotify.music"])?;
    let output = run(dir.path(), &["allowlist", "--device", &device, "--json"])?;
    assert!(output.status.success());

    let packages: Vec<String> = serde_json::from_str(&stdout(&output))?;
    assert!(packages.contains(&"com.miui.home".to_string()));
    assert!(packages.contains(&"com.miui.powerkeeper".to_string()));
    assert!(packages.contains(&"com.spotify.music".to_string()));
    assert!(!packages.contains(&"com.some.game".to_string()));
    Ok(())
}

#[test]
fn test_classify_event_from_stdin() -> Result<()> {
    let dir = TempDir::new()?;
    fs::write(dir.path().join("shield.yml"), "{}")?;

    let mut child = appshield()
        .arg("--store")
        .arg(dir.path().join("policy.json"))
        .arg("--config")
        .arg(dir.path().join("shield.yml"))
        .args(["classify", "--force-block"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .spawn()?;
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(br#"{"package_id": "com.some.game", "event_kind": "WindowStateChanged"}"#)?;
    let output = child.wait_with_output()?;
    assert!(output.status.success());

    let signals: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(
        signals,
        serde_json::json!([{"signal": "foreground_violation", "package_id": "com.some.game"}])
    );
    Ok(())
}

#[test]
fn test_replay_prints_actions_and_summary() -> Result<()> {
    let dir = TempDir::new()?;
    let device = write_device(dir.path())?;
    let events = dir.path().join("events.jsonl");
    fs::write(
        &events,
        r#"{"package_id": "com.miui.home", "event_kind": "WindowStateChanged"}
{"package_id": "com.some.game", "event_kind": "WindowStateChanged"}
"#,
    )?;

    let output = run(
        dir.path(),
        &[
            "replay",
            &events.to_string_lossy(),
            "--device",
            &device.to_string_lossy(),
            "--force-block",
        ],
    )?;
    assert!(output.status.success());

    let out = stdout(&output);
    assert!(out.contains("action   home"));
    assert!(out.contains("action   terminate com.some.game"));
    assert!(out.contains("popup    The App is restricted now"));
    assert!(out.contains("2 events, 1 with signals, 2 OS actions"));

    // --force-block does not touch the stored policy
    let state = run(dir.path(), &["policy", "show", "--json"])?;
    let state: serde_json::Value = serde_json::from_str(&stdout(&state))?;
    assert_eq!(state["block_all_enabled"], false);
    Ok(())
}

#[test]
fn test_compat_report() -> Result<()> {
    let dir = TempDir::new()?;
    let device = write_device(dir.path())?;

    let output = run(dir.path(), &["compat", "--device", &device.to_string_lossy()])?;
    assert!(output.status.success());
    let report: serde_json::Value = serde_json::from_str(&stdout(&output))?;
    assert_eq!(report["vendor"], "xiaomi");
    assert_eq!(report["vendor_specific"], true);
    Ok(())
}
