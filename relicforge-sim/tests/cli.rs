use std::process::Command;

fn temp_path(label: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!(
        "relicforge-cli-{label}-{}",
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos()
    ))
}

#[test]
fn cli_rarity_sweep_writes_json() {
    let exe = env!("CARGO_BIN_EXE_relicforge-sim");
    let output_path = temp_path("rarity");
    let status = Command::new(exe)
        .args([
            "rarity",
            "--minutes",
            "10,60,240",
            "--report",
            "json",
            "--output",
        ])
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(&output_path).expect("read output");
    let value: serde_json::Value = serde_json::from_str(&content).expect("parse json");
    assert_eq!(value["report"]["kind"], "rarity");
    assert_eq!(value["report"]["rows"].as_array().map(Vec::len), Some(3));
    let _ = std::fs::remove_file(output_path);
}

#[test]
fn cli_merge_markdown_report() {
    let exe = env!("CARGO_BIN_EXE_relicforge-sim");
    let output_path = temp_path("merge");
    let status = Command::new(exe)
        .args([
            "merge",
            "--inputs",
            "3",
            "--rarity",
            "uncommon",
            "--trials",
            "200",
            "--seed",
            "11",
            "--report",
            "markdown",
            "--output",
        ])
        .arg(&output_path)
        .status()
        .expect("run cli");
    assert!(status.success());
    let content = std::fs::read_to_string(&output_path).expect("read output");
    assert!(content.contains("# Relicforge Merge Results"));
    assert!(content.contains("- **Trials**: 200"));
    let _ = std::fs::remove_file(output_path);
}

#[test]
fn cli_console_session_prints_banner() {
    let exe = env!("CARGO_BIN_EXE_relicforge-sim");
    let output = Command::new(exe)
        .args(["session", "--sessions", "3"])
        .env("NO_COLOR", "1")
        .output()
        .expect("run cli");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Relicforge Simulator"));
    assert!(stdout.contains("Session Simulation"));
}

#[test]
fn cli_rejects_invalid_config() {
    let exe = env!("CARGO_BIN_EXE_relicforge-sim");
    let config_path = temp_path("config.json");
    std::fs::write(&config_path, r#"{"merge":{"success_cap":1.5}}"#).expect("write config");
    let output = Command::new(exe)
        .args(["rarity", "--config"])
        .arg(&config_path)
        .output()
        .expect("run cli");
    assert!(!output.status.success());
    let _ = std::fs::remove_file(config_path);
}
