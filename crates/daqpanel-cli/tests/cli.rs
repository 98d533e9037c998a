use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use tempfile::tempdir;

fn daqpanel() -> Command {
    let mut cmd = Command::cargo_bin("daqpanel").unwrap();
    cmd.env_remove("DAQPANEL_SETTINGS")
        .env_remove("DAQPANEL_DEVICE")
        .env_remove("DAQPANEL_BACKEND")
        .env_remove("DAQPANEL_SAMPLE_RATE")
        .args(["--backend", "simulated", "--log-level", "warn"]);
    cmd
}

#[test]
fn init_config_then_record_writes_csv() {
    let temp = tempdir().unwrap();
    let config = temp.path().join("daq.json");
    let csv = temp.path().join("run.csv");

    daqpanel()
        .args(["init-config", "--out", config.to_str().unwrap()])
        .args(["--enable", "AI0", "--enable", "AI1", "--enable", "DIO3"])
        .args(["--reference", "AI1", "--output", "DIO3"])
        .assert()
        .success();
    let saved: Value = serde_json::from_str(&fs::read_to_string(&config).unwrap()).unwrap();
    assert_eq!(saved["version"], 1);
    assert_eq!(saved["analog"][1]["mode"], "Reference");
    assert_eq!(saved["digital"][3]["mode"], "Output");

    let output = daqpanel()
        .args(["--sample-rate", "200", "record"])
        .args(["--config", config.to_str().unwrap()])
        .args(["--out", csv.to_str().unwrap(), "--seconds", "0.5"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let summary: Value = serde_json::from_slice(&output.stdout).unwrap();
    let rows = summary["rows"].as_u64().unwrap();
    assert!(rows > 10, "only {rows} rows");
    assert_eq!(summary["columns"], serde_json::json!(["AI0", "AI1", "DIO3"]));

    let text = fs::read_to_string(&csv).unwrap();
    let mut lines = text.lines();
    assert_eq!(lines.next(), Some("timestamp,AI0,AI1,DIO3"));
    let body: Vec<&str> = lines.collect();
    assert_eq!(body.len() as u64, rows);
    for line in body {
        let fields: Vec<&str> = line.split(',').collect();
        assert_eq!(fields.len(), 4);
        let ai0: f64 = fields[1].parse().unwrap();
        assert!(ai0.abs() <= 5.0);
        assert_eq!(fields[3], "0");
    }
}

#[test]
fn devices_lists_simulator() {
    let output = daqpanel().args(["devices", "--json"]).output().unwrap();
    assert!(output.status.success());
    let devices: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(devices[0]["name"], "Dev1");
    assert_eq!(devices[0]["ai_channels"], 8);
}

#[test]
fn watch_prints_requested_samples() {
    let output = daqpanel()
        .args(["--sample-rate", "500", "watch", "--enable", "AI2", "--enable", "DIO0"])
        .args(["--samples", "5"])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8(output.stdout).unwrap();
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 5);
    for line in lines {
        assert!(line.contains("AI2="));
        assert!(line.contains("DIO0=0") || line.contains("DIO0=1"));
    }
}

#[test]
fn record_without_channels_fails() {
    let temp = tempdir().unwrap();
    let output = daqpanel()
        .args(["record", "--seconds", "0.1", "--out"])
        .arg(temp.path().join("x.csv"))
        .output()
        .unwrap();
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("No channels enabled"));
}

#[test]
fn reference_mode_rejected_for_digital_line() {
    let temp = tempdir().unwrap();
    daqpanel()
        .args(["init-config", "--reference", "DIO1", "--out"])
        .arg(temp.path().join("bad.json"))
        .assert()
        .failure();
    assert!(!temp.path().join("bad.json").exists());
}
