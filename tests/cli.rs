//! The monitor binary end to end.

use std::{
    fs,
    path::PathBuf,
    process::Command,
    time::{SystemTime, UNIX_EPOCH},
};

fn scratch(name: &str) -> PathBuf {
    let nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos();
    std::env::temp_dir().join(format!("qbpm_cli_{}_{}_{}", name, std::process::id(), nanos))
}

#[test]
fn refuses_to_run_without_a_backend() {
    let status = Command::new(env!("CARGO_BIN_EXE_qbpm_monitor"))
        .args(["--duration", "0.2"])
        .status()
        .unwrap();
    assert!(!status.success());
}

#[test]
fn simulated_run_writes_rows() {
    let log = scratch("log");
    let trigger = scratch("trigger");
    let config = scratch("config.toml");
    fs::write(
        &config,
        format!("frequency_hz = 5.0\ntrigger_file = {:?}\n", trigger.display().to_string()),
    )
    .unwrap();

    let status = Command::new(env!("CARGO_BIN_EXE_qbpm_monitor"))
        .arg("--simulate")
        .args(["--duration", "0.6"])
        .arg("--config")
        .arg(&config)
        .arg("--log")
        .arg(&log)
        .status()
        .unwrap();
    assert!(status.success());

    let text = fs::read_to_string(&log).unwrap();
    assert!(text.lines().count() >= 2, "expected a header and samples:\n{}", text);

    let _ = fs::remove_file(&log);
    let _ = fs::remove_file(&config);
}
