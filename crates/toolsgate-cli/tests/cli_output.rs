//! Runs the built binary to check what lands on stdout versus stderr.

use std::fs;
use std::process::Command;

fn run_process(artifact_json: &str) -> std::process::Output {
    let dir = tempfile::tempdir().unwrap();
    let config = dir.path().join("toolsgate.toml");
    fs::write(
        &config,
        r#"
[vsphere]
host = "127.0.0.1:9"
username = "administrator@vsphere.local"
password = "s3cret"
"#,
    )
    .unwrap();
    let artifact = dir.path().join("artifact.json");
    fs::write(&artifact, artifact_json).unwrap();

    Command::new(env!("CARGO_BIN_EXE_toolsgate"))
        .arg("--config")
        .arg(&config)
        .arg("process")
        .arg("--artifact")
        .arg(&artifact)
        .env("RUST_LOG", "info")
        .output()
        .unwrap()
}

#[test]
fn logs_stay_off_stdout() {
    // Rejected before any connection is attempted, after the run has logged.
    let out = run_process(r#"{"id":"no-separators","builder_id":"mitchellh.vmware-esx"}"#);

    let stdout = String::from_utf8_lossy(&out.stdout);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(!out.status.success());
    assert!(stdout.is_empty(), "stdout: {stdout}");
    assert!(stderr.contains("post-processing no-separators"), "stderr: {stderr}");
    assert!(stderr.contains("incoming artifact"), "stderr: {stderr}");
}
