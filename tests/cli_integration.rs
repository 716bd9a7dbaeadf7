use std::process::Command;

fn driftwall() -> Command {
    Command::new(env!("CARGO_BIN_EXE_driftwall"))
}

fn temp_data_dir(name: &str) -> std::path::PathBuf {
    let dir = std::env::temp_dir().join(format!("driftwall_it_{name}_{}", std::process::id()));
    let _ = std::fs::remove_dir_all(&dir);
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

#[test]
fn test_help_exits_zero() {
    let output = driftwall().arg("--help").output().expect("failed to run");
    assert!(output.status.success(), "driftwall --help should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("wallpaper personalization"),
        "help should contain description"
    );
}

#[test]
fn test_version_exits_zero() {
    let output = driftwall()
        .arg("--version")
        .output()
        .expect("failed to run");
    assert!(output.status.success(), "driftwall --version should exit 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("driftwall"),
        "version output should contain crate name"
    );
}

#[test]
fn test_status_with_fresh_data_dir() {
    let dir = temp_data_dir("status");
    let output = driftwall()
        .args(["status", "--data-dir", dir.to_str().unwrap()])
        .output()
        .expect("failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("panicked"), "should not panic: {stderr}");
    assert!(output.status.success(), "status on a fresh dir exits 0");
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("catalog:"), "status lists the catalog line");
    assert!(stdout.contains("0 wallpapers"), "fresh install has no catalog");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_next_with_empty_catalog_is_noop() {
    let dir = temp_data_dir("next_empty");
    let output = driftwall()
        .args(["next", "--data-dir", dir.to_str().unwrap()])
        .output()
        .expect("failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("panicked"), "should not panic: {stderr}");
    assert!(
        output.status.success(),
        "apply-next on an empty catalog succeeds as a no-op"
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Nothing to apply"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_sync_with_unreachable_cdn_fails_cleanly() {
    let dir = temp_data_dir("sync_dead");
    std::fs::write(
        dir.join("config.toml"),
        "[sync]\nmanifest_url = \"http://127.0.0.1:0/manifest.json\"\n",
    )
    .unwrap();

    let output = driftwall()
        .args(["sync", "--data-dir", dir.to_str().unwrap()])
        .output()
        .expect("failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("panicked"), "should not panic: {stderr}");
    assert!(
        !output.status.success(),
        "sync against a dead endpoint reports failure"
    );

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_reset_requires_confirmation() {
    let dir = temp_data_dir("reset");
    let output = driftwall()
        .args(["reset", "--data-dir", dir.to_str().unwrap()])
        .output()
        .expect("failed to run");
    assert!(!output.status.success(), "reset without --yes refuses");

    let output = driftwall()
        .args(["reset", "--yes", "--data-dir", dir.to_str().unwrap()])
        .output()
        .expect("failed to run");
    assert!(output.status.success(), "reset --yes exits 0");

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn test_like_without_history_fails_cleanly() {
    let dir = temp_data_dir("like");
    let output = driftwall()
        .args(["like", "--data-dir", dir.to_str().unwrap()])
        .output()
        .expect("failed to run");

    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(!stderr.contains("panicked"), "should not panic: {stderr}");
    assert!(
        !output.status.success(),
        "liking with no history is an error, not a crash"
    );

    let _ = std::fs::remove_dir_all(&dir);
}
