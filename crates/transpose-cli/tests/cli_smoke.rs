use assert_cmd::Command;
use predicates::prelude::*;

fn vk_transpose() -> Command {
    let mut cmd = Command::cargo_bin("vk-transpose").unwrap();
    for key in [
        "VK_TRANSPOSE_DEVICE",
        "VK_TRANSPOSE_COALESCED",
        "VK_TRANSPOSE_SIZE",
        "VK_TRANSPOSE_BATCH",
        "VK_TRANSPOSE_LOG_LEVEL",
    ] {
        cmd.env_remove(key);
    }
    cmd
}

#[test]
fn help_works() {
    vk_transpose().arg("--help").assert().success();
}

#[test]
fn short_help_works() {
    vk_transpose().arg("-h").assert().success();
}

#[test]
fn version_works() {
    vk_transpose().arg("--version").assert().success();
}

#[test]
fn help_mentions_core_flags() {
    let out = vk_transpose().arg("--help").assert().success().get_output().stdout.clone();
    let s = String::from_utf8(out).unwrap();
    for needle in ["--device", "--coalesced", "--size", "--devices", "--batch", "--config"] {
        assert!(s.contains(needle), "help missing `{needle}`");
    }
}

#[test]
fn missing_device_value_exits_one() {
    vk_transpose().arg("-d").assert().code(1);
}

#[test]
fn non_numeric_device_exits_one() {
    vk_transpose().args(["-d", "gpu0"]).assert().code(1);
}

#[test]
fn size_below_granularity_exits_one() {
    vk_transpose()
        .args(["-c", "64", "--size", "32"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("bigger than coalescedMemory"));
}

#[test]
fn invalid_granularity_exits_one() {
    vk_transpose().args(["-c", "6"]).assert().code(1);
}

#[test]
fn missing_config_file_exits_one() {
    let dir = tempfile::tempdir().unwrap();
    vk_transpose()
        .arg("--config")
        .arg(dir.path().join("absent.toml"))
        .assert()
        .code(1)
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn unknown_flag_fails() {
    vk_transpose().arg("--frobnicate").assert().failure();
}

#[test]
fn run_failure_reported_with_logging_off() {
    let dir = tempfile::tempdir().unwrap();
    vk_transpose()
        .env("RUST_LOG", "off")
        .arg("--shader-dir")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("error:"))
        .stderr(predicate::str::contains("exit code"));
}
