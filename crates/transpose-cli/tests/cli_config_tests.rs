//! Configuration tests: defaults, validation, TOML round trips, environment
//! merging and builder precedence.

use serial_test::serial;
use std::path::{Path, PathBuf};
use transpose_cli::config::{BenchmarkConfig, CliConfig, ConfigBuilder, LoggingConfig};

const ENV_KEYS: [&str; 6] = [
    "VK_TRANSPOSE_DEVICE",
    "VK_TRANSPOSE_COALESCED",
    "VK_TRANSPOSE_SIZE",
    "VK_TRANSPOSE_BATCH",
    "VK_TRANSPOSE_SHADER_DIR",
    "VK_TRANSPOSE_LOG_LEVEL",
];

fn with_clean_env<F: FnOnce()>(f: F) {
    temp_env::with_vars(ENV_KEYS.map(|k| (k, None::<&str>)), f);
}

// ---------------------------------------------------------------------------
// Default values
// ---------------------------------------------------------------------------

#[test]
fn benchmark_defaults() {
    let cfg = BenchmarkConfig::default();
    assert_eq!(cfg.device, 0);
    assert_eq!(cfg.coalesced_bytes, None);
    assert_eq!(cfg.size, 2048);
    assert_eq!(cfg.batch, 1000);
    assert!(cfg.shader_dir.is_none());
    assert!(!cfg.validation);
    assert!(!cfg.verify);
    assert_eq!(cfg.fence_timeout_secs, 100);
}

#[test]
fn logging_defaults() {
    let cfg = LoggingConfig::default();
    assert_eq!(cfg.level, "info");
    assert_eq!(cfg.format, "pretty");
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

#[test]
fn default_config_is_valid() {
    assert!(CliConfig::default().validate().is_ok());
}

#[test]
fn accepts_every_granularity_multiple_of_four() {
    for bytes in (4..=128).step_by(4) {
        let mut cfg = CliConfig::default();
        cfg.benchmark.coalesced_bytes = Some(bytes);
        assert!(cfg.validate().is_ok(), "{bytes} bytes should be valid");
    }
}

#[test]
fn rejects_bad_granularity() {
    for bytes in [0, 2, 30, 132, 256] {
        let mut cfg = CliConfig::default();
        cfg.benchmark.coalesced_bytes = Some(bytes);
        assert!(cfg.validate().is_err(), "{bytes} bytes should be rejected");
    }
}

#[test]
fn rejects_size_below_granularity() {
    let mut cfg = CliConfig::default();
    cfg.benchmark.coalesced_bytes = Some(64);
    cfg.benchmark.size = 32;
    let err = cfg.validate().unwrap_err();
    assert!(err.to_string().contains("bigger than coalescedMemory"));
}

#[test]
fn rejects_zero_size_batch_and_timeout() {
    let mut cfg = CliConfig::default();
    cfg.benchmark.size = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = CliConfig::default();
    cfg.benchmark.batch = 0;
    assert!(cfg.validate().is_err());

    let mut cfg = CliConfig::default();
    cfg.benchmark.fence_timeout_secs = 0;
    assert!(cfg.validate().is_err());
}

#[test]
fn rejects_unknown_log_level_and_format() {
    let mut cfg = CliConfig::default();
    cfg.logging.level = "verbose".into();
    assert!(cfg.validate().is_err());

    let mut cfg = CliConfig::default();
    cfg.logging.format = "xml".into();
    assert!(cfg.validate().is_err());
}

// ---------------------------------------------------------------------------
// TOML and file I/O
// ---------------------------------------------------------------------------

#[test]
fn partial_toml_keeps_defaults() {
    let cfg: CliConfig = toml::from_str("[benchmark]\nsize = 1024\n").unwrap();
    assert_eq!(cfg.benchmark.size, 1024);
    assert_eq!(cfg.benchmark.batch, 1000);
    assert_eq!(cfg.logging.level, "info");
}

#[test]
fn load_missing_file_returns_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let cfg = CliConfig::load_from_file(dir.path().join("absent.toml")).unwrap();
    assert_eq!(cfg, CliConfig::default());
}

#[test]
fn load_malformed_file_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("bad.toml");
    std::fs::write(&path, "[benchmark\nsize = ").unwrap();
    let err = CliConfig::load_from_file(&path).unwrap_err();
    assert!(format!("{err:#}").contains("Failed to parse config file"));
}

#[test]
fn save_and_load_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("vk-transpose.toml");
    let mut cfg = CliConfig::default();
    cfg.benchmark.device = 1;
    cfg.benchmark.coalesced_bytes = Some(64);
    cfg.benchmark.shader_dir = Some(PathBuf::from("/opt/spv"));
    cfg.logging.format = "json".into();
    cfg.save_to_file(&path).unwrap();
    assert_eq!(CliConfig::load_from_file(&path).unwrap(), cfg);
}

// ---------------------------------------------------------------------------
// Environment merging
// ---------------------------------------------------------------------------

#[test]
#[serial]
fn merge_with_env_overrides() {
    temp_env::with_vars(
        [
            ("VK_TRANSPOSE_DEVICE", Some("2")),
            ("VK_TRANSPOSE_COALESCED", Some("64")),
            ("VK_TRANSPOSE_SIZE", Some("4096")),
            ("VK_TRANSPOSE_BATCH", Some("50")),
            ("VK_TRANSPOSE_SHADER_DIR", Some("/opt/spv")),
            ("VK_TRANSPOSE_LOG_LEVEL", Some("debug")),
        ],
        || {
            let mut cfg = CliConfig::default();
            cfg.merge_with_env();
            assert_eq!(cfg.benchmark.device, 2);
            assert_eq!(cfg.benchmark.coalesced_bytes, Some(64));
            assert_eq!(cfg.benchmark.size, 4096);
            assert_eq!(cfg.benchmark.batch, 50);
            assert_eq!(cfg.benchmark.shader_dir.as_deref(), Some(Path::new("/opt/spv")));
            assert_eq!(cfg.logging.level, "debug");
        },
    );
}

#[test]
#[serial]
fn unparsable_env_values_are_ignored() {
    temp_env::with_vars(
        [("VK_TRANSPOSE_DEVICE", Some("first")), ("VK_TRANSPOSE_SIZE", Some("-1"))],
        || {
            let mut cfg = CliConfig::default();
            cfg.merge_with_env();
            assert_eq!(cfg.benchmark.device, 0);
            assert_eq!(cfg.benchmark.size, 2048);
        },
    );
}

// ---------------------------------------------------------------------------
// Builder precedence
// ---------------------------------------------------------------------------

#[test]
#[serial]
fn builder_none_does_not_override() {
    with_clean_env(|| {
        let cfg = ConfigBuilder::new()
            .device(None)
            .coalesced_bytes(None)
            .size(None)
            .batch(None)
            .log_level(None)
            .build()
            .unwrap();
        assert_eq!(cfg, CliConfig::default());
    });
}

#[test]
#[serial]
fn cli_flag_beats_env_beats_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("cfg.toml");
    std::fs::write(&path, "[benchmark]\nsize = 256\nbatch = 7\ndevice = 3\n").unwrap();

    temp_env::with_vars(
        [("VK_TRANSPOSE_SIZE", Some("512")), ("VK_TRANSPOSE_DEVICE", None), ("VK_TRANSPOSE_BATCH", None)],
        || {
            let from_env = ConfigBuilder::from_file(&path).unwrap().build().unwrap();
            assert_eq!(from_env.benchmark.size, 512);
            assert_eq!(from_env.benchmark.batch, 7);
            assert_eq!(from_env.benchmark.device, 3);

            let from_flag =
                ConfigBuilder::from_file(&path).unwrap().size(Some(1024)).build().unwrap();
            assert_eq!(from_flag.benchmark.size, 1024);
        },
    );
}

#[test]
#[serial]
fn builder_validates_result() {
    with_clean_env(|| {
        let result = ConfigBuilder::new().coalesced_bytes(Some(6)).build();
        assert!(result.is_err());
        let result = ConfigBuilder::new().log_level(Some("loud".into())).build();
        assert!(result.is_err());
    });
}
