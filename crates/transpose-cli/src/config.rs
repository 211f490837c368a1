//! Configuration management for the vk-transpose CLI.
//!
//! Values are layered: defaults, then the TOML file, then `VK_TRANSPOSE_*`
//! environment variables, then command-line flags.

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use transpose_vulkan::bench::{DEFAULT_BATCH, DEFAULT_SIZE};
use transpose_vulkan::geometry::MAX_COALESCED_BYTES;
use transpose_vulkan::{BenchSettings, ContextConfig, SpirvDirectory};

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "vk-transpose.toml";

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];
const VALID_LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

/// Top-level CLI configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub benchmark: BenchmarkConfig,
    pub logging: LoggingConfig,
}

/// `[benchmark]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BenchmarkConfig {
    /// Physical device index.
    pub device: usize,
    /// Coalescing granularity in bytes; vendor default when unset.
    pub coalesced_bytes: Option<u32>,
    /// Edge length of the square matrix.
    pub size: u32,
    /// Dispatches per timed batch.
    pub batch: u32,
    /// Directory holding the `.spv` kernel binaries.
    pub shader_dir: Option<PathBuf>,
    pub validation: bool,
    pub verify: bool,
    /// Bound on each fence wait, in seconds.
    pub fence_timeout_secs: u64,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            device: 0,
            coalesced_bytes: None,
            size: DEFAULT_SIZE,
            batch: DEFAULT_BATCH,
            shader_dir: None,
            validation: false,
            verify: false,
            fence_timeout_secs: 100,
        }
    }
}

/// `[logging]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), format: "pretty".to_string() }
    }
}

impl CliConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&text)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let text = toml::to_string_pretty(self).context("Failed to serialize configuration")?;
        std::fs::write(path, text)
            .with_context(|| format!("Failed to write config file {}", path.display()))
    }

    /// Apply `VK_TRANSPOSE_*` overrides. Unparsable values are ignored.
    pub fn merge_with_env(&mut self) {
        if let Some(device) = env_parse("VK_TRANSPOSE_DEVICE") {
            self.benchmark.device = device;
        }
        if let Some(bytes) = env_parse("VK_TRANSPOSE_COALESCED") {
            self.benchmark.coalesced_bytes = Some(bytes);
        }
        if let Some(size) = env_parse("VK_TRANSPOSE_SIZE") {
            self.benchmark.size = size;
        }
        if let Some(batch) = env_parse("VK_TRANSPOSE_BATCH") {
            self.benchmark.batch = batch;
        }
        if let Some(dir) = std::env::var_os("VK_TRANSPOSE_SHADER_DIR").filter(|d| !d.is_empty()) {
            self.benchmark.shader_dir = Some(PathBuf::from(dir));
        }
        if let Some(level) = std::env::var("VK_TRANSPOSE_LOG_LEVEL").ok().filter(|l| !l.is_empty())
        {
            self.logging.level = level;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let bench = &self.benchmark;
        if bench.size == 0 {
            bail!("Array size must be positive");
        }
        if bench.batch == 0 {
            bail!("Batch must be at least 1");
        }
        if let Some(bytes) = bench.coalesced_bytes {
            if bytes == 0 || bytes % 4 != 0 || bytes > MAX_COALESCED_BYTES {
                bail!(
                    "Coalesced memory size {bytes} must be a non-zero multiple of 4 of at most \
                     {MAX_COALESCED_BYTES} bytes"
                );
            }
            if bench.size < bytes {
                bail!("Array size should be bigger than coalescedMemory constant");
            }
        }
        if bench.fence_timeout_secs == 0 {
            bail!("Fence timeout must be positive");
        }
        if !VALID_LOG_LEVELS.contains(&self.logging.level.as_str()) {
            bail!(
                "Invalid log level '{}'. Expected one of: {}",
                self.logging.level,
                VALID_LOG_LEVELS.join(", ")
            );
        }
        if !VALID_LOG_FORMATS.contains(&self.logging.format.as_str()) {
            bail!(
                "Invalid log format '{}'. Expected one of: {}",
                self.logging.format,
                VALID_LOG_FORMATS.join(", ")
            );
        }
        Ok(())
    }

    pub fn context_config(&self) -> ContextConfig {
        ContextConfig {
            device_index: self.benchmark.device,
            enable_validation: self.benchmark.validation,
            fence_timeout: Duration::from_secs(self.benchmark.fence_timeout_secs),
            ..ContextConfig::default()
        }
    }

    pub fn bench_settings(&self) -> BenchSettings {
        BenchSettings {
            size: self.benchmark.size,
            coalesced_bytes: self.benchmark.coalesced_bytes,
            batch: self.benchmark.batch,
            verify: self.benchmark.verify,
        }
    }

    /// Configured shader directory, else the binaries compiled at build time.
    pub fn shader_directory(&self) -> Option<SpirvDirectory> {
        match &self.benchmark.shader_dir {
            Some(dir) => Some(SpirvDirectory::new(dir)),
            None => SpirvDirectory::builtin(),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Builds a [`CliConfig`] from a file plus command-line overrides.
///
/// Each setter overrides only when given `Some`.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: CliConfig,
    device: Option<usize>,
    coalesced_bytes: Option<u32>,
    size: Option<u32>,
    batch: Option<u32>,
    shader_dir: Option<PathBuf>,
    validation: Option<bool>,
    verify: Option<bool>,
    log_level: Option<String>,
}

impl ConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        Ok(Self { config: CliConfig::load_from_file(path)?, ..Self::default() })
    }

    pub fn device(mut self, device: Option<usize>) -> Self {
        self.device = device;
        self
    }

    pub fn coalesced_bytes(mut self, bytes: Option<u32>) -> Self {
        self.coalesced_bytes = bytes;
        self
    }

    pub fn size(mut self, size: Option<u32>) -> Self {
        self.size = size;
        self
    }

    pub fn batch(mut self, batch: Option<u32>) -> Self {
        self.batch = batch;
        self
    }

    pub fn shader_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.shader_dir = dir;
        self
    }

    pub fn validation(mut self, enabled: Option<bool>) -> Self {
        self.validation = enabled;
        self
    }

    pub fn verify(mut self, enabled: Option<bool>) -> Self {
        self.verify = enabled;
        self
    }

    pub fn log_level(mut self, level: Option<String>) -> Self {
        self.log_level = level;
        self
    }

    /// Merge the environment, apply overrides and validate.
    pub fn build(self) -> Result<CliConfig> {
        let mut config = self.config;
        config.merge_with_env();

        let bench = &mut config.benchmark;
        if let Some(device) = self.device {
            bench.device = device;
        }
        if self.coalesced_bytes.is_some() {
            bench.coalesced_bytes = self.coalesced_bytes;
        }
        if let Some(size) = self.size {
            bench.size = size;
        }
        if let Some(batch) = self.batch {
            bench.batch = batch;
        }
        if self.shader_dir.is_some() {
            bench.shader_dir = self.shader_dir;
        }
        if let Some(validation) = self.validation {
            bench.validation = validation;
        }
        if let Some(verify) = self.verify {
            bench.verify = verify;
        }
        if let Some(level) = self.log_level {
            config.logging.level = level;
        }

        config.validate()?;
        Ok(config)
    }
}
