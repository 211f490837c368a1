//! vk-transpose CLI library
//!
//! Argument definitions, configuration, output rendering and exit codes,
//! exposed for testing.

pub mod config;
pub mod exit;
pub mod output;

use clap::Parser;
use config::ConfigBuilder;
use output::OutputFormat;
use std::path::PathBuf;

/// Vulkan matrix transposition benchmark
#[derive(Debug, Parser)]
#[command(name = "vk-transpose")]
#[command(about = "Measure GPU memory bandwidth and shared-memory bank conflict cost")]
#[command(long_about = r#"
Times three compute kernels on a square matrix of f32 values: a transpose
through a padded shared tile (no bank conflicts), a transpose through an
unpadded tile (bank conflicts), and a plain copy. Each kernel is dispatched
in one batched submission and the average time per dispatch is reported,
together with the copy bandwidth.

Examples:
  # Run on the first device with vendor defaults
  vk-transpose

  # Pick a device and a coalescing granularity
  vk-transpose -d 1 -c 64 --size 4096

  # List devices
  vk-transpose --devices
"#)]
#[command(version)]
pub struct Cli {
    /// Select GPU device (default 0)
    #[arg(short = 'd', long, value_name = "INDEX")]
    pub device: Option<usize>,

    /// Bytes coalesced per memory transaction: 4-128 (default NVIDIA 32, others 64)
    #[arg(short = 'c', long, value_name = "BYTES")]
    pub coalesced: Option<u32>,

    /// Square array size; must be >= the coalesced size (default 2048)
    #[arg(long, value_name = "N")]
    pub size: Option<u32>,

    /// Dispatches per timed batch (default 1000)
    #[arg(long, value_name = "N")]
    pub batch: Option<u32>,

    /// Print the list of available GPU devices and exit
    #[arg(long)]
    pub devices: bool,

    /// Directory containing the .spv kernel binaries
    #[arg(long, value_name = "PATH")]
    pub shader_dir: Option<PathBuf>,

    /// Enable the Khronos validation layer
    #[arg(long)]
    pub validation: bool,

    /// Check every kernel's output against a CPU reference
    #[arg(long)]
    pub verify: bool,

    /// Configuration file path
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Output format (text, json)
    #[arg(long, value_name = "FORMAT", default_value = "text")]
    pub format: OutputFormat,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL")]
    pub log_level: Option<String>,
}

impl Cli {
    /// Configuration builder seeded from `path` with this invocation's flags
    /// as overrides.
    pub fn config_builder(&self, path: &std::path::Path) -> anyhow::Result<ConfigBuilder> {
        Ok(ConfigBuilder::from_file(path)?
            .device(self.device)
            .coalesced_bytes(self.coalesced)
            .size(self.size)
            .batch(self.batch)
            .shader_dir(self.shader_dir.clone())
            .validation(self.validation.then_some(true))
            .verify(self.verify.then_some(true))
            .log_level(self.log_level.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli_definition() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_short_flags() {
        let cli = Cli::try_parse_from(["vk-transpose", "-d", "1", "-c", "64"]).unwrap();
        assert_eq!(cli.device, Some(1));
        assert_eq!(cli.coalesced, Some(64));
        assert_eq!(cli.size, None);
        assert_eq!(cli.format, OutputFormat::Text);
    }

    #[test]
    fn parses_long_flags() {
        let cli = Cli::try_parse_from([
            "vk-transpose",
            "--size",
            "4096",
            "--batch",
            "10",
            "--devices",
            "--format",
            "json",
            "--validation",
        ])
        .unwrap();
        assert_eq!(cli.size, Some(4096));
        assert_eq!(cli.batch, Some(10));
        assert!(cli.devices);
        assert!(cli.validation);
        assert_eq!(cli.format, OutputFormat::Json);
    }

    #[test]
    fn rejects_non_numeric_device() {
        assert!(Cli::try_parse_from(["vk-transpose", "-d", "first"]).is_err());
        assert!(Cli::try_parse_from(["vk-transpose", "-d"]).is_err());
    }
}
