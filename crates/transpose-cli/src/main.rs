//! vk-transpose: Vulkan matrix transposition benchmark.

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use std::path::PathBuf;
use tracing::{error, info};
use transpose_cli::Cli;
use transpose_cli::config::{CliConfig, DEFAULT_CONFIG_FILE};
use transpose_cli::exit::{self, EXIT_SUCCESS, EXIT_USAGE};
use transpose_cli::output::{self, OutputFormat};
use transpose_vulkan::{DeviceContext, run_transposition_benchmark};

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = if e.use_stderr() { EXIT_USAGE } else { EXIT_SUCCESS };
            let _ = e.print();
            std::process::exit(code);
        }
    };

    let config = match load_configuration(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {e:#}", console::style("error:").red().bold());
            std::process::exit(EXIT_USAGE);
        }
    };

    if let Err(e) = setup_logging(&config) {
        eprintln!("{} {e:#}", console::style("error:").red().bold());
        std::process::exit(EXIT_USAGE);
    }

    let result = if cli.devices { list_devices(cli.format) } else { run(&config, cli.format) };

    if let Err(e) = result {
        let code = exit::for_error(&e);
        let message = exit::describe_failure(&e, code);
        error!(code, "{message}");
        eprintln!("{} {message}", console::style("error:").red().bold());
        std::process::exit(code);
    }
}

/// Load the configuration file and merge environment and CLI overrides.
fn load_configuration(cli: &Cli) -> Result<CliConfig> {
    let path = cli.config.clone().unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_FILE));
    if cli.config.is_some() && !path.exists() {
        return Err(anyhow!("Config file {} does not exist", path.display()));
    }
    cli.config_builder(&path)?.build().context("Invalid configuration")
}

fn setup_logging(config: &CliConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match config.logging.format.as_str() {
        "json" => subscriber.json().with_timer(tracing_subscriber::fmt::time::uptime()).init(),
        "compact" => subscriber.compact().init(),
        _ => subscriber.pretty().init(),
    }
    Ok(())
}

fn list_devices(format: OutputFormat) -> Result<()> {
    let devices = DeviceContext::list_devices()?;
    print!("{}", output::render_devices(&devices, format)?);
    Ok(())
}

fn run(config: &CliConfig, format: OutputFormat) -> Result<()> {
    let loader = config.shader_directory().ok_or_else(|| {
        anyhow!("No kernel binaries available: pass --shader-dir or set VK_TRANSPOSE_SHADER_DIR")
    })?;
    info!(shader_dir = %loader.root().display(), "using kernel binaries");

    let ctx = DeviceContext::new(&config.context_config())?;
    let report = run_transposition_benchmark(&ctx, &config.bench_settings(), &loader)?;

    let color = console::colors_enabled();
    print!("{}", output::render_report(&report, format, color)?);
    Ok(())
}
