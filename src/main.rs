//! rJMX-Bridge - Management bean attributes as Prometheus metrics
//!
//! This binary serves a Prometheus-compatible metrics endpoint backed by a
//! Jolokia agent or the in-process bean server.

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::{error, info};

use rjmx_bridge::{
    cli::{Cli, LogFormat, OutputFormat},
    config::Config,
    scrape::ScrapeOrchestrator,
    server,
    transformer::Rule,
};

/// Summary printed by `--validate`
#[derive(Serialize)]
struct ValidationReport<'a> {
    valid: bool,
    config: &'a str,
    endpoint: String,
    targets: usize,
    rules: usize,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    if cli.check_only() {
        return match check(&cli) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                eprintln!("Configuration invalid: {:#}", e);
                ExitCode::FAILURE
            }
        };
    }

    let json = cli.log_format == LogFormat::Json;
    if let Err(e) = rjmx_bridge::init_logging(cli.log_level.as_filter(), json) {
        eprintln!("{:#}", e);
        return ExitCode::FAILURE;
    }

    match serve(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = format!("{:#}", e), "Exiting");
            ExitCode::FAILURE
        }
    }
}

/// Load the configuration file and apply command-line overrides
fn load_config(cli: &Cli, required: bool) -> Result<Config> {
    let mut config = if required {
        Config::load(&cli.config)
    } else {
        Config::load_or_default(&cli.config)
    }
    .with_context(|| format!("Failed to load {}", cli.config.display()))?;

    cli.overrides.apply(&mut config)?;
    server::parse_bind_address(&config.http_server.bind_address)?;

    Ok(config)
}

/// `--validate` and `--dry-run`
fn check(cli: &Cli) -> Result<()> {
    let config = load_config(cli, true)?;
    let config_path = cli.config.display().to_string();

    if cli.dry_run {
        print_rules(&config.rules, cli.output_format)?;
        return Ok(());
    }

    let report = ValidationReport {
        valid: true,
        config: &config_path,
        endpoint: config.connection.describe(),
        targets: config.targets.len(),
        rules: config.rules.len(),
    };
    match cli.output_format {
        OutputFormat::Text => println!(
            "Configuration OK: {} ({} rules, {} targets, endpoint {})",
            report.config, report.rules, report.targets, report.endpoint
        ),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }
    Ok(())
}

fn print_rules(rules: &[Rule], format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Text => {
            if rules.is_empty() {
                println!("No rules; every leaf uses default naming");
            }
            for (index, rule) in rules.iter().enumerate() {
                println!(
                    "#{} pattern={} name={} type={}",
                    index,
                    rule.pattern.as_deref().unwrap_or("<any>"),
                    rule.name.as_deref().unwrap_or("<default>"),
                    rule.metric_type.map_or("<default>", |t| t.as_str()),
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(rules)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(rules)?),
    }
    Ok(())
}

fn serve(cli: &Cli) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting rJMX-Bridge");

    let config = load_config(cli, false)?;
    let threads = config.http_server.threads;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(threads.minimum.max(1))
        .max_blocking_threads(threads.maximum.max(1))
        .thread_keep_alive(threads.keep_alive)
        .thread_name("rjmx-worker")
        .enable_all()
        .build()
        .context("Failed to build the async runtime")?;

    runtime.block_on(async move {
        let mut builder = ScrapeOrchestrator::builder(config.clone());
        if Path::new(&cli.config).exists() {
            builder = builder.config_path(cli.config.clone());
        }
        let orchestrator = Arc::new(builder.build()?);

        server::run(orchestrator, config.http_server).await
    })
}
