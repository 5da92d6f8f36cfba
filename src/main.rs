//! jmx-scraper - polls JMX attributes through a Jolokia agent
//!
//! Exit codes: 0 on clean shutdown, 2 for bad arguments, 3 for configuration
//! or mapping errors, 1 for anything else.

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use serde::Serialize;
use tokio::signal;
use tracing::{debug, error, info, warn};

use jmx_scraper::cli::{Cli, LogFormat, OutputFormat};
use jmx_scraper::config::{Properties, ScraperConfig};
use jmx_scraper::connection::{ConnectionBuilder, ReadRequest};
use jmx_scraper::emitter::{prometheus, Emitter, EmitterKind, LoggingEmitter, PrometheusEmitter};
use jmx_scraper::error::{ScraperError, ScraperResult};
use jmx_scraper::mapping::{AttributeMapping, MappingRegistry};
use jmx_scraper::metrics::ScrapeStats;
use jmx_scraper::scheduler::PollingScheduler;
use jmx_scraper::session::SessionManager;

const EXIT_RUNTIME: u8 = 1;
const EXIT_CONFIG: u8 = 3;

/// Bounded wait for the metrics endpoint to stop after the scheduler
const SERVER_STOP_TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let json_logs = cli.log_format == LogFormat::Json;
    if let Err(e) = jmx_scraper::init_logging(&cli.log_level.to_string(), json_logs) {
        eprintln!("Error: {:#}", e);
        return ExitCode::from(EXIT_RUNTIME);
    }

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let startup = e
                .downcast_ref::<ScraperError>()
                .map(ScraperError::is_startup)
                .unwrap_or(false);
            error!(error = %format!("{:#}", e), "jmx-scraper failed");
            eprintln!("Error: {:#}", e);
            ExitCode::from(if startup { EXIT_CONFIG } else { EXIT_RUNTIME })
        }
    }
}

/// Everything resolved before the scheduler starts
struct Startup {
    config: ScraperConfig,
    emitter: EmitterKind,
    registry: MappingRegistry,
    builder: ConnectionBuilder,
}

fn load_properties(cli: &Cli) -> ScraperResult<Properties> {
    let mut props = match &cli.config {
        None => Properties::new(),
        Some(_) if cli.config_from_stdin() => {
            Properties::from_reader(std::io::stdin().lock(), "stdin")?
        }
        Some(path) => Properties::load(path)?,
    };
    props.merge(cli.properties.iter().cloned().collect());

    let unrecognized = props.unrecognized_keys();
    if !unrecognized.is_empty() {
        debug!(keys = ?unrecognized, "Ignoring unrecognized properties");
    }
    Ok(props)
}

fn prepare(cli: &Cli) -> ScraperResult<Startup> {
    let props = load_properties(cli)?;
    let config = ScraperConfig::from_properties(&props)?;
    let emitter = EmitterKind::from_config(&config.exporter)?;
    let registry = MappingRegistry::resolve(
        &config.target_systems,
        config.custom_scraping_config.as_deref(),
    )?;
    let builder = ConnectionBuilder::from_config(&config)?;
    builder.preflight()?;

    Ok(Startup {
        config,
        emitter,
        registry,
        builder,
    })
}

async fn run(cli: Cli) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "Starting jmx-scraper");

    let startup = prepare(&cli)?;

    if cli.validate {
        print_validation(&startup, cli.output_format)?;
        return Ok(());
    }
    if cli.dry_run {
        print_dry_run(&startup, cli.output_format)?;
        return Ok(());
    }

    let Startup {
        config,
        emitter: kind,
        registry,
        builder,
    } = startup;

    let stats = Arc::new(ScrapeStats::new());
    let (server_stop, server) = match kind {
        EmitterKind::Logging => (None, None),
        EmitterKind::Prometheus => {
            let addr = prometheus::bind_address(&config.exporter).map_err(ScraperError::from)?;
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("Failed to bind Prometheus endpoint on {}", addr))?;
            let emitter = Arc::new(PrometheusEmitter::new().with_stats(Arc::clone(&stats)));
            let (tx, rx) = tokio::sync::oneshot::channel::<()>();
            let handle = tokio::spawn(Arc::clone(&emitter).serve(listener, async move {
                let _ = rx.await;
            }));
            (Some((tx, emitter)), Some(handle))
        }
    };

    let emitter: Arc<dyn Emitter> = match &server_stop {
        Some((_, prometheus)) => Arc::clone(prometheus) as Arc<dyn Emitter>,
        None => Arc::new(LoggingEmitter),
    };

    let mut scheduler = PollingScheduler::new(
        SessionManager::new(builder),
        Arc::new(registry),
        emitter,
        config.interval(),
    )
    .with_stats(stats);
    scheduler.start().map_err(ScraperError::from)?;

    shutdown_signal().await;
    scheduler.shutdown().await;

    if let Some((tx, _)) = server_stop {
        let _ = tx.send(());
    }
    if let Some(handle) = server {
        match tokio::time::timeout(SERVER_STOP_TIMEOUT, handle).await {
            Ok(Ok(Ok(()))) => debug!("Prometheus endpoint stopped"),
            Ok(Ok(Err(e))) => warn!(error = %e, "Prometheus endpoint failed"),
            Ok(Err(e)) => warn!(error = %e, "Prometheus endpoint task failed"),
            Err(_) => warn!("Prometheus endpoint did not stop in time"),
        }
    }

    info!("Shutdown complete");
    Ok(())
}

#[derive(Serialize)]
struct ValidationReport<'a> {
    valid: bool,
    config: &'a ScraperConfig,
    endpoint: String,
    mappings: usize,
    read_requests: usize,
}

fn print_validation(startup: &Startup, format: OutputFormat) -> Result<()> {
    let report = ValidationReport {
        valid: true,
        config: &startup.config,
        endpoint: startup.builder.descriptor().endpoint_url(),
        mappings: startup.registry.len(),
        read_requests: startup.registry.attributes_to_read().len(),
    };

    match format {
        OutputFormat::Text => {
            println!("Configuration is valid");
            println!("  service url:    {}", report.config.service_url);
            println!("  endpoint:       {}", report.endpoint);
            println!("  target systems: {}", report.config.target_systems.join(","));
            println!("  interval:       {}ms", report.config.interval_ms);
            println!("  exporter:       {}", report.config.exporter.exporter_type);
            println!("  mappings:       {}", report.mappings);
            println!("  read requests:  {}", report.read_requests);
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&report)?),
    }
    Ok(())
}

#[derive(Serialize)]
struct DryRunPlan<'a> {
    reads: Vec<ReadRequest>,
    mappings: &'a [AttributeMapping],
}

fn print_dry_run(startup: &Startup, format: OutputFormat) -> Result<()> {
    let plan = DryRunPlan {
        reads: startup.registry.attributes_to_read(),
        mappings: startup.registry.mappings(),
    };

    match format {
        OutputFormat::Text => {
            println!("Read plan ({} requests):", plan.reads.len());
            for read in &plan.reads {
                println!("  {} [{}]", read.mbean, read.attributes.join(", "));
            }
            println!();
            println!("Mappings ({}):", plan.mappings.len());
            for mapping in plan.mappings {
                let attribute = match &mapping.sub_key {
                    Some(key) => format!("{}.{}", mapping.attribute, key),
                    None => mapping.attribute.clone(),
                };
                println!(
                    "  {} ({}) <- {} {}",
                    mapping.metric, mapping.kind, mapping.pattern, attribute
                );
            }
        }
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plan)?),
        OutputFormat::Yaml => print!("{}", serde_yaml::to_string(&plan)?),
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install signal handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        }
    }
}
