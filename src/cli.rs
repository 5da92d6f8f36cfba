//! CLI argument parsing for jmx-scraper
//!
//! # Options
//!
//! - `--config` / `-c`: Properties file, or `-` for stdin (env: JMX_SCRAPER_CONFIG)
//! - `--property` / `-D`: `key=value` override, repeatable
//! - `--validate`: Validate configuration and load mappings, then exit
//! - `--dry-run`: Print the read plan and mappings without connecting
//! - `--log-level` / `-l`: Log level (trace/debug/info/warn/error, env: JMX_SCRAPER_LOG_LEVEL)
//! - `--log-format`: text or json
//! - `--output-format`: Output format for validate/dry-run (text/json/yaml)
//!
//! # Precedence
//!
//! 1. `--property` overrides
//! 2. Properties file (or stdin)
//! 3. Default values

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// jmx-scraper - polls JMX attributes through a Jolokia agent
///
/// Reads `otel.jmx.*` properties, connects to the remote endpoint and emits
/// the attributes selected by the target system catalogs as metrics.
#[derive(Parser, Debug)]
#[command(name = "jmx-scraper")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Properties file, or `-` to read from stdin
    #[arg(short, long, value_name = "FILE", env = "JMX_SCRAPER_CONFIG")]
    pub config: Option<PathBuf>,

    /// Property override (key=value), may be repeated
    #[arg(short = 'D', long = "property", value_name = "KEY=VALUE", value_parser = parse_property)]
    pub properties: Vec<(String, String)>,

    /// Validate configuration and mappings without connecting
    #[arg(long)]
    pub validate: bool,

    /// Print the resolved read plan and mappings without connecting
    #[arg(long)]
    pub dry_run: bool,

    /// Log level
    #[arg(
        short,
        long,
        value_enum,
        default_value = "info",
        env = "JMX_SCRAPER_LOG_LEVEL"
    )]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value = "text")]
    pub log_format: LogFormat,

    /// Output format for --validate and --dry-run
    #[arg(long, value_enum, default_value = "text")]
    pub output_format: OutputFormat,
}

impl Cli {
    /// Whether the properties document comes from stdin
    pub fn config_from_stdin(&self) -> bool {
        self.config.as_deref().map(|p| p.as_os_str() == "-").unwrap_or(false)
    }
}

fn parse_property(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

/// Log level options
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Trace level - most verbose
    Trace,
    Debug,
    /// Info level - default
    Info,
    Warn,
    /// Error level - least verbose
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

/// 로그 출력 형식
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

/// Output format options for validate and dry-run modes
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// YAML output
    Yaml,
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Yaml => write!(f, "yaml"),
        }
    }
}
