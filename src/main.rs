// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! `index-replicator` command line.
//!
//! Modes:
//! - default: one replication pass (or a loop with `--continuous`)
//! - `--missing-only`: replicate collections absent on the target
//! - `--verify-only`: compare counts and sampled fingerprints, exit 1 on drift

use clap::{Parser, ValueEnum};
use index_replicator::{
    HttpStore, PassSummary, ReplicationConfig, ReplicationEngine, ReplicationError, Result,
    SharedStore, VerificationReport,
};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

/// Replicate collections from a source cluster to a target cluster.
#[derive(Parser, Debug)]
#[command(name = "index-replicator", version)]
struct Cli {
    /// YAML configuration file. Flags below override its values.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Comma-separated source cluster URLs.
    #[arg(long, env = "SOURCE_HOSTS", value_delimiter = ',')]
    source_hosts: Vec<String>,

    #[arg(long, env = "SOURCE_USER")]
    source_user: Option<String>,

    #[arg(long, env = "SOURCE_PASSWORD", hide_env_values = true)]
    source_password: Option<String>,

    /// Comma-separated target cluster URLs.
    #[arg(long, env = "TARGET_HOSTS", value_delimiter = ',')]
    target_hosts: Vec<String>,

    #[arg(long, env = "TARGET_USER")]
    target_user: Option<String>,

    #[arg(long, env = "TARGET_PASSWORD", hide_env_values = true)]
    target_password: Option<String>,

    /// Only replicate collections that do not exist on the target.
    #[arg(long, conflicts_with = "verify_only")]
    missing_only: bool,

    /// Only verify, never write. Exit code 1 when drift is found.
    #[arg(long)]
    verify_only: bool,

    /// Keep running passes until interrupted.
    #[arg(long)]
    continuous: bool,

    /// Seconds between passes in continuous mode.
    #[arg(long)]
    interval: Option<u64>,

    /// Timestamp field to use instead of auto-detection.
    #[arg(long)]
    timestamp_field: Option<String>,

    /// Extra exclusion regexes, appended to the defaults.
    #[arg(long, value_delimiter = ',')]
    exclude_patterns: Vec<String>,

    #[arg(long, value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Cli {
    fn load_config(&self) -> Result<ReplicationConfig> {
        let mut config = match &self.config {
            Some(path) => ReplicationConfig::from_yaml_file(path)?,
            None => ReplicationConfig::default(),
        };

        if !self.source_hosts.is_empty() {
            config.source.hosts = self.source_hosts.clone();
        }
        if self.source_user.is_some() {
            config.source.username = self.source_user.clone();
        }
        if self.source_password.is_some() {
            config.source.password = self.source_password.clone();
        }
        if !self.target_hosts.is_empty() {
            config.target.hosts = self.target_hosts.clone();
        }
        if self.target_user.is_some() {
            config.target.username = self.target_user.clone();
        }
        if self.target_password.is_some() {
            config.target.password = self.target_password.clone();
        }
        if self.continuous {
            config.replication.continuous = true;
        }
        if let Some(secs) = self.interval {
            config.replication.interval_sec = secs;
        }
        if self.timestamp_field.is_some() {
            config.replication.timestamp_field = self.timestamp_field.clone();
        }
        config
            .replication
            .exclude_patterns
            .extend(self.exclude_patterns.iter().cloned());

        config.validate()?;
        Ok(config)
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let installed = match format {
        LogFormat::Text => builder.try_init().is_ok(),
        LogFormat::Json => builder.json().try_init().is_ok(),
    };
    if !installed {
        eprintln!("tracing subscriber already installed");
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, kind = e.kind(), "Fatal error");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = cli.load_config()?;
    let continuous = config.replication.continuous;
    let interval = config.replication.interval();

    let source: SharedStore = Arc::new(HttpStore::new("source", &config.source)?);
    let target: SharedStore = Arc::new(HttpStore::new("target", &config.target)?);
    let engine = ReplicationEngine::new(config, source, target)?;

    let handle = engine.shutdown_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, finishing in-flight collections");
            handle.trigger();
        }
    });

    engine.connect().await?;

    let code = if cli.verify_only {
        let report = engine.verify_all().await?;
        print_verification(&report);
        if report.is_clean() {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }
    } else if cli.missing_only {
        let summary = engine.replicate_missing().await?;
        print_summary("Missing-collection backfill", &summary);
        ExitCode::SUCCESS
    } else {
        let summary = engine.run(continuous, interval).await?;
        print_summary("Replication", &summary);
        ExitCode::SUCCESS
    };

    engine.shutdown().await;
    Ok(code)
}

fn print_summary(what: &str, summary: &PassSummary) {
    println!("{what} summary");
    println!("  collections:         {}", summary.collections.len());
    println!("  failed collections:  {}", summary.failed_count());
    println!("  documents processed: {}", summary.stats.processed);
    println!("  documents updated:   {}", summary.stats.updated);
    println!("  documents failed:    {}", summary.stats.failed);
    println!("  duration:            {}", humantime::format_duration(round_secs(summary.duration)));
    if summary.interrupted {
        println!("  interrupted before all collections started");
    }
    for report in summary.failed_collections() {
        println!(
            "  FAILED {}: {}",
            report.name,
            report.error.as_deref().unwrap_or("unknown error")
        );
    }
}

fn print_verification(report: &VerificationReport) {
    println!("Verification summary");
    println!("  collections checked: {}", report.collections.len());
    println!("  documents checked:   {}", report.checked);
    println!("  missing collections: {}", report.missing_indices);
    println!("  count mismatches:    {}", report.count_mismatches);
    println!("  content mismatches:  {}", report.content_mismatches);
    println!("  read errors:         {}", report.errors);
    println!("  total mismatches:    {}", report.mismatches);
    for c in report.collections.iter().filter(|c| !c.is_clean()) {
        match &c.error {
            Some(e) => println!("  ERROR {}: {e}", c.name),
            None => println!(
                "  DRIFT {}: missing={} count_delta={} content={}",
                c.name, c.missing, c.count_delta, c.content_mismatches
            ),
        }
    }
    if report.is_clean() {
        info!("No drift detected");
    }
}

fn round_secs(d: Duration) -> Duration {
    Duration::from_secs(d.as_secs())
}
