mod config;

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use auditscan_scan::{
    CollectSink, CompiledFilter, DurationMap, FilterOptions, ScanError, ScanPipeline, ScanSummary,
    WriterSink,
};
use auditscan_server::AppState;
use auditscan_source::{Compression, ObjectStore};

use crate::config::Config;

/// auditscan - scan large compressed audit logs for matching lines
#[derive(Parser, Debug)]
#[command(name = "auditscan")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Config file (defaults to ./auditscan.toml if present)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Scan one object and print matching lines as JSON
    Scan(ScanArgs),

    /// Run the HTTP scan worker
    Serve(ServeArgs),
}

#[derive(ClapArgs, Debug)]
struct ScanArgs {
    /// Object path within the bucket
    #[arg(value_name = "OBJECT")]
    object_path: String,

    /// Regex (or literal with --literal) to match lines against
    #[arg(value_name = "PATTERN")]
    pattern: String,

    /// Match PATTERN as a plain substring
    #[arg(long)]
    literal: bool,

    /// Case-insensitive matching
    #[arg(short = 'i', long)]
    ignore_case: bool,

    /// Print one JSON document with all records instead of streaming lines
    #[arg(long)]
    collect: bool,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(ClapArgs, Debug)]
struct ServeArgs {
    /// Address to listen on
    #[arg(long, value_name = "ADDR")]
    listen: Option<String>,

    #[command(flatten)]
    common: CommonArgs,
}

/// Overrides for config file values
#[derive(ClapArgs, Debug)]
struct CommonArgs {
    /// Read objects from this directory instead of the bucket
    #[arg(long, value_name = "DIR")]
    local_root: Option<PathBuf>,

    /// Bucket name
    #[arg(long)]
    bucket: Option<String>,

    /// auto, gzip or none
    #[arg(long)]
    compression: Option<Compression>,

    /// Records per batch
    #[arg(long)]
    batch_size: Option<usize>,

    /// Queue capacity between reader and sender
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Log time spent downloading, decompressing and parsing
    #[arg(long)]
    track_durations: bool,
}

impl CommonArgs {
    fn apply(&self, config: &mut Config) -> Result<()> {
        if let Some(root) = &self.local_root {
            config.source.local_root = Some(root.clone());
        }
        if let Some(bucket) = &self.bucket {
            config.source.bucket = bucket.clone();
        }
        if let Some(compression) = self.compression {
            config.source.compression = compression;
        }
        if let Some(batch_size) = self.batch_size {
            config.scan.batch_size = batch_size;
        }
        if let Some(capacity) = self.queue_capacity {
            config.scan.queue_capacity = capacity;
        }
        if self.track_durations {
            config.scan.track_durations = true;
        }
        config
            .scan
            .validate()
            .map_err(|e| anyhow::anyhow!("Invalid options: {}", e))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let result = run_app(args).await;

    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run_app(args: Args) -> Result<()> {
    let mut config = config::load(args.config.as_deref())?;

    // Ctrl-C cancels running scans and stops the server
    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("interrupt received, shutting down");
            signal_token.cancel();
        }
    });

    match args.command {
        Command::Scan(scan) => {
            scan.common.apply(&mut config)?;
            run_scan(scan, &config, &shutdown).await
        }
        Command::Serve(serve) => {
            serve.common.apply(&mut config)?;
            if let Some(listen) = serve.listen {
                config.server.listen = listen;
            }
            run_server(&config, shutdown).await
        }
    }
}

async fn run_scan(args: ScanArgs, config: &Config, shutdown: &CancellationToken) -> Result<()> {
    let filter = CompiledFilter::with_options(
        &args.pattern,
        FilterOptions {
            literal: args.literal,
            case_insensitive: args.ignore_case,
        },
    )
    .with_context(|| format!("Invalid pattern '{}'", args.pattern))?;

    let durations = config
        .scan
        .track_durations
        .then(|| Arc::new(DurationMap::new()));
    let mut pipeline = ScanPipeline::new(config.scan.pipeline_config());
    if let Some(durations) = &durations {
        pipeline = pipeline.with_durations(Arc::clone(durations));
    }

    let store = ObjectStore::from_config(&config.source).context("Failed to set up object source")?;
    let reader = store
        .open(&args.object_path, config.source.compression, durations.clone())
        .await
        .with_context(|| format!("Failed to open '{}'", args.object_path))?;

    info!(object = %args.object_path, pattern = %args.pattern, "scanning");
    let summary = if args.collect {
        let mut sink = CollectSink::new();
        let summary = finish(pipeline.run(reader, filter, &mut sink, shutdown).await)?;
        if let Some(summary) = &summary {
            print_collected(sink, summary)?;
        }
        summary
    } else {
        let mut sink = WriterSink::new(std::io::stdout());
        finish(pipeline.run(reader, filter, &mut sink, shutdown).await)?
    };
    let Some(summary) = summary else {
        return Ok(());
    };

    if summary.is_empty() {
        eprintln!("No lines found");
    } else {
        info!("{}", summary);
    }
    if let Some(durations) = &durations {
        durations.log_all();
    }
    Ok(())
}

/// A closed stdout (e.g. piped into `head`) ends the scan without an error
fn finish(result: Result<ScanSummary, ScanError>) -> Result<Option<ScanSummary>> {
    match result {
        Ok(summary) => Ok(Some(summary)),
        Err(ScanError::Disconnected) => {
            warn!("output closed, scan stopped early");
            Ok(None)
        }
        Err(e) => Err(e).context("Scan failed"),
    }
}

fn print_collected(sink: CollectSink, summary: &ScanSummary) -> Result<()> {
    let document = serde_json::json!({
        "records": sink.into_records(),
        "skippedCount": summary.skipped,
        "delivered": summary.delivered,
    });
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &document)?;
    writeln!(stdout)?;
    Ok(())
}

async fn run_server(config: &Config, shutdown: CancellationToken) -> Result<()> {
    let store = ObjectStore::from_config(&config.source).context("Failed to set up object source")?;
    let state = AppState {
        store: Arc::new(store),
        pipeline: ScanPipeline::new(config.scan.pipeline_config()),
        compression: config.source.compression,
        track_durations: config.scan.track_durations,
        shutdown,
    };

    let listener = tokio::net::TcpListener::bind(&config.server.listen)
        .await
        .with_context(|| format!("Failed to listen on {}", config.server.listen))?;
    auditscan_server::serve(listener, state)
        .await
        .context("Server failed")
}
