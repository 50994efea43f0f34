use alloy_primitives::Address;
use anyhow::Result;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use transfer_etl::config::Config;
use transfer_etl::export::{CsvSink, JsonLinesSink, TransferSink};
use transfer_etl::job::TransferExportJob;
use transfer_etl::provider::RpcClient;

#[derive(Parser)]
#[command(name = "export")]
#[command(about = "Export ERC20 token transfers over a block range", long_about = None)]
struct Cli {
    /// First block of the range (inclusive).
    #[arg(long)]
    start_block: u64,

    /// Last block of the range (inclusive).
    #[arg(long)]
    end_block: u64,

    /// Blocks per batch handed to one worker.
    #[arg(long, default_value = "100")]
    batch_size: usize,

    /// Maximum concurrent batches in flight.
    #[arg(long, default_value = "5")]
    max_workers: usize,

    /// Token contract addresses to filter on; all contracts when omitted.
    #[arg(long = "token")]
    tokens: Vec<Address>,

    /// Output path. '-' writes CSV to stdout; a .jsonl suffix selects JSON
    /// lines. Falls back to OUTPUT_PATH from the environment, then stdout.
    #[arg(long)]
    output: Option<String>,

    /// RPC endpoint URLs; falls back to JSON_RPC_URLS from the environment.
    #[arg(long = "rpc-url")]
    rpc_urls: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    // CLI flags win over the environment; OUTPUT_PATH is usable even when
    // the endpoints come from --rpc-url.
    let config = Config::from_env();
    let rpc_urls = match (&cli.rpc_urls, &config) {
        (urls, _) if !urls.is_empty() => urls.clone(),
        (_, Ok(config)) => config.json_rpc_urls.clone(),
        (_, Err(e)) => anyhow::bail!("{e:#}"),
    };

    let output = cli
        .output
        .clone()
        .or_else(|| config.ok().and_then(|c| c.output_path))
        .unwrap_or_else(|| "-".to_string());

    let client = RpcClient::new(&rpc_urls)?;
    info!("RPC client connected: {} endpoint(s)", rpc_urls.len());

    let sink: Box<dyn TransferSink> = match output.as_str() {
        "-" => Box::new(CsvSink::stdout()),
        path if path.ends_with(".jsonl") => Box::new(JsonLinesSink::create(path.as_ref())?),
        path => Box::new(CsvSink::create(path.as_ref())?),
    };

    let job = TransferExportJob::new(
        client,
        sink,
        cli.start_block,
        cli.end_block,
        cli.batch_size,
        cli.max_workers,
        cli.tokens,
    )?;

    let report = job.run().await?;

    info!(
        "Exported {} transfers from {} blocks",
        report.transfers_exported, report.blocks_processed
    );
    if !report.dropped_blocks.is_empty() {
        warn!(
            "{} blocks exceeded the provider limit even alone and were dropped: {:?}",
            report.dropped_blocks.len(),
            report.dropped_blocks
        );
    }

    Ok(())
}
