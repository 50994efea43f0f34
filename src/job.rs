use crate::batch::{BatchError, BatchScheduler};
use crate::decoder::{TRANSFER_EVENT_TOPIC, decode_transfer};
use crate::export::TransferSink;
use crate::fetcher::RangeFetcher;
use crate::provider::LogProvider;
use crate::types::{BlockRange, LogQuery, TransferRecord};
use alloy_primitives::Address;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Error)]
pub enum JobError {
    #[error("invalid block range: start block {start} is after end block {end}")]
    InvalidRange { start: u64, end: u64 },
    #[error(transparent)]
    Batch(#[from] BatchError),
    #[error("sink error: {0:#}")]
    Sink(anyhow::Error),
}

/// What a finished job actually did, including quantified loss: blocks the
/// provider could not serve even at single-block width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobReport {
    pub blocks_processed: u64,
    pub transfers_exported: u64,
    pub dropped_blocks: Vec<u64>,
}

/// Exports every ERC20 transfer in a closed block range to a sink.
///
/// The range is partitioned into batches and fanned out over a bounded
/// worker pool; each batch is fetched adaptively, decoded, and exported.
/// The first batch failure aborts the job, and the sink is closed on every
/// exit path.
pub struct TransferExportJob<P, S> {
    fetcher: RangeFetcher<P>,
    sink: S,
    range: BlockRange,
    batch_size: usize,
    max_workers: usize,
    tokens: Vec<Address>,
}

impl<P: LogProvider, S: TransferSink> TransferExportJob<P, S> {
    /// Validates the range and pool parameters; no work happens until
    /// [`run`](Self::run).
    pub fn new(
        provider: P,
        sink: S,
        start_block: u64,
        end_block: u64,
        batch_size: usize,
        max_workers: usize,
        tokens: Vec<Address>,
    ) -> Result<Self, JobError> {
        if start_block > end_block {
            return Err(JobError::InvalidRange {
                start: start_block,
                end: end_block,
            });
        }
        // Fail on bad pool parameters before opening the sink.
        BatchScheduler::new(batch_size, max_workers)?;
        Ok(TransferExportJob {
            fetcher: RangeFetcher::new(provider),
            sink,
            range: BlockRange::new(start_block, end_block),
            batch_size,
            max_workers,
            tokens,
        })
    }

    pub async fn run(&self) -> Result<JobReport, JobError> {
        self.sink.open().map_err(JobError::Sink)?;
        info!(
            "Exporting transfers for blocks {}-{} ({} tokens filtered)",
            self.range.from_block,
            self.range.to_block,
            self.tokens.len()
        );

        let result = self.export().await;

        // The sink closes on every exit path; an export error takes
        // precedence over a close error.
        let closed = self.sink.close().map_err(JobError::Sink);
        let report = result?;
        closed?;

        if !report.dropped_blocks.is_empty() {
            warn!(
                "{} blocks dropped because the provider could not serve them: {:?}",
                report.dropped_blocks.len(),
                report.dropped_blocks
            );
        }
        Ok(report)
    }

    async fn export(&self) -> Result<JobReport, JobError> {
        let scheduler = BatchScheduler::new(self.batch_size, self.max_workers)?;
        let exported = AtomicU64::new(0);
        let dropped: Mutex<Vec<u64>> = Mutex::new(Vec::new());

        let blocks: Vec<u64> = (self.range.from_block..=self.range.to_block).collect();
        let fetcher = &self.fetcher;
        let sink = &self.sink;
        let tokens = &self.tokens;
        let exported_ref = &exported;
        let dropped_ref = &dropped;

        scheduler
            .execute(blocks, move |batch: Vec<u64>| async move {
                let (Some(&first), Some(&last)) = (batch.first(), batch.last()) else {
                    return Ok(());
                };
                let query = LogQuery {
                    range: BlockRange::new(first, last),
                    topics: vec![TRANSFER_EVENT_TOPIC],
                    addresses: tokens.clone(),
                };

                let outcome = fetcher.fetch(&query).await?;
                for log in &outcome.logs {
                    if let Some(transfer) = decode_transfer(log) {
                        sink.export_item(&TransferRecord::from(&transfer))?;
                        exported_ref.fetch_add(1, Ordering::Relaxed);
                    }
                }
                if !outcome.dropped_blocks.is_empty() {
                    dropped_ref
                        .lock()
                        .unwrap_or_else(|e| e.into_inner())
                        .extend(outcome.dropped_blocks);
                }
                Ok(())
            })
            .await?;

        let mut dropped_blocks = dropped.into_inner().unwrap_or_else(|e| e.into_inner());
        dropped_blocks.sort_unstable();

        Ok(JobReport {
            blocks_processed: scheduler.completed_items(),
            transfers_exported: exported.load(Ordering::Relaxed),
            dropped_blocks,
        })
    }
}
