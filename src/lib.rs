pub mod batch;
pub mod config;
pub mod decoder;
pub mod export;
pub mod fetcher;
pub mod job;
pub mod provider;
pub mod types;

pub use batch::{BatchScheduler, FailurePolicy, ShutdownMode, StopSignal};
pub use decoder::{TRANSFER_EVENT_TOPIC, decode_transfer};
pub use export::{CsvSink, JsonLinesSink, TransferSink};
pub use fetcher::{FetchOutcome, RangeFetcher};
pub use job::{JobError, JobReport, TransferExportJob};
pub use provider::{LogProvider, ProviderError, RpcClient};
pub use types::{BlockRange, LogQuery, TokenTransfer, TransferRecord};
