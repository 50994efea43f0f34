use crate::types::LogQuery;
use alloy::providers::fillers::FillProvider;
use alloy::providers::{Provider, ProviderBuilder};
use alloy::rpc::types::{Filter, Log};
use anyhow::Result;
use async_trait::async_trait;
use regex::Regex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::time::timeout;
use tokio_retry::Retry;
use tokio_retry::strategy::{ExponentialBackoff, jitter};
use tracing::{debug, warn};

type AlloyFullProvider = FillProvider<
    alloy::providers::fillers::JoinFill<
        alloy::providers::Identity,
        alloy::providers::fillers::JoinFill<
            alloy::providers::fillers::GasFiller,
            alloy::providers::fillers::JoinFill<
                alloy::providers::fillers::BlobGasFiller,
                alloy::providers::fillers::JoinFill<
                    alloy::providers::fillers::NonceFiller,
                    alloy::providers::fillers::ChainIdFiller,
                >,
            >,
        >,
    >,
    alloy::providers::RootProvider,
>;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(120); // 2 minutes timeout per request

// Phrasings providers use when a log query is over their result or work
// limit. These must narrow the range, never retry as-is.
const CAPACITY_ERROR_PATTERN: &str = "(?i)exceeds max results\
    |more than [0-9,]+ (results|logs)\
    |query returned more than\
    |response size (limit|exceeded)\
    |block range is too (wide|large)\
    |range (too large|is too big|exceeds)\
    |too many logs\
    |query timeout exceeded";

const TRANSIENT_ERROR_PATTERN: &str = "(?i)timeout|timed out\
    |429|too many requests|rate limit\
    |connection (reset|refused|closed)\
    |temporarily unavailable\
    |502|503|bad gateway|service unavailable";

/// Failure kinds at the provider boundary. What the caller can do about a
/// failed log query depends entirely on which kind it is: capacity errors
/// are resolved by narrowing the block range, transient errors by retrying,
/// and fatal errors by neither.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("provider capacity exceeded: {0}")]
    Capacity(String),
    #[error("transient provider error: {0}")]
    Transient(String),
    #[error("provider error: {0}")]
    Fatal(String),
}

/// The query capability the fetcher depends on. Results come back in
/// whatever order the provider returns them.
#[async_trait]
pub trait LogProvider: Send + Sync {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, ProviderError>;
}

#[async_trait]
impl<P: LogProvider + ?Sized> LogProvider for Arc<P> {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, ProviderError> {
        (**self).get_logs(query).await
    }
}

/// JSON-RPC log provider over one or more HTTP endpoints.
///
/// Rotates to the next endpoint on transient failure and retries with
/// exponential backoff; capacity errors are surfaced immediately so the
/// caller can split the range instead of hammering the same query.
#[derive(Clone)]
pub struct RpcClient {
    providers: Vec<AlloyFullProvider>,
    urls: Vec<String>,
    current_provider: Arc<AtomicUsize>,
    max_retries: usize,
    capacity_re: Regex,
    transient_re: Regex,
}

impl RpcClient {
    pub fn new(rpc_urls: &[String]) -> Result<Self> {
        if rpc_urls.is_empty() {
            return Err(anyhow::anyhow!("At least one RPC URL must be provided"));
        }

        let mut providers = Vec::new();
        for url in rpc_urls {
            let parsed_url = url
                .parse()
                .map_err(|_| anyhow::anyhow!("Invalid RPC URL: {}", url))?;
            let provider: AlloyFullProvider = ProviderBuilder::new().connect_http(parsed_url);
            providers.push(provider);
        }

        let capacity_re = Regex::new(CAPACITY_ERROR_PATTERN)
            .map_err(|e| anyhow::anyhow!("Invalid capacity error pattern: {}", e))?;
        let transient_re = Regex::new(TRANSIENT_ERROR_PATTERN)
            .map_err(|e| anyhow::anyhow!("Invalid transient error pattern: {}", e))?;

        Ok(RpcClient {
            providers,
            urls: rpc_urls.to_vec(),
            current_provider: Arc::new(AtomicUsize::new(0)),
            max_retries: 5,
            capacity_re,
            transient_re,
        })
    }

    fn get_provider(&self) -> &AlloyFullProvider {
        let index = self.current_provider.load(Ordering::Relaxed) % self.providers.len();
        &self.providers[index]
    }

    pub fn get_current_url(&self) -> &str {
        let index = self.current_provider.load(Ordering::Relaxed) % self.urls.len();
        &self.urls[index]
    }

    pub fn rotate_provider(&self) {
        let current = self.current_provider.load(Ordering::Relaxed);
        let next = (current + 1) % self.providers.len();
        self.current_provider.store(next, Ordering::Relaxed);

        if self.providers.len() > 1 {
            debug!("Rotating to RPC provider #{}", next);
        }
    }

    fn get_retry_strategy(&self) -> impl Iterator<Item = Duration> {
        ExponentialBackoff::from_millis(100)
            .factor(2)
            .max_delay(Duration::from_secs(10))
            .map(jitter)
            .take(self.max_retries)
    }

    /// Sorts raw RPC error text into the three kinds. Capacity phrasings are
    /// checked first: a "query timeout exceeded" from an over-large range
    /// must split, not retry.
    fn classify(&self, error_str: &str) -> ProviderError {
        if self.capacity_re.is_match(error_str) {
            ProviderError::Capacity(error_str.to_string())
        } else if self.transient_re.is_match(error_str) {
            ProviderError::Transient(error_str.to_string())
        } else {
            ProviderError::Fatal(error_str.to_string())
        }
    }

    fn handle_transient(&self, error_str: &str) {
        let current_url = self.get_current_url();
        warn!(
            "RPC error on {}: {}, rotating provider",
            current_url, error_str
        );
        self.rotate_provider();
    }

    fn handle_timeout(&self) -> ProviderError {
        let current_url = self.get_current_url();
        warn!(
            "Request timeout after {} seconds on {}, rotating provider",
            REQUEST_TIMEOUT.as_secs(),
            current_url
        );
        self.rotate_provider();
        ProviderError::Transient(format!(
            "request timeout after {} seconds",
            REQUEST_TIMEOUT.as_secs()
        ))
    }
}

fn build_filter(query: &LogQuery) -> Filter {
    let mut filter = Filter::new()
        .from_block(query.range.from_block)
        .to_block(query.range.to_block);
    // Topics map positionally onto the query; an unset position matches
    // anything.
    let mut topics = query.topics.iter().copied();
    if let Some(topic0) = topics.next() {
        filter = filter.event_signature(topic0);
    }
    if let Some(topic1) = topics.next() {
        filter = filter.topic1(topic1);
    }
    if let Some(topic2) = topics.next() {
        filter = filter.topic2(topic2);
    }
    if let Some(topic3) = topics.next() {
        filter = filter.topic3(topic3);
    }
    // Absent address clause means all contracts.
    if !query.addresses.is_empty() {
        filter = filter.address(query.addresses.clone());
    }
    filter
}

#[async_trait]
impl LogProvider for RpcClient {
    async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, ProviderError> {
        let client = self.clone();
        let query = query.clone();
        Retry::spawn(self.get_retry_strategy(), move || {
            let client = client.clone();
            let query = query.clone();
            async move {
                let provider = client.get_provider();
                let filter = build_filter(&query);

                match timeout(REQUEST_TIMEOUT, provider.get_logs(&filter)).await {
                    Ok(Ok(logs)) => Ok(Ok(logs)),
                    Ok(Err(e)) => match client.classify(&e.to_string()) {
                        ProviderError::Capacity(msg) => {
                            debug!(
                                "Capacity limit hit for blocks {}-{}, caller will split range",
                                query.range.from_block, query.range.to_block
                            );
                            // hack since we don't want to retry on this specific error
                            Ok(Err(ProviderError::Capacity(msg)))
                        }
                        ProviderError::Transient(msg) => {
                            client.handle_transient(&msg);
                            Err(ProviderError::Transient(msg))
                        }
                        fatal => Ok(Err(fatal)),
                    },
                    Err(_) => Err(client.handle_timeout()),
                }
            }
        })
        .await
        .and_then(|r| r)
    }
}
