use crate::provider::{LogProvider, ProviderError};
use crate::types::LogQuery;
use alloy::rpc::types::Log;
use tracing::{debug, warn};

/// What a range fetch produced: every log the provider could serve, plus the
/// blocks it could not serve even when queried alone. Dropped blocks are
/// accepted loss, surfaced here so callers can count and report it.
#[derive(Debug, Default)]
pub struct FetchOutcome {
    pub logs: Vec<Log>,
    pub dropped_blocks: Vec<u64>,
}

/// Fetches logs over a block range, adaptively narrowing the range whenever
/// the provider signals the result set is over its limit.
///
/// Providers cap the number of log entries (or the work) per request without
/// advertising the cap; binary search over the block axis finds serviceable
/// sub-ranges without knowing the limit up front.
pub struct RangeFetcher<P> {
    provider: P,
}

impl<P: LogProvider> RangeFetcher<P> {
    pub fn new(provider: P) -> Self {
        RangeFetcher { provider }
    }

    /// Returns all logs matching `query`.
    ///
    /// An inverted range yields an empty outcome with no provider call. On a
    /// capacity error the range is split at its midpoint and both halves are
    /// queried with topics and addresses unchanged; a single block that
    /// still fails is dropped and recorded. Transient errors are already
    /// retried inside the provider, so anything other than a capacity error
    /// propagates as-is.
    pub async fn fetch(&self, query: &LogQuery) -> Result<FetchOutcome, ProviderError> {
        let mut outcome = FetchOutcome::default();
        if query.range.is_empty() {
            return Ok(outcome);
        }

        // Explicit worklist instead of recursion. The lower half is pushed
        // last so blocks are visited in ascending order.
        let mut pending = vec![query.range];
        while let Some(range) = pending.pop() {
            match self.provider.get_logs(&query.with_range(range)).await {
                Ok(logs) => outcome.logs.extend(logs),
                Err(ProviderError::Capacity(msg)) => {
                    if range.from_block == range.to_block {
                        warn!(
                            "Dropping block {}: provider cannot serve it even alone: {}",
                            range.from_block, msg
                        );
                        outcome.dropped_blocks.push(range.from_block);
                    } else {
                        let (lower, upper) = range.split();
                        debug!(
                            "Splitting blocks {}-{} at {}",
                            range.from_block, range.to_block, lower.to_block
                        );
                        pending.push(upper);
                        pending.push(lower);
                    }
                }
                Err(e) => return Err(e),
            }
        }
        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::BlockRange;
    use alloy_primitives::{Address, B256, LogData};
    use async_trait::async_trait;
    use std::collections::BTreeMap;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn raw_log(block: u64) -> Log {
        Log {
            inner: alloy_primitives::Log {
                address: Address::ZERO,
                data: LogData::new_unchecked(vec![B256::ZERO], Default::default()),
            },
            block_hash: None,
            block_number: Some(block),
            block_timestamp: None,
            transaction_hash: Some(B256::ZERO),
            transaction_index: Some(0),
            log_index: Some(0),
            removed: false,
        }
    }

    /// Serves logs per block; any queried range wider than `max_range_width`
    /// or containing a poisoned block fails with a capacity error.
    struct ScriptedProvider {
        logs: BTreeMap<u64, Vec<Log>>,
        max_range_width: u64,
        poisoned_blocks: Vec<u64>,
        calls: AtomicUsize,
        queried_ranges: Mutex<Vec<(u64, u64)>>,
    }

    impl ScriptedProvider {
        fn new(max_range_width: u64) -> Self {
            ScriptedProvider {
                logs: BTreeMap::new(),
                max_range_width,
                poisoned_blocks: Vec::new(),
                calls: AtomicUsize::new(0),
                queried_ranges: Mutex::new(Vec::new()),
            }
        }

        fn with_log_at(mut self, block: u64) -> Self {
            self.logs.entry(block).or_default().push(raw_log(block));
            self
        }

        fn with_poisoned_block(mut self, block: u64) -> Self {
            self.poisoned_blocks.push(block);
            self
        }
    }

    #[async_trait]
    impl LogProvider for ScriptedProvider {
        async fn get_logs(&self, query: &LogQuery) -> Result<Vec<Log>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (from, to) = (query.range.from_block, query.range.to_block);
            self.queried_ranges.lock().unwrap().push((from, to));
            if to - from + 1 > self.max_range_width {
                return Err(ProviderError::Capacity("exceeds max results".into()));
            }
            if self.poisoned_blocks.iter().any(|b| (from..=to).contains(b)) {
                return Err(ProviderError::Capacity("exceeds max results".into()));
            }
            Ok((from..=to)
                .flat_map(|b| self.logs.get(&b).cloned().unwrap_or_default())
                .collect())
        }
    }

    fn query(from: u64, to: u64) -> LogQuery {
        LogQuery {
            range: BlockRange::new(from, to),
            topics: vec![B256::ZERO],
            addresses: vec![],
        }
    }

    #[tokio::test]
    async fn passthrough_when_provider_succeeds() {
        let provider = ScriptedProvider::new(u64::MAX)
            .with_log_at(10)
            .with_log_at(12);
        let fetcher = RangeFetcher::new(provider);

        let outcome = fetcher.fetch(&query(10, 19)).await.unwrap();
        assert_eq!(outcome.logs.len(), 2);
        assert!(outcome.dropped_blocks.is_empty());
        assert_eq!(fetcher.provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn inverted_range_issues_no_query() {
        let fetcher = RangeFetcher::new(ScriptedProvider::new(u64::MAX));
        let outcome = fetcher.fetch(&query(100, 99)).await.unwrap();
        assert!(outcome.logs.is_empty());
        assert_eq!(fetcher.provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bisection_recovers_all_logs_in_order() {
        // Width 8 fails, every narrower range succeeds.
        let mut provider = ScriptedProvider::new(7);
        for block in 0..8 {
            provider = provider.with_log_at(block);
        }
        let fetcher = RangeFetcher::new(provider);

        let outcome = fetcher.fetch(&query(0, 7)).await.unwrap();
        let blocks: Vec<u64> = outcome.logs.iter().filter_map(|l| l.block_number).collect();
        assert_eq!(blocks, vec![0, 1, 2, 3, 4, 5, 6, 7]);
        assert!(outcome.dropped_blocks.is_empty());
        // One failed query plus two successful halves.
        assert_eq!(fetcher.provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn unservable_single_block_is_dropped_not_fatal() {
        let provider = ScriptedProvider::new(u64::MAX)
            .with_log_at(2001)
            .with_poisoned_block(2000);
        let fetcher = RangeFetcher::new(provider);

        let outcome = fetcher.fetch(&query(1998, 2002)).await.unwrap();
        assert_eq!(outcome.dropped_blocks, vec![2000]);
        let blocks: Vec<u64> = outcome.logs.iter().filter_map(|l| l.block_number).collect();
        assert_eq!(blocks, vec![2001]);
    }

    #[tokio::test]
    async fn bisection_always_splits_at_midpoint() {
        let provider = ScriptedProvider::new(u64::MAX).with_poisoned_block(5);
        let fetcher = RangeFetcher::new(provider);

        fetcher.fetch(&query(0, 7)).await.unwrap();
        let ranges = fetcher.provider.queried_ranges.lock().unwrap().clone();
        // [0,7] -> [0,3] + [4,7]; [4,7] -> [4,5] + [6,7]; [4,5] -> [4,4] + [5,5].
        assert_eq!(
            ranges,
            vec![
                (0, 7),
                (0, 3),
                (4, 7),
                (4, 5),
                (4, 4),
                (5, 5),
                (6, 7)
            ]
        );
    }

    #[tokio::test]
    async fn non_capacity_errors_propagate() {
        struct FatalProvider;

        #[async_trait]
        impl LogProvider for FatalProvider {
            async fn get_logs(&self, _query: &LogQuery) -> Result<Vec<Log>, ProviderError> {
                Err(ProviderError::Fatal("method not supported".into()))
            }
        }

        let fetcher = RangeFetcher::new(FatalProvider);
        let err = fetcher.fetch(&query(0, 10)).await.unwrap_err();
        assert!(matches!(err, ProviderError::Fatal(_)));
    }
}
