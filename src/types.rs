use alloy_primitives::{Address, B256, U256};
use serde::Serialize;

/// Closed interval of block numbers.
///
/// An inverted range (`from_block > to_block`) is a valid empty range and
/// short-circuits everywhere without touching the provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub from_block: u64,
    pub to_block: u64,
}

impl BlockRange {
    pub fn new(from_block: u64, to_block: u64) -> Self {
        BlockRange {
            from_block,
            to_block,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.from_block > self.to_block
    }

    pub fn len(&self) -> u64 {
        if self.is_empty() {
            0
        } else {
            self.to_block - self.from_block + 1
        }
    }

    /// Splits the range into `[from, mid]` and `[mid + 1, to]`.
    ///
    /// The caller must not split an empty or single-block range.
    pub fn split(&self) -> (BlockRange, BlockRange) {
        let mid = self.from_block + (self.to_block - self.from_block) / 2;
        (
            BlockRange::new(self.from_block, mid),
            BlockRange::new(mid + 1, self.to_block),
        )
    }
}

/// A log query as handed to the provider: a block range, an ordered topic
/// list, and an optional contract address filter (empty = all contracts).
#[derive(Debug, Clone)]
pub struct LogQuery {
    pub range: BlockRange,
    pub topics: Vec<B256>,
    pub addresses: Vec<Address>,
}

impl LogQuery {
    /// Same topics and addresses over a different block range.
    pub fn with_range(&self, range: BlockRange) -> Self {
        LogQuery {
            range,
            topics: self.topics.clone(),
            addresses: self.addresses.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenTransfer {
    pub token_address: Address,
    pub from_address: Address,
    pub to_address: Address,
    pub value: U256,
    pub transaction_hash: B256,
    pub log_index: u64,
    pub block_number: u64,
}

/// The sink-facing shape of a transfer, with the amount as a decimal string.
///
/// Addresses and hashes are 0x-prefixed lowercase hex, not EIP-55
/// checksummed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransferRecord {
    pub token_address: String,
    pub from_address: String,
    pub to_address: String,
    pub value: String,
    pub transaction_hash: String,
    pub log_index: u64,
    pub block_number: u64,
}

impl From<&TokenTransfer> for TransferRecord {
    fn from(transfer: &TokenTransfer) -> Self {
        TransferRecord {
            token_address: format!("{:?}", transfer.token_address),
            from_address: format!("{:?}", transfer.from_address),
            to_address: format!("{:?}", transfer.to_address),
            value: transfer.value.to_string(),
            transaction_hash: format!("{:?}", transfer.transaction_hash),
            log_index: transfer.log_index,
            block_number: transfer.block_number,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_is_exhaustive_and_ordered() {
        let (lower, upper) = BlockRange::new(10, 20).split();
        assert_eq!(lower, BlockRange::new(10, 15));
        assert_eq!(upper, BlockRange::new(16, 20));
    }

    #[test]
    fn split_of_two_blocks_yields_singletons() {
        let (lower, upper) = BlockRange::new(7, 8).split();
        assert_eq!(lower, BlockRange::new(7, 7));
        assert_eq!(upper, BlockRange::new(8, 8));
    }

    #[test]
    fn inverted_range_is_empty() {
        let range = BlockRange::new(100, 99);
        assert!(range.is_empty());
        assert_eq!(range.len(), 0);
        assert_eq!(BlockRange::new(5, 5).len(), 1);
    }

    #[test]
    fn record_value_is_decimal_string() {
        let transfer = TokenTransfer {
            token_address: Address::ZERO,
            from_address: Address::ZERO,
            to_address: Address::ZERO,
            value: U256::from(1_000_000_000_000_000_000u64),
            transaction_hash: B256::ZERO,
            log_index: 3,
            block_number: 42,
        };
        let record = TransferRecord::from(&transfer);
        assert_eq!(record.value, "1000000000000000000");
        assert_eq!(record.block_number, 42);
    }

    #[test]
    fn record_addresses_are_lowercase_hex() {
        let token = Address::repeat_byte(0xAB);
        let transfer = TokenTransfer {
            token_address: token,
            from_address: Address::ZERO,
            to_address: Address::ZERO,
            value: U256::from(1u64),
            transaction_hash: B256::repeat_byte(0xCD),
            log_index: 0,
            block_number: 1,
        };
        let record = TransferRecord::from(&transfer);
        assert_eq!(record.token_address, format!("0x{}", "ab".repeat(20)));
        assert_eq!(record.transaction_hash, format!("0x{}", "cd".repeat(32)));
    }
}
