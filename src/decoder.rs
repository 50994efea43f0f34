use crate::types::TokenTransfer;
use alloy::rpc::types::Log;
use alloy::sol;
use alloy::sol_types::SolEvent;
use alloy_primitives::B256;

sol! {
    event Transfer(address indexed from, address indexed to, uint256 value);
}

/// keccak256("Transfer(address,address,uint256)")
pub const TRANSFER_EVENT_TOPIC: B256 = Transfer::SIGNATURE_HASH;

/// Decodes one raw log into a [`TokenTransfer`], or `None` if the log is not
/// a standard indexed ERC20 transfer.
///
/// Matching logs have the transfer signature as topic0, exactly two indexed
/// address topics, and a single 32-byte data word holding the amount as a
/// big-endian unsigned integer. Anything else is skipped, not an error;
/// non-standard transfer variants are out of scope here.
pub fn decode_transfer(log: &Log) -> Option<TokenTransfer> {
    let topics = log.topics();
    if topics.first() != Some(&TRANSFER_EVENT_TOPIC) {
        return None;
    }
    if topics.len() != 3 || log.data().data.len() != 32 {
        return None;
    }
    let event = Transfer::decode_raw_log(topics, &log.data().data).ok()?;
    Some(TokenTransfer {
        // The emitting contract is the token, not any topic.
        token_address: log.address(),
        from_address: event.from,
        to_address: event.to,
        value: event.value,
        transaction_hash: log.transaction_hash?,
        log_index: log.log_index?,
        block_number: log.block_number?,
    })
}
