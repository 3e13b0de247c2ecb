//! Fault-injection hooks for resilience testing.
//!
//! When configured, every N-th mined block has its outgoing broadcast
//! copy corrupted so receivers exercise their rejection paths. The local
//! chain stays intact, except for the `chain` mode, which deliberately
//! rewrites a historical block on the sender and leaves it corrupted.

use crate::blockchain::Blockchain;
use crate::config::{FaultConfig, TamperType};
use crate::types::Block;

/// Whether the N-th mined block should be broadcast at all.
pub(crate) fn should_broadcast(faults: &FaultConfig, mined_count: u64) -> bool {
    match faults.broadcast_freq {
        None | Some(0) => true,
        Some(freq) => mined_count % freq == 0,
    }
}

/// Whether the N-th mined block's broadcast should be tampered.
pub(crate) fn should_tamper(faults: &FaultConfig, mined_count: u64) -> bool {
    match faults.tamper_freq {
        None | Some(0) => false,
        Some(freq) => mined_count % freq == 0,
    }
}

/// Corrupts the outgoing copy of a block according to the configured
/// tamper type. The `chain` mode is handled separately via
/// [`corrupt_history`], because it targets the local chain instead.
pub(crate) fn corrupt_outgoing(tamper_type: TamperType, block: &mut Block) {
    match tamper_type {
        TamperType::Hash => flip_last_char(&mut block.hash.0),
        TamperType::PrevHash => flip_last_char(&mut block.prev_hash),
        TamperType::TxnData => {
            if let Some(txn) = block.txns.first_mut() {
                // Any field change invalidates both the signature and
                // the block hash at the receiver.
                txn.timestamp += 1.0;
            }
        }
        TamperType::Chain => {}
    }
}

/// `chain` tamper mode: permanently corrupts a block in the middle of
/// the sender's own chain. Returns the corrupted index, if any.
pub(crate) fn corrupt_history(chain: &mut Blockchain) -> Option<usize> {
    if chain.is_empty() {
        return None;
    }
    let target = chain.len() / 2;
    let block = &mut chain.blocks_mut()[target];
    if let Some(txn) = block.txns.first_mut() {
        txn.timestamp += 1.0;
    } else {
        flip_last_char(&mut block.prev_hash);
    }
    Some(target)
}

/// Flips the final character of a hex string so the value stays the same
/// length but no longer matches.
fn flip_last_char(value: &mut String) {
    match value.pop() {
        Some('0') => value.push('1'),
        Some(_) => value.push('0'),
        None => value.push('0'),
    }
}
