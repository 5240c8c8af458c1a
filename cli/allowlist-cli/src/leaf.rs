//! Claim leaf encoding.
//!
//! A leaf commits to `(index, account, amount)` packed exactly as Solidity's
//! `abi.encodePacked(uint256 index, address account, uint256 amount)`:
//!
//! ```text
//! [ index: 32 bytes BE ][ account: 20 bytes ][ amount: 32 bytes BE ]
//! ```
//!
//! The leaf hash is Keccak256 over those 84 bytes, which is what Merkle
//! distributor contracts recompute on claim.

use crate::address::Address;
use crate::common::{keccak256, Hash};
use crate::error::{Error, Result};

pub const LEAF_LEN: usize = 32 + 20 + 32;

/// Packs a claim into its 84-byte preimage.
pub fn leaf_preimage(index: u64, address: &Address, amount: u128) -> [u8; LEAF_LEN] {
    let mut buf = [0u8; LEAF_LEN];
    buf[24..32].copy_from_slice(&index.to_be_bytes());
    buf[32..52].copy_from_slice(address.as_bytes());
    buf[68..84].copy_from_slice(&amount.to_be_bytes());
    buf
}

/// Hashes a claim into its Merkle leaf.
pub fn encode_leaf(index: u64, address: &Address, amount: u128) -> Hash {
    keccak256(leaf_preimage(index, address, amount))
}

/// Parses a base-10 amount.
///
/// # Errors
/// `InvalidEntitlement` for empty or non-digit input, `AmountOverflow` if the
/// value does not fit in 128 bits. The leaf encodes a `uint256`, so this is
/// the service's limit rather than the chain's.
pub fn parse_amount(text: &str) -> Result<u128> {
    let digits = text.trim();
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(Error::InvalidEntitlement(format!(
            "amount '{digits}' is not a non-negative integer"
        )));
    }
    digits.bytes().try_fold(0u128, |acc, b| {
        acc.checked_mul(10)
            .and_then(|v| v.checked_add(u128::from(b - b'0')))
            .ok_or_else(|| Error::AmountOverflow(format!(
                "{digits} exceeds the service limit of 2^128 - 1 (leaf field is uint256)"
            )))
    })
}
