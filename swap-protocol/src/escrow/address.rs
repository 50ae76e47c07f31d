// Deterministic escrow addresses. Every escrow is an EIP-1167 minimal proxy
// over a per-side implementation, deployed by the factory with CREATE2 and
// the immutables hash as salt. The salt covers the ledger-stamped deployment
// time, so an address is only final once the deploying block is known.

use ethers::types::{Address, H256};
use ethers::utils::{get_create2_address_from_hash, keccak256};

use super::immutables::{DstImmutablesComplement, EscrowImmutables};
use crate::data_structures::Timestamp;
use crate::error::Result;

const PROXY_PREFIX: [u8; 20] = [
    0x3d, 0x60, 0x2d, 0x80, 0x60, 0x0a, 0x3d, 0x39, 0x81, 0xf3, 0x36, 0x3d, 0x3d, 0x37, 0x3d, 0x3d,
    0x3d, 0x36, 0x3d, 0x73,
];
const PROXY_SUFFIX: [u8; 15] = [
    0x5a, 0xf4, 0x3d, 0x82, 0x80, 0x3e, 0x90, 0x3d, 0x91, 0x60, 0x2b, 0x57, 0xfd, 0x5b, 0xf3,
];

/// keccak256 of the minimal-proxy creation code pointing at `implementation`.
pub fn proxy_bytecode_hash(implementation: Address) -> H256 {
    let mut code = Vec::with_capacity(PROXY_PREFIX.len() + 20 + PROXY_SUFFIX.len());
    code.extend_from_slice(&PROXY_PREFIX);
    code.extend_from_slice(implementation.as_bytes());
    code.extend_from_slice(&PROXY_SUFFIX);
    H256(keccak256(code))
}

/// CREATE2 address of the escrow `factory` deploys for `immutables`.
///
/// `immutables.deployed_at` is part of the salt and is set by the ledger to
/// the deploying block's timestamp. To predict the address before deploying,
/// stamp a candidate block time with
/// [`EscrowImmutables::with_deployed_at`]; the prediction holds only if the
/// transaction lands in a block with exactly that timestamp. After deployment
/// the coordinator re-derives from the event's immutables and compares.
pub fn derive_source_address(
    immutables: &EscrowImmutables,
    src_implementation: Address,
    factory: Address,
) -> Result<Address> {
    Ok(get_create2_address_from_hash(
        factory,
        immutables.hash()?,
        proxy_bytecode_hash(src_implementation),
    ))
}

pub fn derive_destination_address(
    src_immutables: &EscrowImmutables,
    complement: &DstImmutablesComplement,
    deployed_at: Timestamp,
    resolver: Address,
    dst_implementation: Address,
    factory: Address,
) -> Result<Address> {
    let dst = EscrowImmutables::for_destination(src_immutables, complement, resolver, deployed_at);
    derive_source_address(&dst, dst_implementation, factory)
}
