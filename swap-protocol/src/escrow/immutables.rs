use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

use crate::data_structures::{ChainId, Timestamp};
use crate::error::{Result, SwapError};
use crate::hashlock::HashLock;
use crate::timelock::TimeLockSchedule;

/// Frozen parameters of one escrow. Two escrows are the same escrow iff their
/// encodings are byte-identical.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscrowImmutables {
    pub order_hash: H256,
    pub hash_lock: HashLock,
    pub maker: Address,
    pub taker: Address,
    pub token: Address,
    pub amount: U256,
    pub safety_deposit: U256,
    pub time_locks: TimeLockSchedule,
    /// Start of this side's clock. `None` until the escrow is deployed.
    pub deployed_at: Option<Timestamp>,
}

impl EscrowImmutables {
    /// ABI encoding of
    /// `(orderHash, hashlock, maker, taker, token, amount, safetyDeposit, timelocks)`
    /// with the deployment time in the packed timelock word.
    ///
    /// Only the 32-byte hash-lock value is encoded, not its kind. A
    /// multiple-fill value keeps its part count in the top two bytes, so the
    /// two kinds only collide on a digest that already looks like a Merkle
    /// tag.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(encode(&[
            Token::FixedBytes(self.order_hash.as_bytes().to_vec()),
            Token::FixedBytes(self.hash_lock.value().as_bytes().to_vec()),
            Token::Address(self.maker),
            Token::Address(self.taker),
            Token::Address(self.token),
            Token::Uint(self.amount),
            Token::Uint(self.safety_deposit),
            Token::Uint(self.packed_time_locks()?),
        ]))
    }

    /// CREATE2 salt of the escrow.
    pub fn hash(&self) -> Result<H256> {
        Ok(H256(keccak256(self.encode()?)))
    }

    pub fn packed_time_locks(&self) -> Result<U256> {
        self.time_locks.pack(self.deployed_at.unwrap_or(0))
    }

    pub fn with_deployed_at(&self, deployed_at: Timestamp) -> Self {
        EscrowImmutables {
            deployed_at: Some(deployed_at),
            ..self.clone()
        }
    }

    pub fn deployed_at(&self) -> Result<Timestamp> {
        self.deployed_at.ok_or_else(|| {
            SwapError::TransactionFailed(format!(
                "escrow for order 0x{} has not been deployed",
                hex::encode(self.order_hash)
            ))
        })
    }

    /// Destination immutables: the source snapshot's commitment and schedule,
    /// the complement's terms, the resolver as taker.
    pub fn for_destination(
        src: &EscrowImmutables,
        complement: &DstImmutablesComplement,
        resolver: Address,
        deployed_at: Timestamp,
    ) -> Self {
        EscrowImmutables {
            order_hash: src.order_hash,
            hash_lock: src.hash_lock,
            maker: complement.maker,
            taker: resolver,
            token: complement.token,
            amount: complement.amount,
            safety_deposit: complement.safety_deposit,
            time_locks: src.time_locks,
            deployed_at: Some(deployed_at),
        }
    }
}

/// Destination terms fixed only once the source escrow is deployed: who
/// receives, how much, of what, and on which chain.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct DstImmutablesComplement {
    pub maker: Address,
    pub amount: U256,
    pub token: Address,
    pub safety_deposit: U256,
    pub chain_id: ChainId,
}
