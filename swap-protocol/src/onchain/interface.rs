use async_trait::async_trait;
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::data_structures::{ChainId, Side, Timestamp};
use crate::error::Result;
use crate::escrow::{DstImmutablesComplement, EscrowImmutables, EscrowStatus};
use crate::hashlock::{MerkleProof, Secret};
use crate::order::SignedOrder;

/// Asset id of a ledger's native currency, used for safety deposits.
pub const NATIVE_ASSET: Address = Address::zero();

/// A mined block, as far as the coordinator cares.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub number: u64,
    pub hash: H256,
}

impl std::fmt::Display for BlockRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{} (0x{})", self.number, hex::encode(self.hash))
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_hash: H256,
    pub block: BlockRef,
    /// Ledger time of the including block.
    pub timestamp: Timestamp,
    pub success: bool,
    pub revert_reason: Option<String>,
}

/// What the coordinator wants a ledger to do. Ledger-specific encoding is the
/// adapter's business.
#[derive(Clone, Debug)]
pub enum TransactionIntent {
    /// Fill the maker's order and lock `fill_amount` of the maker asset plus
    /// the resolver's safety deposit in a fresh source escrow.
    DeploySrc {
        order: SignedOrder,
        fill_amount: U256,
    },
    /// Lock resolver funds in the destination escrow. The ledger stamps
    /// `deployed_at`; the escrow must become cancellable no later than
    /// `src_cancellation`.
    DeployDst {
        immutables: EscrowImmutables,
        src_cancellation: Timestamp,
    },
    Withdraw {
        side: Side,
        escrow: Address,
        immutables: EscrowImmutables,
        secret: Secret,
        proof: Option<MerkleProof>,
    },
    Cancel {
        side: Side,
        escrow: Address,
        immutables: EscrowImmutables,
    },
    /// Sweep `amount` of `token` held at `escrow` to the caller. Open to the
    /// taker once the ledger's rescue delay has passed.
    Rescue {
        side: Side,
        escrow: Address,
        immutables: EscrowImmutables,
        token: Address,
        amount: U256,
    },
}

impl TransactionIntent {
    pub fn name(&self) -> &'static str {
        match self {
            TransactionIntent::DeploySrc { .. } => "deploy-src",
            TransactionIntent::DeployDst { .. } => "deploy-dst",
            TransactionIntent::Withdraw { .. } => "withdraw",
            TransactionIntent::Cancel { .. } => "cancel",
            TransactionIntent::Rescue { .. } => "rescue",
        }
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeployEventKind {
    SrcEscrowCreated,
    DstEscrowCreated,
}

/// A factory's escrow-creation event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployEvent {
    pub kind: DeployEventKind,
    pub escrow: Address,
    pub immutables: EscrowImmutables,
    /// Only on `SrcEscrowCreated`: the terms seeding the destination escrow.
    pub complement: Option<DstImmutablesComplement>,
}

/// One ledger, as seen by the coordinator. One instance per side.
#[async_trait]
pub trait ChainAdapter: Send + Sync {
    fn chain_id(&self) -> ChainId;

    /// The account this adapter signs transactions as.
    fn account(&self) -> Address;

    /// Fails with `ChainUnavailable` when the ledger cannot be reached and
    /// `TransactionFailed` (or a decoded escrow error) when the call is
    /// rejected. A mined but reverted transaction returns a receipt with
    /// `success == false`.
    async fn submit(&self, intent: TransactionIntent) -> Result<Receipt>;

    async fn await_confirmation(&self, tx_hash: H256, confirmations: u64) -> Result<Receipt>;

    /// Finds the `kind` event for `order_hash` in `block`. Fails with
    /// `EventNotFound`.
    async fn parse_deploy_event(
        &self,
        block: &BlockRef,
        kind: DeployEventKind,
        order_hash: H256,
    ) -> Result<DeployEvent>;

    async fn current_time(&self) -> Result<Timestamp>;

    async fn query_balance(&self, asset: Address, account: Address) -> Result<U256>;

    async fn escrow_status(&self, escrow: Address) -> Result<EscrowStatus>;

    /// The secret a withdrawal published on this ledger, if any.
    async fn revealed_secret(&self, escrow: Address) -> Result<Option<Secret>>;
}
