// Per-swap state and the receipts each protocol step hands back.

use std::fmt;

use chrono::{DateTime, Utc};
use ethers::types::{Address, H256, U256};
use serde::{Deserialize, Serialize};

use crate::data_structures::Side;
use crate::error::{Result, SwapError};
use crate::escrow::{DstImmutablesComplement, Escrow, EscrowStatus};
use crate::hashlock::{MerkleProof, Secret};
use crate::onchain::Receipt;
use crate::order::SignedOrder;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SwapState {
    Created,
    SrcDeploying,
    SrcDeployed,
    DstDeploying,
    DstDeployed,
    Withdrawing,
    Completed,
    Cancelling,
    Cancelled,
}

impl SwapState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SwapState::Completed | SwapState::Cancelled)
    }

    /// Edges of the deployment phase. Withdraw and cancel settle the state
    /// from the escrows' statuses instead, see [`SwapContext::settled`].
    pub fn can_advance_to(self, next: SwapState) -> bool {
        use SwapState::*;
        matches!(
            (self, next),
            (Created, SrcDeploying)
                | (SrcDeploying, SrcDeployed)
                // nothing locked
                | (SrcDeploying, Cancelled)
                | (SrcDeployed, DstDeploying)
                | (SrcDeployed, Cancelling)
                | (DstDeploying, DstDeployed)
                | (DstDeploying, Cancelling)
                | (DstDeployed, Withdrawing)
                | (DstDeployed, Cancelling)
                | (Withdrawing, Completed)
                | (Withdrawing, Cancelling)
                | (Cancelling, Cancelled)
        )
    }
}

impl fmt::Display for SwapState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SwapState::Created => "created",
            SwapState::SrcDeploying => "src-deploying",
            SwapState::SrcDeployed => "src-deployed",
            SwapState::DstDeploying => "dst-deploying",
            SwapState::DstDeployed => "dst-deployed",
            SwapState::Withdrawing => "withdrawing",
            SwapState::Completed => "completed",
            SwapState::Cancelling => "cancelling",
            SwapState::Cancelled => "cancelled",
        };
        f.write_str(name)
    }
}

/// The secret a withdrawal reveals, with its Merkle proof for multi-fill
/// orders.
#[derive(Clone, Debug)]
pub struct FillSecret {
    pub secret: Secret,
    pub proof: Option<MerkleProof>,
}

impl From<Secret> for FillSecret {
    fn from(secret: Secret) -> Self {
        FillSecret {
            secret,
            proof: None,
        }
    }
}

/// Snapshot of one swap instance. Never mutated in place: each protocol step
/// produces the next snapshot and the registry keeps the latest.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SwapContext {
    pub order_hash: H256,
    pub signed_order: SignedOrder,
    pub fill_amount: U256,
    pub state: SwapState,
    pub src: Option<Escrow>,
    pub dst: Option<Escrow>,
    pub complement: Option<DstImmutablesComplement>,
    /// Set once a withdrawal put the secret on a ledger.
    pub secret_revealed: bool,
    /// Proof for multi-fill orders. Public data, unlike the secret.
    pub proof: Option<MerkleProof>,
    pub notes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SwapContext {
    pub fn new(signed_order: SignedOrder, fill_amount: U256) -> Self {
        let now = Utc::now();
        SwapContext {
            order_hash: signed_order.order_hash(),
            signed_order,
            fill_amount,
            state: SwapState::Created,
            src: None,
            dst: None,
            complement: None,
            secret_revealed: false,
            proof: None,
            notes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    fn touched(mut self) -> Self {
        self.updated_at = Utc::now();
        self
    }

    /// Next snapshot in `next`, if the state machine allows it.
    pub fn advance(&self, next: SwapState, action: &'static str) -> Result<Self> {
        if !self.state.can_advance_to(next) {
            return Err(SwapError::InvalidTransition {
                from: self.state.to_string(),
                action,
            });
        }
        Ok(SwapContext {
            state: next,
            ..self.clone()
        }
        .touched())
    }

    pub fn escrow(&self, side: Side) -> Option<&Escrow> {
        match side {
            Side::Src => self.src.as_ref(),
            Side::Dst => self.dst.as_ref(),
        }
    }

    pub fn require_escrow(&self, side: Side, action: &'static str) -> Result<&Escrow> {
        self.escrow(side).ok_or_else(|| SwapError::InvalidTransition {
            from: format!("{} (no {side} escrow)", self.state),
            action,
        })
    }

    pub fn with_escrow(&self, escrow: Escrow) -> Self {
        let mut next = self.clone();
        match escrow.side {
            Side::Src => next.src = Some(escrow),
            Side::Dst => next.dst = Some(escrow),
        }
        next.touched()
    }

    pub fn with_note(&self, note: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.notes.push(note.into());
        next.touched()
    }

    /// State implied by the escrows once withdraw or cancel touched one:
    /// terminal when every deployed escrow is, otherwise `pending`.
    pub fn settled(&self, pending: SwapState) -> Self {
        let escrows: Vec<&Escrow> = self.src.iter().chain(self.dst.iter()).collect();
        let all_final = !escrows.is_empty() && escrows.iter().all(|e| e.status.is_terminal());
        let state = if !all_final {
            pending
        } else if self.src.as_ref().map(|e| e.status) == Some(EscrowStatus::Withdrawn) {
            SwapState::Completed
        } else {
            SwapState::Cancelled
        };
        SwapContext {
            state,
            ..self.clone()
        }
        .touched()
    }

    /// Escrows still holding funds, destination first.
    pub fn active_escrows(&self) -> Vec<&Escrow> {
        self.dst
            .iter()
            .chain(self.src.iter())
            .filter(|e| e.status == EscrowStatus::Deployed)
            .collect()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SrcDeployReceipt {
    pub receipt: Receipt,
    pub escrow: Escrow,
    pub complement: DstImmutablesComplement,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DstDeployReceipt {
    pub receipt: Receipt,
    pub escrow: Escrow,
}

/// Result of a withdraw. `receipt` is `None` when the escrow had already
/// been withdrawn; that counts as success with a note.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WithdrawReceipt {
    pub side: Side,
    pub escrow: Address,
    pub receipt: Option<Receipt>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CancelReceipt {
    pub side: Side,
    pub escrow: Address,
    pub receipt: Option<Receipt>,
}

/// Tokens swept from an escrow address once the rescue delay passed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RescueReceipt {
    pub side: Side,
    pub escrow: Address,
    pub token: Address,
    pub amount: U256,
    pub receipt: Receipt,
}

// Why a swap ended cancelled
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AbortReason {
    Operator,
    SourceDeployFailed(String),
    DestinationDeployFailed(String),
    WithdrawalFailed(String),
}

impl fmt::Display for AbortReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AbortReason::Operator => f.write_str("aborted by operator"),
            AbortReason::SourceDeployFailed(e) => write!(f, "source deployment failed: {e}"),
            AbortReason::DestinationDeployFailed(e) => write!(f, "destination deployment failed: {e}"),
            AbortReason::WithdrawalFailed(e) => write!(f, "withdrawal failed: {e}"),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SwapOutcome {
    /// Source funds went to the resolver. `dst` is `None` only if the
    /// destination withdrawal could not be confirmed; the maker can still
    /// take it in the public window.
    Completed {
        order_hash: H256,
        src: WithdrawReceipt,
        dst: Option<WithdrawReceipt>,
        notes: Vec<String>,
    },
    Cancelled {
        order_hash: H256,
        reason: AbortReason,
        refunds: Vec<CancelReceipt>,
        notes: Vec<String>,
    },
}

impl SwapOutcome {
    pub fn order_hash(&self) -> H256 {
        match self {
            SwapOutcome::Completed { order_hash, .. } | SwapOutcome::Cancelled { order_hash, .. } => {
                *order_hash
            }
        }
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SwapOutcome::Completed { .. })
    }
}
