use ethers::types::{Address, H256};
use thiserror::Error;

use crate::data_structures::{Side, Timestamp, Window};
use crate::escrow::EscrowStatus;

pub type Result<T> = std::result::Result<T, SwapError>;

/// Every failure the swap core can surface.
///
/// Validation errors (`InvalidOrder`, `InvalidSecretLength`, ...) are raised
/// before any ledger is touched. Ledger errors come back through a
/// [`ChainAdapter`](crate::onchain::ChainAdapter) and are classified by
/// [`SwapError::is_retryable`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SwapError {
    #[error("invalid order: {reason}")]
    InvalidOrder { reason: String },

    #[error("invalid fill: {reason}")]
    InvalidFill { reason: String },

    #[error("secret must be {expected} bytes, got {actual}")]
    InvalidSecretLength { expected: usize, actual: usize },

    #[error("multiple-fill hash-lock needs at least one secret")]
    EmptyFillSet,

    #[error("{side} time-locks are not monotonic: {earlier} ({earlier_offset}s) > {later} ({later_offset}s)")]
    NonMonotonicWindow {
        side: Side,
        earlier: Window,
        earlier_offset: u32,
        later: Window,
        later_offset: u32,
    },

    #[error("{side} side has no {window} window")]
    UnsupportedWindow { side: Side, window: Window },

    #[error("deployment time {deployed_at} does not fit the 32-bit time-lock slot")]
    DeploymentTimeOverflow { deployed_at: Timestamp },

    #[error("secret does not match the hash-lock")]
    HashMismatch,

    #[error("{side} {window} window opens in {remaining}s")]
    TimelockNotElapsed {
        side: Side,
        window: Window,
        remaining: u64,
    },

    #[error("{side} {window} window is already open, action no longer allowed")]
    TimelockExpired { side: Side, window: Window },

    #[error("rescue of escrow {escrow:?} unlocks in {remaining}s")]
    RescueLocked { escrow: Address, remaining: u64 },

    #[error("deploy event not found in block {block}")]
    EventNotFound { block: String },

    #[error("escrow deployment failed: {reason}")]
    DeploymentFailed { reason: String },

    #[error("chain unavailable: {0}")]
    ChainUnavailable(String),

    #[error("transaction failed: {0}")]
    TransactionFailed(String),

    #[error("escrow {escrow:?} already finalized ({status})")]
    AlreadyFinalized { escrow: Address, status: EscrowStatus },

    #[error("unknown swap 0x{}", hex::encode(.0))]
    UnknownSwap(H256),

    #[error("cannot {action} while swap is {from}")]
    InvalidTransition { from: String, action: &'static str },

    #[error("swap aborted by operator")]
    Aborted,

    #[error("signing error: {0}")]
    Signing(String),

    #[error("config error: {0}")]
    Config(String),
}

impl SwapError {
    /// Adapter-level failures that may succeed if the same call is repeated
    /// after a backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::ChainUnavailable(_) | Self::EventNotFound { .. } | Self::DeploymentFailed { .. }
        )
    }

    /// The effect already happened on-chain; callers treat this as success
    /// with a note.
    pub fn is_already_finalized(&self) -> bool {
        matches!(self, Self::AlreadyFinalized { .. })
    }

    pub(crate) fn invalid_order(reason: impl Into<String>) -> Self {
        Self::InvalidOrder {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_fill(reason: impl Into<String>) -> Self {
        Self::InvalidFill {
            reason: reason.into(),
        }
    }
}

impl From<ethers::signers::WalletError> for SwapError {
    fn from(value: ethers::signers::WalletError) -> Self {
        Self::Signing(value.to_string())
    }
}

impl From<ethers::types::SignatureError> for SwapError {
    fn from(value: ethers::types::SignatureError) -> Self {
        Self::Signing(value.to_string())
    }
}

impl From<serde_json::Error> for SwapError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_classification() {
        assert!(SwapError::ChainUnavailable("rpc down".into()).is_retryable());
        assert!(SwapError::EventNotFound { block: "0x01".into() }.is_retryable());
        assert!(SwapError::DeploymentFailed { reason: "reverted".into() }.is_retryable());

        assert!(!SwapError::HashMismatch.is_retryable());
        assert!(!SwapError::invalid_order("zero amount").is_retryable());
        assert!(!SwapError::TimelockNotElapsed {
            side: Side::Src,
            window: Window::Withdrawal,
            remaining: 3,
        }
        .is_retryable());
    }

    #[test]
    fn already_finalized_is_flagged() {
        let err = SwapError::AlreadyFinalized {
            escrow: Address::zero(),
            status: EscrowStatus::Withdrawn,
        };
        assert!(err.is_already_finalized());
        assert!(!err.is_retryable());
    }

    #[test]
    fn messages_never_carry_secret_material() {
        let msg = SwapError::HashMismatch.to_string();
        assert_eq!(msg, "secret does not match the hash-lock");
    }
}
