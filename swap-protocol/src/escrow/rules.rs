//! Who may withdraw or cancel an escrow, and when.
//!
//! These are the checks a deployed escrow contract enforces. The coordinator
//! runs them as pre-checks before spending a transaction, and the in-memory
//! ledger runs them when it executes the call.
//!
//! Private windows are open to the taker (on the destination side also to the
//! maker receiving the funds); public windows are open to anyone. Withdrawal
//! stays available after cancellation opens, until the escrow is cancelled.
//!
//! Independently of the windows, the taker may rescue any funds left at an
//! escrow address once the ledger's rescue delay has passed since deployment.

use ethers::types::{Address, U256};

use super::immutables::EscrowImmutables;
use super::EscrowStatus;
use crate::data_structures::{Side, Timestamp, Window};
use crate::error::{Result, SwapError};
use crate::hashlock::{MerkleProof, Secret};

/// Funds moved by a successful withdraw or cancel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Payout {
    pub recipient: Address,
    pub token: Address,
    pub amount: U256,
    /// The safety deposit rewards whoever executed the call.
    pub deposit_recipient: Address,
    pub safety_deposit: U256,
}

fn is_privileged(side: Side, immutables: &EscrowImmutables, caller: Address) -> bool {
    caller == immutables.taker || (side == Side::Dst && caller == immutables.maker)
}

// Picks the private or the public window depending on who calls, and checks
// it is open.
fn authorize(
    side: Side,
    immutables: &EscrowImmutables,
    caller: Address,
    now: Timestamp,
    private: Window,
    public: Option<Window>,
) -> Result<Window> {
    let deployed_at = immutables.deployed_at()?;
    let window = if is_privileged(side, immutables, caller) {
        private
    } else {
        public.ok_or_else(|| {
            SwapError::TransactionFailed(format!(
                "{caller:?} may not {private} the {side} escrow"
            ))
        })?
    };
    let schedule = &immutables.time_locks;
    if !schedule.elapsed(side, window, deployed_at, now) {
        return Err(SwapError::TimelockNotElapsed {
            side,
            window,
            remaining: schedule.remaining(side, window, deployed_at, now)?,
        });
    }
    Ok(window)
}

/// Returns the window under which `caller` may withdraw at `now`.
pub fn authorize_withdraw(
    side: Side,
    immutables: &EscrowImmutables,
    caller: Address,
    now: Timestamp,
) -> Result<Window> {
    authorize(
        side,
        immutables,
        caller,
        now,
        Window::Withdrawal,
        Some(Window::PublicWithdrawal),
    )
}

/// Returns the window under which `caller` may cancel at `now`. The
/// destination side only has a private cancellation.
pub fn authorize_cancel(
    side: Side,
    immutables: &EscrowImmutables,
    caller: Address,
    now: Timestamp,
) -> Result<Window> {
    let public = match side {
        Side::Src => Some(Window::PublicCancellation),
        Side::Dst => None,
    };
    // The maker receives cancelled destination funds only indirectly; it has
    // no cancel right there.
    if side == Side::Dst && caller != immutables.taker {
        return Err(SwapError::TransactionFailed(format!(
            "{caller:?} may not cancel the dst escrow"
        )));
    }
    authorize(side, immutables, caller, now, Window::Cancellation, public)
}

/// Rescue sweeps tokens stuck at `escrow`. Taker only, and only once
/// `rescue_delay` seconds have passed since deployment. The escrow's status
/// does not matter.
pub fn authorize_rescue(
    escrow: Address,
    immutables: &EscrowImmutables,
    caller: Address,
    now: Timestamp,
    rescue_delay: u64,
) -> Result<()> {
    if caller != immutables.taker {
        return Err(SwapError::TransactionFailed(format!(
            "{caller:?} may not rescue funds from {escrow:?}"
        )));
    }
    let unlocks_at = immutables.deployed_at()?.saturating_add(rescue_delay);
    if now < unlocks_at {
        return Err(SwapError::RescueLocked {
            escrow,
            remaining: unlocks_at - now,
        });
    }
    Ok(())
}

pub fn ensure_active(escrow: Address, status: EscrowStatus) -> Result<()> {
    match status {
        EscrowStatus::Deployed => Ok(()),
        EscrowStatus::Undeployed => Err(SwapError::TransactionFailed(format!(
            "escrow {escrow:?} is not deployed"
        ))),
        terminal => Err(SwapError::AlreadyFinalized {
            escrow,
            status: terminal,
        }),
    }
}

pub fn verify_secret(
    immutables: &EscrowImmutables,
    secret: &Secret,
    proof: Option<&MerkleProof>,
) -> Result<()> {
    if immutables.hash_lock.verify(secret, proof) {
        Ok(())
    } else {
        Err(SwapError::HashMismatch)
    }
}

/// Source withdrawals pay the taker, destination withdrawals the maker.
pub fn withdraw_payout(side: Side, immutables: &EscrowImmutables, caller: Address) -> Payout {
    let recipient = match side {
        Side::Src => immutables.taker,
        Side::Dst => immutables.maker,
    };
    payout(immutables, recipient, caller)
}

/// Cancellation returns funds to whoever deposited them.
pub fn cancel_payout(side: Side, immutables: &EscrowImmutables, caller: Address) -> Payout {
    let recipient = match side {
        Side::Src => immutables.maker,
        Side::Dst => immutables.taker,
    };
    payout(immutables, recipient, caller)
}

fn payout(immutables: &EscrowImmutables, recipient: Address, caller: Address) -> Payout {
    Payout {
        recipient,
        token: immutables.token,
        amount: immutables.amount,
        deposit_recipient: caller,
        safety_deposit: immutables.safety_deposit,
    }
}
