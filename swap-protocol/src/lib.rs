//! Hash-time-locked atomic swaps between two ledgers.
//!
//! A maker signs an [`order::Order`] committing to a secret's hash. A
//! resolver, driven by [`cross_chain::SwapCoordinator`], locks the maker's
//! funds in a source escrow and its own in a destination escrow, then reveals
//! the secret to withdraw both legs. Either both legs settle or both refund
//! after their time-locks.

pub mod config;
pub mod cross_chain;
pub mod data_structures;
pub mod error;
pub mod escrow;
pub mod hashlock;
pub mod onchain;
pub mod order;
pub mod timelock;

pub mod test_utils;

pub use config::SwapConfig;
pub use cross_chain::{SwapCoordinator, SwapOutcome, SwapState};
pub use error::{Result, SwapError};
