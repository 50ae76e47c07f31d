use std::fmt;

use ethers::abi::{encode, Token};
use ethers::types::{Address, H256, U256};
use ethers::utils::keccak256;
use serde::{Deserialize, Serialize};

// Ledger identifier (EVM chain id or an agreed number for non-EVM ledgers)
pub type ChainId = u64;

// Seconds since the unix epoch, as reported by a ledger
pub type Timestamp = u64;

/// Which leg of the swap an escrow lives on.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    /// Maker funds are locked here.
    Src,
    /// Resolver funds are locked here.
    Dst,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Side::Src => "src",
            Side::Dst => "dst",
        })
    }
}

/// A time-lock phase. Combined with a [`Side`] it names one of the seven
/// packed offsets.
#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Window {
    Withdrawal,
    PublicWithdrawal,
    Cancellation,
    PublicCancellation,
}

impl Window {
    pub const ALL: [Window; 4] = [
        Window::Withdrawal,
        Window::PublicWithdrawal,
        Window::Cancellation,
        Window::PublicCancellation,
    ];
}

impl fmt::Display for Window {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Window::Withdrawal => "withdrawal",
            Window::PublicWithdrawal => "public-withdrawal",
            Window::Cancellation => "cancellation",
            Window::PublicCancellation => "public-cancellation",
        })
    }
}

/// A resolver allowed to fill an order, and from when.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct WhitelistEntry {
    pub address: Address,
    pub allow_from: Timestamp,
}

/// One step of the auction rate curve.
#[derive(Clone, Debug, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionPoint {
    pub coefficient: u32,
    pub delay: u16,
}

/// Dutch-auction schedule. Opaque to the swap core: it only travels inside
/// the order and is bound into the order hash.
#[derive(Clone, Debug, Default, Hash, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuctionDetails {
    pub start_time: Timestamp,
    pub duration: u64,
    pub initial_rate_bump: u32,
    pub points: Vec<AuctionPoint>,
}

impl AuctionDetails {
    pub fn hash(&self) -> H256 {
        let points = self
            .points
            .iter()
            .map(|p| {
                Token::Tuple(vec![
                    Token::Uint(U256::from(p.coefficient)),
                    Token::Uint(U256::from(p.delay)),
                ])
            })
            .collect();
        H256(keccak256(encode(&[
            Token::Uint(U256::from(self.start_time)),
            Token::Uint(U256::from(self.duration)),
            Token::Uint(U256::from(self.initial_rate_bump)),
            Token::Array(points),
        ])))
    }
}

pub(crate) fn whitelist_hash(whitelist: &[WhitelistEntry]) -> H256 {
    let entries = whitelist
        .iter()
        .map(|w| {
            Token::Tuple(vec![
                Token::Address(w.address),
                Token::Uint(U256::from(w.allow_from)),
            ])
        })
        .collect();
    H256(keccak256(encode(&[Token::Array(entries)])))
}
