// Deterministic fixtures shared by the unit tests and the scenario tests
// under tests/.

use std::sync::Arc;
use std::time::Duration;

use ethers::signers::{LocalWallet, Signer};
use ethers::types::{Address, H256, U256};

use crate::config::{RetryPolicy, SwapConfig};
use crate::cross_chain::SwapCoordinator;
use crate::data_structures::{AuctionDetails, Side, Timestamp, WhitelistEntry};
use crate::escrow::EscrowImmutables;
use crate::hashlock::{HashLock, Secret};
use crate::onchain::{ChainSimulator, SharedChain, SimulatedAdapter, NATIVE_ASSET};
use crate::order::{ExtraTerms, LockTerms, MarketTerms, Order, PartyTerms, SignedOrder};
use crate::timelock::{TimeLockOffsets, TimeLockSchedule};

pub const GENESIS_TIME: Timestamp = 1_700_000_000;

/// Token the maker sells on the source ledger.
pub const SRC_TOKEN: Address = Address::repeat_byte(0x5A);
/// Token the resolver pays with on the destination ledger.
pub const DST_TOKEN: Address = Address::repeat_byte(0xDA);

pub const MAKING_AMOUNT: u64 = 1_000_000;
pub const TAKING_AMOUNT: u64 = 2_000_000;
pub const SAFETY_DEPOSIT: u64 = 10_000;

// Well-known development keys, never funded anywhere real.
const MAKER_KEY: &str = "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";
const RESOLVER_KEY: &str = "59c6995e998f97a5a0044966f0945389dc9e86dae88c7a8412f4603b6b78690d";

pub fn maker_wallet() -> LocalWallet {
    MAKER_KEY.parse().expect("maker key is valid hex")
}

pub fn resolver_wallet() -> LocalWallet {
    RESOLVER_KEY.parse().expect("resolver key is valid hex")
}

pub fn maker_address() -> Address {
    maker_wallet().address()
}

pub fn resolver_address() -> Address {
    resolver_wallet().address()
}

pub fn standard_secret() -> Secret {
    Secret::new([0x5E; 32])
}

/// src 10/120/121/122, dst 10/100/101 seconds.
pub fn standard_time_locks() -> TimeLockSchedule {
    TimeLockSchedule::new(TimeLockOffsets {
        src_withdrawal: 10,
        src_public_withdrawal: 120,
        src_cancellation: 121,
        src_public_cancellation: 122,
        dst_withdrawal: 10,
        dst_public_withdrawal: 100,
        dst_cancellation: 101,
    })
    .expect("standard schedule is monotonic")
}

/// Default config acting as the standard resolver.
pub fn standard_config() -> SwapConfig {
    SwapConfig {
        resolver: resolver_address(),
        ..SwapConfig::default()
    }
}

/// Millisecond polling and backoff so scenarios finish quickly.
pub fn fast_config() -> SwapConfig {
    SwapConfig {
        poll_interval: Duration::from_millis(1),
        retry: RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
        },
        ..standard_config()
    }
}

fn terms(hash_lock: HashLock, nonce: u64) -> (PartyTerms, LockTerms, MarketTerms, ExtraTerms) {
    let config = standard_config();
    (
        PartyTerms {
            maker: maker_address(),
            receiver: Address::zero(),
            maker_asset: SRC_TOKEN,
            taker_asset: DST_TOKEN,
            making_amount: U256::from(MAKING_AMOUNT),
            taking_amount: U256::from(TAKING_AMOUNT),
        },
        LockTerms {
            hash_lock,
            time_locks: standard_time_locks(),
            src_chain_id: config.source.chain_id,
            dst_chain_id: config.destination.chain_id,
            src_safety_deposit: U256::from(SAFETY_DEPOSIT),
            dst_safety_deposit: U256::from(SAFETY_DEPOSIT),
        },
        MarketTerms {
            auction: AuctionDetails::default(),
            whitelist: vec![WhitelistEntry {
                address: resolver_address(),
                allow_from: 0,
            }],
            resolving_start_time: 0,
        },
        ExtraTerms {
            salt: U256::from(42u64),
            nonce,
            allow_partial_fills: false,
            allow_multiple_fills: false,
        },
    )
}

/// Single-fill order locked to `secret`. Distinct nonces give distinct
/// order hashes.
pub fn order_for(secret: &Secret, nonce: u64) -> Order {
    let (party, lock, market, extra) = terms(HashLock::from_secret(secret), nonce);
    Order::build(standard_config().source.escrow_factory, party, lock, market, extra)
        .expect("standard order is valid")
}

pub fn standard_order() -> Order {
    order_for(&standard_secret(), 1)
}

/// Order fillable in `secrets.len()` parts, one secret per part.
pub fn multi_fill_order(secrets: &[Secret]) -> Order {
    let raw: Vec<[u8; 32]> = secrets.iter().map(|s| *s.expose()).collect();
    let hash_lock = HashLock::for_multiple_fills(&raw).expect("non-empty secret set");
    let (party, lock, market, mut extra) = terms(hash_lock, 2);
    extra.allow_partial_fills = true;
    extra.allow_multiple_fills = true;
    Order::build(standard_config().source.escrow_factory, party, lock, market, extra)
        .expect("multi-fill order is valid")
}

pub async fn signed_standard_order() -> SignedOrder {
    standard_order()
        .sign(&maker_wallet())
        .await
        .expect("maker signs its own order")
}

/// Source-side immutables deployed at t=1_000 with the standard schedule.
pub fn sample_immutables() -> EscrowImmutables {
    EscrowImmutables {
        order_hash: H256::repeat_byte(0x0D),
        hash_lock: HashLock::from_secret(&standard_secret()),
        maker: maker_address(),
        taker: resolver_address(),
        token: SRC_TOKEN,
        amount: U256::from(MAKING_AMOUNT),
        safety_deposit: U256::from(SAFETY_DEPOSIT),
        time_locks: standard_time_locks(),
        deployed_at: Some(1_000),
    }
}

/// Enough of every asset on `chain` for a few dozen standard swaps.
pub async fn fund_parties(chain: &SharedChain) {
    let plenty = U256::from(MAKING_AMOUNT) * U256::from(100u64);
    let gas = U256::exp10(18);
    let mut sim = chain.lock().await;
    sim.mint(maker_address(), SRC_TOKEN, plenty);
    sim.mint(maker_address(), NATIVE_ASSET, gas);
    sim.mint(resolver_address(), DST_TOKEN, plenty * U256::from(2u64));
    sim.mint(resolver_address(), NATIVE_ASSET, gas);
}

/// Two funded simulated ledgers and a coordinator acting as the resolver on
/// both. Each clock read advances that ledger by one second, so windows open
/// after a few polls.
pub struct SwapEnv {
    pub config: SwapConfig,
    pub src_chain: SharedChain,
    pub dst_chain: SharedChain,
    pub src: Arc<SimulatedAdapter>,
    pub dst: Arc<SimulatedAdapter>,
    pub coordinator: SwapCoordinator,
}

impl SwapEnv {
    pub async fn new() -> Self {
        Self::with_config(fast_config()).await
    }

    pub async fn with_config(config: SwapConfig) -> Self {
        let src_chain = ChainSimulator::new(&config.source, GENESIS_TIME).shared();
        let dst_chain = ChainSimulator::new(&config.destination, GENESIS_TIME).shared();
        for chain in [&src_chain, &dst_chain] {
            fund_parties(chain).await;
            chain.lock().await.set_auto_advance(1);
        }
        let src = Arc::new(SimulatedAdapter::new(
            src_chain.clone(),
            config.source.chain_id,
            config.resolver,
        ));
        let dst = Arc::new(SimulatedAdapter::new(
            dst_chain.clone(),
            config.destination.chain_id,
            config.resolver,
        ));
        let coordinator = SwapCoordinator::new(config.clone(), src.clone(), dst.clone())
            .expect("fixture config is valid");
        SwapEnv {
            config,
            src_chain,
            dst_chain,
            src,
            dst,
            coordinator,
        }
    }

    pub fn chain(&self, side: Side) -> &SharedChain {
        match side {
            Side::Src => &self.src_chain,
            Side::Dst => &self.dst_chain,
        }
    }

    pub async fn signed_order(&self) -> SignedOrder {
        signed_standard_order().await
    }

    pub async fn balance(&self, side: Side, account: Address, asset: Address) -> U256 {
        self.chain(side).lock().await.balance(account, asset)
    }

    /// Adapter on `side` acting as the maker, for maker-side calls.
    pub fn maker_adapter(&self, side: Side) -> SimulatedAdapter {
        SimulatedAdapter::new(
            self.chain(side).clone(),
            self.config.chain(side).chain_id,
            maker_address(),
        )
    }
}
