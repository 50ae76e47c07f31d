use std::path::Path;
use std::time::Duration;

use ethers::types::Address;
use log::LevelFilter;
use serde::{Deserialize, Serialize};

use crate::data_structures::{ChainId, Side};
use crate::error::{Result, SwapError};

/// Addresses and finality parameters of one ledger.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainSettings {
    pub chain_id: ChainId,
    pub escrow_factory: Address,
    pub src_implementation: Address,
    pub dst_implementation: Address,
    /// Blocks to wait on top of inclusion before acting on a receipt.
    pub confirmations: u64,
    /// How long after deployment the taker may sweep an escrow. A ledger
    /// constant of the escrow implementations, not part of the immutables.
    #[serde(with = "humantime_serde", default = "default_rescue_delay")]
    pub rescue_delay: Duration,
}

fn default_rescue_delay() -> Duration {
    Duration::from_secs(30 * 60)
}

impl ChainSettings {
    fn placeholder(chain_id: ChainId, tag: u8) -> Self {
        ChainSettings {
            chain_id,
            escrow_factory: Address::repeat_byte(tag),
            src_implementation: Address::repeat_byte(tag.wrapping_add(1)),
            dst_implementation: Address::repeat_byte(tag.wrapping_add(2)),
            confirmations: 1,
            rescue_delay: default_rescue_delay(),
        }
    }
}

/// Exponential backoff for retryable adapter errors.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "humantime_serde")]
    pub initial_backoff: Duration,
    #[serde(with = "humantime_serde")]
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (1-based), doubling each time.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SwapConfig {
    /// How often `await_window` re-reads the ledger clock.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    pub retry: RetryPolicy,
    pub source: ChainSettings,
    pub destination: ChainSettings,
    /// The account the coordinator transacts as on both ledgers.
    pub resolver: Address,
    pub log_level: LevelFilter,
}

impl Default for SwapConfig {
    fn default() -> Self {
        SwapConfig {
            poll_interval: Duration::from_secs(1),
            retry: RetryPolicy::default(),
            source: ChainSettings::placeholder(1, 0xA0),
            destination: ChainSettings::placeholder(137, 0xB0),
            resolver: Address::zero(),
            log_level: LevelFilter::Info,
        }
    }
}

impl SwapConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .map_err(|e| SwapError::Config(format!("reading {}: {e}", path.display())))?;
        let config: SwapConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.source.chain_id == self.destination.chain_id {
            return Err(SwapError::Config(format!(
                "source and destination share chain id {}",
                self.source.chain_id
            )));
        }
        if self.retry.max_attempts == 0 {
            return Err(SwapError::Config("retry.max_attempts must be at least 1".into()));
        }
        if self.retry.initial_backoff > self.retry.max_backoff {
            return Err(SwapError::Config(
                "retry.initial_backoff exceeds retry.max_backoff".into(),
            ));
        }
        if self.poll_interval.is_zero() {
            return Err(SwapError::Config("poll_interval must be positive".into()));
        }
        for (name, chain) in [("source", &self.source), ("destination", &self.destination)] {
            if chain.escrow_factory.is_zero() {
                return Err(SwapError::Config(format!("{name}.escrow_factory is unset")));
            }
            if chain.rescue_delay.is_zero() {
                return Err(SwapError::Config(format!("{name}.rescue_delay must be positive")));
            }
        }
        Ok(())
    }

    pub fn chain(&self, side: Side) -> &ChainSettings {
        match side {
            Side::Src => &self.source,
            Side::Dst => &self.destination,
        }
    }
}
