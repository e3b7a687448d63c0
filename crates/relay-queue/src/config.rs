//! Queue configuration.

use relay_types::{Hex, RelayError, Result};
use serde::Deserialize;

/// Dispatcher and submitter settings.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    /// Wait between ticks, counted from the end of the previous tick.
    #[serde(default = "defaults::tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// How long a submission may go without a terminal event before the
    /// ledger is re-queried.
    #[serde(default = "defaults::submission_timeout_ms")]
    pub submission_timeout_ms: u64,

    /// Consecutive signing failures before a record is dead-lettered.
    #[serde(default = "defaults::max_sign_attempts")]
    pub max_sign_attempts: u32,

    #[serde(default = "defaults::gas_limit")]
    pub gas_limit: u64,

    /// Fixed gas price in wei; when unset the ledger's price is used.
    #[serde(default)]
    pub gas_price: Option<u64>,

    /// Custodial account that signs and pays for every relayed transaction.
    #[serde(default)]
    pub custodial_account: Hex,

    /// Relay contract every transaction is addressed to.
    #[serde(default)]
    pub relay_contract: Hex,
}

impl QueueConfig {
    pub fn validate(&self) -> Result<()> {
        if self.custodial_account.is_empty() {
            return Err(RelayError::Config("queue.custodial_account is not set".into()));
        }
        if self.relay_contract.is_empty() {
            return Err(RelayError::Config("queue.relay_contract is not set".into()));
        }
        if self.max_sign_attempts == 0 {
            return Err(RelayError::Config("queue.max_sign_attempts must be at least 1".into()));
        }
        Ok(())
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: defaults::tick_interval_ms(),
            submission_timeout_ms: defaults::submission_timeout_ms(),
            max_sign_attempts: defaults::max_sign_attempts(),
            gas_limit: defaults::gas_limit(),
            gas_price: None,
            custodial_account: String::new(),
            relay_contract: String::new(),
        }
    }
}

mod defaults {
    pub fn tick_interval_ms() -> u64 {
        30_000
    }

    pub fn submission_timeout_ms() -> u64 {
        600_000
    }

    pub fn max_sign_attempts() -> u32 {
        5
    }

    pub fn gas_limit() -> u64 {
        300_000
    }
}
