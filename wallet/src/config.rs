//! # Wallet Configuration & Constants
//!
//! Every tunable the wallet engine reads lives here: polling cadence for
//! settlement monitors, the Lightning fee reserve, mint call timeouts, and
//! the token bundle wire prefix. Constants are the defaults; [`WalletConfig`]
//! is what a running wallet actually consults.

use std::time::Duration;

// ---------------------------------------------------------------------------
// Units & Wire Format
// ---------------------------------------------------------------------------

/// The only unit the engine accounts in. All amounts are whole satoshis.
pub const UNIT: &str = "sat";

/// Version prefix of the portable token bundle encoding.
pub const TOKEN_PREFIX_V3: &str = "cashuA";

/// Optional URI scheme some clients put in front of a token bundle.
pub const TOKEN_URI_SCHEME: &str = "cashu:";

/// Optional URI scheme in front of BOLT-11 invoices.
pub const LIGHTNING_URI_SCHEME: &str = "lightning:";

/// Schema version written into every persisted [`WalletBook`](crate::book::WalletBook).
pub const BOOK_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// Settlement Polling
// ---------------------------------------------------------------------------

/// Fixed delay between two quote-status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Poll budget per invoice. 60 polls at 5s gives a five-minute window.
pub const DEFAULT_MAX_POLL_ATTEMPTS: u32 = 60;

/// Ceiling for the backoff applied after consecutive transient errors.
pub const DEFAULT_MAX_POLL_BACKOFF: Duration = Duration::from_secs(60);

/// Quote lifetime used by the development mint.
pub const DEFAULT_QUOTE_EXPIRY: Duration = Duration::from_secs(3600);

// ---------------------------------------------------------------------------
// Fees & Timeouts
// ---------------------------------------------------------------------------

/// Lightning fee reserve in basis points of the invoice amount (1%).
pub const DEFAULT_FEE_RESERVE_BPS: u64 = 100;

/// Lower bound of the Lightning fee reserve, in sats.
pub const DEFAULT_MIN_FEE_RESERVE: u64 = 2;

/// Upper bound for any single mint round trip.
pub const DEFAULT_MINT_TIMEOUT: Duration = Duration::from_secs(30);

/// Capacity of the wallet event broadcast channel.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

// ---------------------------------------------------------------------------
// WalletConfig
// ---------------------------------------------------------------------------

/// Runtime configuration for a [`Wallet`](crate::wallet::Wallet).
#[derive(Debug, Clone)]
pub struct WalletConfig {
    /// Delay between settlement polls.
    pub poll_interval: Duration,

    /// Maximum number of polls per pending invoice.
    pub max_poll_attempts: u32,

    /// Backoff ceiling after consecutive transient poll errors.
    pub max_poll_backoff: Duration,

    /// Lightning fee reserve, basis points of the invoice amount.
    pub fee_reserve_bps: u64,

    /// Minimum Lightning fee reserve in sats.
    pub min_fee_reserve: u64,

    /// Timeout applied to every mint call.
    pub mint_timeout: Duration,

    /// Mints registered the first time a wallet is created.
    pub default_mints: Vec<String>,

    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            max_poll_attempts: DEFAULT_MAX_POLL_ATTEMPTS,
            max_poll_backoff: DEFAULT_MAX_POLL_BACKOFF,
            fee_reserve_bps: DEFAULT_FEE_RESERVE_BPS,
            min_fee_reserve: DEFAULT_MIN_FEE_RESERVE,
            mint_timeout: DEFAULT_MINT_TIMEOUT,
            default_mints: Vec::new(),
            event_capacity: DEFAULT_EVENT_CAPACITY,
        }
    }
}

impl WalletConfig {
    /// Fee reserve held back when paying an invoice of `amount` sats.
    ///
    /// `max(min_fee_reserve, amount * fee_reserve_bps / 10_000)`, rounded up.
    pub fn fee_reserve(&self, amount: u64) -> u64 {
        let proportional = (amount as u128 * self.fee_reserve_bps as u128).div_ceil(10_000);
        let proportional = u64::try_from(proportional).unwrap_or(u64::MAX);
        proportional.max(self.min_fee_reserve)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_window_is_five_minutes() {
        let cfg = WalletConfig::default();
        assert_eq!(
            cfg.poll_interval * cfg.max_poll_attempts,
            Duration::from_secs(300)
        );
    }

    #[test]
    fn fee_reserve_is_one_percent() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.fee_reserve(1000), 10);
        assert_eq!(cfg.fee_reserve(150_000), 1500);
    }

    #[test]
    fn fee_reserve_has_a_floor() {
        let cfg = WalletConfig::default();
        assert_eq!(cfg.fee_reserve(1), DEFAULT_MIN_FEE_RESERVE);
        assert_eq!(cfg.fee_reserve(0), DEFAULT_MIN_FEE_RESERVE);
    }

    #[test]
    fn fee_reserve_rounds_up() {
        let cfg = WalletConfig {
            min_fee_reserve: 0,
            ..WalletConfig::default()
        };
        assert_eq!(cfg.fee_reserve(101), 2);
    }
}
