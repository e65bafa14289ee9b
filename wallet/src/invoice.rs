//! # Lightning Invoices
//!
//! Just enough BOLT-11 to pay and issue invoices: the wallet needs the
//! network and the amount, both of which live in the bech32 human-readable
//! part (`ln` + currency + optional amount with multiplier). Tagged fields
//! are left to the mint.
//!
//! [`encode_invoice`] produces checksummed invoices for the development
//! mint. Their data part is `timestamp (8B BE) || payment_hash (32B) ||
//! description`, which is not a routable BOLT-11 payload but round-trips
//! through [`Bolt11Invoice::parse`].

use std::fmt;

use bech32::{Bech32, Hrp};
use thiserror::Error;

use crate::config::LIGHTNING_URI_SCHEME;

/// Millisatoshis per bitcoin.
const MSAT_PER_BTC: u64 = 100_000_000_000;

/// Longest description embedded in a development invoice.
const MAX_DESCRIPTION_BYTES: usize = 100;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvoiceError {
    #[error("bech32 error: {0}")]
    Bech32(String),

    #[error("not a lightning invoice")]
    NotLightning,

    #[error("unknown currency prefix {0:?}")]
    UnknownCurrency(String),

    #[error("invalid amount {0:?}")]
    InvalidAmount(String),

    #[error("invoice has no amount")]
    MissingAmount,
}

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// Bitcoin network an invoice is payable on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    Bitcoin,
    Testnet,
    Regtest,
    Signet,
}

impl Network {
    /// BOLT-11 currency prefix.
    pub fn currency(self) -> &'static str {
        match self {
            Self::Bitcoin => "bc",
            Self::Testnet => "tb",
            Self::Regtest => "bcrt",
            Self::Signet => "tbs",
        }
    }

    /// Longest match first: `bcrt` before `bc`, `tbs` before `tb`.
    fn split_currency(rest: &str) -> Option<(Self, &str)> {
        [Self::Regtest, Self::Signet, Self::Bitcoin, Self::Testnet]
            .into_iter()
            .find_map(|n| rest.strip_prefix(n.currency()).map(|tail| (n, tail)))
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.currency())
    }
}

// ---------------------------------------------------------------------------
// Bolt11Invoice
// ---------------------------------------------------------------------------

/// A parsed Lightning invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bolt11Invoice {
    raw: String,
    network: Network,
    amount_msat: Option<u64>,
}

impl Bolt11Invoice {
    /// Parses an invoice, accepting an optional `lightning:` prefix and
    /// either case.
    pub fn parse(input: &str) -> Result<Self, InvoiceError> {
        let trimmed = input.trim();
        let trimmed = match trimmed.get(..LIGHTNING_URI_SCHEME.len()) {
            Some(head) if head.eq_ignore_ascii_case(LIGHTNING_URI_SCHEME) => {
                &trimmed[LIGHTNING_URI_SCHEME.len()..]
            }
            _ => trimmed,
        };
        let raw = trimmed.to_ascii_lowercase();

        let (hrp, _data) =
            bech32::decode(&raw).map_err(|e| InvoiceError::Bech32(e.to_string()))?;
        let hrp = hrp.as_str().to_ascii_lowercase();

        let rest = hrp.strip_prefix("ln").ok_or(InvoiceError::NotLightning)?;
        let (network, amount) = Network::split_currency(rest)
            .ok_or_else(|| InvoiceError::UnknownCurrency(rest.to_string()))?;
        let amount_msat = parse_amount(amount)?;

        Ok(Self {
            raw,
            network,
            amount_msat,
        })
    }

    /// The normalized (lowercase, prefix-free) invoice string.
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn network(&self) -> Network {
        self.network
    }

    /// Amount in millisatoshis, if the invoice carries one.
    pub fn amount_msat(&self) -> Option<u64> {
        self.amount_msat
    }

    /// Amount in whole sats, rounded up.
    pub fn amount_sats(&self) -> Result<u64, InvoiceError> {
        self.amount_msat
            .map(|msat| msat.div_ceil(1000))
            .ok_or(InvoiceError::MissingAmount)
    }
}

impl fmt::Display for Bolt11Invoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl std::str::FromStr for Bolt11Invoice {
    type Err = InvoiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

/// Parses the HRP amount (`2500u`, `10n`, `1`) into msat.
fn parse_amount(amount: &str) -> Result<Option<u64>, InvoiceError> {
    if amount.is_empty() {
        return Ok(None);
    }
    let invalid = || InvoiceError::InvalidAmount(amount.to_string());

    let (digits, multiplier) = match amount.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&amount[..i], Some(c)),
        _ => (amount, None),
    };
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) || digits.starts_with('0') {
        return Err(invalid());
    }
    let value: u64 = digits.parse().map_err(|_| invalid())?;

    let msat = match multiplier {
        None => value.checked_mul(MSAT_PER_BTC),
        Some('m') => value.checked_mul(MSAT_PER_BTC / 1_000),
        Some('u') => value.checked_mul(MSAT_PER_BTC / 1_000_000),
        Some('n') => value.checked_mul(MSAT_PER_BTC / 1_000_000_000),
        // 1p is a tenth of a msat; only whole msat amounts are valid.
        Some('p') if value % 10 == 0 => Some(value / 10),
        _ => None,
    };
    msat.map(Some).ok_or_else(invalid)
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Builds a checksummed invoice for `amount_sats` on `network`.
pub fn encode_invoice(
    network: Network,
    amount_sats: u64,
    payment_hash: &[u8; 32],
    description: &str,
) -> Result<String, InvoiceError> {
    if amount_sats == 0 {
        return Err(InvoiceError::InvalidAmount("0".into()));
    }
    // 1 sat = 10n.
    let nano = amount_sats
        .checked_mul(10)
        .ok_or_else(|| InvoiceError::InvalidAmount(amount_sats.to_string()))?;
    let hrp = Hrp::parse(&format!("ln{}{}n", network.currency(), nano))
        .map_err(|e| InvoiceError::Bech32(e.to_string()))?;

    let mut cut = description.len().min(MAX_DESCRIPTION_BYTES);
    while !description.is_char_boundary(cut) {
        cut -= 1;
    }

    let mut data = Vec::with_capacity(40 + cut);
    data.extend_from_slice(&(chrono::Utc::now().timestamp() as u64).to_be_bytes());
    data.extend_from_slice(payment_hash);
    data.extend_from_slice(&description.as_bytes()[..cut]);

    bech32::encode::<Bech32>(hrp, &data).map_err(|e| InvoiceError::Bech32(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
