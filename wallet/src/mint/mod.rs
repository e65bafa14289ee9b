//! # Mint Client
//!
//! The wallet's only view of a mint. Every call is scoped by the mint's URL
//! so one client can serve every registered mint. The blind-signature
//! protocol lives behind this trait; the wallet sees tokens go in and come
//! out.
//!
//! | Call           | Purpose                                                   |
//! |----------------|-----------------------------------------------------------|
//! | `info`         | mint name and active keyset                               |
//! | `create_quote` | request a Lightning invoice that, once paid, mints tokens |
//! | `check_quote`  | poll whether that invoice has been paid                   |
//! | `mint`         | collect the tokens for a paid quote                       |
//! | `melt`         | spend tokens to pay an external invoice                   |
//! | `swap`         | exchange tokens for fresh ones of chosen denominations    |

pub mod dev;

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::{MintUrl, Token};

pub use dev::DevMint;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors reported by (or about) a mint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MintError {
    /// The mint did not answer in time or refused the connection.
    #[error("mint unreachable: {0}")]
    Unreachable(String),

    /// Transport failure after the connection was established.
    #[error("network error: {0}")]
    Network(String),

    /// The mint understood the request and declined it.
    #[error("mint rejected request: {0}")]
    Rejected(String),

    #[error("quote not found: {0}")]
    QuoteNotFound(String),

    #[error("quote {0} has not been paid")]
    QuoteNotPaid(String),

    /// An input token was already redeemed.
    #[error("token already spent")]
    TokenAlreadySpent,

    /// An input token was not signed by this mint.
    #[error("invalid token signature")]
    InvalidSignature,

    /// Inputs do not cover the requested outputs plus fees.
    #[error("insufficient inputs: have {have}, need {need}")]
    InsufficientInputs { have: u64, need: u64 },
}

impl MintError {
    /// `true` for failures that may succeed if retried later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Network(_))
    }
}

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Self-reported mint metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintInfo {
    pub name: String,
    pub keyset_version: Option<String>,
}

/// A mint quote: pay `invoice`, then collect tokens with `quote_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintQuote {
    pub quote_id: String,
    pub invoice: String,
    pub amount: u64,
    pub expiry: DateTime<Utc>,
}

/// Payment state of a mint quote.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteStatus {
    Pending,
    Settled,
}

/// Outcome of a successful melt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeltResponse {
    /// Proof of payment.
    pub preimage: String,
    /// Overpaid inputs returned as fresh tokens.
    pub change: Vec<Token>,
    /// Lightning fee actually charged.
    pub fee_paid: u64,
}

// ---------------------------------------------------------------------------
// MintClient
// ---------------------------------------------------------------------------

/// Remote mint operations.
#[async_trait]
pub trait MintClient: Send + Sync {
    async fn info(&self, mint: &MintUrl) -> Result<MintInfo, MintError>;

    async fn create_quote(
        &self,
        mint: &MintUrl,
        amount: u64,
        description: &str,
    ) -> Result<MintQuote, MintError>;

    async fn check_quote(&self, mint: &MintUrl, quote_id: &str) -> Result<QuoteStatus, MintError>;

    /// Issues the tokens for a settled quote. Succeeds once per quote.
    async fn mint(&self, mint: &MintUrl, quote_id: &str) -> Result<Vec<Token>, MintError>;

    /// Pays `invoice` with `inputs`. Inputs above amount plus fee come back
    /// as change.
    async fn melt(
        &self,
        mint: &MintUrl,
        inputs: &[Token],
        invoice: &str,
    ) -> Result<MeltResponse, MintError>;

    /// Exchanges `inputs` for new tokens of the given denominations. An empty
    /// `outputs` asks for the canonical split of the input total.
    async fn swap(
        &self,
        mint: &MintUrl,
        inputs: &[Token],
        outputs: &[u64],
    ) -> Result<Vec<Token>, MintError>;
}

/// Bounds a mint call by `timeout`. Expiry is reported as unreachable.
pub async fn with_timeout<T, F>(timeout: Duration, call: F) -> Result<T, MintError>
where
    F: Future<Output = Result<T, MintError>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(result) => result,
        Err(_) => Err(MintError::Unreachable(format!(
            "no response within {}ms",
            timeout.as_millis()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_errors() {
        assert!(MintError::Unreachable("x".into()).is_transient());
        assert!(MintError::Network("x".into()).is_transient());
        assert!(!MintError::TokenAlreadySpent.is_transient());
        assert!(!MintError::QuoteNotFound("q".into()).is_transient());
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_maps_to_unreachable() {
        let slow = async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok::<_, MintError>(())
        };
        let err = with_timeout(Duration::from_secs(1), slow).await.unwrap_err();
        assert!(matches!(err, MintError::Unreachable(_)));

        let fast = async { Ok::<_, MintError>(7) };
        assert_eq!(with_timeout(Duration::from_secs(1), fast).await, Ok(7));
    }
}
