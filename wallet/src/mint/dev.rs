//! # Development Mint
//!
//! An in-process [`MintClient`] that behaves like a real mint from the
//! wallet's point of view: tokens carry signatures only this instance can
//! produce, spent secrets are tracked, quotes must be paid before they
//! mint, and melts charge a fee and return change.
//!
//! Signatures are keyed BLAKE3 over `mint | amount | secret`. There is no
//! blinding; the development mint sees every secret it signs.
//!
//! One `DevMint` can serve any number of mint URLs. A melt paying an
//! invoice issued by this instance settles the matching quote, so two
//! wallets sharing a `DevMint` can pay each other over "Lightning".

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tokio::time::Instant;
use tracing::debug;

use super::{MeltResponse, MintClient, MintError, MintInfo, MintQuote, QuoteStatus};
use crate::config::DEFAULT_QUOTE_EXPIRY;
use crate::invoice::{encode_invoice, Bolt11Invoice, Network};
use crate::token::{split_amount, MintUrl, Token};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct DevQuote {
    mint: MintUrl,
    amount: u64,
    invoice: String,
    created: Instant,
    expiry: chrono::DateTime<chrono::Utc>,
    paid: bool,
    issued: bool,
}

#[derive(Debug, Default)]
struct DevState {
    quotes: HashMap<String, DevQuote>,
    spent: HashSet<String>,
    offline: HashSet<MintUrl>,
}

// ---------------------------------------------------------------------------
// DevMint
// ---------------------------------------------------------------------------

/// In-process mint for development and tests.
#[derive(Debug)]
pub struct DevMint {
    key: [u8; 32],
    network: Network,
    melt_fee: u64,
    auto_settle_after: Option<Duration>,
    quote_expiry: Duration,
    state: Mutex<DevState>,
}

impl Default for DevMint {
    fn default() -> Self {
        Self::new()
    }
}

impl DevMint {
    /// A regtest mint with a random signing key, no melt fee, and quotes
    /// that settle only through [`pay_quote`](Self::pay_quote).
    pub fn new() -> Self {
        let mut key = [0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self {
            key,
            network: Network::Regtest,
            melt_fee: 0,
            auto_settle_after: None,
            quote_expiry: DEFAULT_QUOTE_EXPIRY,
            state: Mutex::new(DevState::default()),
        }
    }

    /// Flat Lightning fee charged on every melt.
    pub fn with_melt_fee(mut self, fee: u64) -> Self {
        self.melt_fee = fee;
        self
    }

    /// Quotes report as paid once `after` has elapsed since creation.
    pub fn with_auto_settle(mut self, after: Duration) -> Self {
        self.auto_settle_after = Some(after);
        self
    }

    pub fn with_quote_expiry(mut self, expiry: Duration) -> Self {
        self.quote_expiry = expiry;
        self
    }

    pub fn with_network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    // -----------------------------------------------------------------------
    // Test Controls
    // -----------------------------------------------------------------------

    /// Marks a quote paid, as if its invoice settled. Returns `false` for
    /// unknown quotes.
    pub fn pay_quote(&self, quote_id: &str) -> bool {
        let mut state = self.state.lock();
        match state.quotes.get_mut(quote_id) {
            Some(quote) => {
                quote.paid = true;
                true
            }
            None => false,
        }
    }

    /// Issues tokens worth `amount` at `mint` without a quote.
    pub fn issue(&self, mint: &MintUrl, amount: u64) -> Vec<Token> {
        self.sign_outputs(mint, &split_amount(amount))
    }

    /// Makes every call for `mint` fail as unreachable.
    pub fn set_offline(&self, mint: &MintUrl, offline: bool) {
        let mut state = self.state.lock();
        if offline {
            state.offline.insert(mint.clone());
        } else {
            state.offline.remove(mint);
        }
    }

    /// `true` if `secret` has been redeemed at this mint.
    pub fn is_spent(&self, secret: &str) -> bool {
        self.state.lock().spent.contains(secret)
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    fn signature(&self, mint: &MintUrl, amount: u64, secret: &str) -> String {
        let message = format!("{mint}|{amount}|{secret}");
        blake3::keyed_hash(&self.key, message.as_bytes())
            .to_hex()
            .to_string()
    }

    fn sign_outputs(&self, mint: &MintUrl, amounts: &[u64]) -> Vec<Token> {
        amounts
            .iter()
            .map(|&amount| {
                let secret = random_hex(32);
                let signature = self.signature(mint, amount, &secret);
                Token::new(mint.clone(), amount, secret, signature)
            })
            .collect()
    }

    fn ensure_online(state: &DevState, mint: &MintUrl) -> Result<(), MintError> {
        if state.offline.contains(mint) {
            return Err(MintError::Unreachable(mint.to_string()));
        }
        Ok(())
    }

    /// Checks inputs are unspent, unique and signed here. Returns their sum.
    fn verify_inputs(
        &self,
        state: &DevState,
        mint: &MintUrl,
        inputs: &[Token],
    ) -> Result<u64, MintError> {
        let mut seen = HashSet::with_capacity(inputs.len());
        let mut total = 0u64;
        for token in inputs {
            if &token.mint != mint {
                return Err(MintError::Rejected(format!(
                    "token issued by {} presented to {mint}",
                    token.mint
                )));
            }
            if token.signature != self.signature(mint, token.amount, &token.secret) {
                return Err(MintError::InvalidSignature);
            }
            if state.spent.contains(&token.secret) || !seen.insert(token.secret.as_str()) {
                return Err(MintError::TokenAlreadySpent);
            }
            total = total
                .checked_add(token.amount)
                .ok_or_else(|| MintError::Rejected("input amount overflows".into()))?;
        }
        Ok(total)
    }

    fn quote_status(&self, state: &mut DevState, quote_id: &str) -> Result<QuoteStatus, MintError> {
        let auto_settle = self.auto_settle_after;
        let expired = state
            .quotes
            .get(quote_id)
            .is_some_and(|q| !q.paid && chrono::Utc::now() >= q.expiry);
        if expired {
            state.quotes.remove(quote_id);
        }

        let quote = state
            .quotes
            .get_mut(quote_id)
            .ok_or_else(|| MintError::QuoteNotFound(quote_id.to_string()))?;
        if let Some(after) = auto_settle {
            if quote.created.elapsed() >= after {
                quote.paid = true;
            }
        }
        Ok(if quote.paid {
            QuoteStatus::Settled
        } else {
            QuoteStatus::Pending
        })
    }

    fn do_create_quote(
        &self,
        mint: &MintUrl,
        amount: u64,
        description: &str,
    ) -> Result<MintQuote, MintError> {
        let mut state = self.state.lock();
        Self::ensure_online(&state, mint)?;
        if amount == 0 {
            return Err(MintError::Rejected("amount must be positive".into()));
        }

        let quote_id = random_hex(16);
        let payment_hash: [u8; 32] = Sha256::digest(quote_id.as_bytes()).into();
        let invoice = encode_invoice(self.network, amount, &payment_hash, description)
            .map_err(|e| MintError::Rejected(e.to_string()))?;
        let expiry = chrono::Utc::now()
            + chrono::Duration::from_std(self.quote_expiry)
                .map_err(|e| MintError::Rejected(e.to_string()))?;

        state.quotes.insert(
            quote_id.clone(),
            DevQuote {
                mint: mint.clone(),
                amount,
                invoice: invoice.clone(),
                created: Instant::now(),
                expiry,
                paid: false,
                issued: false,
            },
        );
        debug!(%mint, quote_id = %quote_id, amount, "dev mint issued quote");

        Ok(MintQuote {
            quote_id,
            invoice,
            amount,
            expiry,
        })
    }

    fn do_check_quote(&self, mint: &MintUrl, quote_id: &str) -> Result<QuoteStatus, MintError> {
        let mut state = self.state.lock();
        Self::ensure_online(&state, mint)?;
        self.quote_status(&mut state, quote_id)
    }

    fn do_mint(&self, mint: &MintUrl, quote_id: &str) -> Result<Vec<Token>, MintError> {
        let mut state = self.state.lock();
        Self::ensure_online(&state, mint)?;
        if self.quote_status(&mut state, quote_id)? != QuoteStatus::Settled {
            return Err(MintError::QuoteNotPaid(quote_id.to_string()));
        }
        let quote = state
            .quotes
            .get_mut(quote_id)
            .ok_or_else(|| MintError::QuoteNotFound(quote_id.to_string()))?;
        if &quote.mint != mint {
            return Err(MintError::QuoteNotFound(quote_id.to_string()));
        }
        if quote.issued {
            return Err(MintError::Rejected(format!("quote {quote_id} already issued")));
        }
        quote.issued = true;
        let amount = quote.amount;
        drop(state);

        Ok(self.sign_outputs(mint, &split_amount(amount)))
    }

    fn do_melt(
        &self,
        mint: &MintUrl,
        inputs: &[Token],
        invoice: &str,
    ) -> Result<MeltResponse, MintError> {
        let invoice = Bolt11Invoice::parse(invoice).map_err(|e| MintError::Rejected(e.to_string()))?;
        let amount = invoice
            .amount_sats()
            .map_err(|e| MintError::Rejected(e.to_string()))?;

        let mut state = self.state.lock();
        Self::ensure_online(&state, mint)?;
        let have = self.verify_inputs(&state, mint, inputs)?;
        let need = amount
            .checked_add(self.melt_fee)
            .ok_or_else(|| MintError::Rejected("amount overflows".into()))?;
        if have < need {
            return Err(MintError::InsufficientInputs { have, need });
        }

        for token in inputs {
            state.spent.insert(token.secret.clone());
        }
        if let Some(quote) = state
            .quotes
            .values_mut()
            .find(|q| q.invoice == invoice.as_str())
        {
            quote.paid = true;
        }
        drop(state);

        debug!(%mint, amount, fee = self.melt_fee, "dev mint melted tokens");
        Ok(MeltResponse {
            preimage: random_hex(32),
            change: self.sign_outputs(mint, &split_amount(have - need)),
            fee_paid: self.melt_fee,
        })
    }

    fn do_swap(
        &self,
        mint: &MintUrl,
        inputs: &[Token],
        outputs: &[u64],
    ) -> Result<Vec<Token>, MintError> {
        let mut state = self.state.lock();
        Self::ensure_online(&state, mint)?;
        let have = self.verify_inputs(&state, mint, inputs)?;

        let outputs = if outputs.is_empty() {
            split_amount(have)
        } else {
            outputs.to_vec()
        };
        if outputs.contains(&0) {
            return Err(MintError::Rejected("output amounts must be positive".into()));
        }
        let need = outputs
            .iter()
            .try_fold(0u64, |acc, a| acc.checked_add(*a))
            .ok_or_else(|| MintError::Rejected("output amount overflows".into()))?;
        if need > have {
            return Err(MintError::InsufficientInputs { have, need });
        }
        if need < have {
            return Err(MintError::Rejected(format!(
                "outputs ({need}) must equal inputs ({have})"
            )));
        }

        for token in inputs {
            state.spent.insert(token.secret.clone());
        }
        drop(state);

        Ok(self.sign_outputs(mint, &outputs))
    }
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

// ---------------------------------------------------------------------------
// MintClient
// ---------------------------------------------------------------------------

#[async_trait]
impl MintClient for DevMint {
    async fn info(&self, mint: &MintUrl) -> Result<MintInfo, MintError> {
        Self::ensure_online(&self.state.lock(), mint)?;
        let keyset = blake3::keyed_hash(&self.key, mint.as_str().as_bytes());
        Ok(MintInfo {
            name: format!("Dev Mint ({})", mint.host()),
            keyset_version: Some(format!("00{}", &keyset.to_hex()[..14])),
        })
    }

    async fn create_quote(
        &self,
        mint: &MintUrl,
        amount: u64,
        description: &str,
    ) -> Result<MintQuote, MintError> {
        self.do_create_quote(mint, amount, description)
    }

    async fn check_quote(&self, mint: &MintUrl, quote_id: &str) -> Result<QuoteStatus, MintError> {
        self.do_check_quote(mint, quote_id)
    }

    async fn mint(&self, mint: &MintUrl, quote_id: &str) -> Result<Vec<Token>, MintError> {
        self.do_mint(mint, quote_id)
    }

    async fn melt(
        &self,
        mint: &MintUrl,
        inputs: &[Token],
        invoice: &str,
    ) -> Result<MeltResponse, MintError> {
        self.do_melt(mint, inputs, invoice)
    }

    async fn swap(
        &self,
        mint: &MintUrl,
        inputs: &[Token],
        outputs: &[u64],
    ) -> Result<Vec<Token>, MintError> {
        self.do_swap(mint, inputs, outputs)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::total_amount;

    fn mint() -> MintUrl {
        MintUrl::parse("https://mint.example").unwrap()
    }

    #[tokio::test]
    async fn quote_mints_once_after_payment() {
        let dev = DevMint::new();
        let quote = dev.create_quote(&mint(), 13, "coffee").await.unwrap();
        assert_eq!(
            dev.check_quote(&mint(), &quote.quote_id).await.unwrap(),
            QuoteStatus::Pending
        );
        assert!(matches!(
            dev.mint(&mint(), &quote.quote_id).await,
            Err(MintError::QuoteNotPaid(_))
        ));

        assert!(dev.pay_quote(&quote.quote_id));
        let tokens = dev.mint(&mint(), &quote.quote_id).await.unwrap();
        let amounts: Vec<u64> = tokens.iter().map(|t| t.amount).collect();
        assert_eq!(amounts, vec![8, 4, 1]);
        assert!(tokens.iter().all(Token::id_is_consistent));

        assert!(matches!(
            dev.mint(&mint(), &quote.quote_id).await,
            Err(MintError::Rejected(_))
        ));
    }

    #[tokio::test]
    async fn unknown_and_expired_quotes() {
        let dev = DevMint::new();
        assert!(matches!(
            dev.check_quote(&mint(), "nope").await,
            Err(MintError::QuoteNotFound(_))
        ));

        let dev = DevMint::new().with_quote_expiry(Duration::ZERO);
        let quote = dev.create_quote(&mint(), 5, "").await.unwrap();
        assert!(matches!(
            dev.check_quote(&mint(), &quote.quote_id).await,
            Err(MintError::QuoteNotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn auto_settle_after_delay() {
        let dev = DevMint::new().with_auto_settle(Duration::from_secs(10));
        let quote = dev.create_quote(&mint(), 5, "").await.unwrap();
        tokio::time::advance(Duration::from_secs(9)).await;
        assert_eq!(
            dev.check_quote(&mint(), &quote.quote_id).await.unwrap(),
            QuoteStatus::Pending
        );
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(
            dev.check_quote(&mint(), &quote.quote_id).await.unwrap(),
            QuoteStatus::Settled
        );
    }

    #[tokio::test]
    async fn swap_spends_inputs() {
        let dev = DevMint::new();
        let inputs = dev.issue(&mint(), 10);

        let outputs = dev.swap(&mint(), &inputs, &[4, 4, 2]).await.unwrap();
        assert_eq!(total_amount(&outputs), Some(10));
        assert!(inputs.iter().all(|t| dev.is_spent(&t.secret)));

        assert_eq!(
            dev.swap(&mint(), &inputs, &[]).await,
            Err(MintError::TokenAlreadySpent)
        );
    }

    #[tokio::test]
    async fn swap_checks_amounts_and_signatures() {
        let dev = DevMint::new();
        let inputs = dev.issue(&mint(), 8);
        assert!(matches!(
            dev.swap(&mint(), &inputs, &[16]).await,
            Err(MintError::InsufficientInputs { have: 8, need: 16 })
        ));
        assert!(matches!(
            dev.swap(&mint(), &inputs, &[4]).await,
            Err(MintError::Rejected(_))
        ));

        let forged = Token::new(mint(), 8, "secret", "forged");
        assert_eq!(
            dev.swap(&mint(), &[forged], &[]).await,
            Err(MintError::InvalidSignature)
        );

        let other = DevMint::new().issue(&mint(), 8);
        assert_eq!(
            dev.swap(&mint(), &other, &[]).await,
            Err(MintError::InvalidSignature)
        );
    }

    #[tokio::test]
    async fn melt_returns_change_and_settles_internal_quote() {
        let dev = DevMint::new().with_melt_fee(2);
        let payee = MintUrl::parse("https://other.example").unwrap();
        let quote = dev.create_quote(&payee, 50, "invoice").await.unwrap();

        let inputs = dev.issue(&mint(), 64);
        let resp = dev.melt(&mint(), &inputs, &quote.invoice).await.unwrap();
        assert_eq!(resp.fee_paid, 2);
        assert_eq!(total_amount(&resp.change), Some(12));
        assert_eq!(
            dev.check_quote(&payee, &quote.quote_id).await.unwrap(),
            QuoteStatus::Settled
        );
    }

    #[tokio::test]
    async fn melt_requires_amount_plus_fee() {
        let dev = DevMint::new().with_melt_fee(2);
        let quote = dev.create_quote(&mint(), 50, "").await.unwrap();
        let inputs = dev.issue(&mint(), 51);
        assert_eq!(
            dev.melt(&mint(), &inputs, &quote.invoice).await.unwrap_err(),
            MintError::InsufficientInputs { have: 51, need: 52 }
        );
        assert!(inputs.iter().all(|t| !dev.is_spent(&t.secret)));
    }

    #[tokio::test]
    async fn offline_mint_is_unreachable() {
        let dev = DevMint::new();
        dev.set_offline(&mint(), true);
        assert!(matches!(
            dev.info(&mint()).await,
            Err(MintError::Unreachable(_))
        ));
        dev.set_offline(&mint(), false);
        assert!(dev.info(&mint()).await.is_ok());
    }
}
