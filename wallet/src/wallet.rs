//! # Wallet
//!
//! The facade every caller goes through. A [`Wallet`] owns the persisted
//! [`WalletBook`] (ledger, log, registry, pending invoices), talks to mints
//! through a [`MintClient`], and runs the settlement monitors for the
//! invoices it issues.
//!
//! ## Single Writer
//!
//! Every operation that changes the book takes the writer lock first and
//! holds it until the change is applied, mint round trips included. Two
//! payments can therefore never select the same tokens. Reads take a
//! snapshot of the book and never wait on a writer.
//!
//! A change is applied by [`commit`](Wallet::commit): clone the book, apply
//! the change, save the clone, then swap it in. A failed save leaves memory
//! and disk at the previous book, so the ledger and the log always move
//! together.
//!
//! ## Status
//!
//! ```text
//! Uninitialized ──load──▶ Loading ──▶ Ready ──shutdown──▶ Uninitialized
//!                           │
//!                           └──▶ Error ──load (retry)──▶ Loading
//! ```
//!
//! Operations other than `load`, `shutdown` and reads fail with
//! [`WalletError::NotReady`] outside `Ready`.
//!
//! ## Failure Records
//!
//! An outgoing operation that reaches a mint is logged `Pending` before the
//! call and finalized after it, `Failed` if the mint refused. Requests
//! rejected before any mint is contacted leave no record.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::book::{WalletBook, WalletState};
use crate::codec::TokenBundle;
use crate::config::WalletConfig;
use crate::error::{WalletError, WalletResult};
use crate::history::{LogError, Transaction, TransactionKind, TransactionStatus};
use crate::invoice::Bolt11Invoice;
use crate::ledger::LedgerError;
use crate::mint::{with_timeout, MintClient, MintError};
use crate::receipts::PaymentNotice;
use crate::registry::{Mint, RegistryError};
use crate::settlement::{MonitorOutcome, PendingInvoice, PollPolicy, SettlementMonitor, SettlementSink};
use crate::store::WalletStore;
use crate::token::{split_amount, total_amount, MintUrl, Token};

// ---------------------------------------------------------------------------
// Status & Events
// ---------------------------------------------------------------------------

/// Lifecycle state of a wallet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "snake_case")]
pub enum WalletStatus {
    Uninitialized,
    Loading,
    Ready,
    /// Loading failed. `load` may be retried.
    Error(String),
}

impl fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Uninitialized => write!(f, "uninitialized"),
            Self::Loading => write!(f, "loading"),
            Self::Ready => write!(f, "ready"),
            Self::Error(msg) => write!(f, "error: {msg}"),
        }
    }
}

/// Broadcast to every [`Wallet::subscribe`] receiver.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalletEvent {
    StatusChanged {
        status: WalletStatus,
    },
    BalanceChanged {
        balance: u64,
    },
    TransactionRecorded {
        transaction: Transaction,
    },
    InvoiceCreated {
        quote_id: String,
        amount: u64,
        invoice: String,
    },
    InvoiceSettled {
        quote_id: String,
        amount: u64,
        transaction_id: String,
    },
    InvoiceExpired {
        quote_id: String,
    },
}

// ---------------------------------------------------------------------------
// Receipts
// ---------------------------------------------------------------------------

/// Result of a Lightning payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PaymentResult {
    pub transaction_id: String,
    pub amount: u64,
    pub fee_paid: u64,
    pub preimage: String,
}

/// Result of an ecash send, zap or nutzap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SendReceipt {
    pub transaction_id: String,
    pub amount: u64,
    /// Encoded bundle carrying exactly `amount`.
    pub bundle: String,
}

/// Result of redeeming a token bundle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReceiveReceipt {
    pub transaction_id: String,
    /// Sum over every redeemed entry.
    pub amount: u64,
    /// Mints whose tokens were redeemed.
    pub mints: Vec<MintUrl>,
}

// ---------------------------------------------------------------------------
// Wallet
// ---------------------------------------------------------------------------

struct Inner {
    owner: String,
    config: WalletConfig,
    client: Arc<dyn MintClient>,
    store: Arc<dyn WalletStore>,
    book: RwLock<WalletBook>,
    status: RwLock<WalletStatus>,
    writer: tokio::sync::Mutex<()>,
    monitor: SettlementMonitor,
    events: broadcast::Sender<WalletEvent>,
    listeners: Mutex<Vec<JoinHandle<()>>>,
    listener_shutdown: watch::Sender<bool>,
}

/// Handle to one wallet instance. Clones share the same wallet.
#[derive(Clone)]
pub struct Wallet {
    inner: Arc<Inner>,
}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("owner", &self.inner.owner)
            .field("status", &*self.inner.status.read())
            .finish()
    }
}

type WriteGuard<'a> = MutexGuard<'a, ()>;

impl Wallet {
    /// Creates an unloaded wallet for `owner`. Call [`load`](Self::load)
    /// before use.
    pub fn new(
        owner: impl Into<String>,
        config: WalletConfig,
        client: Arc<dyn MintClient>,
        store: Arc<dyn WalletStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        let (listener_shutdown, _) = watch::channel(false);
        let monitor = SettlementMonitor::new(Arc::clone(&client), PollPolicy::from(&config));
        Self {
            inner: Arc::new(Inner {
                owner: owner.into(),
                config,
                client,
                store,
                book: RwLock::new(WalletBook::new()),
                status: RwLock::new(WalletStatus::Uninitialized),
                writer: tokio::sync::Mutex::new(()),
                monitor,
                events,
                listeners: Mutex::new(Vec::new()),
                listener_shutdown,
            }),
        }
    }

    // -----------------------------------------------------------------------
    // Lifecycle
    // -----------------------------------------------------------------------

    /// Loads the persisted book and resumes monitoring its pending invoices.
    ///
    /// A wallet seen for the first time registers the configured default
    /// mints. Log entries left `Pending` by an interrupted process are
    /// finalized as `Failed`. Calling `load` on a `Ready` wallet is a no-op.
    pub async fn load(&self) -> WalletResult<()> {
        let _guard = self.inner.writer.lock().await;
        if *self.inner.status.read() == WalletStatus::Ready {
            return Ok(());
        }

        self.set_status(WalletStatus::Loading);
        let book = match self.read_book() {
            Ok(book) => book,
            Err(e) => {
                error!(owner = %self.inner.owner, error = %e, "wallet load failed");
                self.set_status(WalletStatus::Error(e.to_string()));
                return Err(e);
            }
        };

        let resume: Vec<PendingInvoice> = book.pending.values().cloned().collect();
        let state = book.state();
        *self.inner.book.write() = book;
        self.set_status(WalletStatus::Ready);

        for invoice in resume {
            self.inner.monitor.spawn(invoice, self.sink());
        }

        info!(
            owner = %self.inner.owner,
            balance = state.balance,
            tokens = state.token_count,
            pending_invoices = state.pending_invoices,
            "wallet loaded"
        );
        self.emit(WalletEvent::BalanceChanged {
            balance: state.balance,
        });
        Ok(())
    }

    fn read_book(&self) -> WalletResult<WalletBook> {
        let stored = self.inner.store.load(&self.inner.owner)?;
        let fresh = stored.is_none();
        let mut book = stored.unwrap_or_default();
        let mut dirty = fresh;

        if fresh {
            for url in &self.inner.config.default_mints {
                book.mints.add(url)?;
            }
        }

        let interrupted: Vec<String> = book.log.pending().map(|tx| tx.id.clone()).collect();
        for id in &interrupted {
            warn!(transaction_id = %id, "finalizing interrupted transaction as failed");
            book.log.amend(id, TransactionStatus::Failed)?;
            dirty = true;
        }

        if dirty {
            self.inner.store.save(&self.inner.owner, &book)?;
        }
        Ok(book)
    }

    /// Stops every monitor and payment listener and unloads the book.
    ///
    /// Monitors stop at their next sleep or poll boundary; a settlement
    /// already being applied completes first. An operation holding the
    /// writer finishes before monitors are cancelled, so none it starts
    /// outlives the shutdown.
    pub async fn shutdown(&self) {
        self.set_status(WalletStatus::Uninitialized);
        drop(self.inner.writer.lock().await);

        let stopped = self.inner.monitor.cancel_all().await;

        self.inner.listener_shutdown.send_replace(true);
        let listeners: Vec<JoinHandle<()>> = self.inner.listeners.lock().drain(..).collect();
        for handle in listeners {
            if let Err(e) = handle.await {
                warn!(error = %e, "payment listener panicked");
            }
        }
        self.inner.listener_shutdown.send_replace(false);

        let _guard = self.inner.writer.lock().await;
        *self.inner.book.write() = WalletBook::new();
        info!(owner = %self.inner.owner, monitors = stopped, "wallet shut down");
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    pub fn owner(&self) -> &str {
        &self.inner.owner
    }

    pub fn config(&self) -> &WalletConfig {
        &self.inner.config
    }

    pub fn status(&self) -> WalletStatus {
        self.inner.status.read().clone()
    }

    /// Balances derived from the current book.
    pub fn state(&self) -> WalletState {
        self.inner.book.read().state()
    }

    pub fn balance(&self) -> u64 {
        self.inner.book.read().ledger.balance()
    }

    pub fn balance_of(&self, mint: &MintUrl) -> u64 {
        self.inner.book.read().ledger.balance_of(mint)
    }

    /// Up to `limit` most recent log entries.
    pub fn transactions(&self, limit: usize) -> Vec<Transaction> {
        self.inner.book.read().log.recent(limit).to_vec()
    }

    pub fn transaction(&self, id: &str) -> Option<Transaction> {
        self.inner.book.read().log.get(id).cloned()
    }

    pub fn mints(&self) -> Vec<Mint> {
        self.inner.book.read().mints.list().to_vec()
    }

    pub fn pending_invoices(&self) -> Vec<PendingInvoice> {
        self.inner.book.read().pending.values().cloned().collect()
    }

    /// Every held token. Exposed for backup and diagnostics.
    pub fn tokens(&self) -> Vec<Token> {
        self.inner.book.read().ledger.tokens().cloned().collect()
    }

    /// Number of running settlement monitors.
    pub fn active_monitors(&self) -> usize {
        self.inner.monitor.active()
    }

    /// Waits for the monitor of `quote_id` to finish and returns how it
    /// ended. `None` if no monitor is running for it.
    pub async fn await_settlement(&self, quote_id: &str) -> Option<MonitorOutcome> {
        self.inner.monitor.join(quote_id).await
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WalletEvent> {
        self.inner.events.subscribe()
    }

    // -----------------------------------------------------------------------
    // Mints
    // -----------------------------------------------------------------------

    /// Registers a mint. Adding a registered mint is a no-op.
    ///
    /// The mint is asked for its name and keyset; an unreachable mint is
    /// still registered under its host name.
    pub async fn add_mint(&self, url: &str) -> WalletResult<Mint> {
        let url = MintUrl::parse(url)?;
        let guard = self.writer().await?;

        if let Some(existing) = self.inner.book.read().mints.get(&url) {
            return Ok(existing.clone());
        }

        let info = match self.call(self.inner.client.info(&url)).await {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(mint = %url, error = %e, "mint info unavailable; registering anyway");
                None
            }
        };

        let mint = self.commit(&guard, |book| {
            book.mints.insert(url.clone());
            if let Some(info) = info {
                book.mints.update_info(&url, info.name, info.keyset_version)?;
            }
            book.mints
                .get(&url)
                .cloned()
                .ok_or_else(|| RegistryError::UnknownMint(url.clone()).into())
        })?;
        info!(mint = %url, name = %mint.display_name, "mint added");
        Ok(mint)
    }

    /// Unregisters a mint that holds no tokens and has no pending invoices.
    pub async fn remove_mint(&self, url: &str) -> WalletResult<Mint> {
        let url = MintUrl::parse(url)?;
        let guard = self.writer().await?;

        let pending = self.inner.book.read().pending_at(&url).count();
        if pending > 0 {
            return Err(WalletError::MintHasPendingInvoices {
                url,
                count: pending,
            });
        }

        let removed = self.commit(&guard, |book| {
            Ok(book.mints.remove(url.as_str(), &book.ledger)?)
        })?;
        info!(mint = %url, "mint removed");
        Ok(removed)
    }

    // -----------------------------------------------------------------------
    // Lightning
    // -----------------------------------------------------------------------

    /// Pays a BOLT-11 invoice from a single mint's tokens.
    ///
    /// The balance must cover the amount plus the fee reserve; otherwise
    /// the call fails with [`WalletError::InsufficientBalance`] before any
    /// token is selected. Selected tokens leave the ledger only after the
    /// mint confirms the melt; change comes back in the same commit.
    pub async fn pay_invoice(
        &self,
        invoice: &str,
        comment: Option<String>,
    ) -> WalletResult<PaymentResult> {
        let invoice = Bolt11Invoice::parse(invoice)?;
        let amount = invoice.amount_sats()?;
        if amount == 0 {
            return Err(WalletError::InvalidAmount("invoice amount is zero".into()));
        }
        let reserve = self.inner.config.fee_reserve(amount);
        let required = amount
            .checked_add(reserve)
            .ok_or_else(|| WalletError::InvalidAmount(format!("{amount} sats")))?;

        let guard = self.writer().await?;

        let selection = {
            let book = self.inner.book.read();
            let available = book.ledger.balance();
            if available < required {
                return Err(WalletError::InsufficientBalance {
                    available,
                    required,
                });
            }
            book.ledger.select_single_mint(required, None)?
        };
        let mint = selection_mint(&selection.tokens)?;

        let tx = Transaction::new(TransactionKind::Send, amount)
            .with_mint(mint.clone())
            .with_invoice_ref(invoice.as_str())
            .with_memo(comment);
        let tx_id = self.record(&guard, tx)?;

        debug!(
            transaction_id = %tx_id,
            %mint,
            amount,
            reserve,
            inputs = selection.tokens.len(),
            "melting tokens"
        );
        let melted = self
            .call(self.inner.client.melt(&mint, &selection.tokens, invoice.as_str()))
            .await;

        let response = match melted {
            Ok(response) => response,
            Err(e) => {
                warn!(transaction_id = %tx_id, error = %e, "invoice payment failed");
                self.fail(&guard, &tx_id);
                return Err(e.into());
            }
        };

        let ids = selection.ids();
        let change = response.change.clone();
        let finalized = self.commit(&guard, |book| {
            book.ledger.remove(&ids)?;
            if !change.is_empty() {
                book.ledger.add(change)?;
            }
            Ok(book
                .log
                .amend_with_fee(&tx_id, TransactionStatus::Completed, response.fee_paid)?
                .clone())
        });
        let tx = match finalized {
            Ok(tx) => tx,
            Err(e) => {
                error!(
                    transaction_id = %tx_id,
                    error = %e,
                    "invoice paid but the wallet could not record it"
                );
                return Err(e);
            }
        };

        info!(transaction_id = %tx_id, amount, fee = response.fee_paid, "invoice paid");
        self.emit_transaction(tx);
        Ok(PaymentResult {
            transaction_id: tx_id,
            amount,
            fee_paid: response.fee_paid,
            preimage: response.preimage,
        })
    }

    /// Requests an invoice from the default (first registered) mint and
    /// starts monitoring it.
    pub async fn generate_invoice(
        &self,
        amount: u64,
        description: &str,
    ) -> WalletResult<PendingInvoice> {
        let mint = self
            .inner
            .book
            .read()
            .mints
            .default_mint()
            .map(|m| m.url.clone())
            .ok_or(WalletError::NoMints)?;
        self.generate_invoice_at(mint.as_str(), amount, description)
            .await
    }

    /// Requests an invoice from a specific registered mint.
    pub async fn generate_invoice_at(
        &self,
        mint: &str,
        amount: u64,
        description: &str,
    ) -> WalletResult<PendingInvoice> {
        let mint = MintUrl::parse(mint)?;
        if amount == 0 {
            return Err(WalletError::InvalidAmount("invoice amount is zero".into()));
        }
        let guard = self.writer().await?;
        if !self.inner.book.read().mints.contains(&mint) {
            return Err(RegistryError::UnknownMint(mint).into());
        }

        let quote = self
            .call(self.inner.client.create_quote(&mint, amount, description))
            .await?;
        self.ensure_ready()?;
        let pending = PendingInvoice {
            quote_id: quote.quote_id,
            amount,
            description: description.to_string(),
            mint,
            invoice: quote.invoice,
            expiry: quote.expiry,
            created_at: chrono::Utc::now(),
        };

        self.commit(&guard, |book| {
            book.pending
                .insert(pending.quote_id.clone(), pending.clone());
            Ok(())
        })?;
        // Spawned under the writer so `shutdown` cannot miss it.
        self.inner.monitor.spawn(pending.clone(), self.sink());
        drop(guard);

        info!(quote_id = %pending.quote_id, mint = %pending.mint, amount, "invoice created");
        self.emit(WalletEvent::InvoiceCreated {
            quote_id: pending.quote_id.clone(),
            amount,
            invoice: pending.invoice.clone(),
        });
        Ok(pending)
    }

    // -----------------------------------------------------------------------
    // Ecash
    // -----------------------------------------------------------------------

    /// Takes exactly `amount` out of the ledger as a portable bundle.
    pub async fn send_ecash(
        &self,
        amount: u64,
        comment: Option<String>,
    ) -> WalletResult<SendReceipt> {
        self.send_tokens(TransactionKind::Send, amount, comment, None)
            .await
    }

    /// Zaps an event: a fee-less send whose tokens leave the ledger like
    /// any other.
    pub async fn zap_event(
        &self,
        event_id: &str,
        amount: u64,
        comment: Option<String>,
    ) -> WalletResult<SendReceipt> {
        self.send_tokens(
            TransactionKind::ZapSent,
            amount,
            comment,
            Some(event_id.to_string()),
        )
        .await
    }

    /// Sends ecash directly to `recipient` as a nutzap.
    pub async fn send_nutzap(
        &self,
        recipient: &str,
        amount: u64,
        comment: Option<String>,
    ) -> WalletResult<SendReceipt> {
        self.send_tokens(
            TransactionKind::NutzapSent,
            amount,
            comment,
            Some(recipient.to_string()),
        )
        .await
    }

    async fn send_tokens(
        &self,
        kind: TransactionKind,
        amount: u64,
        comment: Option<String>,
        reference: Option<String>,
    ) -> WalletResult<SendReceipt> {
        if amount == 0 {
            return Err(WalletError::InvalidAmount("cannot send zero".into()));
        }
        let guard = self.writer().await?;

        let selection = self
            .inner
            .book
            .read()
            .ledger
            .select_single_mint(amount, None)?;
        let mint = selection_mint(&selection.tokens)?;
        let ids = selection.ids();

        let mut tx = Transaction::new(kind, amount)
            .with_mint(mint.clone())
            .with_memo(comment.clone());
        if let Some(reference) = reference {
            tx = tx.with_invoice_ref(reference);
        }

        let (tx, outgoing) = if selection.change() == 0 {
            let outgoing = selection.tokens.clone();
            let tx = self.commit(&guard, |book| {
                book.ledger.remove(&ids)?;
                record_entry(book, tx.completed())
            })?;
            (tx, outgoing)
        } else {
            // Swap for exact change: the payment's denominations first, then
            // the change's.
            let payment = split_amount(amount);
            let mut outputs = payment.clone();
            outputs.extend(split_amount(selection.change()));

            let tx_id = self.record(&guard, tx)?;
            let swapped = self
                .call(self.inner.client.swap(&mint, &selection.tokens, &outputs))
                .await;
            let fresh = match swapped {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!(transaction_id = %tx_id, error = %e, "swap for exact change failed");
                    self.fail(&guard, &tx_id);
                    return Err(e.into());
                }
            };

            match take_denominations(fresh, &payment) {
                Ok((outgoing, change)) => {
                    let tx = self.commit(&guard, |book| {
                        book.ledger.remove(&ids)?;
                        book.ledger.add(change)?;
                        Ok(book
                            .log
                            .amend(&tx_id, TransactionStatus::Completed)?
                            .clone())
                    })?;
                    (tx, outgoing)
                }
                Err(fresh) => {
                    // Keep everything the mint returned.
                    self.commit(&guard, |book| {
                        book.ledger.remove(&ids)?;
                        book.ledger.add(fresh)?;
                        book.log.amend(&tx_id, TransactionStatus::Failed)?;
                        Ok(())
                    })?;
                    return Err(MintError::Rejected(
                        "swap returned unexpected denominations".into(),
                    )
                    .into());
                }
            }
        };

        let bundle = TokenBundle::single(mint.clone(), outgoing, comment).encode();
        let transaction_id = tx.id.clone();
        info!(transaction_id = %transaction_id, kind = %kind, %mint, amount, "ecash sent");
        self.emit_transaction(tx);
        Ok(SendReceipt {
            transaction_id,
            amount,
            bundle,
        })
    }

    /// Redeems a token bundle.
    ///
    /// Each mint's tokens are swapped at that mint for fresh ones, which
    /// invalidates the sender's copy. Every swap that succeeded is applied
    /// in one commit and recorded as a single `Receive` for the summed
    /// amount; mints seen for the first time are registered.
    ///
    /// If some entries fail, the rest is still applied and the call returns
    /// [`WalletError::PartialReceive`] with the receipt and the unredeemed
    /// entries re-encoded. If every entry fails, nothing is applied.
    pub async fn receive_ecash(&self, bundle: &str) -> WalletResult<ReceiveReceipt> {
        let bundle = TokenBundle::decode(bundle)?;
        let guard = self.writer().await?;
        self.redeem(&guard, bundle, TransactionKind::Receive, None)
            .await
    }

    async fn redeem(
        &self,
        guard: &WriteGuard<'_>,
        bundle: TokenBundle,
        kind: TransactionKind,
        reference: Option<String>,
    ) -> WalletResult<ReceiveReceipt> {
        {
            let book = self.inner.book.read();
            if let Some(held) = bundle.tokens().find(|t| book.ledger.contains(&t.id)) {
                return Err(LedgerError::DuplicateToken(held.id).into());
            }
        }
        let total = bundle
            .total()
            .ok_or_else(|| WalletError::InvalidAmount("bundle amount overflows".into()))?;

        let mut redeemed: Vec<(MintUrl, Vec<Token>)> = Vec::new();
        let mut unredeemed = Vec::new();
        let mut failure: Option<WalletError> = None;
        for entry in bundle.entries {
            let swapped = self
                .call(self.inner.client.swap(&entry.mint, &entry.tokens, &[]))
                .await;
            match swapped {
                Ok(fresh) => redeemed.push((entry.mint, fresh)),
                Err(e) => {
                    warn!(mint = %entry.mint, error = %e, "bundle entry not redeemed");
                    if failure.is_none() {
                        failure = Some(e.into());
                    }
                    unredeemed.push(entry);
                }
            }
        }

        if redeemed.is_empty() {
            return Err(failure
                .unwrap_or_else(|| WalletError::InvalidAmount("bundle is empty".into())));
        }

        let amount = total_amount(redeemed.iter().flat_map(|(_, tokens)| tokens.iter()))
            .ok_or_else(|| WalletError::InvalidAmount("bundle amount overflows".into()))?;
        let mut mints: Vec<MintUrl> = Vec::new();
        for (mint, _) in &redeemed {
            if !mints.contains(mint) {
                mints.push(mint.clone());
            }
        }

        let mut tx = Transaction::new(kind, amount)
            .with_memo(bundle.memo.clone())
            .completed();
        if let [mint] = mints.as_slice() {
            tx = tx.with_mint(mint.clone());
        }
        if let Some(reference) = reference {
            tx = tx.with_invoice_ref(reference);
        }

        let fresh: Vec<Token> = redeemed
            .into_iter()
            .flat_map(|(_, tokens)| tokens)
            .collect();
        let tx = self.commit(guard, |book| {
            for mint in &mints {
                if book.mints.insert(mint.clone()) {
                    info!(mint = %mint, "registered mint from received tokens");
                }
            }
            book.ledger.add(fresh)?;
            record_entry(book, tx)
        })?;

        info!(transaction_id = %tx.id, kind = %kind, mints = mints.len(), amount, "ecash received");
        let receipt = ReceiveReceipt {
            transaction_id: tx.id.clone(),
            amount,
            mints,
        };
        self.emit_transaction(tx);

        match failure {
            None => Ok(receipt),
            Some(source) => {
                let remainder = TokenBundle {
                    entries: unredeemed,
                    memo: bundle.memo,
                };
                Err(WalletError::PartialReceive {
                    receipt,
                    unredeemed: total.saturating_sub(amount),
                    remainder: remainder.encode(),
                    source: Box::new(source),
                })
            }
        }
    }

    /// Swaps every token held at `mint` for its canonical denominations.
    pub async fn swap_tokens(&self, mint: &str) -> WalletResult<Transaction> {
        let mint = MintUrl::parse(mint)?;
        let guard = self.writer().await?;

        let inputs: Vec<Token> = self
            .inner
            .book
            .read()
            .ledger
            .tokens_of(&mint)
            .cloned()
            .collect();
        if inputs.is_empty() {
            return Err(WalletError::InvalidAmount(format!("no tokens held at {mint}")));
        }
        let amount = total_amount(&inputs)
            .ok_or_else(|| WalletError::InvalidAmount("balance overflows".into()))?;
        let ids: Vec<_> = inputs.iter().map(|t| t.id).collect();

        let tx_id = self.record(
            &guard,
            Transaction::new(TransactionKind::Swap, amount).with_mint(mint.clone()),
        )?;
        let fresh = match self.call(self.inner.client.swap(&mint, &inputs, &[])).await {
            Ok(fresh) => fresh,
            Err(e) => {
                warn!(transaction_id = %tx_id, error = %e, "token swap failed");
                self.fail(&guard, &tx_id);
                return Err(e.into());
            }
        };

        let tx = self.commit(&guard, |book| {
            book.ledger.remove(&ids)?;
            book.ledger.add(fresh)?;
            Ok(book
                .log
                .amend(&tx_id, TransactionStatus::Completed)?
                .clone())
        })?;
        info!(transaction_id = %tx_id, %mint, amount, tokens = ids.len(), "tokens swapped");
        self.emit_transaction(tx.clone());
        Ok(tx)
    }

    // -----------------------------------------------------------------------
    // Payment Notices
    // -----------------------------------------------------------------------

    /// Consumes payment notices until the channel closes or the wallet
    /// shuts down.
    pub fn listen_for_payments(&self, mut notices: mpsc::Receiver<PaymentNotice>) {
        let wallet = self.clone();
        let mut shutdown = self.inner.listener_shutdown.subscribe();
        let handle = tokio::spawn(async move {
            loop {
                tokio::select! {
                    notice = notices.recv() => match notice {
                        Some(notice) => {
                            let event_id = notice.event_id().to_string();
                            if let Err(e) = wallet.handle_notice(notice).await {
                                warn!(event_id = %event_id, error = %e, "payment notice rejected");
                            }
                        }
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
            debug!("payment listener stopped");
        });
        self.inner.listeners.lock().push(handle);
    }

    /// Applies one payment notice. Redelivered notices are ignored.
    pub async fn handle_notice(&self, notice: PaymentNotice) -> WalletResult<()> {
        let guard = self.writer().await?;
        let kind = notice.kind();
        let seen = self.inner.book.read().log.iter().any(|tx| {
            tx.kind == kind && tx.invoice_ref.as_deref() == Some(notice.event_id())
        });
        if seen {
            debug!(event_id = notice.event_id(), "duplicate payment notice");
            return Ok(());
        }

        match notice {
            PaymentNotice::Nutzap {
                event_id,
                sender,
                token,
                comment,
            } => {
                let mut bundle = TokenBundle::decode(&token)?;
                if comment.is_some() {
                    bundle.memo = comment;
                }
                let receipt = self.redeem(&guard, bundle, kind, Some(event_id)).await?;
                info!(sender = %sender, amount = receipt.amount, "nutzap received");
            }
            PaymentNotice::Zap {
                event_id,
                sender,
                amount,
                comment,
            } => {
                let tx = Transaction::new(kind, amount)
                    .with_invoice_ref(event_id)
                    .with_memo(comment)
                    .completed();
                let tx = self.commit(&guard, |book| record_entry(book, tx))?;
                info!(sender = %sender, amount, "zap received");
                self.emit_transaction(tx);
            }
        }

        self.emit(WalletEvent::BalanceChanged {
            balance: self.balance(),
        });
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// Takes the writer lock and checks the wallet is `Ready`.
    async fn writer(&self) -> WalletResult<WriteGuard<'_>> {
        let guard = self.inner.writer.lock().await;
        self.ensure_ready()?;
        Ok(guard)
    }

    /// Fails with `NotReady` once `shutdown` has begun.
    fn ensure_ready(&self) -> WalletResult<()> {
        let status = self.inner.status.read().clone();
        if status != WalletStatus::Ready {
            return Err(WalletError::NotReady(status));
        }
        Ok(())
    }

    /// Applies `change` to a copy of the book, persists it, and swaps it
    /// in. On error nothing changes, in memory or on disk.
    fn commit<T>(
        &self,
        _guard: &WriteGuard<'_>,
        change: impl FnOnce(&mut WalletBook) -> WalletResult<T>,
    ) -> WalletResult<T> {
        let mut next = self.inner.book.read().clone();
        let out = change(&mut next)?;
        self.inner.store.save(&self.inner.owner, &next)?;
        *self.inner.book.write() = next;
        Ok(out)
    }

    fn record(&self, guard: &WriteGuard<'_>, tx: Transaction) -> WalletResult<String> {
        self.commit(guard, |book| Ok(book.log.record(tx)?))
    }

    /// Finalizes `tx_id` as `Failed`. The ledger is not touched.
    fn fail(&self, guard: &WriteGuard<'_>, tx_id: &str) {
        let result = self.commit(guard, |book| {
            Ok(book.log.amend(tx_id, TransactionStatus::Failed)?.clone())
        });
        match result {
            Ok(tx) => self.emit(WalletEvent::TransactionRecorded { transaction: tx }),
            Err(e) => error!(transaction_id = %tx_id, error = %e, "could not mark transaction failed"),
        }
    }

    /// Runs a mint call under the configured timeout.
    async fn call<T>(
        &self,
        call: impl std::future::Future<Output = Result<T, crate::mint::MintError>>,
    ) -> Result<T, crate::mint::MintError> {
        with_timeout(self.inner.config.mint_timeout, call).await
    }

    fn sink(&self) -> Arc<dyn SettlementSink> {
        Arc::new(self.clone())
    }

    fn set_status(&self, status: WalletStatus) {
        {
            let mut current = self.inner.status.write();
            if *current == status {
                return;
            }
            *current = status.clone();
        }
        debug!(owner = %self.inner.owner, %status, "wallet status changed");
        self.emit(WalletEvent::StatusChanged { status });
    }

    fn emit(&self, event: WalletEvent) {
        // No subscribers is not an error.
        let _ = self.inner.events.send(event);
    }

    fn emit_transaction(&self, transaction: Transaction) {
        self.emit(WalletEvent::TransactionRecorded { transaction });
        self.emit(WalletEvent::BalanceChanged {
            balance: self.balance(),
        });
    }
}

// ---------------------------------------------------------------------------
// Settlement
// ---------------------------------------------------------------------------

#[async_trait]
impl SettlementSink for Wallet {
    async fn settle(
        &self,
        invoice: &PendingInvoice,
        tokens: Vec<Token>,
    ) -> Result<Option<String>, WalletError> {
        let guard = self.inner.writer.lock().await;
        if !self.inner.book.read().pending.contains_key(&invoice.quote_id) {
            return Ok(None);
        }

        let amount = total_amount(&tokens)
            .ok_or_else(|| WalletError::InvalidAmount("minted amount overflows".into()))?;
        let tx = Transaction::new(TransactionKind::Receive, amount)
            .with_mint(invoice.mint.clone())
            .with_invoice_ref(invoice.quote_id.clone())
            .with_memo(Some(invoice.description.clone()))
            .completed();

        let tx = self.commit(&guard, |book| {
            book.ledger.add(tokens)?;
            book.pending.remove(&invoice.quote_id);
            record_entry(book, tx)
        })?;
        drop(guard);

        info!(quote_id = %invoice.quote_id, transaction_id = %tx.id, amount, "invoice settled");
        self.emit(WalletEvent::InvoiceSettled {
            quote_id: invoice.quote_id.clone(),
            amount,
            transaction_id: tx.id.clone(),
        });
        let id = tx.id.clone();
        self.emit_transaction(tx);
        Ok(Some(id))
    }

    async fn expire(&self, invoice: &PendingInvoice) -> Result<(), WalletError> {
        let guard = self.inner.writer.lock().await;
        if !self.inner.book.read().pending.contains_key(&invoice.quote_id) {
            return Ok(());
        }
        self.commit(&guard, |book| {
            book.pending.remove(&invoice.quote_id);
            Ok(())
        })?;
        drop(guard);

        self.emit(WalletEvent::InvoiceExpired {
            quote_id: invoice.quote_id.clone(),
        });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Records `tx` and returns the stored entry.
fn record_entry(book: &mut WalletBook, tx: Transaction) -> WalletResult<Transaction> {
    let id = book.log.record(tx)?;
    book.log
        .get(&id)
        .cloned()
        .ok_or_else(|| LogError::TransactionNotFound(id).into())
}

fn selection_mint(tokens: &[Token]) -> WalletResult<MintUrl> {
    tokens
        .first()
        .map(|t| t.mint.clone())
        .ok_or_else(|| WalletError::InvalidAmount("nothing selected".into()))
}

/// Splits `pool` into one token per entry of `denominations` and the rest.
/// Gives the pool back untouched if a denomination is missing.
fn take_denominations(
    pool: Vec<Token>,
    denominations: &[u64],
) -> Result<(Vec<Token>, Vec<Token>), Vec<Token>> {
    let mut rest = pool;
    let mut taken = Vec::with_capacity(denominations.len());
    for &denom in denominations {
        match rest.iter().position(|t| t.amount == denom) {
            Some(i) => taken.push(rest.swap_remove(i)),
            None => {
                rest.extend(taken);
                return Err(rest);
            }
        }
    }
    Ok((taken, rest))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mint::{DevMint, MeltResponse, MintInfo, MintQuote, QuoteStatus};
    use crate::store::MemoryStore;
    use std::time::Duration;

    const MINT: &str = "https://mint.example";

    fn mint() -> MintUrl {
        MintUrl::parse(MINT).unwrap()
    }

    async fn ready_wallet(dev: Arc<DevMint>, store: Arc<MemoryStore>) -> Wallet {
        let config = WalletConfig {
            default_mints: vec![MINT.to_string()],
            ..WalletConfig::default()
        };
        let wallet = Wallet::new("alice", config, dev, store);
        wallet.load().await.unwrap();
        wallet
    }

    /// Seeds the wallet through a real receive.
    async fn fund(wallet: &Wallet, dev: &DevMint, amount: u64) {
        let bundle = TokenBundle::single(mint(), dev.issue(&mint(), amount), None).encode();
        wallet.receive_ecash(&bundle).await.unwrap();
    }

    #[test]
    fn take_denominations_partitions_or_returns_pool() {
        let m = mint();
        let pool: Vec<Token> = [8, 1, 4, 2]
            .iter()
            .enumerate()
            .map(|(i, a)| Token::new(m.clone(), *a, i.to_string(), "c"))
            .collect();
        let (taken, rest) = take_denominations(pool.clone(), &[8, 2]).unwrap();
        assert_eq!(total_amount(&taken), Some(10));
        assert_eq!(total_amount(&rest), Some(5));

        let back = take_denominations(pool, &[8, 16]).unwrap_err();
        assert_eq!(back.len(), 4);
    }

    #[tokio::test]
    async fn operations_require_ready() {
        let dev = Arc::new(DevMint::new());
        let wallet = Wallet::new("alice", WalletConfig::default(), dev, Arc::new(MemoryStore::new()));
        assert_eq!(wallet.status(), WalletStatus::Uninitialized);
        let err = wallet.send_ecash(1, None).await.unwrap_err();
        assert!(matches!(err, WalletError::NotReady(WalletStatus::Uninitialized)));
    }

    #[tokio::test]
    async fn load_failure_sets_error_and_retry_recovers() {
        let dev = Arc::new(DevMint::new());
        let store = Arc::new(MemoryStore::new());
        store.set_fail_writes(true);

        let config = WalletConfig {
            default_mints: vec![MINT.to_string()],
            ..WalletConfig::default()
        };
        let wallet = Wallet::new("alice", config, dev, store.clone());
        assert!(matches!(wallet.load().await, Err(WalletError::Storage(_))));
        assert!(matches!(wallet.status(), WalletStatus::Error(_)));

        store.set_fail_writes(false);
        wallet.load().await.unwrap();
        assert_eq!(wallet.status(), WalletStatus::Ready);
        assert_eq!(wallet.mints().len(), 1);
    }

    #[tokio::test]
    async fn exact_send_needs_no_swap() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        fund(&wallet, &dev, 12).await; // 8 + 4

        dev.set_offline(&mint(), true);
        let receipt = wallet.send_ecash(8, Some("lunch".into())).await.unwrap();
        assert_eq!(wallet.balance(), 4);

        let bundle = TokenBundle::decode(&receipt.bundle).unwrap();
        assert_eq!(bundle.total(), Some(8));
        assert_eq!(bundle.memo.as_deref(), Some("lunch"));

        let tx = wallet.transaction(&receipt.transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::Send);
        assert_eq!(tx.status, TransactionStatus::Completed);
    }

    #[tokio::test]
    async fn overshooting_send_swaps_for_change() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        fund(&wallet, &dev, 64).await;

        let receipt = wallet.send_ecash(10, None).await.unwrap();
        assert_eq!(TokenBundle::decode(&receipt.bundle).unwrap().total(), Some(10));
        assert_eq!(wallet.balance(), 54);
    }

    #[tokio::test]
    async fn failed_swap_records_failure_and_keeps_tokens() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        fund(&wallet, &dev, 64).await;
        let before = wallet.tokens();

        dev.set_offline(&mint(), true);
        let err = wallet.send_ecash(10, None).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(wallet.tokens(), before);

        let last = &wallet.transactions(1)[0];
        assert_eq!(last.status, TransactionStatus::Failed);
        assert_eq!(last.amount, 10);
    }

    #[tokio::test]
    async fn zap_removes_real_tokens() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        fund(&wallet, &dev, 32).await;

        let receipt = wallet.zap_event("note1abc", 21, None).await.unwrap();
        assert_eq!(wallet.balance(), 11);
        assert_eq!(wallet.state().balance, wallet.tokens().iter().map(|t| t.amount).sum::<u64>());

        let tx = wallet.transaction(&receipt.transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::ZapSent);
        assert_eq!(tx.invoice_ref.as_deref(), Some("note1abc"));
        assert_eq!(tx.fee, 0);
    }

    #[tokio::test]
    async fn swap_consolidates_then_nutzap_sends() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        for amount in [8, 8, 16] {
            fund(&wallet, &dev, amount).await;
        }
        assert_eq!(wallet.tokens().len(), 3);

        let tx = wallet.swap_tokens(MINT).await.unwrap();
        assert_eq!(tx.kind, TransactionKind::Swap);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(wallet.tokens().len(), 1);
        assert_eq!(wallet.balance(), 32);

        let receipt = wallet.send_nutzap("npub1bob", 8, None).await.unwrap();
        assert_eq!(wallet.balance(), 24);
        let tx = wallet.transaction(&receipt.transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::NutzapSent);
        assert_eq!(tx.invoice_ref.as_deref(), Some("npub1bob"));
    }

    /// Holds every quote request for 200ms.
    struct SlowQuotes {
        dev: DevMint,
        entered: tokio::sync::Notify,
    }

    #[async_trait]
    impl MintClient for SlowQuotes {
        async fn info(&self, mint: &MintUrl) -> Result<MintInfo, MintError> {
            self.dev.info(mint).await
        }

        async fn create_quote(
            &self,
            mint: &MintUrl,
            amount: u64,
            description: &str,
        ) -> Result<MintQuote, MintError> {
            self.entered.notify_one();
            tokio::time::sleep(Duration::from_millis(200)).await;
            self.dev.create_quote(mint, amount, description).await
        }

        async fn check_quote(&self, mint: &MintUrl, quote_id: &str) -> Result<QuoteStatus, MintError> {
            self.dev.check_quote(mint, quote_id).await
        }

        async fn mint(&self, mint: &MintUrl, quote_id: &str) -> Result<Vec<Token>, MintError> {
            self.dev.mint(mint, quote_id).await
        }

        async fn melt(
            &self,
            mint: &MintUrl,
            inputs: &[Token],
            invoice: &str,
        ) -> Result<MeltResponse, MintError> {
            self.dev.melt(mint, inputs, invoice).await
        }

        async fn swap(
            &self,
            mint: &MintUrl,
            inputs: &[Token],
            outputs: &[u64],
        ) -> Result<Vec<Token>, MintError> {
            self.dev.swap(mint, inputs, outputs).await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_waits_out_invoice_request() {
        let client = Arc::new(SlowQuotes {
            dev: DevMint::new(),
            entered: tokio::sync::Notify::new(),
        });
        let config = WalletConfig {
            default_mints: vec![MINT.to_string()],
            ..WalletConfig::default()
        };
        let wallet = Wallet::new("alice", config, client.clone(), Arc::new(MemoryStore::new()));
        wallet.load().await.unwrap();

        let request = tokio::spawn({
            let wallet = wallet.clone();
            async move { wallet.generate_invoice(500, "late").await }
        });
        client.entered.notified().await;
        wallet.shutdown().await;

        let result = request.await.unwrap();
        assert!(matches!(
            result,
            Err(WalletError::NotReady(WalletStatus::Uninitialized))
        ));
        assert_eq!(wallet.active_monitors(), 0);

        wallet.load().await.unwrap();
        assert!(wallet.pending_invoices().is_empty());
        assert_eq!(wallet.active_monitors(), 0);
    }

    #[tokio::test]
    async fn storage_failure_applies_nothing() {
        let dev = Arc::new(DevMint::new());
        let store = Arc::new(MemoryStore::new());
        let wallet = ready_wallet(dev.clone(), store.clone()).await;
        fund(&wallet, &dev, 16).await;
        let log_len = wallet.transactions(100).len();

        store.set_fail_writes(true);
        let err = wallet.send_ecash(16, None).await.unwrap_err();
        assert!(matches!(err, WalletError::Storage(_)));
        assert_eq!(wallet.balance(), 16);
        assert_eq!(wallet.transactions(100).len(), log_len);
    }

    #[tokio::test]
    async fn pay_invoice_melts_and_keeps_change() {
        let dev = Arc::new(DevMint::new().with_melt_fee(1));
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        fund(&wallet, &dev, 128).await;

        let payee = MintUrl::parse("https://payee.example").unwrap();
        let quote = dev.create_quote(&payee, 100, "rent").await.unwrap();

        let paid = wallet.pay_invoice(&quote.invoice, None).await.unwrap();
        assert_eq!(paid.amount, 100);
        assert_eq!(paid.fee_paid, 1);
        assert_eq!(wallet.balance(), 27);

        let tx = wallet.transaction(&paid.transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::Send);
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.fee, 1);
    }

    #[tokio::test]
    async fn rejected_melt_leaves_ledger_untouched() {
        let dev = Arc::new(DevMint::new().with_melt_fee(50));
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        fund(&wallet, &dev, 128).await;
        let before = wallet.tokens();

        let quote = dev.create_quote(&mint(), 100, "").await.unwrap();
        let err = wallet.pay_invoice(&quote.invoice, None).await.unwrap_err();
        assert!(matches!(
            err,
            WalletError::Mint(MintError::InsufficientInputs { .. })
        ));
        assert_eq!(wallet.tokens(), before);
        assert_eq!(wallet.transactions(1)[0].status, TransactionStatus::Failed);
    }

    #[tokio::test]
    async fn remove_mint_refused_while_invoice_pending() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        let invoice = wallet.generate_invoice(50, "tip jar").await.unwrap();

        let err = wallet.remove_mint(MINT).await.unwrap_err();
        assert!(matches!(err, WalletError::MintHasPendingInvoices { count: 1, .. }));

        wallet.shutdown().await;
        assert_eq!(wallet.active_monitors(), 0);
        assert!(wallet.await_settlement(&invoice.quote_id).await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn invoice_settles_into_ledger() {
        let dev = Arc::new(DevMint::new().with_auto_settle(Duration::from_secs(8)));
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        let mut events = wallet.subscribe();

        let invoice = wallet.generate_invoice(21, "coffee").await.unwrap();
        assert_eq!(wallet.state().pending_invoices, 1);

        let outcome = wallet.await_settlement(&invoice.quote_id).await.unwrap();
        let MonitorOutcome::Settled { transaction_id, amount } = outcome else {
            panic!("unexpected outcome {outcome:?}");
        };
        assert_eq!(amount, 21);
        assert_eq!(wallet.balance(), 21);
        assert!(wallet.pending_invoices().is_empty());

        let tx = wallet.transaction(&transaction_id).unwrap();
        assert_eq!(tx.kind, TransactionKind::Receive);
        assert_eq!(tx.status, TransactionStatus::Completed);

        let mut settled = false;
        while let Ok(event) = events.try_recv() {
            if matches!(event, WalletEvent::InvoiceSettled { .. }) {
                settled = true;
            }
        }
        assert!(settled);
    }

    #[tokio::test]
    async fn add_mint_fetches_info_and_is_idempotent() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;

        let added = wallet.add_mint("https://second.example/").await.unwrap();
        assert_eq!(added.display_name, "Dev Mint (second.example)");
        assert!(added.keyset_version.is_some());

        let again = wallet.add_mint("https://SECOND.example").await.unwrap();
        assert_eq!(again, added);
        assert_eq!(wallet.mints().len(), 2);

        assert!(matches!(
            wallet.add_mint("http://insecure.example").await,
            Err(WalletError::InvalidMintUrl(_))
        ));
    }

    #[tokio::test]
    async fn notices_are_applied_once() {
        let dev = Arc::new(DevMint::new());
        let wallet = ready_wallet(dev.clone(), Arc::new(MemoryStore::new())).await;
        let token = TokenBundle::single(mint(), dev.issue(&mint(), 5), None).encode();

        let nutzap = PaymentNotice::Nutzap {
            event_id: "ev1".into(),
            sender: "npub1bob".into(),
            token,
            comment: Some("gm".into()),
        };
        wallet.handle_notice(nutzap.clone()).await.unwrap();
        wallet.handle_notice(nutzap).await.unwrap();
        assert_eq!(wallet.balance(), 5);

        let zap = PaymentNotice::Zap {
            event_id: "ev2".into(),
            sender: "npub1carol".into(),
            amount: 1000,
            comment: None,
        };
        wallet.handle_notice(zap.clone()).await.unwrap();
        wallet.handle_notice(zap).await.unwrap();
        assert_eq!(wallet.balance(), 5);

        let kinds: Vec<_> = wallet.transactions(10).iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![TransactionKind::ZapReceived, TransactionKind::NutzapReceived]
        );
        assert_eq!(wallet.transactions(1)[0].memo, None);
        assert_eq!(wallet.transactions(2)[1].memo.as_deref(), Some("gm"));
    }
}
