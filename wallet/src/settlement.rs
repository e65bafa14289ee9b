//! # Settlement Monitor
//!
//! Watches invoices the wallet issued until they are paid or give up.
//!
//! ## Lifecycle
//!
//! ```text
//! Created ──spawn──▶ Polling ──quote settled, tokens applied──▶ Settled
//!                       │
//!                       ├──budget or expiry reached, never paid──▶ Expired
//!                       ├──paid, but tokens could not be applied──▶ Stalled
//!                       └──shutdown signal──────────────────────▶ Cancelled
//! ```
//!
//! Each invoice gets its own tokio task. The task sleeps `poll_interval`
//! between polls (doubled per consecutive transient error, capped at
//! `max_poll_backoff`) and stops after `max_poll_attempts` polls or at the
//! invoice's expiry, whichever comes first. Budgets are per invoice; a mint
//! that hangs or errors only slows its own monitors.
//!
//! Monitors never touch wallet state directly. A settled quote's tokens are
//! handed to a [`SettlementSink`], which queues behind every other writer.
//!
//! Shutdown is a `watch` channel checked at the sleep and before each poll.
//! Once a poll has started, the monitor finishes applying it; cancellation
//! therefore never leaves a half-applied mutation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::WalletConfig;
use crate::error::WalletError;
use crate::mint::{with_timeout, MintClient, MintError, QuoteStatus};
use crate::token::{total_amount, MintUrl, Token};

// ---------------------------------------------------------------------------
// PendingInvoice
// ---------------------------------------------------------------------------

/// An invoice the wallet issued and has not yet seen paid.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingInvoice {
    pub quote_id: String,
    pub amount: u64,
    pub description: String,
    pub mint: MintUrl,
    /// The BOLT-11 invoice handed to the payer.
    pub invoice: String,
    pub expiry: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl PendingInvoice {
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expiry
    }

    /// Time left until expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        (self.expiry - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

// ---------------------------------------------------------------------------
// PollPolicy
// ---------------------------------------------------------------------------

/// Timing budget of a single monitor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub max_backoff: Duration,
    pub call_timeout: Duration,
}

impl From<&WalletConfig> for PollPolicy {
    fn from(config: &WalletConfig) -> Self {
        Self {
            interval: config.poll_interval,
            max_attempts: config.max_poll_attempts,
            max_backoff: config.max_poll_backoff,
            call_timeout: config.mint_timeout,
        }
    }
}

impl PollPolicy {
    /// Delay before the next poll after `consecutive_errors` transient
    /// failures in a row.
    pub fn delay(&self, consecutive_errors: u32) -> Duration {
        let factor = 1u32 << consecutive_errors.min(16);
        self.interval
            .saturating_mul(factor)
            .min(self.max_backoff.max(self.interval))
    }

    /// Wall time the attempt budget allows with no errors.
    pub fn budget(&self) -> Duration {
        self.interval.saturating_mul(self.max_attempts)
    }
}

// ---------------------------------------------------------------------------
// Sink & Outcome
// ---------------------------------------------------------------------------

/// Where monitors deliver their results.
#[async_trait]
pub trait SettlementSink: Send + Sync {
    /// Applies the tokens minted for `invoice`.
    ///
    /// Returns the id of the recorded transaction, or `None` when the
    /// invoice is no longer pending (settled or removed elsewhere).
    async fn settle(
        &self,
        invoice: &PendingInvoice,
        tokens: Vec<Token>,
    ) -> Result<Option<String>, WalletError>;

    /// Drops an invoice that will never be paid. Records nothing.
    async fn expire(&self, invoice: &PendingInvoice) -> Result<(), WalletError>;
}

/// How a monitor ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorOutcome {
    Settled { amount: u64, transaction_id: String },
    Expired { attempts: u32 },
    /// Paid, but the tokens were not applied within the budget. The invoice
    /// is kept and monitoring resumes on the next load.
    Stalled { attempts: u32 },
    Cancelled,
}

// ---------------------------------------------------------------------------
// SettlementMonitor
// ---------------------------------------------------------------------------

/// Registry of running invoice monitors.
pub struct SettlementMonitor {
    client: Arc<dyn MintClient>,
    policy: PollPolicy,
    tasks: DashMap<String, JoinHandle<MonitorOutcome>>,
    shutdown: watch::Sender<bool>,
}

impl SettlementMonitor {
    pub fn new(client: Arc<dyn MintClient>, policy: PollPolicy) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            client,
            policy,
            tasks: DashMap::new(),
            shutdown,
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Starts monitoring `invoice`. Returns `false` if a monitor for the
    /// same quote is already running.
    pub fn spawn(&self, invoice: PendingInvoice, sink: Arc<dyn SettlementSink>) -> bool {
        self.tasks.retain(|_, handle| !handle.is_finished());
        if self.tasks.contains_key(&invoice.quote_id) {
            return false;
        }

        let quote_id = invoice.quote_id.clone();
        let task = run_monitor(
            Arc::clone(&self.client),
            self.policy,
            invoice,
            sink,
            self.shutdown.subscribe(),
        );
        self.tasks.insert(quote_id, tokio::spawn(task));
        true
    }

    /// `true` while a monitor for `quote_id` is running.
    pub fn is_monitoring(&self, quote_id: &str) -> bool {
        self.tasks
            .get(quote_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Number of running monitors.
    pub fn active(&self) -> usize {
        self.tasks.retain(|_, handle| !handle.is_finished());
        self.tasks.len()
    }

    /// Waits for the monitor of `quote_id` to finish.
    pub async fn join(&self, quote_id: &str) -> Option<MonitorOutcome> {
        let (_, handle) = self.tasks.remove(quote_id)?;
        match handle.await {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                warn!(quote_id, error = %e, "settlement monitor panicked");
                None
            }
        }
    }

    /// Stops every monitor and waits for them to exit. Returns how many
    /// were stopped.
    pub async fn cancel_all(&self) -> usize {
        self.shutdown.send_replace(true);

        let quote_ids: Vec<String> = self.tasks.iter().map(|e| e.key().clone()).collect();
        let mut stopped = 0;
        for quote_id in quote_ids {
            if let Some((_, handle)) = self.tasks.remove(&quote_id) {
                if let Err(e) = handle.await {
                    warn!(quote_id = %quote_id, error = %e, "settlement monitor panicked");
                }
                stopped += 1;
            }
        }

        self.shutdown.send_replace(false);
        stopped
    }
}

// ---------------------------------------------------------------------------
// Monitor Task
// ---------------------------------------------------------------------------

enum Poll {
    Pending,
    Transient,
    Gone,
    Done(MonitorOutcome),
}

struct Progress {
    paid: bool,
    minted: Option<Vec<Token>>,
}

async fn run_monitor(
    client: Arc<dyn MintClient>,
    policy: PollPolicy,
    invoice: PendingInvoice,
    sink: Arc<dyn SettlementSink>,
    mut shutdown: watch::Receiver<bool>,
) -> MonitorOutcome {
    // At least one poll, so an invoice that expired while the wallet was
    // offline can still be found paid.
    let window = policy.budget().min(invoice.remaining()).max(policy.interval);
    let deadline = Instant::now() + window;
    let mut progress = Progress {
        paid: false,
        minted: None,
    };
    let mut attempts = 0u32;
    let mut errors = 0u32;

    debug!(
        quote_id = %invoice.quote_id,
        mint = %invoice.mint,
        amount = invoice.amount,
        "settlement monitor started"
    );

    loop {
        let wake = Instant::now() + policy.delay(errors);
        if attempts >= policy.max_attempts || wake > deadline {
            break;
        }

        tokio::select! {
            _ = tokio::time::sleep_until(wake) => {}
            _ = shutdown.changed() => {
                debug!(quote_id = %invoice.quote_id, "settlement monitor cancelled");
                return MonitorOutcome::Cancelled;
            }
        }
        if *shutdown.borrow() {
            return MonitorOutcome::Cancelled;
        }

        attempts += 1;
        match poll_once(client.as_ref(), policy, &invoice, sink.as_ref(), &mut progress).await {
            Poll::Pending => errors = 0,
            Poll::Transient => errors = errors.saturating_add(1),
            Poll::Gone => {
                expire(sink.as_ref(), &invoice).await;
                return MonitorOutcome::Expired { attempts };
            }
            Poll::Done(outcome) => return outcome,
        }
    }

    if progress.paid {
        warn!(
            quote_id = %invoice.quote_id,
            attempts,
            minted = progress.minted.is_some(),
            "invoice paid but not applied within budget; keeping it for resume"
        );
        return MonitorOutcome::Stalled { attempts };
    }

    info!(quote_id = %invoice.quote_id, attempts, "invoice expired unpaid");
    expire(sink.as_ref(), &invoice).await;
    MonitorOutcome::Expired { attempts }
}

async fn poll_once(
    client: &dyn MintClient,
    policy: PollPolicy,
    invoice: &PendingInvoice,
    sink: &dyn SettlementSink,
    progress: &mut Progress,
) -> Poll {
    let quote_id = invoice.quote_id.as_str();

    if !progress.paid {
        let status = with_timeout(
            policy.call_timeout,
            client.check_quote(&invoice.mint, quote_id),
        )
        .await;
        match status {
            Ok(QuoteStatus::Pending) => return Poll::Pending,
            Ok(QuoteStatus::Settled) => {
                info!(quote_id, amount = invoice.amount, "invoice paid");
                progress.paid = true;
            }
            Err(MintError::QuoteNotFound(_)) => {
                info!(quote_id, "mint no longer knows quote");
                return Poll::Gone;
            }
            Err(e) => return classify(quote_id, "quote status check failed", e),
        }
    }

    if progress.minted.is_none() {
        match with_timeout(policy.call_timeout, client.mint(&invoice.mint, quote_id)).await {
            Ok(tokens) => progress.minted = Some(tokens),
            Err(e) => return classify(quote_id, "minting paid quote failed", e),
        }
    }

    let Some(tokens) = progress.minted.clone() else {
        return Poll::Transient;
    };
    let amount = total_amount(&tokens).unwrap_or(invoice.amount);
    match sink.settle(invoice, tokens).await {
        Ok(Some(transaction_id)) => Poll::Done(MonitorOutcome::Settled {
            amount,
            transaction_id,
        }),
        Ok(None) => Poll::Done(MonitorOutcome::Cancelled),
        Err(e) => {
            warn!(quote_id, error = %e, "applying settlement failed");
            Poll::Transient
        }
    }
}

fn classify(quote_id: &str, what: &str, error: MintError) -> Poll {
    warn!(quote_id, error = %error, transient = error.is_transient(), "{what}");
    if error.is_transient() {
        Poll::Transient
    } else {
        Poll::Pending
    }
}

async fn expire(sink: &dyn SettlementSink, invoice: &PendingInvoice) {
    if let Err(e) = sink.expire(invoice).await {
        warn!(quote_id = %invoice.quote_id, error = %e, "dropping expired invoice failed");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
