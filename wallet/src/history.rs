//! # Transaction Log
//!
//! An ordered, mostly-append record of wallet operations. Entries are kept
//! most-recent-first by timestamp; entries with equal timestamps are ordered
//! by insertion (later insertions first).
//!
//! The only mutation after insertion is finalization: a `Pending` entry may
//! move to `Completed` or `Failed` exactly once. Finalized entries are
//! immutable.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::token::MintUrl;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by [`TransactionLog`] operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LogError {
    /// No entry with this id.
    #[error("transaction not found: {0}")]
    TransactionNotFound(String),

    /// Only `Pending` → `Completed`/`Failed` is allowed. Anything else,
    /// including amending a finalized entry, lands here.
    #[error("transaction {id} cannot move from {status} to {target}")]
    TransactionAlreadyFinalized {
        id: String,
        /// Its current status.
        status: TransactionStatus,
        /// The status asked for.
        target: TransactionStatus,
    },

    /// An entry with this id is already recorded.
    #[error("duplicate transaction id: {0}")]
    DuplicateTransaction(String),
}

// ---------------------------------------------------------------------------
// TransactionKind
// ---------------------------------------------------------------------------

/// What a transaction did.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionKind {
    /// Ecash or Lightning payment out.
    Send,
    /// Ecash redeemed or invoice settled in.
    Receive,
    /// Lightning zap paid out of the ledger.
    ZapSent,
    /// Zap addressed to this wallet.
    ZapReceived,
    /// Peer-to-peer ecash tip sent.
    NutzapSent,
    /// Peer-to-peer ecash tip received.
    NutzapReceived,
    /// Tokens issued against a paid quote.
    Mint,
    /// Tokens redeemed against an external invoice.
    Melt,
    /// Tokens exchanged for fresh ones at the same mint.
    Swap,
}

impl TransactionKind {
    /// The direction value moves for this kind. Swaps are net-neutral and
    /// are recorded as incoming.
    pub fn direction(self) -> Direction {
        match self {
            Self::Send | Self::ZapSent | Self::NutzapSent | Self::Melt => Direction::Outgoing,
            Self::Receive | Self::ZapReceived | Self::NutzapReceived | Self::Mint | Self::Swap => {
                Direction::Incoming
            }
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Send => "send",
            Self::Receive => "receive",
            Self::ZapSent => "zap_sent",
            Self::ZapReceived => "zap_received",
            Self::NutzapSent => "nutzap_sent",
            Self::NutzapReceived => "nutzap_received",
            Self::Mint => "mint",
            Self::Melt => "melt",
            Self::Swap => "swap",
        };
        f.write_str(s)
    }
}

// ---------------------------------------------------------------------------
// TransactionStatus / Direction
// ---------------------------------------------------------------------------

/// Lifecycle state of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionStatus {
    /// Operation in flight.
    Pending,
    /// Operation succeeded.
    Completed,
    /// Operation failed. The ledger was left untouched.
    Failed,
}

impl TransactionStatus {
    /// `true` for `Completed` and `Failed`.
    pub fn is_final(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "Pending"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Whether value entered or left the wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Incoming,
    Outgoing,
}

// ---------------------------------------------------------------------------
// Transaction
// ---------------------------------------------------------------------------

/// One entry in the transaction log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// UUIDv4.
    pub id: String,
    pub kind: TransactionKind,
    /// Amount moved, in sats, excluding `fee`.
    pub amount: u64,
    /// Fee paid, in sats.
    pub fee: u64,
    /// Mint the operation ran against, if any.
    pub mint: Option<MintUrl>,
    /// Invoice, quote id, or event id the operation refers to.
    pub invoice_ref: Option<String>,
    /// Free-form comment supplied by the caller.
    pub memo: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub status: TransactionStatus,
    pub direction: Direction,
    /// Insertion sequence, assigned by the log. Breaks timestamp ties.
    #[serde(default)]
    pub seq: u64,
}

impl Transaction {
    /// A new `Pending` entry stamped now, with the kind's default direction.
    pub fn new(kind: TransactionKind, amount: u64) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            kind,
            amount,
            fee: 0,
            mint: None,
            invoice_ref: None,
            memo: None,
            timestamp: Utc::now(),
            status: TransactionStatus::Pending,
            direction: kind.direction(),
            seq: 0,
        }
    }

    pub fn with_fee(mut self, fee: u64) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_mint(mut self, mint: MintUrl) -> Self {
        self.mint = Some(mint);
        self
    }

    pub fn with_invoice_ref(mut self, reference: impl Into<String>) -> Self {
        self.invoice_ref = Some(reference.into());
        self
    }

    /// Sets the memo. Empty comments are dropped.
    pub fn with_memo(mut self, memo: Option<String>) -> Self {
        self.memo = memo.filter(|m| !m.trim().is_empty());
        self
    }

    /// Marks the entry `Completed` before it is recorded.
    pub fn completed(mut self) -> Self {
        self.status = TransactionStatus::Completed;
        self
    }

    /// Overrides the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ---------------------------------------------------------------------------
// TransactionLog
// ---------------------------------------------------------------------------

/// Most-recent-first record of wallet operations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionLog {
    entries: Vec<Transaction>,
    next_seq: u64,
}

impl TransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts `tx` at its ordered position and returns its id.
    pub fn record(&mut self, mut tx: Transaction) -> Result<String, LogError> {
        if self.get(&tx.id).is_some() {
            return Err(LogError::DuplicateTransaction(tx.id));
        }
        tx.seq = self.next_seq;
        self.next_seq += 1;

        // The new entry has the highest seq, so it goes before every entry
        // that is not strictly newer.
        let index = self
            .entries
            .iter()
            .position(|e| e.timestamp <= tx.timestamp)
            .unwrap_or(self.entries.len());
        let id = tx.id.clone();
        self.entries.insert(index, tx);
        Ok(id)
    }

    /// Finalizes a `Pending` entry.
    pub fn amend(&mut self, id: &str, status: TransactionStatus) -> Result<&Transaction, LogError> {
        self.finalize(id, status, None)
    }

    /// Finalizes a `Pending` entry and records the fee actually paid.
    pub fn amend_with_fee(
        &mut self,
        id: &str,
        status: TransactionStatus,
        fee: u64,
    ) -> Result<&Transaction, LogError> {
        self.finalize(id, status, Some(fee))
    }

    fn finalize(
        &mut self,
        id: &str,
        status: TransactionStatus,
        fee: Option<u64>,
    ) -> Result<&Transaction, LogError> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.id == id)
            .ok_or_else(|| LogError::TransactionNotFound(id.to_string()))?;
        if entry.status.is_final() || !status.is_final() {
            return Err(LogError::TransactionAlreadyFinalized {
                id: id.to_string(),
                status: entry.status,
                target: status,
            });
        }
        entry.status = status;
        if let Some(fee) = fee {
            entry.fee = fee;
        }
        Ok(entry)
    }

    /// Looks up an entry by id.
    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// All entries, most recent first.
    pub fn iter(&self) -> impl Iterator<Item = &Transaction> {
        self.entries.iter()
    }

    /// The `n` most recent entries.
    pub fn recent(&self, n: usize) -> &[Transaction] {
        &self.entries[..n.min(self.entries.len())]
    }

    /// Entries still `Pending`.
    pub fn pending(&self) -> impl Iterator<Item = &Transaction> {
        self.entries
            .iter()
            .filter(|e| e.status == TransactionStatus::Pending)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn most_recent_first() {
        let now = Utc::now();
        let mut log = TransactionLog::new();
        let old = log
            .record(Transaction::new(TransactionKind::Receive, 10).at(now - Duration::seconds(10)))
            .unwrap();
        let new = log
            .record(Transaction::new(TransactionKind::Send, 5).at(now))
            .unwrap();
        // Recorded last but older than both.
        let oldest = log
            .record(Transaction::new(TransactionKind::Mint, 1).at(now - Duration::seconds(60)))
            .unwrap();

        let ids: Vec<_> = log.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![new, old, oldest]);
    }

    #[test]
    fn equal_timestamps_order_by_insertion() {
        let now = Utc::now();
        let mut log = TransactionLog::new();
        let first = log
            .record(Transaction::new(TransactionKind::Receive, 1).at(now))
            .unwrap();
        let second = log
            .record(Transaction::new(TransactionKind::Receive, 2).at(now))
            .unwrap();
        assert_eq!(log.recent(2)[0].id, second);
        assert_eq!(log.recent(2)[1].id, first);
        assert_eq!(log.recent(10).len(), 2);
    }

    #[test]
    fn amend_finalizes_once() {
        let mut log = TransactionLog::new();
        let id = log.record(Transaction::new(TransactionKind::Send, 8)).unwrap();
        assert_eq!(log.pending().count(), 1);

        let tx = log.amend_with_fee(&id, TransactionStatus::Completed, 2).unwrap();
        assert_eq!(tx.status, TransactionStatus::Completed);
        assert_eq!(tx.fee, 2);
        assert_eq!(log.pending().count(), 0);

        let err = log.amend(&id, TransactionStatus::Failed).unwrap_err();
        assert_eq!(
            err,
            LogError::TransactionAlreadyFinalized {
                id: id.clone(),
                status: TransactionStatus::Completed,
                target: TransactionStatus::Failed,
            }
        );
        assert_eq!(log.get(&id).unwrap().status, TransactionStatus::Completed);
    }

    #[test]
    fn amend_rejects_pending_target_and_unknown_ids() {
        let mut log = TransactionLog::new();
        let id = log.record(Transaction::new(TransactionKind::Send, 8)).unwrap();
        assert!(matches!(
            log.amend(&id, TransactionStatus::Pending),
            Err(LogError::TransactionAlreadyFinalized { .. })
        ));
        assert_eq!(log.get(&id).unwrap().status, TransactionStatus::Pending);

        log.amend(&id, TransactionStatus::Completed).unwrap();
        assert_eq!(
            log.amend(&id, TransactionStatus::Pending).unwrap_err(),
            LogError::TransactionAlreadyFinalized {
                id: id.clone(),
                status: TransactionStatus::Completed,
                target: TransactionStatus::Pending,
            }
        );
        assert_eq!(log.get(&id).unwrap().status, TransactionStatus::Completed);

        assert!(matches!(
            log.amend("missing", TransactionStatus::Failed),
            Err(LogError::TransactionNotFound(_))
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut log = TransactionLog::new();
        let tx = Transaction::new(TransactionKind::Swap, 4);
        log.record(tx.clone()).unwrap();
        assert!(matches!(
            log.record(tx),
            Err(LogError::DuplicateTransaction(_))
        ));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn kinds_carry_their_direction() {
        assert_eq!(TransactionKind::ZapSent.direction(), Direction::Outgoing);
        assert_eq!(TransactionKind::NutzapReceived.direction(), Direction::Incoming);
        let tx = Transaction::new(TransactionKind::Melt, 1).with_memo(Some("  ".into()));
        assert_eq!(tx.direction, Direction::Outgoing);
        assert!(tx.memo.is_none());
    }
}
