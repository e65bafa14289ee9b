// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Tally Wallet Core Library
//!
//! A local state engine for a multi-mint Chaumian ecash wallet. It holds
//! bearer tokens issued by any number of mints, pays and receives over
//! Lightning through those mints, and keeps a durable, ordered history of
//! everything it did.
//!
//! ## Architecture
//!
//! - **token**: Tokens, their ids, mint URLs and denominations.
//! - **ledger**: The set of unspent tokens. Balance is always derived.
//! - **selection**: Greedy coin selection over the ledger.
//! - **registry**: Mints the user trusts.
//! - **history**: The transaction log.
//! - **settlement**: Pending invoices and the monitors that settle them.
//! - **wallet**: The facade: every operation, one writer at a time.
//! - **session**: Explicit owner of a wallet instance.
//! - **codec** / **invoice**: Token bundle and BOLT-11 formats.
//! - **mint**: The mint client seam and an in-process development mint.
//! - **book** / **store**: What gets persisted, and where.
//!
//! ## Invariants
//!
//! 1. A token is never held twice.
//! 2. Balance equals the sum of held token amounts, per mint and in total.
//! 3. A ledger change and its log entry are persisted together or not at all.
//! 4. Each settled invoice credits the ledger exactly once.

pub mod book;
pub mod codec;
pub mod config;
pub mod error;
pub mod history;
pub mod invoice;
pub mod ledger;
pub mod mint;
pub mod receipts;
pub mod registry;
pub mod selection;
pub mod session;
pub mod settlement;
pub mod store;
pub mod token;
pub mod wallet;

pub use codec::TokenBundle;
pub use config::WalletConfig;
pub use error::{ErrorKind, WalletError, WalletResult};
pub use history::{Transaction, TransactionKind, TransactionStatus};
pub use mint::{DevMint, MintClient};
pub use session::WalletSession;
pub use store::{MemoryStore, SledStore, WalletStore};
pub use token::{MintUrl, Token, TokenId};
pub use wallet::{Wallet, WalletEvent, WalletStatus};
