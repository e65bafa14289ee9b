//! # Wallet Store
//!
//! Persistence contract for [`WalletBook`]s, keyed by owner identity.
//!
//! | Store          | Backing                                  |
//! |----------------|------------------------------------------|
//! | [`SledStore`]  | sled tree `wallets`, `bincode(WalletBook)` |
//! | [`MemoryStore`]| in-process map, same encoding            |
//!
//! `save` writes the whole book in a single insert and flushes before
//! returning, so a book on disk is always one the wallet actually held.
//! A crash before the flush can lose the latest mutation; it cannot split
//! a ledger change from its log entry.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use sled::{Db, Tree};
use thiserror::Error;

use crate::book::WalletBook;
use crate::config::BOOK_VERSION;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    #[error("serialization error: {0}")]
    Serialization(String),

    /// The book was written by a newer schema.
    #[error("unsupported book version {found} (expected <= {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },

    /// Writes are disabled on this store.
    #[error("store rejected write")]
    WriteRejected,
}

pub type StoreResult<T> = Result<T, StoreError>;

// ---------------------------------------------------------------------------
// WalletStore
// ---------------------------------------------------------------------------

/// Read/write contract for persisted wallet books.
pub trait WalletStore: Send + Sync {
    /// The book stored for `owner`, if any.
    fn load(&self, owner: &str) -> StoreResult<Option<WalletBook>>;

    /// Replaces the book stored for `owner`.
    fn save(&self, owner: &str, book: &WalletBook) -> StoreResult<()>;

    /// Removes the book stored for `owner`.
    fn delete(&self, owner: &str) -> StoreResult<()>;
}

fn encode(book: &WalletBook) -> StoreResult<Vec<u8>> {
    bincode::serialize(book).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn decode(bytes: &[u8]) -> StoreResult<WalletBook> {
    let book: WalletBook =
        bincode::deserialize(bytes).map_err(|e| StoreError::Serialization(e.to_string()))?;
    if book.version > BOOK_VERSION {
        return Err(StoreError::UnsupportedVersion {
            found: book.version,
            supported: BOOK_VERSION,
        });
    }
    Ok(book)
}

// ---------------------------------------------------------------------------
// SledStore
// ---------------------------------------------------------------------------

/// sled-backed store.
///
/// Cloning is cheap; clones share the same database handle.
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    wallets: Tree,
}

impl SledStore {
    /// Opens or creates a store at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> StoreResult<Self> {
        Self::from_db(sled::open(path)?)
    }

    /// A store that lives in a temporary directory removed on drop.
    pub fn open_temporary() -> StoreResult<Self> {
        Self::from_db(sled::Config::new().temporary(true).open()?)
    }

    fn from_db(db: Db) -> StoreResult<Self> {
        let wallets = db.open_tree("wallets")?;
        Ok(Self { db, wallets })
    }

    /// Owners with a stored book.
    pub fn owners(&self) -> StoreResult<Vec<String>> {
        self.wallets
            .iter()
            .keys()
            .map(|key| {
                let key = key?;
                String::from_utf8(key.to_vec())
                    .map_err(|e| StoreError::Serialization(e.to_string()))
            })
            .collect()
    }

    /// Flushes every dirty buffer to disk.
    pub fn flush(&self) -> StoreResult<()> {
        self.db.flush()?;
        Ok(())
    }
}

impl WalletStore for SledStore {
    fn load(&self, owner: &str) -> StoreResult<Option<WalletBook>> {
        match self.wallets.get(owner.as_bytes())? {
            Some(bytes) => decode(&bytes).map(Some),
            None => Ok(None),
        }
    }

    fn save(&self, owner: &str, book: &WalletBook) -> StoreResult<()> {
        self.wallets.insert(owner.as_bytes(), encode(book)?)?;
        self.wallets.flush()?;
        Ok(())
    }

    fn delete(&self, owner: &str) -> StoreResult<()> {
        self.wallets.remove(owner.as_bytes())?;
        self.wallets.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryStore
// ---------------------------------------------------------------------------

/// In-memory store for tests and ephemeral wallets.
#[derive(Debug, Default)]
pub struct MemoryStore {
    books: Mutex<HashMap<String, Vec<u8>>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// While set, `save` and `delete` fail with [`StoreError::WriteRejected`].
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected);
        }
        Ok(())
    }
}

impl WalletStore for MemoryStore {
    fn load(&self, owner: &str) -> StoreResult<Option<WalletBook>> {
        self.books
            .lock()
            .get(owner)
            .map(|bytes| decode(bytes))
            .transpose()
    }

    fn save(&self, owner: &str, book: &WalletBook) -> StoreResult<()> {
        self.check_writable()?;
        let bytes = encode(book)?;
        self.books.lock().insert(owner.to_string(), bytes);
        Ok(())
    }

    fn delete(&self, owner: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.books.lock().remove(owner);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{MintUrl, Token};

    fn sample_book() -> WalletBook {
        let mint = MintUrl::parse("https://mint.example").unwrap();
        let mut book = WalletBook::new();
        book.mints.insert(mint.clone());
        book.ledger
            .add(vec![Token::new(mint, 16, "s", "c")])
            .unwrap();
        book
    }

    fn exercise(store: &dyn WalletStore) {
        assert!(store.load("alice").unwrap().is_none());

        let book = sample_book();
        store.save("alice", &book).unwrap();
        assert_eq!(store.load("alice").unwrap(), Some(book));
        assert!(store.load("bob").unwrap().is_none());

        store.delete("alice").unwrap();
        assert!(store.load("alice").unwrap().is_none());
    }

    #[test]
    fn sled_store_contract() {
        let store = SledStore::open_temporary().unwrap();
        exercise(&store);
    }

    #[test]
    fn memory_store_contract() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn sled_store_persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let book = sample_book();
        {
            let store = SledStore::open(dir.path()).unwrap();
            store.save("alice", &book).unwrap();
        }
        let store = SledStore::open(dir.path()).unwrap();
        assert_eq!(store.load("alice").unwrap(), Some(book));
        assert_eq!(store.owners().unwrap(), vec!["alice".to_string()]);
    }

    #[test]
    fn failing_writes_keep_previous_book() {
        let store = MemoryStore::new();
        let book = sample_book();
        store.save("alice", &book).unwrap();

        store.set_fail_writes(true);
        assert!(matches!(
            store.save("alice", &WalletBook::new()),
            Err(StoreError::WriteRejected)
        ));
        assert_eq!(store.load("alice").unwrap(), Some(book));
    }

    #[test]
    fn newer_versions_are_refused() {
        let store = MemoryStore::new();
        let mut book = WalletBook::new();
        book.version = BOOK_VERSION + 1;
        store.save("alice", &book).unwrap();
        assert!(matches!(
            store.load("alice"),
            Err(StoreError::UnsupportedVersion { .. })
        ));
    }
}
