//! # Mint Registry
//!
//! The mints this wallet trusts. Adding validates the endpoint (https only)
//! and is idempotent; removing is refused while the ledger still holds
//! tokens issued by the mint, because those tokens would become orphans
//! that nothing can redeem.
//!
//! Registration order is preserved. The first mint registered is the
//! default target for invoice generation.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ledger::TokenLedger;
use crate::token::{MintUrl, MintUrlError};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by registry operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    /// The endpoint failed validation.
    #[error(transparent)]
    InvalidUrl(#[from] MintUrlError),

    /// The mint is not registered.
    #[error("unknown mint: {0}")]
    UnknownMint(MintUrl),

    /// The ledger still holds tokens from this mint.
    #[error("mint {url} still holds {balance} sats")]
    MintHasTokens {
        /// The mint that was being removed.
        url: MintUrl,
        /// Balance still held there.
        balance: u64,
    },
}

// ---------------------------------------------------------------------------
// Mint
// ---------------------------------------------------------------------------

/// A configured mint endpoint.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mint {
    /// Normalized endpoint.
    pub url: MintUrl,
    /// Human-readable name. The host until the mint reports its own.
    pub display_name: String,
    /// Active keyset version last reported by the mint, if known.
    pub keyset_version: Option<String>,
    /// When the mint was registered.
    pub added_at: DateTime<Utc>,
}

impl Mint {
    fn new(url: MintUrl) -> Self {
        Self {
            display_name: url.host().to_string(),
            url,
            keyset_version: None,
            added_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// MintRegistry
// ---------------------------------------------------------------------------

/// Ordered set of registered mints.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MintRegistry {
    mints: Vec<Mint>,
}

impl MintRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Validates and registers `url`.
    ///
    /// Returns the normalized URL and whether it was newly added. Adding a
    /// mint that is already registered is a no-op.
    pub fn add(&mut self, url: &str) -> Result<(MintUrl, bool), RegistryError> {
        let url = MintUrl::parse(url)?;
        let added = self.insert(url.clone());
        Ok((url, added))
    }

    /// Registers an already validated URL. Returns `false` if present.
    pub fn insert(&mut self, url: MintUrl) -> bool {
        if self.contains(&url) {
            return false;
        }
        self.mints.push(Mint::new(url));
        true
    }

    /// Unregisters `url`.
    ///
    /// # Errors
    ///
    /// - [`RegistryError::InvalidUrl`] if `url` does not parse.
    /// - [`RegistryError::UnknownMint`] if it is not registered.
    /// - [`RegistryError::MintHasTokens`] if `ledger` holds a positive
    ///   balance at the mint; the mint stays registered.
    pub fn remove(&mut self, url: &str, ledger: &TokenLedger) -> Result<Mint, RegistryError> {
        let url = MintUrl::parse(url)?;
        let index = self
            .mints
            .iter()
            .position(|m| m.url == url)
            .ok_or_else(|| RegistryError::UnknownMint(url.clone()))?;

        let balance = ledger.balance_of(&url);
        if balance > 0 {
            return Err(RegistryError::MintHasTokens { url, balance });
        }

        Ok(self.mints.remove(index))
    }

    /// Records the name and keyset version a mint reported about itself.
    pub fn update_info(
        &mut self,
        url: &MintUrl,
        display_name: impl Into<String>,
        keyset_version: Option<String>,
    ) -> Result<(), RegistryError> {
        let mint = self
            .mints
            .iter_mut()
            .find(|m| &m.url == url)
            .ok_or_else(|| RegistryError::UnknownMint(url.clone()))?;
        mint.display_name = display_name.into();
        mint.keyset_version = keyset_version;
        Ok(())
    }

    /// Looks up a registered mint.
    pub fn get(&self, url: &MintUrl) -> Option<&Mint> {
        self.mints.iter().find(|m| &m.url == url)
    }

    /// `true` if `url` is registered.
    pub fn contains(&self, url: &MintUrl) -> bool {
        self.get(url).is_some()
    }

    /// The default mint: the first one registered.
    pub fn default_mint(&self) -> Option<&Mint> {
        self.mints.first()
    }

    /// Registered mints in registration order.
    pub fn list(&self) -> &[Mint] {
        &self.mints
    }

    /// Number of registered mints.
    pub fn len(&self) -> usize {
        self.mints.len()
    }

    /// `true` if no mint is registered.
    pub fn is_empty(&self) -> bool {
        self.mints.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::Token;

    #[test]
    fn add_validates_scheme() {
        let mut reg = MintRegistry::new();
        assert!(matches!(
            reg.add("http://mint.example"),
            Err(RegistryError::InvalidUrl(_))
        ));
        assert!(reg.is_empty());
    }

    #[test]
    fn duplicate_add_is_noop() {
        let mut reg = MintRegistry::new();
        let (url, added) = reg.add("https://mint.example").unwrap();
        assert!(added);
        let (again, added) = reg.add("HTTPS://MINT.EXAMPLE/").unwrap();
        assert!(!added);
        assert_eq!(url, again);
        assert_eq!(reg.len(), 1);
        assert_eq!(reg.get(&url).unwrap().display_name, "mint.example");
    }

    #[test]
    fn first_mint_is_default() {
        let mut reg = MintRegistry::new();
        reg.add("https://b.example").unwrap();
        reg.add("https://a.example").unwrap();
        assert_eq!(reg.default_mint().unwrap().url.host(), "b.example");
    }

    #[test]
    fn remove_refuses_while_tokens_remain() {
        let mut reg = MintRegistry::new();
        let (url, _) = reg.add("https://mint.example").unwrap();
        let mut ledger = TokenLedger::new();
        ledger
            .add(vec![Token::new(url.clone(), 8, "s", "c")])
            .unwrap();

        let err = reg.remove("https://mint.example", &ledger).unwrap_err();
        assert_eq!(
            err,
            RegistryError::MintHasTokens {
                url: url.clone(),
                balance: 8
            }
        );
        assert!(reg.contains(&url));

        let empty = TokenLedger::new();
        let removed = reg.remove("https://mint.example", &empty).unwrap();
        assert_eq!(removed.url, url);
        assert!(reg.is_empty());
    }

    #[test]
    fn remove_unknown_mint() {
        let mut reg = MintRegistry::new();
        let err = reg
            .remove("https://nowhere.example", &TokenLedger::new())
            .unwrap_err();
        assert!(matches!(err, RegistryError::UnknownMint(_)));
    }

    #[test]
    fn update_info_sets_metadata() {
        let mut reg = MintRegistry::new();
        let (url, _) = reg.add("https://mint.example").unwrap();
        reg.update_info(&url, "Example Mint", Some("00ab".into()))
            .unwrap();
        let mint = reg.get(&url).unwrap();
        assert_eq!(mint.display_name, "Example Mint");
        assert_eq!(mint.keyset_version.as_deref(), Some("00ab"));
    }
}
