//! # Token Ledger
//!
//! The authoritative set of unspent tokens and the only source of balance
//! truth. Every balance the wallet reports is a sum over this set; nothing
//! caches a total that could drift from it.
//!
//! `add` and `remove` are all-or-nothing: every precondition is checked
//! before the first token is inserted or dropped, so a failed call leaves
//! the ledger exactly as it was.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::selection::{select_for_amount, Selection, SelectionError};
use crate::token::{MintUrl, Token, TokenId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors that can occur while mutating the ledger.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    /// A token failed validation (zero amount, inconsistent id).
    #[error("invalid token {id}: {reason}")]
    InvalidToken {
        /// The offending token.
        id: TokenId,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// The token is already held, or appears twice in the same batch.
    #[error("duplicate token {0}")]
    DuplicateToken(TokenId),

    /// A token scheduled for removal is not in the ledger.
    #[error("token not found: {0}")]
    TokenNotFound(TokenId),

    /// Adding the batch would overflow the total balance.
    #[error("balance overflow: current {current}, adding {adding}")]
    Overflow {
        /// Balance before the failed add.
        current: u64,
        /// Sum of the rejected batch (saturated).
        adding: u64,
    },
}

// ---------------------------------------------------------------------------
// TokenLedger
// ---------------------------------------------------------------------------

/// The set of unspent tokens, keyed by [`TokenId`].
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenLedger {
    tokens: BTreeMap<TokenId, Token>,
}

impl TokenLedger {
    /// Creates an empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a batch of tokens atomically.
    ///
    /// Returns the sum of the added amounts.
    ///
    /// # Errors
    ///
    /// - [`LedgerError::InvalidToken`] for a zero amount or an id that does
    ///   not match the token's (secret, signature).
    /// - [`LedgerError::DuplicateToken`] if a token is already held or
    ///   repeated within `tokens`.
    /// - [`LedgerError::Overflow`] if the balance would exceed `u64::MAX`.
    pub fn add(&mut self, tokens: Vec<Token>) -> Result<u64, LedgerError> {
        let mut seen = HashSet::with_capacity(tokens.len());
        let mut adding = Some(0u64);

        for token in &tokens {
            if token.amount == 0 {
                return Err(LedgerError::InvalidToken {
                    id: token.id,
                    reason: "amount must be positive",
                });
            }
            if !token.id_is_consistent() {
                return Err(LedgerError::InvalidToken {
                    id: token.id,
                    reason: "id does not match secret and signature",
                });
            }
            if self.tokens.contains_key(&token.id) || !seen.insert(token.id) {
                return Err(LedgerError::DuplicateToken(token.id));
            }
            adding = adding.and_then(|sum| sum.checked_add(token.amount));
        }

        let current = self.balance();
        let adding = match adding {
            Some(sum) if current.checked_add(sum).is_some() => sum,
            other => {
                return Err(LedgerError::Overflow {
                    current,
                    adding: other.unwrap_or(u64::MAX),
                })
            }
        };

        for token in tokens {
            self.tokens.insert(token.id, token);
        }
        Ok(adding)
    }

    /// Removes tokens atomically and returns them.
    ///
    /// Repeated ids in `ids` count once.
    ///
    /// # Errors
    ///
    /// [`LedgerError::TokenNotFound`] if any id is absent; nothing is removed.
    pub fn remove(&mut self, ids: &[TokenId]) -> Result<Vec<Token>, LedgerError> {
        let mut unique = Vec::with_capacity(ids.len());
        let mut seen = HashSet::with_capacity(ids.len());
        for id in ids {
            if !self.tokens.contains_key(id) {
                return Err(LedgerError::TokenNotFound(*id));
            }
            if seen.insert(*id) {
                unique.push(*id);
            }
        }

        Ok(unique
            .into_iter()
            .filter_map(|id| self.tokens.remove(&id))
            .collect())
    }

    /// Total balance over every token.
    pub fn balance(&self) -> u64 {
        self.tokens.values().map(|t| t.amount).sum()
    }

    /// Balance held at one mint.
    pub fn balance_of(&self, mint: &MintUrl) -> u64 {
        self.tokens_of(mint).map(|t| t.amount).sum()
    }

    /// Balance per mint, for every mint holding at least one token.
    pub fn balances_by_mint(&self) -> BTreeMap<MintUrl, u64> {
        let mut out = BTreeMap::new();
        for token in self.tokens.values() {
            *out.entry(token.mint.clone()).or_insert(0) += token.amount;
        }
        out
    }

    /// Every held token, in id order.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.values()
    }

    /// Tokens issued by `mint`.
    pub fn tokens_of<'a>(&'a self, mint: &'a MintUrl) -> impl Iterator<Item = &'a Token> + 'a {
        self.tokens.values().filter(move |t| &t.mint == mint)
    }

    /// Looks up one token.
    pub fn get(&self, id: &TokenId) -> Option<&Token> {
        self.tokens.get(id)
    }

    /// `true` if the token is held.
    pub fn contains(&self, id: &TokenId) -> bool {
        self.tokens.contains_key(id)
    }

    /// Number of tokens held.
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// `true` if no tokens are held.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    // -----------------------------------------------------------------------
    // Selection
    // -----------------------------------------------------------------------

    /// Greedy selection over every token regardless of mint.
    pub fn select_for_amount(&self, target: u64) -> Result<Selection, SelectionError> {
        select_for_amount(self.tokens.values(), target)
    }

    /// Greedy selection over the tokens of one mint.
    pub fn select_at(&self, mint: &MintUrl, target: u64) -> Result<Selection, SelectionError> {
        select_for_amount(self.tokens_of(mint), target)
    }

    /// Greedy selection from a single mint able to cover `target`.
    ///
    /// Uses `preferred` when it covers the target; otherwise the mint with
    /// the largest balance (ties by URL). When no single mint covers the
    /// target the error reports the largest single-mint balance.
    pub fn select_single_mint(
        &self,
        target: u64,
        preferred: Option<&MintUrl>,
    ) -> Result<Selection, SelectionError> {
        if let Some(mint) = preferred {
            if self.balance_of(mint) >= target {
                return self.select_at(mint, target);
            }
        }

        let balances = self.balances_by_mint();
        let best = balances
            .iter()
            .max_by(|a, b| a.1.cmp(b.1).then_with(|| b.0.cmp(a.0)));

        match best {
            Some((mint, balance)) if *balance >= target => self.select_at(mint, target),
            Some((_, balance)) => Err(SelectionError::InsufficientTokens {
                available: *balance,
                requested: target,
            }),
            None => select_for_amount(std::iter::empty::<&Token>(), target),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mint(host: &str) -> MintUrl {
        MintUrl::parse(&format!("https://{host}")).unwrap()
    }

    fn token(m: &MintUrl, amount: u64, tag: &str) -> Token {
        Token::new(m.clone(), amount, format!("secret-{tag}"), format!("sig-{tag}"))
    }

    #[test]
    fn add_and_balance() {
        let m = mint("a.example");
        let mut ledger = TokenLedger::new();
        let added = ledger
            .add(vec![token(&m, 64, "1"), token(&m, 32, "2")])
            .unwrap();
        assert_eq!(added, 96);
        assert_eq!(ledger.balance(), 96);
        assert_eq!(ledger.len(), 2);
    }

    #[test]
    fn zero_amount_rejects_whole_batch() {
        let m = mint("a.example");
        let mut ledger = TokenLedger::new();
        let err = ledger
            .add(vec![token(&m, 8, "ok"), token(&m, 0, "zero")])
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidToken { .. }));
        assert!(ledger.is_empty());
    }

    #[test]
    fn tampered_id_is_invalid() {
        let m = mint("a.example");
        let mut t = token(&m, 8, "x");
        t.signature = "forged".into();
        let mut ledger = TokenLedger::new();
        assert!(matches!(
            ledger.add(vec![t]),
            Err(LedgerError::InvalidToken { .. })
        ));
    }

    #[test]
    fn duplicates_are_rejected() {
        let m = mint("a.example");
        let mut ledger = TokenLedger::new();
        ledger.add(vec![token(&m, 8, "x")]).unwrap();

        let err = ledger.add(vec![token(&m, 8, "x")]).unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateToken(_)));

        let err = ledger
            .add(vec![token(&m, 4, "y"), token(&m, 4, "y")])
            .unwrap_err();
        assert!(matches!(err, LedgerError::DuplicateToken(_)));
        assert_eq!(ledger.balance(), 8);
    }

    #[test]
    fn overflow_is_rejected() {
        let m = mint("a.example");
        let mut ledger = TokenLedger::new();
        ledger.add(vec![token(&m, u64::MAX - 1, "big")]).unwrap();
        let err = ledger.add(vec![token(&m, 2, "tip")]).unwrap_err();
        assert!(matches!(err, LedgerError::Overflow { .. }));
        assert_eq!(ledger.len(), 1);
    }

    #[test]
    fn remove_is_all_or_nothing() {
        let m = mint("a.example");
        let mut ledger = TokenLedger::new();
        let a = token(&m, 8, "a");
        let b = token(&m, 4, "b");
        let ghost = token(&m, 2, "ghost");
        ledger.add(vec![a.clone(), b.clone()]).unwrap();

        let err = ledger.remove(&[a.id, ghost.id]).unwrap_err();
        assert_eq!(err, LedgerError::TokenNotFound(ghost.id));
        assert_eq!(ledger.balance(), 12);

        let removed = ledger.remove(&[a.id, a.id]).unwrap();
        assert_eq!(removed, vec![a]);
        assert_eq!(ledger.balance(), 4);
    }

    #[test]
    fn balance_tracks_every_mutation() {
        let m = mint("a.example");
        let mut ledger = TokenLedger::new();
        let mut expected = 0u64;
        for i in 0..20u64 {
            let t = token(&m, i + 1, &i.to_string());
            expected += t.amount;
            ledger.add(vec![t.clone()]).unwrap();
            if i % 3 == 0 {
                ledger.remove(&[t.id]).unwrap();
                expected -= t.amount;
            }
            assert_eq!(ledger.balance(), expected);
            assert_eq!(ledger.balance(), ledger.tokens().map(|t| t.amount).sum::<u64>());
        }
    }

    #[test]
    fn per_mint_balances() {
        let a = mint("a.example");
        let b = mint("b.example");
        let mut ledger = TokenLedger::new();
        ledger
            .add(vec![token(&a, 8, "1"), token(&b, 16, "2"), token(&a, 2, "3")])
            .unwrap();
        assert_eq!(ledger.balance_of(&a), 10);
        assert_eq!(ledger.balance_of(&b), 16);
        let by_mint = ledger.balances_by_mint();
        assert_eq!(by_mint.get(&a), Some(&10));
        assert_eq!(by_mint.len(), 2);
    }

    #[test]
    fn single_mint_selection_prefers_then_falls_back() {
        let a = mint("a.example");
        let b = mint("b.example");
        let mut ledger = TokenLedger::new();
        ledger
            .add(vec![token(&a, 8, "1"), token(&b, 32, "2"), token(&b, 16, "3")])
            .unwrap();

        let sel = ledger.select_single_mint(8, Some(&a)).unwrap();
        assert!(sel.tokens.iter().all(|t| t.mint == a));

        let sel = ledger.select_single_mint(20, Some(&a)).unwrap();
        assert!(sel.tokens.iter().all(|t| t.mint == b));

        // 56 in total, but no single mint holds 50.
        let err = ledger.select_single_mint(50, None).unwrap_err();
        assert_eq!(
            err,
            SelectionError::InsufficientTokens {
                available: 48,
                requested: 50
            }
        );
    }

    #[test]
    fn ledger_serializes_with_bincode() {
        let m = mint("a.example");
        let mut ledger = TokenLedger::new();
        ledger.add(vec![token(&m, 8, "1"), token(&m, 1, "2")]).unwrap();

        let bytes = bincode::serialize(&ledger).unwrap();
        let back: TokenLedger = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, ledger);
    }
}
