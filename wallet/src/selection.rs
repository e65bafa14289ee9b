//! # Token Selection
//!
//! Chooses which tokens pay for an amount. The rule is greedy-descending:
//! order candidates by amount (largest first, ties by [`TokenId`]) and take
//! a prefix until the running sum reaches the target. That prefix is the
//! minimal-count covering set under the greedy rule, and the id tie-break
//! makes the choice reproducible across runs and processes.
//!
//! Selection is read-only. Callers remove the returned tokens from the
//! ledger only after the operation they were selected for has succeeded.

use std::cmp::Reverse;

use thiserror::Error;

use crate::token::{Token, TokenId};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by [`select_for_amount`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SelectionError {
    /// The candidate tokens do not add up to the target.
    #[error("insufficient tokens: available {available}, requested {requested}")]
    InsufficientTokens {
        /// Sum of every candidate token.
        available: u64,
        /// The target that could not be covered.
        requested: u64,
    },
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// A covering set of tokens for a target amount.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Selection {
    /// Selected tokens, in selection order (largest first).
    pub tokens: Vec<Token>,
    /// Sum of `tokens`. Always `>= target`.
    pub total: u64,
    /// The amount the selection was made for.
    pub target: u64,
}

impl Selection {
    /// Ids of the selected tokens.
    pub fn ids(&self) -> Vec<TokenId> {
        self.tokens.iter().map(|t| t.id).collect()
    }

    /// Amount selected beyond the target.
    pub fn change(&self) -> u64 {
        self.total - self.target
    }

    /// `true` when nothing had to be selected (zero target).
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Selection Logic
// ---------------------------------------------------------------------------

/// Selects a covering subset of `candidates` for `target`.
///
/// Returns [`SelectionError::InsufficientTokens`] without a partial result
/// when the candidates sum to less than `target`. A zero target yields an
/// empty selection.
pub fn select_for_amount<'a, I>(candidates: I, target: u64) -> Result<Selection, SelectionError>
where
    I: IntoIterator<Item = &'a Token>,
{
    let mut ordered: Vec<&Token> = candidates.into_iter().collect();
    let available = ordered
        .iter()
        .fold(0u64, |acc, t| acc.saturating_add(t.amount));

    if available < target {
        return Err(SelectionError::InsufficientTokens {
            available,
            requested: target,
        });
    }

    ordered.sort_by_key(|t| (Reverse(t.amount), t.id));

    let mut tokens = Vec::new();
    let mut total = 0u64;
    for token in ordered {
        if total >= target {
            break;
        }
        total += token.amount;
        tokens.push(token.clone());
    }

    Ok(Selection {
        tokens,
        total,
        target,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::MintUrl;

    fn tokens(amounts: &[u64]) -> Vec<Token> {
        let mint = MintUrl::parse("https://mint.example").unwrap();
        amounts
            .iter()
            .enumerate()
            .map(|(i, a)| Token::new(mint.clone(), *a, format!("s{i}"), format!("c{i}")))
            .collect()
    }

    fn amounts(sel: &Selection) -> Vec<u64> {
        sel.tokens.iter().map(|t| t.amount).collect()
    }

    #[test]
    fn greedy_descending_picks_largest_first() {
        let pool = tokens(&[8, 64, 16, 32]);
        let sel = select_for_amount(&pool, 100).unwrap();
        assert_eq!(amounts(&sel), vec![64, 32, 16]);
        assert_eq!(sel.total, 112);
        assert_eq!(sel.change(), 12);
    }

    #[test]
    fn exact_cover_has_no_change() {
        let pool = tokens(&[1, 2, 4, 8]);
        let sel = select_for_amount(&pool, 12).unwrap();
        assert_eq!(amounts(&sel), vec![8, 4]);
        assert_eq!(sel.change(), 0);
    }

    #[test]
    fn insufficient_returns_no_partial_result() {
        let pool = tokens(&[4, 2]);
        let err = select_for_amount(&pool, 7).unwrap_err();
        assert_eq!(
            err,
            SelectionError::InsufficientTokens {
                available: 6,
                requested: 7
            }
        );
    }

    #[test]
    fn zero_target_selects_nothing() {
        let pool = tokens(&[4]);
        let sel = select_for_amount(&pool, 0).unwrap();
        assert!(sel.is_empty());
        assert_eq!(sel.total, 0);
    }

    #[test]
    fn empty_pool_cannot_cover() {
        let err = select_for_amount(std::iter::empty::<&Token>(), 1).unwrap_err();
        assert!(matches!(err, SelectionError::InsufficientTokens { available: 0, .. }));
    }

    #[test]
    fn ties_break_by_token_id() {
        let pool = tokens(&[8, 8, 8, 8]);
        let first = select_for_amount(&pool, 8).unwrap();

        let mut reversed = pool.clone();
        reversed.reverse();
        let second = select_for_amount(&reversed, 8).unwrap();

        assert_eq!(first.ids(), second.ids());
        let min_id = pool.iter().map(|t| t.id).min().unwrap();
        assert_eq!(first.ids(), vec![min_id]);
    }

    #[test]
    fn selection_covers_whenever_total_suffices() {
        let pool = tokens(&[1, 1, 2, 4, 16, 32]);
        let total: u64 = pool.iter().map(|t| t.amount).sum();
        for target in 0..=total {
            let sel = select_for_amount(&pool, target).unwrap();
            assert!(sel.total >= target);
            // Dropping the last selected token must leave the target uncovered.
            if let Some(last) = sel.tokens.last() {
                assert!(sel.total - last.amount < target);
            }
        }
        assert!(select_for_amount(&pool, total + 1).is_err());
    }
}
