//! # Ecash Tokens
//!
//! A [`Token`] is a mint-issued bearer credential of fixed denomination. The
//! wallet never interprets `secret` or `signature`; they are opaque strings
//! that only the issuing mint can verify. What the wallet does own is the
//! bookkeeping identity of a token:
//!
//! - [`TokenId`] is content-addressed: `BLAKE3(secret || 0x00 || signature)`
//!   truncated to 16 bytes. Two tokens with the same (secret, signature)
//!   pair always collide on id, which is how global uniqueness is enforced.
//! - [`MintUrl`] is the normalized, validated endpoint of the issuing mint.
//!
//! Denominations are powers of two; [`split_amount`] produces the canonical
//! decomposition used whenever the wallet asks a mint for new outputs.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use thiserror::Error;

// ---------------------------------------------------------------------------
// MintUrl
// ---------------------------------------------------------------------------

/// Reasons a mint endpoint is rejected.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("invalid mint url {url:?}: {reason}")]
pub struct MintUrlError {
    /// The rejected input.
    pub url: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// A validated mint endpoint.
///
/// Only `https` endpoints are accepted. Scheme and host are lowercased and a
/// trailing slash is dropped, so `HTTPS://Mint.Example/` and
/// `https://mint.example` are the same mint.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MintUrl(String);

impl MintUrl {
    /// Validates and normalizes a mint endpoint.
    pub fn parse(input: &str) -> Result<Self, MintUrlError> {
        let reject = |reason| MintUrlError {
            url: input.to_string(),
            reason,
        };

        let trimmed = input.trim().trim_end_matches('/');
        let (scheme, rest) = trimmed
            .split_once("://")
            .ok_or_else(|| reject("missing scheme"))?;
        if !scheme.eq_ignore_ascii_case("https") {
            return Err(reject("mint endpoints must use https"));
        }

        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        if host.is_empty() {
            return Err(reject("missing host"));
        }
        if host.starts_with(':') || host.contains('@') {
            return Err(reject("malformed host"));
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(reject("whitespace in url"));
        }

        Ok(Self(format!("https://{}{}", host.to_ascii_lowercase(), path)))
    }

    /// The normalized URL string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Host (and port, if any) of the endpoint.
    pub fn host(&self) -> &str {
        let rest = &self.0["https://".len()..];
        rest.split('/').next().unwrap_or(rest)
    }
}

impl fmt::Display for MintUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for MintUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MintUrl({})", self.0)
    }
}

impl std::str::FromStr for MintUrl {
    type Err = MintUrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for MintUrl {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for MintUrl {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        MintUrl::parse(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// TokenId
// ---------------------------------------------------------------------------

/// Content-addressed identifier of a single token.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TokenId([u8; 16]);

impl TokenId {
    /// Derives the id of the token carrying `secret` and `signature`.
    pub fn derive(secret: &str, signature: &str) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(secret.as_bytes());
        hasher.update(&[0x00]);
        hasher.update(signature.as_bytes());
        let digest = hasher.finalize();

        let mut id = [0u8; 16];
        id.copy_from_slice(&digest.as_bytes()[..16]);
        Self(id)
    }

    /// Returns the hex-encoded id.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parses a hex-encoded id.
    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        let id: [u8; 16] = bytes
            .try_into()
            .map_err(|_| hex::FromHexError::InvalidStringLength)?;
        Ok(Self(id))
    }
}

impl fmt::Debug for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TokenId({}...)", &self.to_hex()[..12])
    }
}

impl fmt::Display for TokenId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl std::str::FromStr for TokenId {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl Serialize for TokenId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for TokenId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TokenId::from_hex(&raw).map_err(serde::de::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Token
// ---------------------------------------------------------------------------

/// An unspent ecash token held by the wallet.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Token {
    /// Derived from `secret` and `signature`; see [`TokenId::derive`].
    pub id: TokenId,

    /// Denomination in sats. Always positive for tokens in a ledger.
    pub amount: u64,

    /// Opaque secret chosen when the token was blinded.
    pub secret: String,

    /// Opaque unblinded mint signature over `secret`.
    pub signature: String,

    /// The mint that issued this token and alone can redeem it.
    pub mint: MintUrl,
}

impl Token {
    /// Builds a token, deriving its id from `secret` and `signature`.
    pub fn new(
        mint: MintUrl,
        amount: u64,
        secret: impl Into<String>,
        signature: impl Into<String>,
    ) -> Self {
        let secret = secret.into();
        let signature = signature.into();
        Self {
            id: TokenId::derive(&secret, &signature),
            amount,
            secret,
            signature,
            mint,
        }
    }

    /// `true` when `id` matches the (secret, signature) pair.
    pub fn id_is_consistent(&self) -> bool {
        self.id == TokenId::derive(&self.secret, &self.signature)
    }
}

/// Sum of token amounts, `None` on overflow.
pub fn total_amount<'a>(tokens: impl IntoIterator<Item = &'a Token>) -> Option<u64> {
    tokens
        .into_iter()
        .try_fold(0u64, |acc, t| acc.checked_add(t.amount))
}

/// Canonical power-of-two denominations of `amount`, largest first.
///
/// `split_amount(13) == [8, 4, 1]`; `split_amount(0)` is empty.
pub fn split_amount(amount: u64) -> Vec<u64> {
    (0..u64::BITS)
        .rev()
        .map(|bit| 1u64 << bit)
        .filter(|denom| amount & denom != 0)
        .collect()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn mint() -> MintUrl {
        MintUrl::parse("https://mint.example").unwrap()
    }

    #[test]
    fn mint_url_normalizes_case_and_trailing_slash() {
        let a = MintUrl::parse("HTTPS://Mint.Example/").unwrap();
        let b = MintUrl::parse("https://mint.example").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "https://mint.example");
        assert_eq!(a.host(), "mint.example");
    }

    #[test]
    fn mint_url_keeps_path_and_port() {
        let url = MintUrl::parse("https://Mint.Example:3338/Bitcoin").unwrap();
        assert_eq!(url.as_str(), "https://mint.example:3338/Bitcoin");
        assert_eq!(url.host(), "mint.example:3338");
    }

    #[test]
    fn mint_url_rejects_insecure_and_malformed() {
        for bad in [
            "http://mint.example",
            "mint.example",
            "https://",
            "ftp://mint.example",
            "https://mint example",
            "https://user@mint.example",
            "",
        ] {
            assert!(MintUrl::parse(bad).is_err(), "accepted {bad:?}");
        }
    }

    #[test]
    fn mint_url_serde_revalidates() {
        let json = serde_json::to_string(&mint()).unwrap();
        assert_eq!(json, "\"https://mint.example\"");
        let bad: Result<MintUrl, _> = serde_json::from_str("\"http://mint.example\"");
        assert!(bad.is_err());
    }

    #[test]
    fn token_id_is_deterministic() {
        let a = Token::new(mint(), 8, "secret-a", "sig-a");
        let b = Token::new(mint(), 8, "secret-a", "sig-a");
        let c = Token::new(mint(), 8, "secret-a", "sig-b");
        assert_eq!(a.id, b.id);
        assert_ne!(a.id, c.id);
        assert!(a.id_is_consistent());
    }

    #[test]
    fn token_id_separator_prevents_ambiguity() {
        let a = TokenId::derive("ab", "c");
        let b = TokenId::derive("a", "bc");
        assert_ne!(a, b);
    }

    #[test]
    fn token_id_hex_roundtrip() {
        let id = TokenId::derive("s", "c");
        let parsed: TokenId = id.to_hex().parse().unwrap();
        assert_eq!(parsed, id);
        assert!(TokenId::from_hex("abcd").is_err());
    }

    #[test]
    fn split_amount_is_binary_decomposition() {
        assert_eq!(split_amount(13), vec![8, 4, 1]);
        assert_eq!(split_amount(64), vec![64]);
        assert!(split_amount(0).is_empty());
        assert_eq!(split_amount(1000).iter().sum::<u64>(), 1000);
    }

    #[test]
    fn total_amount_detects_overflow() {
        let big = Token::new(mint(), u64::MAX, "a", "a");
        let one = Token::new(mint(), 1, "b", "b");
        assert_eq!(total_amount([&one, &one]), Some(2));
        assert_eq!(total_amount([&big, &one]), None);
    }
}
