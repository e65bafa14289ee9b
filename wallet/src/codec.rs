//! # Token Bundle Codec
//!
//! The portable, copy-pasteable form of a set of tokens:
//!
//! ```text
//! cashuA<base64url(JSON)>
//! ```
//!
//! where the JSON payload is
//!
//! ```json
//! {"token":[{"mint":"https://..","proofs":[{"amount":8,"secret":"..","C":".."}]}],
//!  "memo":"thanks","unit":"sat"}
//! ```
//!
//! Decoding accepts an optional `cashu:` URI prefix, padded or unpadded
//! base64, and either base64 alphabet. Everything the wallet relies on is
//! validated here: known version prefix, non-empty entries, positive
//! amounts, https mint URLs and the `sat` unit.

use base64::alphabet;
use base64::engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig};
use base64::Engine;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::config::{TOKEN_PREFIX_V3, TOKEN_URI_SCHEME, UNIT};
use crate::token::{total_amount, MintUrl, MintUrlError, Token};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a bundle string could not be decoded.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("unrecognized token prefix")]
    UnknownPrefix,

    #[error("invalid base64 payload: {0}")]
    Base64(String),

    #[error("invalid token payload: {0}")]
    Json(String),

    #[error("token bundle is empty")]
    Empty,

    #[error("token amount must be positive")]
    ZeroAmount,

    #[error("token bundle amount overflows")]
    Overflow,

    #[error("unsupported unit {0:?}")]
    UnsupportedUnit(String),

    #[error(transparent)]
    InvalidMint(#[from] MintUrlError),
}

// ---------------------------------------------------------------------------
// Engines
// ---------------------------------------------------------------------------

const ENCODE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_encode_padding(false),
);

const DECODE_URL_SAFE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

const DECODE_STANDARD: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

// ---------------------------------------------------------------------------
// Wire Format
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
struct WireBundle {
    token: Vec<WireEntry>,
    #[serde(default)]
    memo: Option<String>,
    #[serde(default)]
    unit: Option<String>,
}

#[derive(Deserialize)]
struct WireEntry {
    mint: String,
    proofs: Vec<WireProof>,
}

#[derive(Deserialize)]
struct WireProof {
    amount: u64,
    secret: String,
    #[serde(rename = "C")]
    c: String,
}

// ---------------------------------------------------------------------------
// TokenBundle
// ---------------------------------------------------------------------------

/// Tokens from one mint inside a bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BundleEntry {
    pub mint: MintUrl,
    pub tokens: Vec<Token>,
}

/// A decoded token bundle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TokenBundle {
    pub entries: Vec<BundleEntry>,
    pub memo: Option<String>,
}

impl TokenBundle {
    /// A bundle of tokens from a single mint.
    pub fn single(mint: MintUrl, tokens: Vec<Token>, memo: Option<String>) -> Self {
        Self {
            entries: vec![BundleEntry { mint, tokens }],
            memo,
        }
    }

    /// Sum over every token in the bundle, `None` on overflow.
    pub fn total(&self) -> Option<u64> {
        total_amount(self.tokens())
    }

    /// Every token, entry by entry.
    pub fn tokens(&self) -> impl Iterator<Item = &Token> {
        self.entries.iter().flat_map(|e| e.tokens.iter())
    }

    /// Encodes the bundle as `cashuA...`.
    pub fn encode(&self) -> String {
        let entries: Vec<Value> = self
            .entries
            .iter()
            .map(|entry| {
                let proofs: Vec<Value> = entry
                    .tokens
                    .iter()
                    .map(|t| json!({ "amount": t.amount, "secret": t.secret, "C": t.signature }))
                    .collect();
                json!({ "mint": entry.mint.as_str(), "proofs": proofs })
            })
            .collect();

        let mut payload = json!({ "token": entries, "unit": UNIT });
        if let (Some(memo), Some(obj)) = (&self.memo, payload.as_object_mut()) {
            obj.insert("memo".into(), Value::String(memo.clone()));
        }
        format!("{TOKEN_PREFIX_V3}{}", ENCODE.encode(payload.to_string()))
    }

    /// Decodes and validates a bundle string.
    pub fn decode(input: &str) -> Result<Self, CodecError> {
        let trimmed = input.trim();
        let trimmed = strip_prefix_ignore_case(trimmed, TOKEN_URI_SCHEME).unwrap_or(trimmed);
        let payload = trimmed
            .strip_prefix(TOKEN_PREFIX_V3)
            .ok_or(CodecError::UnknownPrefix)?;

        let bytes = DECODE_URL_SAFE
            .decode(payload)
            .or_else(|_| DECODE_STANDARD.decode(payload))
            .map_err(|e| CodecError::Base64(e.to_string()))?;
        let wire: WireBundle =
            serde_json::from_slice(&bytes).map_err(|e| CodecError::Json(e.to_string()))?;

        if let Some(unit) = wire.unit.filter(|u| u != UNIT) {
            return Err(CodecError::UnsupportedUnit(unit));
        }

        let mut entries = Vec::with_capacity(wire.token.len());
        for entry in wire.token {
            if entry.proofs.is_empty() {
                continue;
            }
            let mint = MintUrl::parse(&entry.mint)?;
            let mut tokens = Vec::with_capacity(entry.proofs.len());
            for proof in entry.proofs {
                if proof.amount == 0 {
                    return Err(CodecError::ZeroAmount);
                }
                tokens.push(Token::new(mint.clone(), proof.amount, proof.secret, proof.c));
            }
            entries.push(BundleEntry { mint, tokens });
        }

        if entries.is_empty() {
            return Err(CodecError::Empty);
        }
        let bundle = Self {
            entries,
            memo: wire.memo,
        };
        bundle.total().ok_or(CodecError::Overflow)?;
        Ok(bundle)
    }
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
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

    fn bundle() -> TokenBundle {
        TokenBundle::single(
            mint(),
            vec![
                Token::new(mint(), 8, "secret-1", "02aa"),
                Token::new(mint(), 2, "secret-2", "02bb"),
            ],
            Some("thanks".into()),
        )
    }

    #[test]
    fn encoded_bundle_decodes_to_same_tokens() {
        let original = bundle();
        let encoded = original.encode();
        assert!(encoded.starts_with("cashuA"));

        let decoded = TokenBundle::decode(&encoded).unwrap();
        assert_eq!(decoded, original);
        assert_eq!(decoded.total(), Some(10));
    }

    #[test]
    fn uri_prefix_and_padding_are_tolerated() {
        let encoded = bundle().encode();
        let uri = format!("CASHU:{encoded}");
        assert_eq!(TokenBundle::decode(&uri).unwrap(), bundle());

        let payload = &encoded["cashuA".len()..];
        let bytes = DECODE_URL_SAFE.decode(payload).unwrap();
        let padded = format!(
            "cashuA{}",
            base64::engine::general_purpose::STANDARD.encode(bytes)
        );
        assert_eq!(TokenBundle::decode(&padded).unwrap(), bundle());
    }

    #[test]
    fn decodes_foreign_json_shape() {
        let json = r#"{"token":[{"mint":"https://Mint.Example/","proofs":[
            {"id":"009a1f293253e41e","amount":4,"secret":"abc","C":"02cd"}]}]}"#;
        let encoded = format!("cashuA{}", ENCODE.encode(json));
        let decoded = TokenBundle::decode(&encoded).unwrap();
        assert_eq!(decoded.entries[0].mint, mint());
        assert_eq!(decoded.total(), Some(4));
        assert!(decoded.memo.is_none());
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(
            TokenBundle::decode("cashuB1234").unwrap_err(),
            CodecError::UnknownPrefix
        );
        assert!(matches!(
            TokenBundle::decode("cashuA!!!not-base64"),
            Err(CodecError::Base64(_))
        ));
        let not_json = format!("cashuA{}", ENCODE.encode("hello"));
        assert!(matches!(
            TokenBundle::decode(&not_json),
            Err(CodecError::Json(_))
        ));
    }

    #[test]
    fn semantic_checks() {
        let enc = |json: &str| format!("cashuA{}", ENCODE.encode(json));

        let empty = enc(r#"{"token":[]}"#);
        assert_eq!(TokenBundle::decode(&empty).unwrap_err(), CodecError::Empty);

        let zero = enc(r#"{"token":[{"mint":"https://m.example","proofs":[{"amount":0,"secret":"s","C":"c"}]}]}"#);
        assert_eq!(TokenBundle::decode(&zero).unwrap_err(), CodecError::ZeroAmount);

        let insecure = enc(r#"{"token":[{"mint":"http://m.example","proofs":[{"amount":1,"secret":"s","C":"c"}]}]}"#);
        assert!(matches!(
            TokenBundle::decode(&insecure),
            Err(CodecError::InvalidMint(_))
        ));

        let usd = enc(r#"{"token":[{"mint":"https://m.example","proofs":[{"amount":1,"secret":"s","C":"c"}]}],"unit":"usd"}"#);
        assert_eq!(
            TokenBundle::decode(&usd).unwrap_err(),
            CodecError::UnsupportedUnit("usd".into())
        );
    }
}
