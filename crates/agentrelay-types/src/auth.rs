//! Opaque bearer tokens: generation, hashing, format checks and timing-safe
//! verification.
//!
//! Every function here is pure over the OS random source. Nothing is cached,
//! so the helpers are safe to call from any number of tasks at once.

use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Minimum accepted token length when no explicit minimum is given.
pub const DEFAULT_MIN_TOKEN_LENGTH: usize = 16;

/// Default number of random bytes behind a generated token.
pub const DEFAULT_TOKEN_BYTES: usize = 32;

/// Number of random bytes in a replay-protection nonce.
pub const NONCE_BYTES: usize = 16;

/// Text encoding applied to the random bytes of a generated token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenEncoding {
    /// Lowercase hexadecimal.
    #[default]
    Hex,
    /// Standard base64 alphabet, unpadded. May contain `+` and `/`, which
    /// [`validate_format`] does not accept; use [`TokenEncoding::Base64Url`]
    /// for tokens that must pass the format check.
    Base64,
    /// URL-safe base64 alphabet, unpadded.
    Base64Url,
}

/// Options for [`generate`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenOptions {
    /// Output encoding.
    pub encoding: TokenEncoding,
    /// Number of random bytes (before encoding).
    pub length: usize,
    /// Fixed prefix prepended to the encoded bytes (e.g. `"ar_"`).
    pub prefix: Option<String>,
}

impl Default for TokenOptions {
    fn default() -> Self {
        Self {
            encoding: TokenEncoding::Hex,
            length: DEFAULT_TOKEN_BYTES,
            prefix: None,
        }
    }
}

/// Options for [`validate_format`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormatOptions {
    /// Prefix the token must start with, if any.
    pub prefix: Option<String>,
    /// Minimum total length, prefix included.
    pub min_length: usize,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            prefix: None,
            min_length: DEFAULT_MIN_TOKEN_LENGTH,
        }
    }
}

impl FormatOptions {
    /// Format options requiring the given prefix (if any) and the default
    /// minimum length.
    pub fn with_prefix(prefix: Option<&str>) -> Self {
        Self {
            prefix: prefix.map(String::from),
            ..Self::default()
        }
    }
}

/// Generate a new random token.
pub fn generate(options: &TokenOptions) -> String {
    let mut bytes = vec![0u8; options.length];
    OsRng.fill_bytes(&mut bytes);

    let encoded = match options.encoding {
        TokenEncoding::Hex => hex::encode(&bytes),
        TokenEncoding::Base64 => base64::engine::general_purpose::STANDARD_NO_PAD.encode(&bytes),
        TokenEncoding::Base64Url => {
            base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&bytes)
        }
    };

    match &options.prefix {
        Some(prefix) => format!("{prefix}{encoded}"),
        None => encoded,
    }
}

/// SHA-256 digest of a token, lowercase hex (64 chars).
pub fn hash(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

/// Compare a candidate token with the expected one in constant time.
///
/// Equal-length inputs are compared over every byte regardless of where the
/// first mismatch is. Inputs of different length are rejected before any byte
/// is looked at, which reveals whether the lengths match but nothing about the
/// contents.
pub fn verify(candidate: &str, expected: &str) -> bool {
    let candidate = candidate.as_bytes();
    let expected = expected.as_bytes();
    if candidate.len() != expected.len() {
        return false;
    }
    candidate.ct_eq(expected).into()
}

/// Hash `candidate` and compare it with a stored digest from [`hash`].
///
/// Both sides are always 64 hex chars, so the length check in [`verify`]
/// never fires for well-formed digests.
pub fn verify_hashed(candidate: &str, expected_hash: &str) -> bool {
    verify(&hash(candidate), expected_hash)
}

/// Check that a token is well-formed.
///
/// Rejects a missing token, any whitespace, tokens shorter than
/// `options.min_length`, characters outside `[A-Za-z0-9_-]`, and a missing
/// required prefix.
pub fn validate_format(token: Option<&str>, options: &FormatOptions) -> bool {
    let Some(token) = token else {
        return false;
    };

    if token.chars().any(char::is_whitespace) {
        return false;
    }
    if token.chars().count() < options.min_length {
        return false;
    }
    if !token.chars().all(is_token_char) {
        return false;
    }
    if let Some(prefix) = &options.prefix {
        if !token.starts_with(prefix.as_str()) {
            return false;
        }
    }
    true
}

fn is_token_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

/// Generate a replay-protection nonce: 16 random bytes as 32 hex chars.
pub fn generate_nonce() -> String {
    let mut bytes = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_default_is_hex() {
        let token = generate(&TokenOptions::default());
        assert_eq!(token.len(), DEFAULT_TOKEN_BYTES * 2);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_generated_tokens_pass_format_and_verify() {
        for encoding in [TokenEncoding::Hex, TokenEncoding::Base64Url] {
            for prefix in [None, Some("ar_".to_string())] {
                let options = TokenOptions {
                    encoding,
                    length: 24,
                    prefix: prefix.clone(),
                };
                let token = generate(&options);
                let fmt = FormatOptions::with_prefix(prefix.as_deref());
                assert!(validate_format(Some(&token), &fmt), "{token}");
                assert!(verify(&token, &token));
                assert!(!verify(&token, &format!("{token}x")));
            }
        }
    }

    #[test]
    fn test_generate_with_prefix() {
        let token = generate(&TokenOptions {
            prefix: Some("ar_".to_string()),
            ..TokenOptions::default()
        });
        assert!(token.starts_with("ar_"));
        assert_eq!(token.len(), 3 + 64);
    }

    #[test]
    fn test_generate_base64_length() {
        let token = generate(&TokenOptions {
            encoding: TokenEncoding::Base64,
            length: 30,
            prefix: None,
        });
        // 30 bytes -> 40 base64 chars, no padding
        assert_eq!(token.len(), 40);
        assert!(!token.contains('='));
    }

    #[test]
    fn test_generate_is_random() {
        let a = generate(&TokenOptions::default());
        let b = generate(&TokenOptions::default());
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_deterministic_and_distinct() {
        assert_eq!(hash("token-a-0123456789"), hash("token-a-0123456789"));
        assert_ne!(hash("token-a-0123456789"), hash("token-b-0123456789"));
        assert_eq!(hash("anything").len(), 64);
        // Well-known SHA-256 vector
        assert_eq!(
            hash("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify_mismatches() {
        assert!(!verify("aaaaaaaaaaaaaaaa", "aaaaaaaaaaaaaaab"));
        assert!(!verify("baaaaaaaaaaaaaaa", "aaaaaaaaaaaaaaaa"));
        assert!(!verify("short", "longer-token"));
        assert!(!verify("", "x"));
        assert!(verify("", ""));
    }

    #[test]
    fn test_verify_hashed() {
        let token = generate(&TokenOptions::default());
        let digest = hash(&token);
        assert!(verify_hashed(&token, &digest));
        assert!(!verify_hashed("wrong-token-value-123", &digest));
    }

    #[test]
    fn test_validate_format_rejections() {
        let opts = FormatOptions::default();
        assert!(!validate_format(None, &opts));
        assert!(!validate_format(Some(""), &opts));
        assert!(!validate_format(Some("short_token"), &opts));
        assert!(!validate_format(Some("has a space in the token"), &opts));
        assert!(!validate_format(Some("tab\tseparated_token_value"), &opts));
        assert!(!validate_format(Some("trailing_newline_token\n"), &opts));
        assert!(!validate_format(Some("bad+chars/in=token!!"), &opts));
        assert!(validate_format(Some("abcdefghijklmnop"), &opts));
        assert!(validate_format(Some("with-dash_and_underscore"), &opts));
    }

    #[test]
    fn test_validate_format_min_length() {
        let opts = FormatOptions {
            prefix: None,
            min_length: 4,
        };
        assert!(validate_format(Some("abcd"), &opts));
        assert!(!validate_format(Some("abc"), &opts));
    }

    #[test]
    fn test_validate_format_prefix() {
        let opts = FormatOptions::with_prefix(Some("ar_"));
        assert!(validate_format(Some("ar_0123456789abcdef"), &opts));
        assert!(!validate_format(Some("xx_0123456789abcdef"), &opts));
        // Prefix is optional when none is required
        assert!(validate_format(
            Some("ar_0123456789abcdef"),
            &FormatOptions::default()
        ));
    }

    #[test]
    fn test_nonce() {
        let n1 = generate_nonce();
        let n2 = generate_nonce();
        assert_eq!(n1.len(), 32);
        assert!(n1.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(n1, n2);
    }
}
