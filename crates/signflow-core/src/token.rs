//! Signer bearer tokens
//!
//! Each requirement is minted a single-use credential at creation time.
//! Presenting it is the only authentication an anonymous signer needs, so
//! tokens carry 256 bits of OS entropy and are stored hex-encoded.

use rand_core::{OsRng, RngCore};

/// Raw entropy per token.
pub const TOKEN_BYTES: usize = 32;

/// Hex length of an encoded token.
pub const TOKEN_LEN: usize = TOKEN_BYTES * 2;

/// A freshly minted signer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignerToken(String);

impl SignerToken {
    /// Mint a new token from OS randomness.
    pub fn mint() -> Self {
        let mut bytes = [0u8; TOKEN_BYTES];
        OsRng.fill_bytes(&mut bytes);
        SignerToken(hex::encode(bytes))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

/// Cheap shape check before touching storage: 64 lowercase hex characters.
///
/// Anything else can be rejected as invalid without a lookup.
pub fn is_well_formed(token: &str) -> bool {
    token.len() == TOKEN_LEN && token.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase())
}
