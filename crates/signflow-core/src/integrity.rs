//! Document integrity hashing
//!
//! The same fingerprint is taken twice: once when a request is created and
//! again at every signing attempt. A mismatch means the document changed
//! underneath an active request and the signature must be rejected.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 fingerprint of document text, hex-encoded.
pub fn hash_document(content: &str) -> String {
    hex::encode(Sha256::digest(content.as_bytes()))
}

/// True when the document text still matches a previously stored fingerprint.
pub fn verify_document(content: &str, expected_hash: &str) -> bool {
    hash_document(content) == expected_hash
}


#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: hashing is deterministic.
        #[test]
        fn hash_deterministic(content in ".{0,512}") {
            prop_assert_eq!(hash_document(&content), hash_document(&content));
        }

        /// Property: any single-character change produces a different hash.
        #[test]
        fn hash_changes_on_edit(content in "[a-z ]{1,128}", extra in "[0-9]") {
            let edited = format!("{content}{extra}");
            prop_assert_ne!(hash_document(&content), hash_document(&edited));
        }
    }
}
