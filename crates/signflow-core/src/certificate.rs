//! Completion certificates
//!
//! Generated exactly once, when the last requirement signs. The digest is a
//! pure function of the ordered signature entries plus the completion
//! timestamp, so any party holding the same recorded data can recompute and
//! check it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::model::SignatureRecord;

/// One signature's line in the certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateEntry {
    pub signer_name: String,
    pub signer_email: String,
    pub signed_at: DateTime<Utc>,
    pub ip: String,
    /// Document hash at the moment this signature was captured.
    pub document_hash: String,
}

impl From<&SignatureRecord> for CertificateEntry {
    fn from(record: &SignatureRecord) -> Self {
        CertificateEntry {
            signer_name: record.signer_name.clone(),
            signer_email: record.signer_email.clone(),
            signed_at: record.signed_at,
            ip: record.ip.clone(),
            document_hash: record.document_hash.clone(),
        }
    }
}

/// The immutable record of a completed signing episode.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompletionCertificate {
    pub id: String,
    pub request_id: String,
    /// Chronological by signing time.
    pub entries: Vec<CertificateEntry>,
    pub completed_at: DateTime<Utc>,
    /// Integrity digest over the ordered entries and completion timestamp.
    pub digest: String,
    /// Human-readable attestation referenced in completion communications.
    pub attestation: String,
}

impl CompletionCertificate {
    /// Assemble a certificate from the recorded signatures.
    ///
    /// Entries are sorted chronologically here, so callers may pass them in
    /// any order.
    pub fn build(
        request_id: &str,
        mut entries: Vec<CertificateEntry>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        entries.sort_by(|a, b| {
            a.signed_at
                .cmp(&b.signed_at)
                .then_with(|| a.signer_email.cmp(&b.signer_email))
        });
        let digest = compute_digest(&entries, completed_at);
        let attestation = attestation_text(&entries, completed_at, &digest);
        CompletionCertificate {
            id: Uuid::new_v4().to_string(),
            request_id: request_id.to_string(),
            entries,
            completed_at,
            digest,
            attestation,
        }
    }

    /// Recompute the digest from the stored entries and compare.
    pub fn verify(&self) -> bool {
        compute_digest(&self.entries, self.completed_at) == self.digest
    }
}

/// Digest over the ordered signature list plus completion timestamp.
///
/// Pure function of recorded data; no randomness enters here.
pub fn compute_digest(entries: &[CertificateEntry], completed_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    for entry in entries {
        hasher.update(entry.signer_email.as_bytes());
        hasher.update(entry.signer_name.as_bytes());
        hasher.update(entry.signed_at.to_rfc3339().as_bytes());
        hasher.update(entry.ip.as_bytes());
        hasher.update(entry.document_hash.as_bytes());
    }
    hasher.update(completed_at.to_rfc3339().as_bytes());
    hex::encode(hasher.finalize())
}

fn attestation_text(
    entries: &[CertificateEntry],
    completed_at: DateTime<Utc>,
    digest: &str,
) -> String {
    let signers = entries
        .iter()
        .map(|e| format!("{} <{}>", e.signer_name, e.signer_email))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "This certifies that the document was electronically signed by {} \
         part{} ({}) and completed on {}. Verification digest: {}.",
        entries.len(),
        if entries.len() == 1 { "y" } else { "ies" },
        signers,
        completed_at.to_rfc3339(),
        digest
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use pretty_assertions::assert_eq;

    fn entry(email: &str, offset_minutes: i64, base: DateTime<Utc>) -> CertificateEntry {
        CertificateEntry {
            signer_name: email.split('@').next().unwrap_or(email).to_string(),
            signer_email: email.to_string(),
            signed_at: base + Duration::minutes(offset_minutes),
            ip: "203.0.113.7".to_string(),
            document_hash: "ab".repeat(32),
        }
    }

    #[test]
    fn entries_sorted_chronologically() {
        let base = Utc::now();
        let cert = CompletionCertificate::build(
            "req-1",
            vec![entry("late@x.com", 30, base), entry("early@x.com", 5, base)],
            base + Duration::minutes(31),
        );
        assert_eq!(cert.entries[0].signer_email, "early@x.com");
        assert_eq!(cert.entries[1].signer_email, "late@x.com");
    }

    #[test]
    fn digest_verifies_and_detects_tampering() {
        let base = Utc::now();
        let mut cert = CompletionCertificate::build(
            "req-1",
            vec![entry("a@x.com", 1, base), entry("b@x.com", 2, base)],
            base + Duration::minutes(3),
        );
        assert!(cert.verify());

        cert.entries[0].signer_email = "mallory@x.com".to_string();
        assert!(!cert.verify());
    }

    #[test]
    fn attestation_names_every_signer() {
        let base = Utc::now();
        let cert = CompletionCertificate::build(
            "req-1",
            vec![entry("alice@x.com", 1, base), entry("bob@x.com", 2, base)],
            base + Duration::minutes(3),
        );
        assert!(cert.attestation.contains("alice@x.com"));
        assert!(cert.attestation.contains("bob@x.com"));
        assert!(cert.attestation.contains(&cert.digest));
        assert!(cert.attestation.contains("2 parties"));
    }
}
