//! Signature workflow core
//!
//! Domain types and pure rules for multi-party signature requests:
//! request and signer status machines, signer bearer tokens, document
//! integrity hashing, completion certificates, and reminder schedules.
//!
//! Storage and transport live in the API crate; nothing here performs I/O.

pub mod certificate;
pub mod error;
pub mod integrity;
pub mod model;
pub mod request;
pub mod schedule;
pub mod token;

pub use certificate::{CertificateEntry, CompletionCertificate};
pub use error::EngineError;
pub use model::{
    AuthMethod, RequestStatus, SignatureKind, SignatureRecord, SignatureRequest, SignerRequirement,
    SignerStatus, SigningOrder, DEFAULT_EXPIRY_HOURS, MAX_SIGNERS,
};
pub use request::{CreateRequest, PlannedSigner, SignerDraft, ValidCreateRequest};
pub use schedule::ReminderPolicy;
pub use token::SignerToken;
