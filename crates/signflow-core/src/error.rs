//! Engine error taxonomy
//!
//! Every failure the state machine can surface, split along the lines the
//! two HTTP surfaces need: precondition violations are management-facing
//! and carry detail, token errors are signer-facing and stay terse.

use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    /// Signature requests may only target finalized documents.
    #[error("Document is not finalized")]
    DocumentNotFinalized,

    /// Another request is already pending or in progress for this document.
    #[error("An active signature request already exists for this document")]
    ActiveRequestExists,

    #[error("Access denied")]
    AccessDenied,

    /// Malformed signer list: count, duplicate or invalid email, empty name.
    #[error("Invalid signer list: {0}")]
    InvalidSigners(String),

    /// Token does not resolve to a signer requirement.
    #[error("Invalid signing link")]
    TokenInvalid,

    #[error("This document has already been signed")]
    AlreadySigned,

    #[error("This document has already been declined")]
    AlreadyDeclined,

    /// Sequential order: an earlier signer has not signed yet.
    #[error("It is not your turn to sign yet")]
    NotYourTurn,

    /// The parent request is cancelled, declined or completed.
    #[error("This signature request is no longer active")]
    RequestClosed,

    #[error("This signature request has expired")]
    RequestExpired,

    /// Reminder requested but every signer already reached a terminal state.
    #[error("No pending signers to remind")]
    NoPendingSigners,

    /// The document content changed after signing began. The signature is
    /// rejected and the request flagged for human review.
    #[error("Document integrity check failed")]
    IntegrityFailure,

    /// Lost a race on a conditional transition; safe to retry.
    #[error("Concurrent update conflict")]
    Conflict,
}
