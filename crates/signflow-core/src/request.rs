//! Typed create-request input
//!
//! Validation happens once, at the API edge, by converting the wire DTO
//! into [`CreateRequest`] and calling [`CreateRequest::validate`]. The
//! state machine only ever sees the resulting [`ValidCreateRequest`].

use crate::error::EngineError;
use crate::model::{SignatureKind, SigningOrder, DEFAULT_EXPIRY_HOURS, MAX_SIGNERS};
use crate::schedule::ReminderPolicy;
use crate::token::SignerToken;
use email_address::EmailAddress;
use std::collections::HashSet;
use std::str::FromStr;

/// One signer as supplied by the requester.
#[derive(Debug, Clone)]
pub struct SignerDraft {
    pub email: String,
    pub name: String,
}

/// Unvalidated creation input.
#[derive(Debug, Clone)]
pub struct CreateRequest {
    pub kind: SignatureKind,
    pub order: SigningOrder,
    pub signers: Vec<SignerDraft>,
    pub reminder: Option<ReminderPolicy>,
    pub expires_in_hours: Option<i64>,
}

/// Creation input that passed validation; fields are normalized.
#[derive(Debug, Clone)]
pub struct ValidCreateRequest {
    pub kind: SignatureKind,
    pub order: SigningOrder,
    pub signers: Vec<SignerDraft>,
    pub reminder: Option<ReminderPolicy>,
    pub expires_in_hours: i64,
}

/// A signer with its assigned position and freshly minted token.
#[derive(Debug, Clone)]
pub struct PlannedSigner {
    pub email: String,
    pub name: String,
    pub position: u32,
    pub token: SignerToken,
}

impl CreateRequest {
    /// Check the signer list and normalize emails and names.
    ///
    /// Rules: 1 to [`MAX_SIGNERS`] signers, each with a well-formed email
    /// (unique case-insensitively) and a non-empty display name.
    pub fn validate(self) -> Result<ValidCreateRequest, EngineError> {
        if self.signers.is_empty() {
            return Err(EngineError::InvalidSigners(
                "at least one signer is required".to_string(),
            ));
        }
        if self.signers.len() > MAX_SIGNERS {
            return Err(EngineError::InvalidSigners(format!(
                "at most {MAX_SIGNERS} signers are allowed, got {}",
                self.signers.len()
            )));
        }

        let mut seen = HashSet::new();
        let mut signers = Vec::with_capacity(self.signers.len());
        for draft in self.signers {
            let email = draft.email.trim().to_ascii_lowercase();
            if EmailAddress::from_str(&email).is_err() {
                return Err(EngineError::InvalidSigners(format!(
                    "invalid email address: {email:?}"
                )));
            }
            if !seen.insert(email.clone()) {
                return Err(EngineError::InvalidSigners(format!(
                    "duplicate signer email: {email}"
                )));
            }
            let name = draft.name.trim().to_string();
            if name.is_empty() {
                return Err(EngineError::InvalidSigners(format!(
                    "signer {email} has no display name"
                )));
            }
            signers.push(SignerDraft { email, name });
        }

        let expires_in_hours = match self.expires_in_hours {
            Some(h) if h <= 0 => {
                return Err(EngineError::InvalidSigners(
                    "expiry must be a positive number of hours".to_string(),
                ))
            }
            Some(h) => h,
            None => DEFAULT_EXPIRY_HOURS,
        };

        Ok(ValidCreateRequest {
            kind: self.kind,
            order: self.order,
            signers,
            reminder: self.reminder,
            expires_in_hours,
        })
    }
}

impl ValidCreateRequest {
    /// Assign sequence positions and mint one token per signer.
    ///
    /// Sequential order numbers signers densely 1..N in the supplied order;
    /// parallel order puts everyone at position 1.
    pub fn plan_signers(&self) -> Vec<PlannedSigner> {
        self.signers
            .iter()
            .enumerate()
            .map(|(i, s)| PlannedSigner {
                email: s.email.clone(),
                name: s.name.clone(),
                position: match self.order {
                    SigningOrder::Sequential => (i + 1) as u32,
                    SigningOrder::Parallel => 1,
                },
                token: SignerToken::mint(),
            })
            .collect()
    }
}
