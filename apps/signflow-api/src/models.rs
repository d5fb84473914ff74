//! Wire models for the signflow API
//!
//! Request bodies are parsed once into the core's typed input at the edge;
//! the state machine never sees raw JSON. Response views never include
//! signer tokens.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use signflow_core::{
    AuthMethod, CompletionCertificate, CreateRequest, ReminderPolicy, RequestStatus,
    SignatureKind, SignatureRequest, SignerDraft, SignerRequirement, SignerStatus, SigningOrder,
};

/// Body for creating a signature request against a finalized document.
#[derive(Debug, Clone, Deserialize)]
pub struct CreateSignatureRequestBody {
    pub kind: SignatureKind,
    pub order: SigningOrder,
    pub signers: Vec<SignerBody>,
    #[serde(default)]
    pub reminder: Option<ReminderBody>,
    #[serde(default)]
    pub expires_in_hours: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignerBody {
    pub email: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ReminderBody {
    pub days_before_expiry: Vec<u32>,
    pub final_hours: u32,
}

impl CreateSignatureRequestBody {
    /// Lower the wire body into the core's unvalidated input.
    pub fn into_core(self) -> CreateRequest {
        CreateRequest {
            kind: self.kind,
            order: self.order,
            signers: self
                .signers
                .into_iter()
                .map(|s| SignerDraft {
                    email: s.email,
                    name: s.name,
                })
                .collect(),
            reminder: self.reminder.map(|r| ReminderPolicy {
                days_before_expiry: r.days_before_expiry,
                final_hours: r.final_hours,
            }),
            expires_in_hours: self.expires_in_hours,
        }
    }
}

/// Body for the signer-facing sign call.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SignBody {
    /// Base64 signature image, expected for wet-ink requests.
    #[serde(default)]
    pub signature_image: Option<String>,
    #[serde(default)]
    pub geolocation: Option<String>,
}

/// Body for the signer-facing decline call.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DeclineBody {
    #[serde(default)]
    pub reason: Option<String>,
}

/// One signer as shown to the organization. No token.
#[derive(Debug, Clone, Serialize)]
pub struct RequirementView {
    pub id: String,
    pub email: String,
    pub name: String,
    pub position: u32,
    pub auth_method: AuthMethod,
    pub status: SignerStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

impl From<SignerRequirement> for RequirementView {
    fn from(r: SignerRequirement) -> Self {
        RequirementView {
            id: r.id,
            email: r.email,
            name: r.name,
            position: r.position,
            auth_method: r.auth_method,
            status: r.status,
            signed_at: r.signed_at,
            declined_at: r.declined_at,
            decline_reason: r.decline_reason,
        }
    }
}

/// Full management view of a request.
#[derive(Debug, Clone, Serialize)]
pub struct RequestDetail {
    pub id: String,
    pub document_id: String,
    pub kind: SignatureKind,
    pub order: SigningOrder,
    pub status: RequestStatus,
    pub document_hash: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub flagged: bool,
    pub signers: Vec<RequirementView>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate: Option<CompletionCertificate>,
}

impl RequestDetail {
    pub fn assemble(
        request: SignatureRequest,
        signers: Vec<SignerRequirement>,
        certificate: Option<CompletionCertificate>,
    ) -> Self {
        RequestDetail {
            id: request.id,
            document_id: request.document_id,
            kind: request.kind,
            order: request.order,
            status: request.status,
            document_hash: request.document_hash,
            created_by: request.created_by,
            created_at: request.created_at,
            expires_at: request.expires_at,
            completed_at: request.completed_at,
            last_reminder_at: request.last_reminder_at,
            flagged: request.flagged_at.is_some(),
            signers: signers.into_iter().map(RequirementView::from).collect(),
            certificate,
        }
    }
}

/// One row in the per-document request listing.
#[derive(Debug, Clone, Serialize)]
pub struct RequestSummary {
    pub id: String,
    pub kind: SignatureKind,
    pub order: SigningOrder,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub signer_count: usize,
    pub signed_count: usize,
}

/// What an authenticated-by-token signer sees before acting.
#[derive(Debug, Clone, Serialize)]
pub struct SigningView {
    pub document_title: String,
    pub document_content: String,
    pub signer_name: String,
    pub signer_email: String,
    pub signer_status: SignerStatus,
    pub request_status: RequestStatus,
    pub kind: SignatureKind,
    pub order: SigningOrder,
    pub expires_at: DateTime<Utc>,
    /// False for a sequential signer whose predecessors have not signed.
    pub your_turn: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct SignResponse {
    pub success: bool,
    /// True when this signature completed the whole request.
    pub complete: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeclineResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct RemindResponse {
    pub success: bool,
    pub reminded: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelResponse {
    pub success: bool,
    pub status: RequestStatus,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_body_deserializes_with_defaults() {
        let body: CreateSignatureRequestBody = serde_json::from_str(
            r#"{
                "kind": "click_to_sign",
                "order": "parallel",
                "signers": [{"email": "a@x.com", "name": "A"}]
            }"#,
        )
        .unwrap();
        assert!(body.reminder.is_none());
        assert!(body.expires_in_hours.is_none());
        assert_eq!(body.signers.len(), 1);

        let core = body.into_core();
        assert_eq!(core.order, SigningOrder::Parallel);
        assert_eq!(core.signers[0].email, "a@x.com");
    }

    #[test]
    fn requirement_view_has_no_token_field() {
        let view = RequirementView {
            id: "r1".to_string(),
            email: "a@x.com".to_string(),
            name: "A".to_string(),
            position: 1,
            auth_method: AuthMethod::EmailLink,
            status: SignerStatus::Sent,
            signed_at: None,
            declined_at: None,
            decline_reason: None,
        };
        let json = serde_json::to_string(&view).unwrap();
        assert!(!json.contains("token"));
    }
}
