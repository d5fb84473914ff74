//! Domain model for signature requests and their signers
//!
//! Statuses are persisted as lowercase snake_case TEXT, so every enum
//! carries `as_str`/`parse` alongside its serde derive.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Hard cap on signers per request.
pub const MAX_SIGNERS: usize = 20;

/// Default request lifetime when the creator does not choose one (7 days).
pub const DEFAULT_EXPIRY_HOURS: i64 = 168;

/// What kind of signature the request collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    /// Wet-ink equivalent: a drawn or uploaded signature image is expected.
    WetInk,
    /// Simple click-to-sign acknowledgement.
    ClickToSign,
}

impl SignatureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureKind::WetInk => "wet_ink",
            SignatureKind::ClickToSign => "click_to_sign",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "wet_ink" => Some(SignatureKind::WetInk),
            "click_to_sign" => Some(SignatureKind::ClickToSign),
            _ => None,
        }
    }
}

/// Whether signers act one after another or all at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SigningOrder {
    Sequential,
    Parallel,
}

impl SigningOrder {
    pub fn as_str(&self) -> &'static str {
        match self {
            SigningOrder::Sequential => "sequential",
            SigningOrder::Parallel => "parallel",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "sequential" => Some(SigningOrder::Sequential),
            "parallel" => Some(SigningOrder::Parallel),
            _ => None,
        }
    }
}

/// How a signer proves they are the addressee of a requirement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthMethod {
    /// Single-use link delivered to the signer's email address.
    EmailLink,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::EmailLink => "email_link",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email_link" => Some(AuthMethod::EmailLink),
            _ => None,
        }
    }
}

/// Lifecycle of a signature request.
///
/// `Pending → InProgress → Completed | Declined | Cancelled`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Declined,
    Cancelled,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Declined => "declined",
            RequestStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(RequestStatus::Pending),
            "in_progress" => Some(RequestStatus::InProgress),
            "completed" => Some(RequestStatus::Completed),
            "declined" => Some(RequestStatus::Declined),
            "cancelled" => Some(RequestStatus::Cancelled),
            _ => None,
        }
    }

    /// A request still accepting signer actions.
    pub fn is_active(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::InProgress)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }
}

impl std::fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a single signer requirement.
///
/// `Pending → Sent → Viewed → Signed | Declined`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignerStatus {
    Pending,
    Sent,
    Viewed,
    Signed,
    Declined,
}

impl SignerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerStatus::Pending => "pending",
            SignerStatus::Sent => "sent",
            SignerStatus::Viewed => "viewed",
            SignerStatus::Signed => "signed",
            SignerStatus::Declined => "declined",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SignerStatus::Pending),
            "sent" => Some(SignerStatus::Sent),
            "viewed" => Some(SignerStatus::Viewed),
            "signed" => Some(SignerStatus::Signed),
            "declined" => Some(SignerStatus::Declined),
            _ => None,
        }
    }

    /// Terminal per-signer states permanently consume the token.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SignerStatus::Signed | SignerStatus::Declined)
    }

    /// States from which opening the signing link advances to `Viewed`.
    pub fn advances_on_view(&self) -> bool {
        matches!(self, SignerStatus::Pending | SignerStatus::Sent)
    }

    /// States from which a sign or decline is accepted once it is the
    /// signer's turn.
    pub fn is_actionable(&self) -> bool {
        matches!(self, SignerStatus::Sent | SignerStatus::Viewed)
    }
}

impl std::fmt::Display for SignerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One signing campaign against one document version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRequest {
    pub id: String,
    pub document_id: String,
    pub kind: SignatureKind,
    pub order: SigningOrder,
    pub status: RequestStatus,
    /// SHA-256 of the document text as it stood when signing began.
    pub document_hash: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_id: Option<String>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub reminder: Option<crate::schedule::ReminderPolicy>,
    /// Set when an integrity failure was observed; the request needs review.
    pub flagged_at: Option<DateTime<Utc>>,
}

impl SignatureRequest {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at < now
    }
}

/// One signer's obligation within a request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignerRequirement {
    pub id: String,
    pub request_id: String,
    pub email: String,
    pub name: String,
    /// 1..N under sequential order; all 1 under parallel.
    pub position: u32,
    pub auth_method: AuthMethod,
    pub status: SignerStatus,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

/// Immutable record captured at the moment of signing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub id: String,
    pub request_id: String,
    pub requirement_id: String,
    pub document_id: String,
    pub signer_email: String,
    pub signer_name: String,
    /// Optional signature image payload (base64), for wet-ink requests.
    pub image: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub geolocation: Option<String>,
    /// Document hash at signing time; must equal the request's stored hash.
    pub document_hash: String,
    pub signed_at: DateTime<Utc>,
}
