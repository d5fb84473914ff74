//! Data access for the signature workflow tables
//!
//! Terminal transitions are single conditional UPDATE statements; the
//! affected-row count tells the engine whether it won the transition and
//! therefore owns the follow-up side effect. Every function takes an
//! executor, so the same query runs against the pool or inside a
//! transaction.

use chrono::{DateTime, Utc};
use sqlx::{Executor, FromRow, Sqlite};

use signflow_core::{
    AuthMethod, CompletionCertificate, ReminderPolicy, RequestStatus, SignatureKind,
    SignatureRecord, SignatureRequest, SignerRequirement, SignerStatus, SigningOrder,
};

/// Persisted signature request.
#[derive(Debug, Clone, FromRow)]
pub struct RequestRow {
    pub id: String,
    pub document_id: String,
    pub kind: String,
    pub signing_order: String,
    pub status: String,
    pub document_hash: String,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub certificate_id: Option<String>,
    pub last_reminder_at: Option<DateTime<Utc>>,
    pub reminder_days: Option<String>,
    pub reminder_final_hours: Option<i64>,
    pub flagged_at: Option<DateTime<Utc>>,
}

impl RequestRow {
    pub fn status(&self) -> Option<RequestStatus> {
        RequestStatus::parse(&self.status)
    }

    pub fn order(&self) -> Option<SigningOrder> {
        SigningOrder::parse(&self.signing_order)
    }

    pub fn into_request(self) -> Option<SignatureRequest> {
        let reminder = match (&self.reminder_days, self.reminder_final_hours) {
            (Some(days_json), Some(final_hours)) => Some(ReminderPolicy {
                days_before_expiry: serde_json::from_str(days_json).ok()?,
                final_hours: final_hours as u32,
            }),
            _ => None,
        };
        Some(SignatureRequest {
            kind: SignatureKind::parse(&self.kind)?,
            order: SigningOrder::parse(&self.signing_order)?,
            status: RequestStatus::parse(&self.status)?,
            id: self.id,
            document_id: self.document_id,
            document_hash: self.document_hash,
            created_by: self.created_by,
            created_at: self.created_at,
            expires_at: self.expires_at,
            completed_at: self.completed_at,
            certificate_id: self.certificate_id,
            last_reminder_at: self.last_reminder_at,
            reminder,
            flagged_at: self.flagged_at,
        })
    }
}

/// Persisted signer requirement. The token column stays here; it never
/// enters the core model or any response body.
#[derive(Debug, Clone, FromRow)]
pub struct RequirementRow {
    pub id: String,
    pub request_id: String,
    pub email: String,
    pub name: String,
    pub position: i64,
    pub auth_method: String,
    pub status: String,
    pub token: String,
    pub signed_at: Option<DateTime<Utc>>,
    pub declined_at: Option<DateTime<Utc>>,
    pub decline_reason: Option<String>,
}

impl RequirementRow {
    pub fn status(&self) -> Option<SignerStatus> {
        SignerStatus::parse(&self.status)
    }

    pub fn into_requirement(self) -> Option<SignerRequirement> {
        Some(SignerRequirement {
            auth_method: AuthMethod::parse(&self.auth_method)?,
            status: SignerStatus::parse(&self.status)?,
            id: self.id,
            request_id: self.request_id,
            email: self.email,
            name: self.name,
            position: self.position as u32,
            signed_at: self.signed_at,
            declined_at: self.declined_at,
            decline_reason: self.decline_reason,
        })
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct SignatureRow {
    pub id: String,
    pub request_id: String,
    pub requirement_id: String,
    pub document_id: String,
    pub signer_email: String,
    pub signer_name: String,
    pub image: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub geolocation: Option<String>,
    pub document_hash: String,
    pub signed_at: DateTime<Utc>,
}

impl SignatureRow {
    pub fn into_record(self) -> SignatureRecord {
        SignatureRecord {
            id: self.id,
            request_id: self.request_id,
            requirement_id: self.requirement_id,
            document_id: self.document_id,
            signer_email: self.signer_email,
            signer_name: self.signer_name,
            image: self.image,
            ip: self.ip,
            user_agent: self.user_agent,
            geolocation: self.geolocation,
            document_hash: self.document_hash,
            signed_at: self.signed_at,
        }
    }
}

const REQUEST_COLUMNS: &str = "id, document_id, kind, signing_order, status, document_hash, \
     created_by, created_at, expires_at, completed_at, certificate_id, last_reminder_at, \
     reminder_days, reminder_final_hours, flagged_at";

const REQUIREMENT_COLUMNS: &str = "id, request_id, email, name, position, auth_method, status, \
     token, signed_at, declined_at, decline_reason";

const SIGNATURE_COLUMNS: &str = "id, request_id, requirement_id, document_id, signer_email, \
     signer_name, image, ip, user_agent, geolocation, document_hash, signed_at";

/// Whether a pending or in-progress request exists for the document.
pub async fn has_active_request<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    document_id: &str,
) -> Result<bool, sqlx::Error> {
    let row: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM signature_requests
         WHERE document_id = ? AND status IN ('pending', 'in_progress')",
    )
    .bind(document_id)
    .fetch_optional(exec)
    .await?;
    Ok(row.is_some())
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_request<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    id: &str,
    document_id: &str,
    kind: SignatureKind,
    order: SigningOrder,
    document_hash: &str,
    created_by: &str,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    reminder: Option<&ReminderPolicy>,
) -> Result<(), sqlx::Error> {
    let reminder_days = reminder
        .map(|r| serde_json::to_string(&r.days_before_expiry))
        .transpose()
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query(
        "INSERT INTO signature_requests
             (id, document_id, kind, signing_order, status, document_hash,
              created_by, created_at, expires_at, reminder_days, reminder_final_hours)
         VALUES (?, ?, ?, ?, 'pending', ?, ?, ?, ?, ?, ?)",
    )
    .bind(id)
    .bind(document_id)
    .bind(kind.as_str())
    .bind(order.as_str())
    .bind(document_hash)
    .bind(created_by)
    .bind(created_at.to_rfc3339())
    .bind(expires_at.to_rfc3339())
    .bind(reminder_days)
    .bind(reminder.map(|r| r.final_hours as i64))
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn insert_requirement<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    id: &str,
    request_id: &str,
    email: &str,
    name: &str,
    position: u32,
    token: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO signer_requirements
             (id, request_id, email, name, position, auth_method, status, token)
         VALUES (?, ?, ?, ?, ?, 'email_link', 'pending', ?)",
    )
    .bind(id)
    .bind(request_id)
    .bind(email)
    .bind(name)
    .bind(position as i64)
    .bind(token)
    .execute(exec)
    .await?;
    Ok(())
}

/// Mark the first notification wave `sent`: everyone under parallel order,
/// only the lowest position under sequential. Returns the notified rows.
pub async fn mark_first_wave_sent(
    tx: &mut sqlx::SqliteConnection,
    request_id: &str,
    order: SigningOrder,
) -> Result<Vec<RequirementRow>, sqlx::Error> {
    match order {
        SigningOrder::Parallel => {
            sqlx::query(
                "UPDATE signer_requirements SET status = 'sent'
                 WHERE request_id = ? AND status = 'pending'",
            )
            .bind(request_id)
            .execute(&mut *tx)
            .await?;
        }
        SigningOrder::Sequential => {
            sqlx::query(
                "UPDATE signer_requirements SET status = 'sent'
                 WHERE request_id = ? AND status = 'pending'
                   AND position = (SELECT MIN(position) FROM signer_requirements
                                   WHERE request_id = ? AND status = 'pending')",
            )
            .bind(request_id)
            .bind(request_id)
            .execute(&mut *tx)
            .await?;
        }
    }
    let rows: Vec<RequirementRow> = sqlx::query_as(&format!(
        "SELECT {REQUIREMENT_COLUMNS} FROM signer_requirements
         WHERE request_id = ? AND status = 'sent' ORDER BY position, id"
    ))
    .bind(request_id)
    .fetch_all(&mut *tx)
    .await?;
    Ok(rows)
}

/// Conditional request status transition; the caller owns follow-up side
/// effects only when this returns `true`.
pub async fn transition_request<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
    from: &[RequestStatus],
    to: RequestStatus,
) -> Result<bool, sqlx::Error> {
    let placeholders = vec!["?"; from.len()].join(", ");
    let sql = format!(
        "UPDATE signature_requests SET status = ? WHERE id = ? AND status IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql).bind(to.as_str()).bind(request_id);
    for status in from {
        query = query.bind(status.as_str());
    }
    Ok(query.execute(exec).await?.rows_affected() == 1)
}

pub async fn fetch_request<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
) -> Result<Option<RequestRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {REQUEST_COLUMNS} FROM signature_requests WHERE id = ?"
    ))
    .bind(request_id)
    .fetch_optional(exec)
    .await
}

pub async fn list_requests_for_document<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    document_id: &str,
) -> Result<Vec<RequestRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {REQUEST_COLUMNS} FROM signature_requests
         WHERE document_id = ? ORDER BY created_at DESC, id DESC"
    ))
    .bind(document_id)
    .fetch_all(exec)
    .await
}

pub async fn fetch_requirement_by_token<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    token: &str,
) -> Result<Option<RequirementRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {REQUIREMENT_COLUMNS} FROM signer_requirements WHERE token = ?"
    ))
    .bind(token)
    .fetch_optional(exec)
    .await
}

pub async fn fetch_requirement<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    requirement_id: &str,
) -> Result<Option<RequirementRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {REQUIREMENT_COLUMNS} FROM signer_requirements WHERE id = ?"
    ))
    .bind(requirement_id)
    .fetch_optional(exec)
    .await
}

pub async fn list_requirements<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
) -> Result<Vec<RequirementRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {REQUIREMENT_COLUMNS} FROM signer_requirements
         WHERE request_id = ? ORDER BY position, id"
    ))
    .bind(request_id)
    .fetch_all(exec)
    .await
}

/// Advance a freshly opened link to `viewed`. Idempotent: repeated views
/// change nothing once the requirement left `pending`/`sent`.
pub async fn mark_viewed<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    requirement_id: &str,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE signer_requirements SET status = 'viewed'
         WHERE id = ? AND status IN ('pending', 'sent')",
    )
    .bind(requirement_id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Signers at a strictly lower position who have not signed yet. Non-zero
/// means it is not this signer's turn under sequential order.
pub async fn count_unsigned_before<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
    position: i64,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM signer_requirements
         WHERE request_id = ? AND position < ? AND status != 'signed'",
    )
    .bind(request_id)
    .bind(position)
    .fetch_one(exec)
    .await?;
    Ok(count)
}

/// Consume the token into `signed`. Exactly one caller can win this.
pub async fn mark_signed<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    requirement_id: &str,
    signed_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE signer_requirements SET status = 'signed', signed_at = ?
         WHERE id = ? AND status IN ('sent', 'viewed')",
    )
    .bind(signed_at.to_rfc3339())
    .bind(requirement_id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Consume the token into `declined`. A decline is accepted even before the
/// signer's turn; any live requirement can kill the campaign.
pub async fn mark_declined<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    requirement_id: &str,
    declined_at: DateTime<Utc>,
    reason: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE signer_requirements
         SET status = 'declined', declined_at = ?, decline_reason = ?
         WHERE id = ? AND status IN ('pending', 'sent', 'viewed')",
    )
    .bind(declined_at.to_rfc3339())
    .bind(reason)
    .bind(requirement_id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn insert_signature<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    record: &SignatureRecord,
) -> Result<(), sqlx::Error> {
    sqlx::query(&format!(
        "INSERT INTO signatures ({SIGNATURE_COLUMNS})
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"
    ))
    .bind(&record.id)
    .bind(&record.request_id)
    .bind(&record.requirement_id)
    .bind(&record.document_id)
    .bind(&record.signer_email)
    .bind(&record.signer_name)
    .bind(&record.image)
    .bind(&record.ip)
    .bind(&record.user_agent)
    .bind(&record.geolocation)
    .bind(&record.document_hash)
    .bind(record.signed_at.to_rfc3339())
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn count_not_signed<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
) -> Result<i64, sqlx::Error> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM signer_requirements WHERE request_id = ? AND status != 'signed'",
    )
    .bind(request_id)
    .fetch_one(exec)
    .await?;
    Ok(count)
}

pub async fn list_signatures<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
) -> Result<Vec<SignatureRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {SIGNATURE_COLUMNS} FROM signatures
         WHERE request_id = ? ORDER BY signed_at, id"
    ))
    .bind(request_id)
    .fetch_all(exec)
    .await
}

/// Notify the next sequential signer: move the lowest pending position to
/// `sent` and return it. `None` when nobody is left to advance.
pub async fn advance_next_signer(
    tx: &mut sqlx::SqliteConnection,
    request_id: &str,
) -> Result<Option<RequirementRow>, sqlx::Error> {
    let next: Option<(String,)> = sqlx::query_as(
        "SELECT id FROM signer_requirements
         WHERE request_id = ? AND status = 'pending'
         ORDER BY position, id LIMIT 1",
    )
    .bind(request_id)
    .fetch_optional(&mut *tx)
    .await?;

    let Some((requirement_id,)) = next else {
        return Ok(None);
    };

    let updated = sqlx::query(
        "UPDATE signer_requirements SET status = 'sent' WHERE id = ? AND status = 'pending'",
    )
    .bind(&requirement_id)
    .execute(&mut *tx)
    .await?;
    if updated.rows_affected() != 1 {
        return Ok(None);
    }

    fetch_requirement(&mut *tx, &requirement_id).await
}

pub async fn set_completed<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
    completed_at: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE signature_requests SET status = 'completed', completed_at = ?
         WHERE id = ? AND status = 'in_progress'",
    )
    .bind(completed_at.to_rfc3339())
    .bind(request_id)
    .execute(exec)
    .await?;
    Ok(result.rows_affected() == 1)
}

pub async fn insert_certificate<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    certificate: &CompletionCertificate,
) -> Result<(), sqlx::Error> {
    let entries_json = serde_json::to_string(&certificate.entries)
        .map_err(|e| sqlx::Error::Encode(Box::new(e)))?;
    sqlx::query(
        "INSERT INTO certificates (id, request_id, entries_json, completed_at, digest, attestation)
         VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&certificate.id)
    .bind(&certificate.request_id)
    .bind(entries_json)
    .bind(certificate.completed_at.to_rfc3339())
    .bind(&certificate.digest)
    .bind(&certificate.attestation)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn set_certificate_ref<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
    certificate_id: &str,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE signature_requests SET certificate_id = ? WHERE id = ?")
        .bind(certificate_id)
        .bind(request_id)
        .execute(exec)
        .await?;
    Ok(())
}

#[derive(Debug, Clone, FromRow)]
pub struct CertificateRow {
    pub id: String,
    pub request_id: String,
    pub entries_json: String,
    pub completed_at: DateTime<Utc>,
    pub digest: String,
    pub attestation: String,
}

impl CertificateRow {
    pub fn into_certificate(self) -> Option<CompletionCertificate> {
        Some(CompletionCertificate {
            entries: serde_json::from_str(&self.entries_json).ok()?,
            id: self.id,
            request_id: self.request_id,
            completed_at: self.completed_at,
            digest: self.digest,
            attestation: self.attestation,
        })
    }
}

pub async fn fetch_certificate<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
) -> Result<Option<CertificateRow>, sqlx::Error> {
    sqlx::query_as(
        "SELECT id, request_id, entries_json, completed_at, digest, attestation
         FROM certificates WHERE request_id = ?",
    )
    .bind(request_id)
    .fetch_optional(exec)
    .await
}

/// Flag a request for human review after an integrity failure. Keeps the
/// earliest flag timestamp.
pub async fn flag_request<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
    flagged_at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE signature_requests SET flagged_at = ? WHERE id = ? AND flagged_at IS NULL",
    )
    .bind(flagged_at.to_rfc3339())
    .bind(request_id)
    .execute(exec)
    .await?;
    Ok(())
}

pub async fn touch_last_reminder<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
    at: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE signature_requests SET last_reminder_at = ? WHERE id = ?")
        .bind(at.to_rfc3339())
        .bind(request_id)
        .execute(exec)
        .await?;
    Ok(())
}

/// Signers who were notified but have not acted. Reminders renudge only
/// these, so sequential signers are never contacted before their turn.
pub async fn reminder_targets<'e>(
    exec: impl Executor<'e, Database = Sqlite>,
    request_id: &str,
) -> Result<Vec<RequirementRow>, sqlx::Error> {
    sqlx::query_as(&format!(
        "SELECT {REQUIREMENT_COLUMNS} FROM signer_requirements
         WHERE request_id = ? AND status IN ('sent', 'viewed')
         ORDER BY position, id"
    ))
    .bind(request_id)
    .fetch_all(exec)
    .await
}

/// True when a database error is a unique-constraint violation, which on
/// creation means another active request won the race for this document.
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
