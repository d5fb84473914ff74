//! Signature request state machine
//!
//! All mutating operations are serialized per request through conditional
//! UPDATEs: a transition only happens for the caller whose statement
//! affected a row, and only that caller runs the follow-up side effects.
//! Notifications are queued after commit; they can never roll back a
//! committed transition.

use chrono::Utc;
use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiError;
use crate::models::{RequestDetail, RequestSummary, SigningView};
use crate::notify::{Notification, Notifier};
use crate::proposals::{ProposalDirectory, ProposalStatus};
use crate::store::{self, RequestRow, RequirementRow};
use signflow_core::{
    integrity, token, CertificateEntry, CompletionCertificate, CreateRequest, EngineError,
    RequestStatus, SignatureRecord, SignerStatus, SigningOrder,
};

/// Capture context for a signing call: where the signature came from.
#[derive(Debug, Clone)]
pub struct SigningContext {
    pub image: Option<String>,
    pub ip: String,
    pub user_agent: String,
    pub geolocation: Option<String>,
}

/// Result of a successful sign call.
#[derive(Debug, Clone, Copy)]
pub struct SignOutcome {
    /// True when this signature was the last one outstanding.
    pub complete: bool,
}

#[derive(Clone)]
pub struct SignatureEngine {
    db: SqlitePool,
    proposals: Arc<dyn ProposalDirectory>,
    notifier: Notifier,
}

fn corrupt(what: &str) -> ApiError {
    ApiError::Internal(anyhow::anyhow!("corrupt {what} row in storage"))
}

/// Shared liveness checks for the signer surface. Requirement state is
/// checked before request state so a signer who already acted gets the
/// accurate terminal answer even on a closed request.
fn check_live(requirement: &RequirementRow, request: &RequestRow) -> Result<(), EngineError> {
    match requirement.status() {
        Some(SignerStatus::Signed) => return Err(EngineError::AlreadySigned),
        Some(SignerStatus::Declined) => return Err(EngineError::AlreadyDeclined),
        _ => {}
    }
    match request.status() {
        Some(status) if status.is_active() => {}
        _ => return Err(EngineError::RequestClosed),
    }
    if request.expires_at < Utc::now() {
        return Err(EngineError::RequestExpired);
    }
    Ok(())
}

impl SignatureEngine {
    pub fn new(db: SqlitePool, proposals: Arc<dyn ProposalDirectory>, notifier: Notifier) -> Self {
        Self {
            db,
            proposals,
            notifier,
        }
    }

    /// Create a signature request against a finalized document.
    ///
    /// The request, its requirements, the first notification wave and the
    /// move to `in_progress` are one transaction; nothing is created on any
    /// failure. The active-request invariant is enforced twice: a friendly
    /// pre-check and the partial unique index for races.
    pub async fn create_request(
        &self,
        document_id: &str,
        actor: &str,
        input: CreateRequest,
    ) -> Result<RequestDetail, ApiError> {
        let valid = input.validate()?;
        let proposal = self.proposals.fetch_for_actor(document_id, actor).await?;
        if proposal.status != ProposalStatus::Finalized {
            return Err(EngineError::DocumentNotFinalized.into());
        }
        if store::has_active_request(&self.db, document_id).await? {
            return Err(EngineError::ActiveRequestExists.into());
        }

        let document_hash = integrity::hash_document(&proposal.content);
        let now = Utc::now();
        let expires_at = now + chrono::Duration::hours(valid.expires_in_hours);
        let planned = valid.plan_signers();
        let request_id = Uuid::new_v4().to_string();

        let mut tx = self.db.begin().await?;
        if let Err(e) = store::insert_request(
            &mut *tx,
            &request_id,
            document_id,
            valid.kind,
            valid.order,
            &document_hash,
            actor,
            now,
            expires_at,
            valid.reminder.as_ref(),
        )
        .await
        {
            return Err(if store::is_unique_violation(&e) {
                EngineError::ActiveRequestExists.into()
            } else {
                e.into()
            });
        }
        for signer in &planned {
            store::insert_requirement(
                &mut *tx,
                &Uuid::new_v4().to_string(),
                &request_id,
                &signer.email,
                &signer.name,
                signer.position,
                signer.token.as_str(),
            )
            .await?;
        }
        let wave = store::mark_first_wave_sent(&mut tx, &request_id, valid.order).await?;
        store::transition_request(
            &mut *tx,
            &request_id,
            &[RequestStatus::Pending],
            RequestStatus::InProgress,
        )
        .await?;
        tx.commit().await?;

        self.proposals
            .set_status(document_id, ProposalStatus::ReviewPending)
            .await?;
        for signer in &wave {
            self.notifier.enqueue(Notification::Invite {
                email: signer.email.clone(),
                name: signer.name.clone(),
                document_title: proposal.title.clone(),
                requester_name: actor.to_string(),
                token: signer.token.clone(),
            });
        }
        tracing::info!(
            "Created signature request {} for document {} with {} signer(s)",
            request_id,
            document_id,
            planned.len()
        );

        self.request_detail(&request_id).await
    }

    /// Exchange a token for the signer's view of the request. Advances the
    /// requirement to `viewed`; repeated views change nothing further.
    pub async fn verify_token(&self, token_str: &str) -> Result<SigningView, ApiError> {
        let (requirement, request) = self.load_by_token(token_str).await?;
        check_live(&requirement, &request)?;

        let order = request.order().ok_or_else(|| corrupt("request"))?;
        let your_turn = match order {
            SigningOrder::Parallel => true,
            SigningOrder::Sequential => {
                store::count_unsigned_before(&self.db, &request.id, requirement.position).await?
                    == 0
            }
        };

        store::mark_viewed(&self.db, &requirement.id).await?;
        let signer_status = match requirement.status() {
            Some(status) if status.advances_on_view() => SignerStatus::Viewed,
            Some(status) => status,
            None => return Err(corrupt("requirement")),
        };

        let proposal = self.proposals.fetch(&request.document_id).await?;
        Ok(SigningView {
            document_title: proposal.title,
            document_content: proposal.content,
            signer_name: requirement.name,
            signer_email: requirement.email,
            signer_status,
            request_status: request.status().ok_or_else(|| corrupt("request"))?,
            kind: signflow_core::SignatureKind::parse(&request.kind)
                .ok_or_else(|| corrupt("request"))?,
            order,
            expires_at: request.expires_at,
            your_turn,
        })
    }

    /// Record a signature. The document hash is recomputed at this moment;
    /// a mismatch rejects the signature and flags the request for review.
    pub async fn sign(
        &self,
        token_str: &str,
        ctx: SigningContext,
    ) -> Result<SignOutcome, ApiError> {
        let (requirement, request) = self.load_by_token(token_str).await?;
        check_live(&requirement, &request)?;
        let order = request.order().ok_or_else(|| corrupt("request"))?;

        if order == SigningOrder::Sequential
            && store::count_unsigned_before(&self.db, &request.id, requirement.position).await? > 0
        {
            return Err(EngineError::NotYourTurn.into());
        }

        let proposal = self.proposals.fetch(&request.document_id).await?;
        if !integrity::verify_document(&proposal.content, &request.document_hash) {
            store::flag_request(&self.db, &request.id, Utc::now()).await?;
            tracing::error!(
                "Integrity failure on request {}: document {} changed after signing began",
                request.id,
                request.document_id
            );
            return Err(EngineError::IntegrityFailure.into());
        }

        let now = Utc::now();
        let record = SignatureRecord {
            id: Uuid::new_v4().to_string(),
            request_id: request.id.clone(),
            requirement_id: requirement.id.clone(),
            document_id: request.document_id.clone(),
            signer_email: requirement.email.clone(),
            signer_name: requirement.name.clone(),
            image: ctx.image,
            ip: ctx.ip,
            user_agent: ctx.user_agent,
            geolocation: ctx.geolocation,
            document_hash: request.document_hash.clone(),
            signed_at: now,
        };

        let mut tx = self.db.begin().await?;
        if !store::mark_signed(&mut *tx, &requirement.id, now).await? {
            // Lost the race for this token; report what actually happened.
            tx.rollback().await?;
            return Err(self.token_race_error(&requirement.id).await?);
        }
        store::insert_signature(&mut *tx, &record).await?;

        let mut certificate: Option<CompletionCertificate> = None;
        let mut next_signer: Option<RequirementRow> = None;
        if store::count_not_signed(&mut *tx, &request.id).await? == 0 {
            // The conditional completion decides which of two racing final
            // signers generates the certificate.
            if store::set_completed(&mut *tx, &request.id, now).await? {
                let signatures = store::list_signatures(&mut *tx, &request.id).await?;
                let entries: Vec<CertificateEntry> = signatures
                    .into_iter()
                    .map(|s| CertificateEntry::from(&s.into_record()))
                    .collect();
                let built = CompletionCertificate::build(&request.id, entries, now);
                store::insert_certificate(&mut *tx, &built).await?;
                store::set_certificate_ref(&mut *tx, &request.id, &built.id).await?;
                certificate = Some(built);
            }
        } else if order == SigningOrder::Sequential {
            next_signer = store::advance_next_signer(&mut tx, &request.id).await?;
        }
        tx.commit().await?;

        if let Some(certificate) = &certificate {
            self.proposals
                .set_status(&request.document_id, ProposalStatus::Signed)
                .await?;
            self.fan_out_completion(&request, &proposal.title, certificate)
                .await?;
            tracing::info!("Signature request {} completed", request.id);
        } else if let Some(next) = &next_signer {
            self.notifier.enqueue(Notification::Invite {
                email: next.email.clone(),
                name: next.name.clone(),
                document_title: proposal.title.clone(),
                requester_name: request.created_by.clone(),
                token: next.token.clone(),
            });
        }

        Ok(SignOutcome {
            complete: certificate.is_some(),
        })
    }

    /// Decline the request. One decline closes the entire campaign; prior
    /// signatures stay on record but no certificate is generated.
    pub async fn decline(&self, token_str: &str, reason: Option<String>) -> Result<(), ApiError> {
        let (requirement, request) = self.load_by_token(token_str).await?;
        check_live(&requirement, &request)?;
        let proposal = self.proposals.fetch(&request.document_id).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;
        if !store::mark_declined(&mut *tx, &requirement.id, now, reason.as_deref()).await? {
            tx.rollback().await?;
            return Err(self.token_race_error(&requirement.id).await?);
        }
        store::transition_request(
            &mut *tx,
            &request.id,
            &[RequestStatus::Pending, RequestStatus::InProgress],
            RequestStatus::Declined,
        )
        .await?;
        tx.commit().await?;

        self.proposals
            .set_status(&request.document_id, ProposalStatus::Rejected)
            .await?;
        self.notifier.enqueue(Notification::Declined {
            requester_email: request.created_by.clone(),
            document_title: proposal.title,
            signer_name: requirement.name.clone(),
            reason,
        });
        tracing::info!(
            "Signature request {} declined by {}",
            request.id,
            requirement.email
        );
        Ok(())
    }

    /// Cancel an active request. Allowed for the creator or an organization
    /// admin; completed requests can never be cancelled.
    pub async fn cancel(&self, request_id: &str, actor: &str) -> Result<RequestStatus, ApiError> {
        let request = store::fetch_request(&self.db, request_id)
            .await?
            .ok_or_else(|| ApiError::RequestNotFound(request_id.to_string()))?;
        let proposal = self.proposals.fetch(&request.document_id).await?;

        let allowed = actor == request.created_by
            || self.proposals.is_org_admin(&proposal.org_id, actor).await?;
        if !allowed {
            return Err(EngineError::AccessDenied.into());
        }

        if !store::transition_request(
            &self.db,
            request_id,
            &[RequestStatus::Pending, RequestStatus::InProgress],
            RequestStatus::Cancelled,
        )
        .await?
        {
            return Err(EngineError::RequestClosed.into());
        }

        // Revert the document to its pre-signing status.
        self.proposals
            .set_status(&request.document_id, ProposalStatus::Finalized)
            .await?;
        tracing::info!("Signature request {} cancelled by {}", request_id, actor);
        Ok(RequestStatus::Cancelled)
    }

    /// Renudge every signer who was notified but has not acted. Signers not
    /// yet reached under sequential order are left alone.
    pub async fn send_reminder(&self, request_id: &str, actor: &str) -> Result<usize, ApiError> {
        let request = store::fetch_request(&self.db, request_id)
            .await?
            .ok_or_else(|| ApiError::RequestNotFound(request_id.to_string()))?;
        let proposal = self
            .proposals
            .fetch_for_actor(&request.document_id, actor)
            .await?;

        match request.status() {
            Some(status) if status.is_active() => {}
            // Everyone already signed; there is nobody left to nudge.
            Some(RequestStatus::Completed) => {
                return Err(EngineError::NoPendingSigners.into());
            }
            _ => return Err(EngineError::RequestClosed.into()),
        }

        let targets = store::reminder_targets(&self.db, request_id).await?;
        if targets.is_empty() {
            return Err(EngineError::NoPendingSigners.into());
        }

        store::touch_last_reminder(&self.db, request_id, Utc::now()).await?;
        for target in &targets {
            self.notifier.enqueue(Notification::Reminder {
                email: target.email.clone(),
                name: target.name.clone(),
                document_title: proposal.title.clone(),
                token: target.token.clone(),
            });
        }
        tracing::info!(
            "Reminded {} signer(s) on request {}",
            targets.len(),
            request_id
        );
        Ok(targets.len())
    }

    /// Management view of one request. Requires organization membership.
    pub async fn get_request(
        &self,
        request_id: &str,
        actor: &str,
    ) -> Result<RequestDetail, ApiError> {
        let request = store::fetch_request(&self.db, request_id)
            .await?
            .ok_or_else(|| ApiError::RequestNotFound(request_id.to_string()))?;
        self.proposals
            .fetch_for_actor(&request.document_id, actor)
            .await?;
        self.request_detail(request_id).await
    }

    /// All requests ever made against a document, newest first. Requires
    /// organization membership.
    pub async fn list_requests(
        &self,
        document_id: &str,
        actor: &str,
    ) -> Result<Vec<RequestSummary>, ApiError> {
        self.proposals.fetch_for_actor(document_id, actor).await?;
        let rows = store::list_requests_for_document(&self.db, document_id).await?;
        let mut summaries = Vec::with_capacity(rows.len());
        for row in rows {
            let requirements = store::list_requirements(&self.db, &row.id).await?;
            let signed_count = requirements
                .iter()
                .filter(|r| r.status() == Some(SignerStatus::Signed))
                .count();
            let request = row.into_request().ok_or_else(|| corrupt("request"))?;
            summaries.push(RequestSummary {
                id: request.id,
                kind: request.kind,
                order: request.order,
                status: request.status,
                created_at: request.created_at,
                expires_at: request.expires_at,
                signer_count: requirements.len(),
                signed_count,
            });
        }
        Ok(summaries)
    }

    async fn load_by_token(
        &self,
        token_str: &str,
    ) -> Result<(RequirementRow, RequestRow), ApiError> {
        if !token::is_well_formed(token_str) {
            return Err(EngineError::TokenInvalid.into());
        }
        let requirement = store::fetch_requirement_by_token(&self.db, token_str)
            .await?
            .ok_or(EngineError::TokenInvalid)?;
        let request = store::fetch_request(&self.db, &requirement.request_id)
            .await?
            .ok_or(EngineError::TokenInvalid)?;
        Ok((requirement, request))
    }

    /// After losing a conditional token transition, report the terminal
    /// state the winner left behind.
    async fn token_race_error(&self, requirement_id: &str) -> Result<ApiError, ApiError> {
        let current = store::fetch_requirement(&self.db, requirement_id)
            .await?
            .ok_or(EngineError::TokenInvalid)?;
        Ok(match current.status() {
            Some(SignerStatus::Signed) => EngineError::AlreadySigned.into(),
            Some(SignerStatus::Declined) => EngineError::AlreadyDeclined.into(),
            _ => EngineError::Conflict.into(),
        })
    }

    async fn fan_out_completion(
        &self,
        request: &RequestRow,
        document_title: &str,
        certificate: &CompletionCertificate,
    ) -> Result<(), ApiError> {
        self.notifier.enqueue(Notification::Completed {
            email: request.created_by.clone(),
            name: request.created_by.clone(),
            document_title: document_title.to_string(),
            certificate_id: certificate.id.clone(),
            digest: certificate.digest.clone(),
        });
        for requirement in store::list_requirements(&self.db, &request.id).await? {
            self.notifier.enqueue(Notification::Completed {
                email: requirement.email,
                name: requirement.name,
                document_title: document_title.to_string(),
                certificate_id: certificate.id.clone(),
                digest: certificate.digest.clone(),
            });
        }
        Ok(())
    }

    async fn request_detail(&self, request_id: &str) -> Result<RequestDetail, ApiError> {
        let row = store::fetch_request(&self.db, request_id)
            .await?
            .ok_or_else(|| ApiError::RequestNotFound(request_id.to_string()))?;
        let requirements = store::list_requirements(&self.db, request_id).await?;
        let certificate = match store::fetch_certificate(&self.db, request_id).await? {
            Some(cert_row) => Some(
                cert_row
                    .into_certificate()
                    .ok_or_else(|| corrupt("certificate"))?,
            ),
            None => None,
        };
        let request = row.into_request().ok_or_else(|| corrupt("request"))?;
        let signers = requirements
            .into_iter()
            .map(|r| r.into_requirement().ok_or_else(|| corrupt("requirement")))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(RequestDetail::assemble(request, signers, certificate))
    }
}
