//! Proposal directory collaborator
//!
//! The engine never reads the platform's proposal tables directly; it goes
//! through this narrow port. The production implementation is backed by the
//! same SQLite database, but nothing in the engine depends on that.

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use uuid::Uuid;

use crate::error::ApiError;
use signflow_core::EngineError;

/// Where a proposal document stands in its own lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    /// Content is frozen; signature requests may target it.
    Finalized,
    /// An active signature request is out for this document.
    ReviewPending,
    /// Terminal: all parties signed.
    Signed,
    /// Terminal: a signer declined.
    Rejected,
}

impl ProposalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Draft => "draft",
            ProposalStatus::Finalized => "finalized",
            ProposalStatus::ReviewPending => "review_pending",
            ProposalStatus::Signed => "signed",
            ProposalStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ProposalStatus::Draft),
            "finalized" => Some(ProposalStatus::Finalized),
            "review_pending" => Some(ProposalStatus::ReviewPending),
            "signed" => Some(ProposalStatus::Signed),
            "rejected" => Some(ProposalStatus::Rejected),
            _ => None,
        }
    }
}

/// What the signature engine needs to know about a document.
#[derive(Debug, Clone)]
pub struct Proposal {
    pub id: String,
    pub org_id: String,
    pub title: String,
    pub content: String,
    pub status: ProposalStatus,
}

/// The engine's view of the proposal side of the platform.
#[async_trait]
pub trait ProposalDirectory: Send + Sync {
    /// Fetch a document on behalf of an organization member.
    ///
    /// Fails with `AccessDenied` when the actor is not a member of the
    /// owning organization.
    async fn fetch_for_actor(&self, document_id: &str, actor: &str) -> Result<Proposal, ApiError>;

    /// Fetch a document without an actor check. Used on the signer surface,
    /// where the bearer token is the authorization.
    async fn fetch(&self, document_id: &str) -> Result<Proposal, ApiError>;

    /// Flip the document's status in response to a signature lifecycle event.
    async fn set_status(&self, document_id: &str, status: ProposalStatus) -> Result<(), ApiError>;

    /// Whether the actor administers the given organization.
    async fn is_org_admin(&self, org_id: &str, actor: &str) -> Result<bool, ApiError>;
}

/// SQLite-backed directory over the platform's own tables.
#[derive(Clone)]
pub struct SqliteProposals {
    db: SqlitePool,
}

#[derive(sqlx::FromRow)]
struct ProposalRow {
    id: String,
    org_id: String,
    title: String,
    content: String,
    status: String,
}

impl ProposalRow {
    fn into_proposal(self) -> Result<Proposal, ApiError> {
        let status = ProposalStatus::parse(&self.status).ok_or_else(|| {
            ApiError::Internal(anyhow::anyhow!(
                "unknown proposal status in storage: {}",
                self.status
            ))
        })?;
        Ok(Proposal {
            id: self.id,
            org_id: self.org_id,
            title: self.title,
            content: self.content,
            status,
        })
    }
}

impl SqliteProposals {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    async fn fetch_row(&self, document_id: &str) -> Result<ProposalRow, ApiError> {
        let row: Option<ProposalRow> = sqlx::query_as(
            "SELECT id, org_id, title, content, status FROM proposals WHERE id = ?",
        )
        .bind(document_id)
        .fetch_optional(&self.db)
        .await?;
        row.ok_or(ApiError::DocumentNotFound)
    }

    async fn is_member(&self, org_id: &str, actor: &str) -> Result<bool, ApiError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT role FROM org_members WHERE org_id = ? AND email = ?")
                .bind(org_id)
                .bind(actor)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.is_some())
    }

    /// Create a proposal. This is platform CRUD, exposed here so tests and
    /// seeding can populate the directory without reaching into SQL.
    pub async fn create_proposal(
        &self,
        org_id: &str,
        title: &str,
        content: &str,
        status: ProposalStatus,
    ) -> Result<String, ApiError> {
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            "INSERT INTO proposals (id, org_id, title, content, status, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&id)
        .bind(org_id)
        .bind(title)
        .bind(content)
        .bind(status.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&self.db)
        .await?;
        Ok(id)
    }

    /// Add an organization member with the given role (`member` or `admin`).
    pub async fn add_member(&self, org_id: &str, email: &str, role: &str) -> Result<(), ApiError> {
        sqlx::query("INSERT OR REPLACE INTO org_members (org_id, email, role) VALUES (?, ?, ?)")
            .bind(org_id)
            .bind(email)
            .bind(role)
            .execute(&self.db)
            .await?;
        Ok(())
    }

    /// Replace a proposal's content. Used by the platform's editor; in the
    /// engine's tests it stands in for out-of-band tampering.
    pub async fn update_content(&self, document_id: &str, content: &str) -> Result<(), ApiError> {
        sqlx::query("UPDATE proposals SET content = ?, updated_at = ? WHERE id = ?")
            .bind(content)
            .bind(Utc::now().to_rfc3339())
            .bind(document_id)
            .execute(&self.db)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl ProposalDirectory for SqliteProposals {
    async fn fetch_for_actor(&self, document_id: &str, actor: &str) -> Result<Proposal, ApiError> {
        let row = self.fetch_row(document_id).await?;
        if !self.is_member(&row.org_id, actor).await? {
            return Err(EngineError::AccessDenied.into());
        }
        row.into_proposal()
    }

    async fn fetch(&self, document_id: &str) -> Result<Proposal, ApiError> {
        self.fetch_row(document_id).await?.into_proposal()
    }

    async fn set_status(&self, document_id: &str, status: ProposalStatus) -> Result<(), ApiError> {
        let result = sqlx::query("UPDATE proposals SET status = ?, updated_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(Utc::now().to_rfc3339())
            .bind(document_id)
            .execute(&self.db)
            .await?;
        if result.rows_affected() == 0 {
            return Err(ApiError::DocumentNotFound);
        }
        tracing::info!("Document {} moved to status {}", document_id, status.as_str());
        Ok(())
    }

    async fn is_org_admin(&self, org_id: &str, actor: &str) -> Result<bool, ApiError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT role FROM org_members WHERE org_id = ? AND email = ?")
                .bind(org_id)
                .bind(actor)
                .fetch_optional(&self.db)
                .await?;
        Ok(matches!(row, Some((role,)) if role == "admin"))
    }
}
