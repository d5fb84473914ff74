//! Application state for the signflow API

use anyhow::Result;
use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};
use std::sync::Arc;

use crate::engine::SignatureEngine;
use crate::notify::Notifier;
use crate::proposals::SqliteProposals;

pub struct AppState {
    pub db: SqlitePool,
    pub engine: SignatureEngine,
    pub proposals: SqliteProposals,
}

impl AppState {
    pub async fn new(database_url: Option<String>, notifier: Notifier) -> Result<Self> {
        let db_url = database_url
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .unwrap_or_else(|| "sqlite:signflow.db?mode=rwc".to_string());

        tracing::info!("Connecting to database: {}", db_url);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&db_url)
            .await?;

        run_migrations(&pool).await?;

        Ok(Self::assemble(pool, notifier))
    }

    /// In-memory database on a single connection; used by tests.
    pub async fn new_in_memory(notifier: Notifier) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;
        run_migrations(&pool).await?;
        Ok(Self::assemble(pool, notifier))
    }

    fn assemble(pool: SqlitePool, notifier: Notifier) -> Self {
        let proposals = SqliteProposals::new(pool.clone());
        let engine = SignatureEngine::new(pool.clone(), Arc::new(proposals.clone()), notifier);
        Self {
            db: pool,
            engine,
            proposals,
        }
    }
}

async fn run_migrations(pool: &SqlitePool) -> Result<()> {
    tracing::info!("Running database migrations...");

    // Platform tables the proposal directory fronts.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS proposals (
            id TEXT PRIMARY KEY,
            org_id TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'draft',
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS org_members (
            org_id TEXT NOT NULL,
            email TEXT NOT NULL,
            role TEXT NOT NULL DEFAULT 'member',
            PRIMARY KEY (org_id, email)
        )
        "#,
    )
    .execute(pool)
    .await?;

    // Signature workflow tables.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signature_requests (
            id TEXT PRIMARY KEY,
            document_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            signing_order TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'pending',
            document_hash TEXT NOT NULL,
            created_by TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL,
            completed_at TEXT,
            certificate_id TEXT,
            last_reminder_at TEXT,
            reminder_days TEXT,
            reminder_final_hours INTEGER,
            flagged_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One active request per document, enforced by the database so two
    // concurrent creations cannot both succeed.
    sqlx::query(
        r#"
        CREATE UNIQUE INDEX IF NOT EXISTS idx_requests_active_per_document
        ON signature_requests(document_id)
        WHERE status IN ('pending', 'in_progress')
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signer_requirements (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL REFERENCES signature_requests(id),
            email TEXT NOT NULL,
            name TEXT NOT NULL,
            position INTEGER NOT NULL,
            auth_method TEXT NOT NULL DEFAULT 'email_link',
            status TEXT NOT NULL DEFAULT 'pending',
            token TEXT NOT NULL UNIQUE,
            signed_at TEXT,
            declined_at TEXT,
            decline_reason TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_requirements_request
        ON signer_requirements(request_id)
        "#,
    )
    .execute(pool)
    .await?;

    // Signatures are retained indefinitely for audit, even when the parent
    // request is declined or superseded.
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS signatures (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL,
            requirement_id TEXT NOT NULL,
            document_id TEXT NOT NULL,
            signer_email TEXT NOT NULL,
            signer_name TEXT NOT NULL,
            image TEXT,
            ip TEXT NOT NULL,
            user_agent TEXT NOT NULL,
            geolocation TEXT,
            document_hash TEXT NOT NULL,
            signed_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE INDEX IF NOT EXISTS idx_signatures_document
        ON signatures(document_id)
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS certificates (
            id TEXT PRIMARY KEY,
            request_id TEXT NOT NULL UNIQUE,
            entries_json TEXT NOT NULL,
            completed_at TEXT NOT NULL,
            digest TEXT NOT NULL,
            attestation TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    tracing::info!("Migrations complete");
    Ok(())
}
