//! End-to-end workflow tests for the signature engine
//!
//! Each test runs against a fresh in-memory SQLite database and drives the
//! engine directly; signer tokens are read from storage the way the email
//! dispatcher would receive them.

use std::sync::Arc;

use pretty_assertions::assert_eq;
use signflow_api::engine::SigningContext;
use signflow_api::error::ApiError;
use signflow_api::notify::{LogEmailSender, Notifier};
use signflow_api::proposals::{ProposalDirectory, ProposalStatus};
use signflow_api::store;
use signflow_api::AppState;
use signflow_core::{
    CreateRequest, EngineError, RequestStatus, SignatureKind, SignerDraft, SignerStatus,
    SigningOrder,
};

const ORG: &str = "org-1";
const OWNER: &str = "owner@parley.example";
const CONTENT: &str = "Master Services Agreement: the parties agree to the terms herein.";

async fn setup() -> Arc<AppState> {
    let notifier = Notifier::spawn(Arc::new(LogEmailSender), "https://test.local".to_string());
    let state = AppState::new_in_memory(notifier)
        .await
        .expect("in-memory state");
    state
        .proposals
        .add_member(ORG, OWNER, "member")
        .await
        .expect("seed owner");
    Arc::new(state)
}

async fn finalized_proposal(state: &AppState) -> String {
    state
        .proposals
        .create_proposal(ORG, "Master Services Agreement", CONTENT, ProposalStatus::Finalized)
        .await
        .expect("seed proposal")
}

fn request_input(order: SigningOrder, emails: &[&str]) -> CreateRequest {
    CreateRequest {
        kind: SignatureKind::ClickToSign,
        order,
        signers: emails
            .iter()
            .map(|e| SignerDraft {
                email: e.to_string(),
                name: e.split('@').next().unwrap().to_string(),
            })
            .collect(),
        reminder: None,
        expires_in_hours: None,
    }
}

fn ctx() -> SigningContext {
    SigningContext {
        image: None,
        ip: "203.0.113.7".to_string(),
        user_agent: "workflow-tests".to_string(),
        geolocation: None,
    }
}

/// Token for the signer with the given email, straight from storage.
async fn token_for(state: &AppState, request_id: &str, email: &str) -> String {
    store::list_requirements(&state.db, request_id)
        .await
        .expect("list requirements")
        .into_iter()
        .find(|r| r.email == email)
        .expect("requirement exists")
        .token
}

async fn signer_status(state: &AppState, request_id: &str, email: &str) -> SignerStatus {
    store::list_requirements(&state.db, request_id)
        .await
        .expect("list requirements")
        .into_iter()
        .find(|r| r.email == email)
        .expect("requirement exists")
        .status()
        .expect("parsable status")
}

fn engine_err(err: ApiError) -> EngineError {
    match err {
        ApiError::Engine(e) => e,
        other => panic!("expected engine error, got {other:?}"),
    }
}

#[tokio::test]
async fn parallel_request_completes_with_certificate() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(SigningOrder::Parallel, &["alice@x.com", "bob@x.com"]),
        )
        .await
        .expect("create");
    assert_eq!(detail.status, RequestStatus::InProgress);
    // Parallel order: everyone is notified immediately.
    assert!(detail
        .signers
        .iter()
        .all(|s| s.status == SignerStatus::Sent));

    // Document moved to review while signing is underway.
    let proposal = state.proposals.fetch(&doc).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::ReviewPending);

    let alice = token_for(&state, &detail.id, "alice@x.com").await;
    let bob = token_for(&state, &detail.id, "bob@x.com").await;

    let view = state.engine.verify_token(&alice).await.expect("verify");
    assert_eq!(view.signer_status, SignerStatus::Viewed);
    assert_eq!(view.document_content, CONTENT);
    assert!(view.your_turn);

    let first = state.engine.sign(&alice, ctx()).await.expect("alice signs");
    assert!(!first.complete);

    let second = state.engine.sign(&bob, ctx()).await.expect("bob signs");
    assert!(second.complete);

    let detail = state.engine.get_request(&detail.id, OWNER).await.unwrap();
    assert_eq!(detail.status, RequestStatus::Completed);
    assert!(detail.completed_at.is_some());
    let certificate = detail.certificate.expect("certificate generated");
    assert_eq!(certificate.entries.len(), 2);
    assert!(certificate.verify());

    let proposal = state.proposals.fetch(&doc).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Signed);
}

#[tokio::test]
async fn sequential_order_gates_later_signers() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(SigningOrder::Sequential, &["alice@x.com", "bob@x.com"]),
        )
        .await
        .expect("create");

    // Only the first signer is notified at creation.
    assert_eq!(signer_status(&state, &detail.id, "alice@x.com").await, SignerStatus::Sent);
    assert_eq!(signer_status(&state, &detail.id, "bob@x.com").await, SignerStatus::Pending);

    let alice = token_for(&state, &detail.id, "alice@x.com").await;
    let bob = token_for(&state, &detail.id, "bob@x.com").await;

    // Bob cannot jump the queue.
    let err = state.engine.sign(&bob, ctx()).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::NotYourTurn);
    assert_eq!(signer_status(&state, &detail.id, "bob@x.com").await, SignerStatus::Pending);

    let outcome = state.engine.sign(&alice, ctx()).await.expect("alice signs");
    assert!(!outcome.complete);

    // Alice's signature advanced bob to sent.
    assert_eq!(signer_status(&state, &detail.id, "bob@x.com").await, SignerStatus::Sent);

    let outcome = state.engine.sign(&bob, ctx()).await.expect("bob signs");
    assert!(outcome.complete);

    let detail = state.engine.get_request(&detail.id, OWNER).await.unwrap();
    assert_eq!(detail.status, RequestStatus::Completed);
}

#[tokio::test]
async fn decline_kills_campaign_but_keeps_signatures() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(
                SigningOrder::Parallel,
                &["alice@x.com", "bob@x.com", "carol@x.com"],
            ),
        )
        .await
        .expect("create");

    let alice = token_for(&state, &detail.id, "alice@x.com").await;
    let bob = token_for(&state, &detail.id, "bob@x.com").await;
    let carol = token_for(&state, &detail.id, "carol@x.com").await;

    state.engine.sign(&alice, ctx()).await.expect("alice signs");
    state.engine.sign(&bob, ctx()).await.expect("bob signs");
    state
        .engine
        .decline(&carol, Some("Terms unacceptable".to_string()))
        .await
        .expect("carol declines");

    let detail = state.engine.get_request(&detail.id, OWNER).await.unwrap();
    assert_eq!(detail.status, RequestStatus::Declined);
    assert!(detail.certificate.is_none());

    let carol_view = detail
        .signers
        .iter()
        .find(|s| s.email == "carol@x.com")
        .unwrap();
    assert_eq!(carol_view.status, SignerStatus::Declined);
    assert_eq!(carol_view.decline_reason.as_deref(), Some("Terms unacceptable"));

    // The two earlier signatures stay on record for audit.
    let signatures = store::list_signatures(&state.db, &detail.id).await.unwrap();
    assert_eq!(signatures.len(), 2);

    let proposal = state.proposals.fetch(&doc).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Rejected);
}

#[tokio::test]
async fn second_active_request_is_rejected() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .expect("create");

    let requirements_before = store::list_requirements(&state.db, &detail.id)
        .await
        .unwrap()
        .len();

    let err = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["b@x.com"]))
        .await
        .unwrap_err();
    assert_eq!(engine_err(err), EngineError::ActiveRequestExists);

    // Nothing was created by the rejected attempt.
    let summaries = state.engine.list_requests(&doc, OWNER).await.unwrap();
    assert_eq!(summaries.len(), 1);
    let requirements_after = store::list_requirements(&state.db, &detail.id)
        .await
        .unwrap()
        .len();
    assert_eq!(requirements_before, requirements_after);

    // Cancelling frees the document for a new campaign.
    state.engine.cancel(&detail.id, OWNER).await.expect("cancel");
    state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["b@x.com"]))
        .await
        .expect("create after cancel");
}

#[tokio::test]
async fn tampered_document_rejects_signature_and_flags_request() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .expect("create");
    let token = token_for(&state, &detail.id, "a@x.com").await;

    // The document changes underneath the active request.
    state
        .proposals
        .update_content(&doc, "The terms were quietly rewritten.")
        .await
        .expect("tamper");

    let err = state.engine.sign(&token, ctx()).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::IntegrityFailure);

    // No signature was recorded and the request is flagged for review.
    let signatures = store::list_signatures(&state.db, &detail.id).await.unwrap();
    assert!(signatures.is_empty());
    let detail = state.engine.get_request(&detail.id, OWNER).await.unwrap();
    assert!(detail.flagged);
    assert_eq!(detail.status, RequestStatus::InProgress);
}

#[tokio::test]
async fn consumed_tokens_are_permanently_inert() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(SigningOrder::Parallel, &["a@x.com", "b@x.com"]),
        )
        .await
        .expect("create");
    let a = token_for(&state, &detail.id, "a@x.com").await;
    let b = token_for(&state, &detail.id, "b@x.com").await;

    state.engine.sign(&a, ctx()).await.expect("first sign");

    // A retried sign and a late decline both fail the same way.
    let err = state.engine.sign(&a, ctx()).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::AlreadySigned);
    let err = state.engine.decline(&a, None).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::AlreadySigned);

    state.engine.decline(&b, None).await.expect("decline");
    let err = state.engine.sign(&b, ctx()).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::AlreadyDeclined);
    let err = state.engine.verify_token(&b).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::AlreadyDeclined);
}

#[tokio::test]
async fn signed_token_reports_already_signed_even_after_completion() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .expect("create");
    let token = token_for(&state, &detail.id, "a@x.com").await;

    let outcome = state.engine.sign(&token, ctx()).await.expect("sign");
    assert!(outcome.complete);

    let err = state.engine.sign(&token, ctx()).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::AlreadySigned);
}

#[tokio::test]
async fn verify_token_is_idempotent_and_rejects_garbage() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .expect("create");
    let token = token_for(&state, &detail.id, "a@x.com").await;

    let first = state.engine.verify_token(&token).await.unwrap();
    let second = state.engine.verify_token(&token).await.unwrap();
    assert_eq!(first.signer_status, SignerStatus::Viewed);
    assert_eq!(second.signer_status, SignerStatus::Viewed);

    let err = state.engine.verify_token("not-a-token").await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::TokenInvalid);

    // Well-formed but unknown.
    let err = state.engine.verify_token(&"0".repeat(64)).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::TokenInvalid);
}

#[tokio::test]
async fn creation_preconditions_are_enforced() {
    let state = setup().await;

    // Draft documents cannot collect signatures.
    let draft = state
        .proposals
        .create_proposal(ORG, "Draft", CONTENT, ProposalStatus::Draft)
        .await
        .unwrap();
    let err = state
        .engine
        .create_request(&draft, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .unwrap_err();
    assert_eq!(engine_err(err), EngineError::DocumentNotFinalized);

    // Outsiders cannot create requests at all.
    let doc = finalized_proposal(&state).await;
    let err = state
        .engine
        .create_request(
            &doc,
            "stranger@elsewhere.com",
            request_input(SigningOrder::Parallel, &["a@x.com"]),
        )
        .await
        .unwrap_err();
    assert_eq!(engine_err(err), EngineError::AccessDenied);

    // Malformed signer lists are rejected before any state change.
    for bad in [
        request_input(SigningOrder::Parallel, &[]),
        request_input(SigningOrder::Parallel, &["a@x.com", "a@x.com"]),
        request_input(SigningOrder::Parallel, &["not-an-email"]),
    ] {
        let err = state.engine.create_request(&doc, OWNER, bad).await.unwrap_err();
        assert!(matches!(engine_err(err), EngineError::InvalidSigners(_)));
    }
    let summaries = state.engine.list_requests(&doc, OWNER).await.unwrap();
    assert!(summaries.is_empty());
}

#[tokio::test]
async fn each_signer_gets_a_distinct_token_and_requirement() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let emails = ["a@x.com", "b@x.com", "c@x.com", "d@x.com"];
    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Sequential, &emails))
        .await
        .expect("create");
    assert_eq!(detail.signers.len(), emails.len());

    let requirements = store::list_requirements(&state.db, &detail.id).await.unwrap();
    let tokens: std::collections::HashSet<_> =
        requirements.iter().map(|r| r.token.clone()).collect();
    assert_eq!(tokens.len(), emails.len());

    let positions: Vec<i64> = requirements.iter().map(|r| r.position).collect();
    assert_eq!(positions, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn cancel_requires_creator_or_admin() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;
    state
        .proposals
        .add_member(ORG, "colleague@parley.example", "member")
        .await
        .unwrap();
    state
        .proposals
        .add_member(ORG, "boss@parley.example", "admin")
        .await
        .unwrap();

    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .expect("create");

    // A plain member who is not the creator cannot cancel.
    let err = state
        .engine
        .cancel(&detail.id, "colleague@parley.example")
        .await
        .unwrap_err();
    assert_eq!(engine_err(err), EngineError::AccessDenied);

    // An organization admin can.
    let status = state
        .engine
        .cancel(&detail.id, "boss@parley.example")
        .await
        .expect("admin cancels");
    assert_eq!(status, RequestStatus::Cancelled);

    // The document reverts to its pre-signing status.
    let proposal = state.proposals.fetch(&doc).await.unwrap();
    assert_eq!(proposal.status, ProposalStatus::Finalized);

    // Tokens of a cancelled request are dead.
    let token = token_for(&state, &detail.id, "a@x.com").await;
    let err = state.engine.verify_token(&token).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::RequestClosed);

    // Cancelling twice fails.
    let err = state.engine.cancel(&detail.id, OWNER).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::RequestClosed);
}

#[tokio::test]
async fn completed_requests_cannot_be_cancelled() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .expect("create");
    let token = token_for(&state, &detail.id, "a@x.com").await;
    state.engine.sign(&token, ctx()).await.expect("sign");

    let err = state.engine.cancel(&detail.id, OWNER).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::RequestClosed);
}

#[tokio::test]
async fn reminders_reach_only_notified_signers() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(SigningOrder::Sequential, &["a@x.com", "b@x.com"]),
        )
        .await
        .expect("create");

    // Only the first sequential signer has been notified, so only one
    // reminder goes out; signer two's turn has not come.
    let reminded = state.engine.send_reminder(&detail.id, OWNER).await.unwrap();
    assert_eq!(reminded, 1);

    let detail_after = state.engine.get_request(&detail.id, OWNER).await.unwrap();
    assert!(detail_after.last_reminder_at.is_some());

    // Complete the request; nobody is left to remind.
    let a = token_for(&state, &detail.id, "a@x.com").await;
    let b = token_for(&state, &detail.id, "b@x.com").await;
    state.engine.sign(&a, ctx()).await.unwrap();
    state.engine.sign(&b, ctx()).await.unwrap();

    let err = state.engine.send_reminder(&detail.id, OWNER).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::NoPendingSigners);
}

#[tokio::test]
async fn expired_requests_reject_all_signer_actions() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(&doc, OWNER, request_input(SigningOrder::Parallel, &["a@x.com"]))
        .await
        .expect("create");
    let token = token_for(&state, &detail.id, "a@x.com").await;

    // Push the expiry into the past.
    sqlx::query("UPDATE signature_requests SET expires_at = ? WHERE id = ?")
        .bind("2020-01-01T00:00:00+00:00")
        .bind(&detail.id)
        .execute(&state.db)
        .await
        .unwrap();

    let err = state.engine.verify_token(&token).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::RequestExpired);
    let err = state.engine.sign(&token, ctx()).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::RequestExpired);
    let err = state.engine.decline(&token, None).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::RequestExpired);
}

#[tokio::test]
async fn wet_ink_image_is_recorded_with_the_signature() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let mut input = request_input(SigningOrder::Parallel, &["a@x.com"]);
    input.kind = SignatureKind::WetInk;
    let detail = state.engine.create_request(&doc, OWNER, input).await.unwrap();
    let token = token_for(&state, &detail.id, "a@x.com").await;

    let mut signing = ctx();
    signing.image = Some("iVBORw0KGgo=".to_string());
    signing.geolocation = Some("51.5072,-0.1276".to_string());
    state.engine.sign(&token, signing).await.expect("sign");

    let signatures = store::list_signatures(&state.db, &detail.id).await.unwrap();
    assert_eq!(signatures.len(), 1);
    assert_eq!(signatures[0].image.as_deref(), Some("iVBORw0KGgo="));
    assert_eq!(signatures[0].geolocation.as_deref(), Some("51.5072,-0.1276"));
    assert_eq!(signatures[0].ip, "203.0.113.7");
}

#[tokio::test]
async fn management_views_never_expose_tokens() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(SigningOrder::Parallel, &["a@x.com", "b@x.com"]),
        )
        .await
        .expect("create");
    let token = token_for(&state, &detail.id, "a@x.com").await;

    let json = serde_json::to_string(&detail).unwrap();
    assert!(!json.contains(&token));

    let summaries = state.engine.list_requests(&doc, OWNER).await.unwrap();
    let json = serde_json::to_string(&summaries).unwrap();
    assert!(!json.contains(&token));
    assert_eq!(summaries[0].signer_count, 2);
    assert_eq!(summaries[0].signed_count, 0);
}

#[tokio::test]
async fn racing_signs_on_one_token_commit_exactly_once() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(SigningOrder::Parallel, &["a@x.com", "b@x.com"]),
        )
        .await
        .expect("create");
    let token = token_for(&state, &detail.id, "a@x.com").await;

    let engine_a = state.engine.clone();
    let engine_b = state.engine.clone();
    let t1 = token.clone();
    let t2 = token.clone();
    let (r1, r2) = tokio::join!(engine_a.sign(&t1, ctx()), engine_b.sign(&t2, ctx()));

    let successes = [&r1, &r2].iter().filter(|r| r.is_ok()).count();
    assert_eq!(successes, 1, "exactly one sign may win the token");

    let signatures = store::list_signatures(&state.db, &detail.id).await.unwrap();
    assert_eq!(signatures.len(), 1);
}

#[tokio::test]
async fn sequential_advance_skips_position_gaps() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(
                SigningOrder::Sequential,
                &["a@x.com", "b@x.com", "c@x.com"],
            ),
        )
        .await
        .expect("create");

    // Carve a hole in the position sequence: position 2 disappears.
    sqlx::query("DELETE FROM signer_requirements WHERE request_id = ? AND position = 2")
        .bind(&detail.id)
        .execute(&state.db)
        .await
        .unwrap();

    let a = token_for(&state, &detail.id, "a@x.com").await;
    let outcome = state.engine.sign(&a, ctx()).await.expect("a signs");
    assert!(!outcome.complete);

    // The advance picks the lowest pending position, so the gap cannot
    // stall the campaign.
    assert_eq!(signer_status(&state, &detail.id, "c@x.com").await, SignerStatus::Sent);

    let c = token_for(&state, &detail.id, "c@x.com").await;
    let outcome = state.engine.sign(&c, ctx()).await.expect("c signs");
    assert!(outcome.complete);
}

#[tokio::test]
async fn declined_request_blocks_remaining_signers() {
    let state = setup().await;
    let doc = finalized_proposal(&state).await;

    let detail = state
        .engine
        .create_request(
            &doc,
            OWNER,
            request_input(SigningOrder::Parallel, &["a@x.com", "b@x.com"]),
        )
        .await
        .expect("create");
    let a = token_for(&state, &detail.id, "a@x.com").await;
    let b = token_for(&state, &detail.id, "b@x.com").await;

    state.engine.decline(&a, None).await.expect("decline");

    // The second signer's token still resolves but the campaign is dead.
    let err = state.engine.sign(&b, ctx()).await.unwrap_err();
    assert_eq!(engine_err(err), EngineError::RequestClosed);
    assert_eq!(signer_status(&state, &detail.id, "b@x.com").await, SignerStatus::Sent);
}
