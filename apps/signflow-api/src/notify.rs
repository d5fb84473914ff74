//! Notification fan-out
//!
//! The engine only decides what to send and to whom. Messages are pushed
//! onto an unbounded queue and drained by a background dispatcher task, so
//! a slow or failing mail provider can never roll back the state transition
//! that produced the message.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Default base URL for signing links embedded in emails.
pub const DEFAULT_BASE_URL: &str = "https://app.parley.example";

/// One outbound message, as decided by the state machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A signer's turn has come (or a parallel request just opened).
    Invite {
        email: String,
        name: String,
        document_title: String,
        requester_name: String,
        token: String,
    },
    /// Nudge a signer who has been notified but not acted.
    Reminder {
        email: String,
        name: String,
        document_title: String,
        token: String,
    },
    /// Tell the requester a signer declined, killing the campaign.
    Declined {
        requester_email: String,
        document_title: String,
        signer_name: String,
        reason: Option<String>,
    },
    /// Tell a party the request completed, with the verifiable certificate.
    Completed {
        email: String,
        name: String,
        document_title: String,
        certificate_id: String,
        digest: String,
    },
}

impl Notification {
    pub fn recipient(&self) -> &str {
        match self {
            Notification::Invite { email, .. } => email,
            Notification::Reminder { email, .. } => email,
            Notification::Declined { requester_email, .. } => requester_email,
            Notification::Completed { email, .. } => email,
        }
    }
}

/// Delivery backend. The default implementation only logs; production wires
/// in the platform's mail provider.
#[async_trait]
pub trait EmailSender: Send + Sync {
    async fn send(&self, to: &str, subject: &str, body: &str) -> anyhow::Result<()>;
}

/// Sender that logs instead of delivering. Useful for development and tests.
pub struct LogEmailSender;

#[async_trait]
impl EmailSender for LogEmailSender {
    async fn send(&self, to: &str, subject: &str, _body: &str) -> anyhow::Result<()> {
        tracing::info!("email to {}: {}", to, subject);
        Ok(())
    }
}

/// Handle for enqueueing notifications. Cloneable; the queue is shared.
#[derive(Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Notification>,
}

impl Notifier {
    /// Spawn the dispatcher task and return the enqueue handle.
    pub fn spawn(sender: Arc<dyn EmailSender>, base_url: String) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Notification>();
        tokio::spawn(async move {
            while let Some(notification) = rx.recv().await {
                let to = notification.recipient().to_string();
                let (subject, body) = render(&notification, &base_url);
                if let Err(e) = sender.send(&to, &subject, &body).await {
                    // Delivery problems are observability events, never
                    // failures of the transition that queued the message.
                    tracing::warn!("failed to send notification to {}: {}", to, e);
                }
            }
        });
        Self { tx }
    }

    /// Queue a notification. Never fails; a closed queue is logged and the
    /// message dropped.
    pub fn enqueue(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::warn!("notification dispatcher is gone; dropping message");
        }
    }
}

/// Render subject and plain-text body for a notification.
pub fn render(notification: &Notification, base_url: &str) -> (String, String) {
    match notification {
        Notification::Invite {
            name,
            document_title,
            requester_name,
            token,
            ..
        } => (
            format!("{requester_name} has requested your signature"),
            format!(
                "Hi {name},\n\n\
                 {requester_name} has asked you to review and sign \"{document_title}\".\n\n\
                 Open your personal signing link to get started:\n\
                 {base_url}/sign/{token}\n\n\
                 This link is unique to you. Do not forward it.",
            ),
        ),
        Notification::Reminder {
            name,
            document_title,
            token,
            ..
        } => (
            format!("Reminder: \"{document_title}\" is waiting for your signature"),
            format!(
                "Hi {name},\n\n\
                 Just a reminder that \"{document_title}\" is still waiting for you.\n\n\
                 {base_url}/sign/{token}",
            ),
        ),
        Notification::Declined {
            document_title,
            signer_name,
            reason,
            ..
        } => {
            let reason_line = match reason {
                Some(r) => format!("Reason given: {r}"),
                None => "No reason was given.".to_string(),
            };
            (
                format!("{signer_name} declined to sign \"{document_title}\""),
                format!(
                    "{signer_name} has declined to sign \"{document_title}\". \
                     The signature request is closed.\n\n{reason_line}",
                ),
            )
        }
        Notification::Completed {
            name,
            document_title,
            certificate_id,
            digest,
            ..
        } => (
            format!("\"{document_title}\" has been signed by all parties"),
            format!(
                "Hi {name},\n\n\
                 Every party has signed \"{document_title}\". The signing \
                 process is complete.\n\n\
                 Completion certificate: {certificate_id}\n\
                 Verification digest: {digest}",
            ),
        ),
    }
}
