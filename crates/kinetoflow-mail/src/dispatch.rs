//! Mail delivery seam and background dispatch.

use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Which onboarding email this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmailKind {
    Invitation,
    Welcome,
}

/// A fully rendered email, ready for a transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Email {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub kind: EmailKind,
}

/// Delivery errors.
#[derive(Error, Debug)]
pub enum MailError {
    #[error("Invalid address: {0}")]
    Address(String),

    #[error("Message could not be built: {0}")]
    Message(String),

    #[error("Transport error: {0}")]
    Transport(String),
}

/// Blocking mail transport.
///
/// Implementations are called from the blocking pool, never from a request
/// handler.
pub trait Mailer: Send + Sync {
    fn send(&self, email: &Email) -> Result<(), MailError>;
}

/// Keeps every email in memory. Used by tests and local development.
#[derive(Debug, Default)]
pub struct OutboxMailer {
    sent: Mutex<Vec<Email>>,
}

impl OutboxMailer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of everything delivered so far.
    pub fn sent(&self) -> Vec<Email> {
        match self.sent.lock() {
            Ok(sent) => sent.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

impl Mailer for OutboxMailer {
    fn send(&self, email: &Email) -> Result<(), MailError> {
        let mut sent = self
            .sent
            .lock()
            .map_err(|e| MailError::Transport(format!("Outbox poisoned: {}", e)))?;
        sent.push(email.clone());
        Ok(())
    }
}

/// Writes emails to the log instead of sending them.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

impl Mailer for LogMailer {
    fn send(&self, email: &Email) -> Result<(), MailError> {
        info!(
            to = %email.to,
            subject = %email.subject,
            kind = ?email.kind,
            "Email not sent (log transport)"
        );
        debug!(body = %email.body, "Email body");
        Ok(())
    }
}

/// Fire-and-forget handle for queuing emails.
///
/// Cloning is cheap. Queuing never blocks and never fails from the caller's
/// point of view: if the delivery task is gone the email is logged and dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: mpsc::UnboundedSender<Email>,
}

impl Notifier {
    /// Create a notifier and hand back the receiving end, for callers that
    /// want to drive delivery themselves.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Email>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Create a notifier whose emails are delivered by a background task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(mailer: Arc<dyn Mailer>) -> (Self, JoinHandle<()>) {
        let (notifier, rx) = Self::channel();
        let handle = tokio::spawn(deliver(rx, mailer));
        (notifier, handle)
    }

    /// Queue an email for delivery.
    pub fn dispatch(&self, email: Email) {
        let to = email.to.clone();
        let kind = email.kind;
        if self.tx.send(email).is_err() {
            warn!(to = %to, kind = ?kind, "Mail delivery task is not running, email dropped");
        } else {
            debug!(to = %to, kind = ?kind, "Email queued");
        }
    }
}

/// Drain the queue until every notifier is dropped.
pub async fn deliver(mut rx: mpsc::UnboundedReceiver<Email>, mailer: Arc<dyn Mailer>) {
    while let Some(email) = rx.recv().await {
        let to = email.to.clone();
        let kind = email.kind;
        let mailer = Arc::clone(&mailer);

        match tokio::task::spawn_blocking(move || mailer.send(&email)).await {
            Ok(Ok(())) => info!(to = %to, kind = ?kind, "Email delivered"),
            Ok(Err(e)) => warn!(to = %to, kind = ?kind, error = %e, "Email delivery failed"),
            Err(e) => warn!(to = %to, kind = ?kind, error = %e, "Email delivery task panicked"),
        }
    }
    debug!("Mail queue closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingMailer;

    impl Mailer for FailingMailer {
        fn send(&self, _email: &Email) -> Result<(), MailError> {
            Err(MailError::Transport("connection refused".to_string()))
        }
    }

    fn email(to: &str) -> Email {
        Email {
            to: to.to_string(),
            subject: "s".to_string(),
            body: "b".to_string(),
            kind: EmailKind::Welcome,
        }
    }

    #[test]
    fn test_channel_queues_in_order() {
        let (notifier, mut rx) = Notifier::channel();
        notifier.dispatch(email("a@x.org"));
        notifier.clone().dispatch(email("b@x.org"));

        assert_eq!(rx.try_recv().unwrap().to, "a@x.org");
        assert_eq!(rx.try_recv().unwrap().to, "b@x.org");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dispatch_after_receiver_dropped_does_not_panic() {
        let (notifier, rx) = Notifier::channel();
        drop(rx);
        notifier.dispatch(email("a@x.org"));
    }

    #[tokio::test]
    async fn test_background_delivery_to_outbox() {
        let outbox = Arc::new(OutboxMailer::new());
        let (notifier, handle) = Notifier::spawn(outbox.clone());

        notifier.dispatch(email("a@x.org"));
        notifier.dispatch(email("b@x.org"));
        drop(notifier);
        handle.await.unwrap();

        let sent = outbox.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].to, "b@x.org");
    }

    #[tokio::test]
    async fn test_delivery_failure_is_swallowed() {
        let (notifier, handle) = Notifier::spawn(Arc::new(FailingMailer));
        notifier.dispatch(email("a@x.org"));
        drop(notifier);

        // The task finishes cleanly even though every send failed.
        handle.await.unwrap();
    }

    #[test]
    fn test_log_mailer_always_succeeds() {
        assert!(LogMailer.send(&email("a@x.org")).is_ok());
    }
}
