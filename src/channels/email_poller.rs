//! Mail front door: poll the mailbox, run each message through the
//! dispatcher strictly in order, reply, sleep, repeat.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use uuid::Uuid;

use crate::channels::email::{MailSender, Mailbox};
use crate::channels::email_types::{InboundEmail, OutboundEmail};
use crate::error::ChannelError;
use crate::pipeline::{Attachment, DispatchOutcome, Rejection, TaskDispatcher, TaskOutput};

pub const SUBJECT_RESULT: &str = "Task result";
pub const SUBJECT_QUOTA: &str = "Request limit exceeded";
pub const SUBJECT_ATTACHMENTS: &str = "Too many attachments";
pub const BODY_SEE_ATTACHMENT: &str = "See attachment.";

/// Everything the loop needs, wired once at startup.
pub struct MailLoop {
    mailbox: Arc<dyn Mailbox>,
    sender: Arc<dyn MailSender>,
    dispatcher: Arc<TaskDispatcher>,
    own_address: String,
    interval: Duration,
}

impl MailLoop {
    pub fn new(
        mailbox: Arc<dyn Mailbox>,
        sender: Arc<dyn MailSender>,
        dispatcher: Arc<TaskDispatcher>,
        own_address: &str,
        interval: Duration,
    ) -> Self {
        Self {
            mailbox,
            sender,
            dispatcher,
            own_address: own_address.trim().to_string(),
            interval,
        }
    }

    /// Run one poll cycle. Returns how many messages were handled.
    pub async fn poll_once(&self) -> usize {
        let messages = match self.mailbox.fetch_unseen().await {
            Ok(messages) => messages,
            Err(e) => {
                error!(error = %e, "Email poll failed");
                return 0;
            }
        };
        if messages.is_empty() {
            return 0;
        }
        debug!(count = messages.len(), "Fetched unseen emails");

        let mut handled = 0;
        for email in messages {
            let span = info_span!(
                "email",
                id = %Uuid::new_v4(),
                uid = %email.uid,
                message_id = email.message_id.as_deref().unwrap_or("-"),
            );
            match self.handle(email).instrument(span).await {
                Ok(()) => handled += 1,
                Err(e) => error!(error = %e, "Failed to handle email"),
            }
        }
        handled
    }

    /// Dispatch one message and send whatever reply its outcome calls for.
    pub async fn handle(&self, email: InboundEmail) -> Result<(), ChannelError> {
        if email.sender.eq_ignore_ascii_case(&self.own_address) {
            debug!(sender = %email.sender, "Skipping self-sent email");
            return Ok(());
        }

        let sender = email.sender.clone();
        info!(sender = %sender, subject = %email.subject, "Processing email");
        let outcome = self.dispatcher.dispatch(email.into_work_unit()).await;

        match reply_for(&sender, outcome) {
            Some(reply) => self.sender.send(&reply).await,
            None => Ok(()),
        }
    }

    /// Poll until `shutdown` flips to `true` (or its sender is dropped).
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.interval.as_secs(),
            "Mail loop started"
        );
        loop {
            if *shutdown.borrow() {
                break;
            }
            self.poll_once().await;

            tokio::select! {
                _ = tokio::time::sleep(self.interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }
        info!("Mail loop shutting down");
    }
}

/// Spawn the loop. Send `true` on the returned channel to stop it after
/// the current message.
pub fn spawn_mail_loop(mail_loop: MailLoop) -> (JoinHandle<()>, watch::Sender<bool>) {
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(mail_loop.run(rx));
    (handle, tx)
}

/// The reply owed to `to` for a dispatch outcome, if any.
///
/// Unauthorized senders, unknown tasks and backend failures get no reply.
pub fn reply_for(to: &str, outcome: DispatchOutcome) -> Option<OutboundEmail> {
    match outcome {
        DispatchOutcome::Completed(TaskOutput::Text(text)) => {
            Some(OutboundEmail::text(to, SUBJECT_RESULT, text))
        }
        DispatchOutcome::Completed(TaskOutput::Document { filename, bytes }) => Some(
            OutboundEmail::text(to, SUBJECT_RESULT, BODY_SEE_ATTACHMENT)
                .with_attachment(Attachment::new(filename, bytes, "application/pdf")),
        ),
        DispatchOutcome::Rejected(rejection @ Rejection::QuotaExceeded { .. }) => {
            Some(OutboundEmail::text(to, SUBJECT_QUOTA, rejection.to_string()))
        }
        DispatchOutcome::Rejected(rejection @ Rejection::TooManyAttachments { .. }) => {
            Some(OutboundEmail::text(to, SUBJECT_ATTACHMENTS, rejection.to_string()))
        }
        DispatchOutcome::Rejected(Rejection::Unauthorized { .. })
        | DispatchOutcome::Rejected(Rejection::UnknownTask(_)) => None,
        DispatchOutcome::Failed(e) => {
            warn!(error = %e, "No reply sent for failed task");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{DispatchError, LlmError};
    use crate::pipeline::TaskNotFound;

    #[test]
    fn text_result_becomes_body() {
        let reply = reply_for("a@b.c", DispatchOutcome::Completed(TaskOutput::Text("hi".into()))).unwrap();
        assert_eq!(reply, OutboundEmail::text("a@b.c", "Task result", "hi"));
    }

    #[test]
    fn document_result_is_attached() {
        let reply = reply_for(
            "a@b.c",
            DispatchOutcome::Completed(TaskOutput::Document {
                filename: "result.pdf".into(),
                bytes: b"%PDF".to_vec(),
            }),
        )
        .unwrap();
        assert_eq!(reply.body, "See attachment.");
        let att = reply.attachment.unwrap();
        assert_eq!(att.filename, "result.pdf");
        assert_eq!(att.content_type, "application/pdf");
    }

    #[test]
    fn quota_and_attachment_rejections_are_reported() {
        let quota = reply_for(
            "a@b.c",
            DispatchOutcome::Rejected(Rejection::QuotaExceeded {
                max_requests: 3,
                retry_after_secs: 42,
            }),
        )
        .unwrap();
        assert_eq!(quota.subject, "Request limit exceeded");
        assert!(quota.body.contains("3 requests"));
        assert!(quota.body.contains("42 seconds"));

        let many = reply_for(
            "a@b.c",
            DispatchOutcome::Rejected(Rejection::TooManyAttachments { count: 4, max: 2 }),
        )
        .unwrap();
        assert_eq!(many.subject, "Too many attachments");
    }

    #[test]
    fn silent_outcomes() {
        assert!(reply_for(
            "a@b.c",
            DispatchOutcome::Rejected(Rejection::Unauthorized { sender: "a@b.c".into() })
        )
        .is_none());
        assert!(reply_for(
            "a@b.c",
            DispatchOutcome::Rejected(Rejection::UnknownTask(TaskNotFound {
                name: "x".into(),
                available: vec![],
            }))
        )
        .is_none());
        assert!(reply_for(
            "a@b.c",
            DispatchOutcome::Failed(DispatchError::Llm(LlmError::ProviderDisabled {
                provider: "azure".into()
            }))
        )
        .is_none());
    }
}
