//! Email-specific types: inbound decomposition, outbound replies, HTML stripping.

use mail_parser::{MessageParser, MimeHeaders};

use crate::error::ChannelError;
use crate::pipeline::{Attachment, Origin, WorkUnit, parse_subject};

/// A fetched message split into the parts the pipeline needs.
#[derive(Debug, Clone)]
pub struct InboundEmail {
    /// Mailbox sequence number the message was fetched under.
    pub uid: String,
    pub message_id: Option<String>,
    pub sender: String,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

impl InboundEmail {
    /// Parse an RFC 822 message.
    ///
    /// Body is every inline `text/plain` part concatenated in order, falling
    /// back to the HTML body with tags stripped. Every part carrying a file name becomes an
    /// [`Attachment`].
    pub fn from_raw(uid: &str, raw: &[u8]) -> Result<Self, ChannelError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| ChannelError::InvalidMessage(format!("message {uid} is not RFC 822")))?;

        let sender = extract_sender(&parsed).ok_or_else(|| {
            ChannelError::InvalidMessage(format!("message {uid} has no sender address"))
        })?;

        let plain: Vec<&str> = parsed
            .text_bodies()
            .filter(|part| part.is_text() && !part.is_text_html())
            .filter(|part| {
                !MimeHeaders::content_disposition(*part).is_some_and(|d| d.is_attachment())
            })
            .filter_map(|part| part.text_contents())
            .collect();
        let body = if plain.is_empty() {
            parsed
                .body_html(0)
                .map(|html| strip_html(&html))
                .unwrap_or_default()
        } else {
            plain.concat()
        };

        let attachments = parsed
            .attachments()
            .filter_map(|part| {
                let filename = MimeHeaders::attachment_name(part)?;
                let content_type = MimeHeaders::content_type(part)
                    .map(|ct| match ct.subtype() {
                        Some(sub) => format!("{}/{sub}", ct.ctype()),
                        None => ct.ctype().to_string(),
                    })
                    .unwrap_or_else(|| "application/octet-stream".to_string());
                Some(Attachment::new(filename, part.contents().to_vec(), content_type))
            })
            .collect();

        Ok(Self {
            uid: uid.to_string(),
            message_id: parsed.message_id().map(str::to_string),
            sender,
            subject: parsed.subject().unwrap_or_default().to_string(),
            body,
            attachments,
        })
    }

    /// Hand the message to the pipeline.
    pub fn into_work_unit(self) -> WorkUnit {
        WorkUnit {
            origin: Origin::Email {
                sender: self.sender,
            },
            subject: parse_subject(&self.subject),
            body: self.body,
            attachments: self.attachments,
        }
    }
}

/// A reply to send: one recipient, optional single attachment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundEmail {
    pub to: String,
    pub subject: String,
    pub body: String,
    pub attachment: Option<Attachment>,
}

impl OutboundEmail {
    pub fn text(to: &str, subject: &str, body: impl Into<String>) -> Self {
        Self {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.into(),
            attachment: None,
        }
    }

    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.attachment = Some(attachment);
        self
    }
}

/// Extract the sender address from a parsed email.
pub fn extract_sender(parsed: &mail_parser::Message) -> Option<String> {
    parsed
        .from()
        .and_then(|addr| addr.first())
        .and_then(|a| a.address())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Strip HTML tags from content (basic).
pub fn strip_html(html: &str) -> String {
    let mut result = String::new();
    let mut in_tag = false;
    for ch in html.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => result.push(ch),
            _ => {}
        }
    }
    result.split_whitespace().collect::<Vec<_>>().join(" ")
}
