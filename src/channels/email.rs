//! Mail transport: IMAP over rustls for inbound, SMTP via lettre for outbound.
//!
//! Both protocols are blocking; the async trait impls push the work onto
//! `spawn_blocking`.

use std::future::Future;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::message::{Attachment as MailAttachment, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rustls_pki_types::ServerName;
use secrecy::ExposeSecret;
use tracing::{debug, error, info, warn};

use crate::channels::email_types::{InboundEmail, OutboundEmail};
use crate::config::MailSettings;
use crate::error::ChannelError;

const IMAP_TIMEOUT: Duration = Duration::from_secs(30);
const SMTP_TIMEOUT: Duration = Duration::from_secs(60);
const IMPLICIT_TLS_PORT: u16 = 465;

// ── Traits ──────────────────────────────────────────────────────────

/// Source of inbound mail.
#[async_trait]
pub trait Mailbox: Send + Sync {
    /// Fetch unseen messages and mark them seen.
    async fn fetch_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError>;
}

/// Outbound mail delivery.
#[async_trait]
pub trait MailSender: Send + Sync {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError>;
}

// ── IMAP ────────────────────────────────────────────────────────────

/// IMAP mailbox over implicit TLS.
pub struct ImapMailbox {
    settings: MailSettings,
}

impl ImapMailbox {
    pub fn new(settings: MailSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl Mailbox for ImapMailbox {
    async fn fetch_unseen(&self) -> Result<Vec<InboundEmail>, ChannelError> {
        let settings = self.settings.clone();
        let host = settings.imap_server.clone();
        let raw = tokio::task::spawn_blocking(move || fetch_unseen_imap(&settings))
            .await
            .map_err(|e| ChannelError::FetchFailed {
                host,
                reason: format!("IMAP task panicked: {e}"),
            })??;

        let mut messages = Vec::with_capacity(raw.len());
        for (uid, bytes) in raw {
            match InboundEmail::from_raw(&uid, &bytes) {
                Ok(email) => messages.push(email),
                Err(e) => warn!(uid = %uid, error = %e, "Skipping unparseable message"),
            }
        }
        Ok(messages)
    }
}

/// Connect, log in and pull every unseen message (blocking).
fn fetch_unseen_imap(settings: &MailSettings) -> Result<Vec<(String, Vec<u8>)>, ChannelError> {
    let host = settings.imap_server.clone();
    let fail = |reason: String| ChannelError::FetchFailed {
        host: host.clone(),
        reason,
    };

    let tcp = TcpStream::connect((settings.imap_server.as_str(), settings.imap_port))
        .map_err(|e| fail(format!("connect: {e}")))?;
    tcp.set_read_timeout(Some(IMAP_TIMEOUT))?;

    let mut root_store = rustls::RootCertStore::empty();
    root_store.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let tls_config = Arc::new(
        rustls::ClientConfig::builder()
            .with_root_certificates(root_store)
            .with_no_client_auth(),
    );
    let server_name = ServerName::try_from(settings.imap_server.clone())
        .map_err(|e| fail(format!("invalid server name: {e}")))?;
    let conn = rustls::ClientConnection::new(tls_config, server_name)
        .map_err(|e| fail(format!("TLS: {e}")))?;
    let tls = rustls::StreamOwned::new(conn, tcp);

    let password = settings
        .password
        .as_ref()
        .map(|p| p.expose_secret().to_string())
        .unwrap_or_default();

    ImapSession::new(tls, &host)
        .fetch_unseen(&settings.email_address, &password)
}

/// One tagged IMAP response: untagged lines plus any literals they carried.
#[derive(Debug, Default)]
struct ImapResponse {
    lines: Vec<String>,
    literals: Vec<Vec<u8>>,
}

/// Minimal IMAP4rev1 client over any byte stream.
struct ImapSession<S: Read + Write> {
    reader: BufReader<S>,
    host: String,
    next_tag: u32,
}

impl<S: Read + Write> ImapSession<S> {
    fn new(stream: S, host: &str) -> Self {
        Self {
            reader: BufReader::new(stream),
            host: host.to_string(),
            next_tag: 1,
        }
    }

    fn fail(&self, reason: impl Into<String>) -> ChannelError {
        ChannelError::FetchFailed {
            host: self.host.clone(),
            reason: reason.into(),
        }
    }

    fn read_line(&mut self) -> Result<String, ChannelError> {
        let mut buf = Vec::new();
        let n = self.reader.read_until(b'\n', &mut buf)?;
        if n == 0 {
            return Err(self.fail("IMAP connection closed"));
        }
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Send a command and collect everything up to its tagged status line.
    /// Literals (`{N}` at end of line) are read by byte count.
    fn command(&mut self, cmd: &str) -> Result<ImapResponse, ChannelError> {
        let tag = format!("A{}", self.next_tag);
        self.next_tag += 1;

        let stream = self.reader.get_mut();
        stream.write_all(format!("{tag} {cmd}\r\n").as_bytes())?;
        stream.flush()?;

        let mut response = ImapResponse::default();
        loop {
            let line = self.read_line()?;
            if let Some(rest) = line.strip_prefix(&tag) {
                let status = rest.trim_start();
                if status.starts_with("OK") {
                    return Ok(response);
                }
                let verb = cmd.split_whitespace().next().unwrap_or(cmd);
                return Err(self.fail(format!("{verb} failed: {}", status.trim_end())));
            }
            if let Some(len) = literal_len(&line) {
                let mut literal = vec![0u8; len];
                self.reader.read_exact(&mut literal)?;
                response.literals.push(literal);
            }
            response.lines.push(line);
        }
    }

    fn fetch_unseen(mut self, user: &str, password: &str) -> Result<Vec<(String, Vec<u8>)>, ChannelError> {
        let greeting = self.read_line()?;
        if !greeting.starts_with("* OK") && !greeting.starts_with("* PREAUTH") {
            return Err(self.fail(format!("unexpected greeting: {}", greeting.trim_end())));
        }

        self.command(&format!("LOGIN {} {}", quote(user), quote(password)))
            .map_err(|e| ChannelError::AuthFailed {
                name: "imap".into(),
                reason: e.to_string(),
            })?;
        self.command("SELECT \"INBOX\"")?;

        let search = self.command("SEARCH UNSEEN")?;
        let ids: Vec<String> = search
            .lines
            .iter()
            .filter_map(|l| l.strip_prefix("* SEARCH"))
            .flat_map(|rest| rest.split_whitespace().map(str::to_string))
            .collect();
        debug!(count = ids.len(), "Unseen messages");

        let mut messages = Vec::with_capacity(ids.len());
        for id in ids {
            let fetched = self.command(&format!("FETCH {id} RFC822"))?;
            match fetched.literals.into_iter().next() {
                Some(raw) => messages.push((id.clone(), raw)),
                None => warn!(id = %id, "FETCH returned no message body"),
            }
            if let Err(e) = self.command(&format!("STORE {id} +FLAGS (\\Seen)")) {
                warn!(id = %id, error = %e, "Failed to mark message seen");
            }
        }

        let _ = self.command("LOGOUT");
        Ok(messages)
    }
}

/// `{123}\r\n` at the end of a response line → 123.
fn literal_len(line: &str) -> Option<usize> {
    let line = line.trim_end();
    let open = line.rfind('{')?;
    line.strip_suffix('}')?[open + 1..].parse().ok()
}

/// IMAP quoted string.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}

// ── SMTP ────────────────────────────────────────────────────────────

/// SMTP sender with a fixed number of delivery attempts.
pub struct SmtpMailer {
    transport: SmtpTransport,
    from: String,
    attempts: u32,
    retry_delay: Duration,
}

impl SmtpMailer {
    /// Implicit TLS on port 465, STARTTLS on any other port.
    pub fn new(settings: &MailSettings, attempts: u32) -> Result<Self, ChannelError> {
        let builder = if settings.smtp_port == IMPLICIT_TLS_PORT {
            SmtpTransport::relay(&settings.smtp_server)
        } else {
            SmtpTransport::starttls_relay(&settings.smtp_server)
        }
        .map_err(|e| ChannelError::SendFailed {
            name: "smtp".into(),
            reason: format!("SMTP relay error: {e}"),
        })?;

        let password = settings
            .password
            .as_ref()
            .map(|p| p.expose_secret().to_string())
            .unwrap_or_default();
        let transport = builder
            .port(settings.smtp_port)
            .credentials(Credentials::new(settings.email_address.clone(), password))
            .timeout(Some(SMTP_TIMEOUT))
            .build();

        Ok(Self {
            transport,
            from: settings.email_address.clone(),
            attempts: attempts.max(1),
            retry_delay: Duration::from_secs(5),
        })
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }
}

#[async_trait]
impl MailSender for SmtpMailer {
    async fn send(&self, email: &OutboundEmail) -> Result<(), ChannelError> {
        let message = build_message(&self.from, email)?;
        with_retries(self.attempts, self.retry_delay, || {
            let transport = self.transport.clone();
            let message = message.clone();
            async move {
                match tokio::task::spawn_blocking(move || transport.send(&message)).await {
                    Ok(Ok(_)) => Ok(()),
                    Ok(Err(e)) => Err(e.to_string()),
                    Err(e) => Err(e.to_string()),
                }
            }
        })
        .await?;
        info!(to = %email.to, subject = %email.subject, "Email sent");
        Ok(())
    }
}

/// Run `op` up to `attempts` times, pausing `delay` between failures.
pub async fn with_retries<F, Fut>(attempts: u32, delay: Duration, mut op: F) -> Result<(), ChannelError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), String>>,
{
    let attempts = attempts.max(1);
    let mut last_error = String::new();
    for attempt in 1..=attempts {
        match op().await {
            Ok(()) => return Ok(()),
            Err(e) => {
                warn!(attempt, attempts, error = %e, "Email delivery failed");
                last_error = e;
            }
        }
        if attempt < attempts {
            tokio::time::sleep(delay).await;
        }
    }
    error!(attempts, error = %last_error, "Giving up on email delivery");
    Err(ChannelError::SendFailed {
        name: "smtp".into(),
        reason: format!("{attempts} attempts failed, last error: {last_error}"),
    })
}

/// Build the MIME message: plain text, or text plus one attachment.
pub fn build_message(from: &str, email: &OutboundEmail) -> Result<Message, ChannelError> {
    let invalid = |what: &str, e: &dyn std::fmt::Display| ChannelError::SendFailed {
        name: "smtp".into(),
        reason: format!("{what}: {e}"),
    };

    let builder = Message::builder()
        .from(from.parse().map_err(|e| invalid("Invalid from address", &e))?)
        .to(email.to.parse().map_err(|e| invalid("Invalid to address", &e))?)
        .subject(email.subject.as_str());

    let message = match &email.attachment {
        None => builder
            .header(ContentType::TEXT_PLAIN)
            .body(email.body.clone()),
        Some(att) => {
            let content_type = ContentType::parse(&att.content_type)
                .or_else(|_| ContentType::parse("application/octet-stream"))
                .map_err(|e| invalid("Invalid content type", &e))?;
            builder.multipart(
                MultiPart::mixed()
                    .singlepart(SinglePart::plain(email.body.clone()))
                    .singlepart(
                        MailAttachment::new(att.filename.clone()).body(att.content.clone(), content_type),
                    ),
            )
        }
    };
    message.map_err(|e| invalid("Failed to build email", &e))
}

// ── Tests ───────────────────────────────────────────────────────────
