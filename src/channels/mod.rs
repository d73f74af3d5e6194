//! Front doors (mailbox, command line) and mail transport.

pub mod cli;
pub mod email;
pub mod email_poller;
pub mod email_types;

pub use cli::{CliArgs, CliRequest, CliStatus};
pub use email::{ImapMailbox, MailSender, Mailbox, SmtpMailer};
pub use email_poller::{MailLoop, spawn_mail_loop};
pub use email_types::{InboundEmail, OutboundEmail};
