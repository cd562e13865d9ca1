//! Verification-callback dispatch.
//!
//! A callback proves control of an external identifier before an account
//! can be verified. The `none` namespace (and its `*` alias) skips the
//! proof: no code is generated, the account stays unverified until an
//! explicit `Verify` with an empty code. The `mailto` namespace generates a
//! fresh 128-bit code and mails it to the given address.
//!
//! Dispatch happens outside every lock and every storage transaction; the
//! account record has already been persisted when it runs, and the
//! lifecycle layer compensates with `Unregister` when delivery fails.

use lettre::message::Mailbox;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{Message, SmtpTransport, Transport};
use rand::RngCore;
use thiserror::Error;
use tracing::debug;

use crate::config::MailtoConfig;

/// Error types for callback dispatch.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("Callback namespace not implemented: {namespace}")]
    UnsupportedNamespace { namespace: String },

    #[error("Invalid mail address: {0}")]
    Address(#[from] lettre::address::AddressError),

    #[error("Mail message could not be built: {0}")]
    Message(#[from] lettre::error::Error),

    #[error("Mail submission failed: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

/// A composed verification message, RFC-style: the header fields are
/// carried separately, the body already contains the account name and
/// code lines.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: String,
    pub subject: String,
    pub body: String,
}

/// Mail submission endpoint. The production implementation speaks SMTP;
/// tests substitute a recording one.
pub trait MailSender: Send + Sync {
    fn send(&self, message: &MailMessage) -> Result<(), CallbackError>;
}

/// Submits mail over SMTP with optional plain authentication.
pub struct SmtpMailer {
    config: MailtoConfig,
}

impl SmtpMailer {
    pub fn new(config: MailtoConfig) -> Self {
        Self { config }
    }
}

impl MailSender for SmtpMailer {
    fn send(&self, message: &MailMessage) -> Result<(), CallbackError> {
        let email = Message::builder()
            .from(message.from.parse::<Mailbox>()?)
            .to(message.to.parse::<Mailbox>()?)
            .subject(message.subject.clone())
            .body(message.body.clone())?;

        let mut builder =
            SmtpTransport::builder_dangerous(self.config.server.as_str()).port(self.config.port);
        if !self.config.username.is_empty() && !self.config.password.is_empty() {
            builder = builder.credentials(Credentials::new(
                self.config.username.clone(),
                self.config.password.clone(),
            ));
        }
        builder.build().send(&email)?;
        Ok(())
    }
}

/// Generates verification codes and performs the side effect of the chosen
/// callback channel.
pub struct CallbackDispatcher {
    server_name: String,
    mailto: MailtoConfig,
    mailer: Box<dyn MailSender>,
}

impl CallbackDispatcher {
    pub fn new(server_name: &str, mailto: MailtoConfig, mailer: Box<dyn MailSender>) -> Self {
        Self {
            server_name: server_name.to_string(),
            mailto,
            mailer,
        }
    }

    /// Construct a dispatcher that delivers over SMTP per the config.
    pub fn smtp(server_name: &str, mailto: MailtoConfig) -> Self {
        let mailer = Box::new(SmtpMailer::new(mailto.clone()));
        Self::new(server_name, mailto, mailer)
    }

    /// Dispatch a verification callback for a freshly registered account.
    ///
    /// # Returns
    /// The verification code the user must present, or the empty string
    /// when the namespace requires none.
    pub fn dispatch(
        &self,
        folded_account: &str,
        namespace: &str,
        value: &str,
    ) -> Result<String, CallbackError> {
        match namespace {
            "*" | "none" => Ok(String::new()),
            "mailto" => self.dispatch_mailto(folded_account, value),
            other => Err(CallbackError::UnsupportedNamespace {
                namespace: other.to_string(),
            }),
        }
    }

    fn dispatch_mailto(&self, folded_account: &str, to: &str) -> Result<String, CallbackError> {
        let code = generate_code();

        let subject = if self.mailto.verify_message_subject.is_empty() {
            format!("Verify your account on {}", self.server_name)
        } else {
            self.mailto.verify_message_subject.clone()
        };
        let body = format!(
            "Account: {folded_account}\r\n\
             Verification code: {code}\r\n\
             \r\n\
             To verify your account, issue this command:\r\n\
             /MSG NickServ VERIFY {folded_account} {code}\r\n"
        );

        self.mailer.send(&MailMessage {
            from: self.mailto.sender.clone(),
            to: to.to_string(),
            subject,
            body,
        })?;
        debug!(account = folded_account, "dispatched verification mail");
        Ok(code)
    }
}

/// A fresh 128-bit random code, rendered as 32 hex characters.
fn generate_code() -> String {
    let mut buf = [0u8; 16];
    rand::rngs::OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
