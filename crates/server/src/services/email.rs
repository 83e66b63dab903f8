//! Verification email delivery.
//!
//! The [`Mailer`] trait is the seam the auth service sends through;
//! production uses [`SmtpMailer`] (lettre over SMTP, askama-rendered
//! bodies) and tests substitute a recording double.
//!
//! SMTP failures split into three classes: a bad recipient address is the
//! caller's fault, rendering and permanent SMTP rejections are ours, and
//! everything else is transient. [`SmtpMailer`] retries transient failures a
//! bounded number of times before giving up.

use std::time::Duration;

use askama::Template;
use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use secrecy::{ExposeSecret, SecretString};
use thiserror::Error;

use ambassador_core::{Email, OtpCode, VerificationToken};

/// Send attempts per message, counting the first.
const MAX_SEND_ATTEMPTS: u32 = 3;

/// Delay before the first retry; doubles each attempt.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Broad failure classes, used for HTTP status mapping and retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationFailure {
    /// The recipient address was rejected.
    Recipient,
    /// Rendering, message construction, or a permanent SMTP rejection.
    Permanent,
    /// Connectivity or a retriable SMTP response.
    Transient,
}

/// Errors from sending a notification email.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// The recipient address could not be parsed as a mailbox.
    #[error("invalid recipient address: {0}")]
    BadAddress(#[from] lettre::address::AddressError),

    /// Template rendering failed.
    #[error("template rendering failed: {0}")]
    Template(#[from] askama::Error),

    /// The message could not be constructed.
    #[error("message construction failed: {0}")]
    Message(#[from] lettre::error::Error),

    /// The SMTP transport rejected or failed to deliver the message.
    #[error("smtp failure: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
}

impl NotificationError {
    /// Classify this failure for status mapping and retries.
    #[must_use]
    pub fn failure(&self) -> NotificationFailure {
        match self {
            Self::BadAddress(_) => NotificationFailure::Recipient,
            Self::Template(_) | Self::Message(_) => NotificationFailure::Permanent,
            Self::Smtp(e) => {
                if e.is_permanent() {
                    NotificationFailure::Permanent
                } else {
                    NotificationFailure::Transient
                }
            }
        }
    }
}

/// Sends verification emails.
#[async_trait]
pub trait Mailer: Send + Sync {
    /// Send the OTP and verification link to a newly registered address.
    async fn send_verification(
        &self,
        to: &Email,
        otp: &OtpCode,
        token: &VerificationToken,
    ) -> Result<(), NotificationError>;
}

#[derive(Template)]
#[template(path = "email/verification.html")]
struct VerificationHtml<'a> {
    otp: &'a str,
    verify_url: &'a str,
}

#[derive(Template)]
#[template(path = "email/verification.txt")]
struct VerificationText<'a> {
    otp: &'a str,
    verify_url: &'a str,
}

/// SMTP configuration.
#[derive(Clone)]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_username: String,
    pub smtp_password: SecretString,
    pub from_address: String,
}

impl std::fmt::Debug for EmailConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailConfig")
            .field("smtp_host", &self.smtp_host)
            .field("smtp_port", &self.smtp_port)
            .field("smtp_username", &self.smtp_username)
            .field("smtp_password", &"[REDACTED]")
            .field("from_address", &self.from_address)
            .finish()
    }
}

/// Production [`Mailer`] over lettre's async SMTP transport.
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
    base_url: String,
}

impl SmtpMailer {
    /// Build the SMTP transport from config.
    ///
    /// # Errors
    ///
    /// Returns `NotificationError` if the relay host or from address is
    /// invalid.
    pub fn new(config: &EmailConfig, base_url: &str) -> Result<Self, NotificationError> {
        let transport = AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)?
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.smtp_username.clone(),
                config.smtp_password.expose_secret().to_owned(),
            ))
            .build();

        Ok(Self {
            transport,
            from: config.from_address.parse()?,
            base_url: base_url.trim_end_matches('/').to_owned(),
        })
    }

    fn build_message(
        &self,
        to: &Email,
        otp: &OtpCode,
        token: &VerificationToken,
    ) -> Result<Message, NotificationError> {
        let verify_url = format!("{}/verify?token={}", self.base_url, token.as_str());

        let html = VerificationHtml {
            otp: otp.as_str(),
            verify_url: &verify_url,
        }
        .render()?;
        let text = VerificationText {
            otp: otp.as_str(),
            verify_url: &verify_url,
        }
        .render()?;

        let message = Message::builder()
            .from(self.from.clone())
            .to(to.as_str().parse()?)
            .subject("Verify your ambassador account")
            .multipart(MultiPart::alternative_plain_html(text, html))?;
        Ok(message)
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send_verification(
        &self,
        to: &Email,
        otp: &OtpCode,
        token: &VerificationToken,
    ) -> Result<(), NotificationError> {
        let message = self.build_message(to, otp, token)?;

        let mut delay = RETRY_BASE_DELAY;
        let mut attempt = 1;
        loop {
            match self.transport.send(message.clone()).await {
                Ok(_) => {
                    tracing::info!(recipient = %to, "verification email sent");
                    return Ok(());
                }
                Err(e) => {
                    let err = NotificationError::from(e);
                    if err.failure() != NotificationFailure::Transient
                        || attempt >= MAX_SEND_ATTEMPTS
                    {
                        tracing::error!(recipient = %to, error = %err, "verification email failed");
                        return Err(err);
                    }
                    tracing::warn!(
                        recipient = %to,
                        attempt,
                        error = %err,
                        "verification email failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
            }
        }
    }
}
