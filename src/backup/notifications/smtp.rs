use crate::backup::function_path;
use crate::backup::notifications::Notification;
use crate::backup::redacted::RedactedString;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::{AddFunctionName, AddMsg};
use async_trait::async_trait;
use bon::Builder;
use function_name::named;
use getset::Getters;
use itertools::Itertools;
use lettre::message::header::ContentType;
use lettre::message::{Mailbox, MessageBuilder};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::response::Response;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::Serialize;
use serde_with::skip_serializing_none;
use std::str::FromStr;
use validator::Validate;

/// E-mail sent when a backup run fails
///
/// Credentials are kept in a `RedactedString` so they never show up in logs.
#[skip_serializing_none]
#[derive(Clone, Debug, Serialize, Validate, Builder, Getters)]
#[getset(get = "pub")]
pub struct SmtpNotificationConfig {
    #[validate(length(min = 1))]
    #[builder(into)]
    host: String,
    /// Overrides the port implied by `smtp_mode`
    port: Option<u16>,
    #[builder(default)]
    smtp_mode: SmtpMode,
    #[builder(into)]
    from: Mailbox,
    #[validate(length(min = 1))]
    to: Vec<Mailbox>,
    #[builder(into)]
    username: String,
    #[validate(nested)]
    #[builder(into)]
    password: RedactedString,
}

/// SMTP connection security modes
///
/// - `Unsecured`: Plain text connection (not recommended for production)
/// - `Ssl`: SSL/TLS encrypted connection from start
/// - `StartTls`: Start with plain text, then upgrade to TLS
#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub enum SmtpMode {
    Unsecured,
    Ssl,
    #[default]
    StartTls,
}

impl FromStr for SmtpMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "unsecured" => Ok(Self::Unsecured),
            "ssl" | "tls" => Ok(Self::Ssl),
            "starttls" => Ok(Self::StartTls),
            other => Err(Error::config_error(format!(
                "unknown SMTP mode {other:?}, expected unsecured, ssl or starttls"
            ))),
        }
    }
}

impl SmtpNotificationConfig {
    fn message(&self, subject: &str, body: &str) -> Result<Message> {
        self.to
            .iter()
            .cloned()
            .fold(Message::builder().from(self.from.clone()), MessageBuilder::to)
            .subject(subject)
            .header(ContentType::TEXT_PLAIN)
            .body(body.to_string())
            .map_err(Error::from)
    }

    fn transport(&self) -> Result<AsyncSmtpTransport<Tokio1Executor>> {
        let builder = match self.smtp_mode {
            SmtpMode::Unsecured => {
                AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(self.host.as_str())
            }
            SmtpMode::Ssl => AsyncSmtpTransport::<Tokio1Executor>::relay(&self.host)?,
            SmtpMode::StartTls => AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&self.host)?,
        };
        let builder = match self.port {
            Some(port) => builder.port(port),
            None => builder,
        };
        Ok(builder
            .credentials(Credentials::new(
                self.username.clone(),
                self.password.inner().to_string(),
            ))
            .build())
    }
}

/// Turns a rejected SMTP reply into an error, keeping the code when the
/// server sent no text.
fn rejected(response: &Response) -> Error {
    let text = response.message().join(" ");
    if text.trim().is_empty() {
        Error::smtp_send_error(format!(
            "SMTP server rejected the message with code {}",
            response.code()
        ))
    } else {
        Error::smtp_send_error(format!("SMTP server rejected the message: {} {text}", response.code()))
    }
}

impl SmtpNotificationConfig {
    #[named]
    async fn deliver(&self, subject: &str, body: &str) -> Result<()> {
        tracing::info!(
            "Sending failure e-mail to {} recipient(s) via {}",
            self.to.len(),
            self.host
        );
        let email = self
            .message(subject, body)
            .add_msg("Building notification e-mail failed")
            .add_fn_name(function_path!())?;
        let mailer = self
            .transport()
            .add_msg(format!(
                "Setting up SMTP client for {:?} ({:?}) failed",
                self.host, self.smtp_mode
            ))
            .add_fn_name(function_path!())?;

        let response = mailer
            .send(email)
            .await
            .map_err(Error::from)
            .add_fn_name(function_path!())?;
        if response.is_positive() {
            Ok(())
        } else {
            Err(rejected(&response)).add_fn_name(function_path!())
        }
    }
}

#[async_trait]
impl Notification for SmtpNotificationConfig {
    async fn send(&self, subject: &str, body: &str) -> Result<()> {
        self.deliver(subject, body).await
    }
}
