//! Email delivery of alerts.

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::info;

use crate::error::SinkError;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, subject: &str, html_body: &str) -> Result<(), SinkError>;
}

/// How the SMTP connection is secured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SmtpTls {
    /// Implicit TLS (SMTPS, usually port 465).
    Tls,
    /// Plain connection upgraded with STARTTLS (usually port 587).
    Starttls,
    None,
}

#[derive(Debug, Clone)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    pub tls: SmtpTls,
    pub username: String,
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

/// Sends each alert as one HTML email.
pub struct SmtpNotifier {
    settings: SmtpSettings,
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpNotifier {
    pub fn new(settings: SmtpSettings) -> Result<Self, SinkError> {
        // Fail early on malformed addresses rather than on the first alert.
        settings.from.parse::<lettre::message::Mailbox>()?;
        settings.to.parse::<lettre::message::Mailbox>()?;

        let mut builder =
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .port(settings.port);

        if let Some(pass) = &settings.password {
            builder = builder.credentials(Credentials::new(settings.username.clone(), pass.clone()));
        }

        builder = match settings.tls {
            SmtpTls::Tls => builder.tls(Tls::Wrapper(TlsParameters::new(settings.host.clone())?)),
            SmtpTls::Starttls => {
                builder.tls(Tls::Required(TlsParameters::new(settings.host.clone())?))
            }
            SmtpTls::None => builder.tls(Tls::None),
        };

        Ok(Self {
            transport: builder.build(),
            settings,
        })
    }
}

#[async_trait]
impl Notifier for SmtpNotifier {
    async fn notify(&self, subject: &str, html_body: &str) -> Result<(), SinkError> {
        let email = Message::builder()
            .from(self.settings.from.parse()?)
            .to(self.settings.to.parse()?)
            .subject(subject)
            .header(ContentType::TEXT_HTML)
            .body(html_body.to_string())?;

        let response = self.transport.send(email).await?;
        info!(
            "Email sent successfully: {}",
            response.message().collect::<Vec<_>>().join(" ")
        );
        Ok(())
    }
}

/// Stand-in when no mail account is configured: the alert only reaches the log.
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, subject: &str, _html_body: &str) -> Result<(), SinkError> {
        info!("email disabled, not sending: {}", subject);
        Ok(())
    }
}
