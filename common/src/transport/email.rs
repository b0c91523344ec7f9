// SMTP mail transport

use crate::config::MailConfig;
use crate::errors::TransportError;
use crate::transport::{MailTransport, OutgoingMessage};
use async_trait::async_trait;
use lettre::{
    message::{header::ContentType, Attachment, Mailbox, MultiPart, SinglePart},
    transport::smtp::authentication::Credentials,
    AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor,
};
use tracing::{info, instrument};

/// SmtpMailer sends assembled messages through an authenticated SMTP relay
pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
}

impl SmtpMailer {
    /// Build the mailer from configuration; port 465 uses implicit TLS, others STARTTLS
    pub fn from_config(config: &MailConfig) -> Result<Self, TransportError> {
        let relay = if config.smtp_port == 465 {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.smtp_host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.smtp_host)
        };
        let builder = relay.map_err(|e| TransportError::Mail(e.to_string()))?;

        let transport = builder
            .port(config.smtp_port)
            .credentials(Credentials::new(
                config.address.clone(),
                config.password.clone(),
            ))
            .build();

        Ok(Self { transport })
    }
}

fn mailbox(address: &str) -> Result<Mailbox, TransportError> {
    address
        .trim()
        .parse()
        .map_err(|e: lettre::address::AddressError| {
            TransportError::Mail(format!("Invalid address '{}': {}", address, e))
        })
}

/// Render an outgoing message as a multipart/mixed mail
pub fn build_mail(message: &OutgoingMessage) -> Result<Message, TransportError> {
    let mut builder = Message::builder()
        .from(mailbox(&message.from)?)
        .subject(message.subject.clone());

    for recipient in message.to.iter().filter(|r| !r.trim().is_empty()) {
        builder = builder.to(mailbox(recipient)?);
    }

    let mut body = MultiPart::mixed().singlepart(SinglePart::plain(message.text.clone()));
    for attachment in &message.attachments {
        let content_type = ContentType::parse(&attachment.content_type)
            .map_err(|e| TransportError::Mail(e.to_string()))?;
        body = body.singlepart(
            Attachment::new(attachment.filename.clone())
                .body(attachment.bytes.clone(), content_type),
        );
    }

    builder
        .multipart(body)
        .map_err(|e| TransportError::Mail(e.to_string()))
}

#[async_trait]
impl MailTransport for SmtpMailer {
    #[instrument(skip_all, fields(subject = %message.subject, recipients = message.to.len()))]
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError> {
        let mail = build_mail(message)?;

        self.transport
            .send(mail)
            .await
            .map_err(|e| TransportError::Mail(e.to_string()))?;

        info!(
            attachments = message.attachments.len(),
            "Email delivered"
        );
        Ok(())
    }
}
