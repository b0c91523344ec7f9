// Outbound delivery channels
// Mail goes over SMTP; chat spaces get Drive share links posted into them.

pub mod chat;
pub mod email;
pub mod google_auth;

pub use chat::GoogleChat;
pub use email::SmtpMailer;

use crate::errors::{TransportError, UserError};
use async_trait::async_trait;
use std::path::Path;

/// One named binary part of an outgoing mail
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailAttachment {
    pub filename: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// MIME type used when attaching an export of the given type
pub fn content_type_for(attachment_type: &str) -> &'static str {
    match attachment_type {
        "crosstab/excel" => "application/vnd.ms-excel",
        _ => "application/octet-stream",
    }
}

/// An assembled message, addressed either to mail recipients or a chat space
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub subject: String,
    pub to: Vec<String>,
    pub from: String,
    pub text: String,
    pub attachments: Vec<MailAttachment>,
}

impl OutgoingMessage {
    /// Build a message; subject, recipients and text are all required
    pub fn new(
        subject: impl Into<String>,
        to: Vec<String>,
        from: impl Into<String>,
        text: impl Into<String>,
    ) -> Result<Self, UserError> {
        let subject = subject.into();
        let text = text.into();

        if subject.trim().is_empty() {
            return Err(UserError::IncompleteMessage("subject".to_string()));
        }
        if to.iter().all(|recipient| recipient.trim().is_empty()) {
            return Err(UserError::IncompleteMessage("to".to_string()));
        }
        if text.trim().is_empty() {
            return Err(UserError::IncompleteMessage("text".to_string()));
        }

        Ok(Self {
            subject,
            to,
            from: from.into(),
            text,
            attachments: Vec::new(),
        })
    }

    pub fn attach(&mut self, bytes: Vec<u8>, filename: impl Into<String>, attachment_type: &str) {
        self.attachments.push(MailAttachment {
            filename: filename.into(),
            content_type: content_type_for(attachment_type).to_string(),
            bytes,
        });
    }
}

/// Mail delivery
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &OutgoingMessage) -> Result<(), TransportError>;
}

/// Chat delivery via uploaded files
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Upload a local file under `display_name` and return a public share link
    async fn upload(&self, display_name: &str, path: &Path) -> Result<String, TransportError>;

    /// Post plain text into a chat space
    async fn post(&self, space_id: &str, text: &str) -> Result<(), TransportError>;
}

/// Chat text with share links appended
pub fn chat_text(body: &str, links: &[String]) -> String {
    let mut text = body.to_string();
    for link in links {
        text.push_str("\nGoogle Drive link:\n");
        text.push_str(link);
    }
    text
}
