// Delivery orchestration
// Fans due emails out to subscribers, fetches exports and dispatches them.

use crate::catalog::{AttachmentResolver, Catalog};
use crate::config::{ExportFormats, Settings};
use crate::errors::{ArtifactError, DeliveryError, TransportError, UserError};
use crate::models::{EmailRule, Mode, Recipient, ResolvedAttachment, Subscriber, TimingWindow};
use crate::naming::extension_for;
use crate::pdf::{PdfMerger, MERGED_REPORT_NAME};
use crate::schedule::{active_subscribers, due_rules};
use crate::substitution::TemplateCompiler;
use crate::tableau::{ExportRequest, TableauApi};
use crate::tables::InputTables;
use crate::transport::{chat_text, ChatTransport, MailTransport, OutgoingMessage};
use chrono::DateTime;
use chrono_tz::Tz;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::Builder;
use tracing::{debug, info, info_span, instrument, warn, Instrument};
use uuid::Uuid;

/// Run-scoped delivery options
#[derive(Debug, Clone)]
pub struct DeliveryOptions {
    /// Sender address of outgoing mail
    pub sender: String,
    pub formats: ExportFormats,
    pub timing: Vec<TimingWindow>,
    /// Run only this email, ignoring timing
    pub override_email_id: Option<String>,
    /// Directory for scratch files
    pub scratch_dir: PathBuf,
}

impl DeliveryOptions {
    pub fn from_settings(settings: &Settings) -> Self {
        Self {
            sender: settings.mail.address.clone(),
            formats: settings.export.clone(),
            timing: settings.timing.clone(),
            override_email_id: settings.run.override_email_id().map(str::to_string),
            scratch_dir: settings.run.scratch_dir(),
        }
    }
}

/// Counters of one delivery run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub schedules: usize,
    pub emails_sent: usize,
    pub chat_posts: usize,
    pub attachments_downloaded: usize,
}

/// Recipient target of a rule for one subscriber
///
/// `test` goes to the owner only, `run` to the subscriber, and
/// `send me a copy` to both, subscriber first.
pub fn set_recipients(rule: &EmailRule, subscriber: &Subscriber) -> Result<String, UserError> {
    match &rule.mode {
        Mode::Test => Ok(rule.owner.clone()),
        Mode::Run => Ok(subscriber.email.clone()),
        Mode::SendMeACopy => Ok(format!("{},{}", subscriber.email, rule.owner)),
        Mode::Deprecated | Mode::Other(_) => Err(UserError::UnexpectedMode {
            email_id: rule.email_id.clone(),
            mode: rule.mode.to_string(),
        }),
    }
}

/// Driver runs one delivery pass over the input tables
pub struct Driver {
    tableau: Arc<dyn TableauApi>,
    mail: Arc<dyn MailTransport>,
    chat: Arc<dyn ChatTransport>,
    options: DeliveryOptions,
}

impl Driver {
    pub fn new(
        tableau: Arc<dyn TableauApi>,
        mail: Arc<dyn MailTransport>,
        chat: Arc<dyn ChatTransport>,
        options: DeliveryOptions,
    ) -> Self {
        Self {
            tableau,
            mail,
            chat,
            options,
        }
    }

    /// Deliver every email due at `now`
    ///
    /// The first failure aborts the whole run.
    pub async fn run(
        &self,
        tables: &InputTables,
        now: DateTime<Tz>,
    ) -> Result<RunSummary, DeliveryError> {
        let span = info_span!("delivery_run", run_id = %Uuid::new_v4());
        self.run_inner(tables, now).instrument(span).await
    }

    async fn run_inner(
        &self,
        tables: &InputTables,
        now: DateTime<Tz>,
    ) -> Result<RunSummary, DeliveryError> {
        let mut summary = RunSummary::default();

        let due = due_rules(
            &tables.emails,
            &now,
            &self.options.timing,
            self.options.override_email_id.as_deref(),
        );
        if due.is_empty() {
            info!("No emails due in this run");
            return Ok(summary);
        }

        let catalog = Catalog::snapshot(self.tableau.as_ref()).await?;
        let mut resolver = AttachmentResolver::new(&catalog, self.tableau.as_ref());
        let resolved = resolver.resolve_all(&due, &tables.attachments).await?;
        let subscribers = active_subscribers(&tables.subscribers);

        for rule in due {
            info!(email_id = %rule.email_id, mode = %rule.mode, "Processing email");
            summary.schedules += 1;

            let attachments: Vec<&ResolvedAttachment> = resolved
                .iter()
                .filter(|attachment| attachment.spec.email_id == rule.email_id)
                .collect();

            for subscriber in subscribers
                .iter()
                .filter(|subscriber| subscriber.group_id == rule.group_id)
            {
                let compiler =
                    TemplateCompiler::new(&subscriber.message_loads, &subscriber.filter_payload);
                let text = compiler.compile(&rule.message);
                let subject = compiler.compile(&rule.subject);
                let recipient = Recipient::from_target(&set_recipients(rule, subscriber)?);

                let to = match &recipient {
                    Recipient::Email(addresses) => addresses.clone(),
                    Recipient::ChatSpace(space) => vec![space.clone()],
                };
                let message = OutgoingMessage::new(subject, to, &self.options.sender, text)?;

                if attachments.is_empty() {
                    warn!(
                        email_id = %rule.email_id,
                        "No attachment for email, please check input tables"
                    );
                    return Ok(summary);
                }

                self.deliver(rule, subscriber, &attachments, &recipient, message, &mut summary)
                    .await?;
            }
        }

        info!(
            schedules = summary.schedules,
            emails_sent = summary.emails_sent,
            chat_posts = summary.chat_posts,
            attachments = summary.attachments_downloaded,
            "Delivery run finished"
        );
        Ok(summary)
    }

    #[instrument(skip_all, fields(email_id = %rule.email_id, recipient = %recipient))]
    async fn deliver(
        &self,
        rule: &EmailRule,
        subscriber: &Subscriber,
        attachments: &[&ResolvedAttachment],
        recipient: &Recipient,
        mut message: OutgoingMessage,
        summary: &mut RunSummary,
    ) -> Result<(), DeliveryError> {
        let session = self.tableau.session();
        let mut merger = PdfMerger::new(&self.options.scratch_dir);
        let mut links: Vec<String> = Vec::new();

        for attachment in attachments {
            let request = ExportRequest::build(
                session,
                attachment,
                &subscriber.filter_payload,
                &self.options.formats,
            )?;

            let payload = self
                .tableau
                .authenticated_get(&request.url, &request.params)
                .await?;
            if payload.status != 200 {
                return Err(TransportError::DownloadFailed {
                    url: request.url,
                    params: request.params,
                    status: payload.status,
                    body: payload.text(),
                }
                .into());
            }
            summary.attachments_downloaded += 1;
            debug!(attachment = %request.file_name, bytes = payload.body.len(), "Attachment downloaded");

            let attachment_type = attachment.spec.attachment_type.as_str();
            if rule.merge_attachments && attachment_type == "pdf" {
                merger.append(&payload.body)?;
            } else if recipient.is_email() {
                message.attach(payload.body, request.file_name, attachment_type);
            } else {
                let link = self
                    .upload_bytes(&request.file_name, attachment_type, &payload.body)
                    .await?;
                links.push(link);
            }
        }

        if rule.merge_attachments {
            match merger.finish()? {
                Some(merged) => {
                    if recipient.is_email() {
                        message.attach(merged.bytes()?, MERGED_REPORT_NAME, "pdf");
                    } else {
                        links.push(self.chat.upload(MERGED_REPORT_NAME, merged.path()).await?);
                    }
                }
                None => warn!("Merge requested but no PDF part could be merged"),
            }
        }
        drop(merger);

        match recipient {
            Recipient::Email(_) => {
                self.mail.send(&message).await?;
                summary.emails_sent += 1;
                info!(mode = %rule.mode, "Sent email");
            }
            Recipient::ChatSpace(space) => {
                if links.is_empty() {
                    warn!("Chat message has no uploaded attachment, nothing posted");
                } else {
                    self.chat.post(space, &chat_text(&message.text, &links)).await?;
                    summary.chat_posts += 1;
                    info!(mode = %rule.mode, links = links.len(), "Sent chat");
                }
            }
        }

        Ok(())
    }

    /// Upload one export through a scratch file named after its type
    async fn upload_bytes(
        &self,
        display_name: &str,
        attachment_type: &str,
        bytes: &[u8],
    ) -> Result<String, DeliveryError> {
        std::fs::create_dir_all(&self.options.scratch_dir).map_err(ArtifactError::from)?;
        let mut file = Builder::new()
            .prefix("upload-")
            .suffix(extension_for(attachment_type))
            .tempfile_in(&self.options.scratch_dir)
            .map_err(ArtifactError::from)?;
        file.write_all(bytes).map_err(ArtifactError::from)?;
        file.flush().map_err(ArtifactError::from)?;

        Ok(self.chat.upload(display_name, file.path()).await?)
    }
}
