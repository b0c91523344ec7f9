// Input table loading
// EMAILS, EMAIL_SUBSCRIBERS and EMAIL_ATTACHMENTS arrive as CSV exports.

use crate::errors::UserError;
use crate::models::{AttachmentSpec, EmailRule, Subscriber};
use csv::ReaderBuilder;
use serde::de::DeserializeOwned;
use std::io::Read;
use std::path::Path;
use tracing::{info, instrument};

pub const EMAILS_TABLE: &str = "EMAILS.csv";
pub const SUBSCRIBERS_TABLE: &str = "EMAIL_SUBSCRIBERS.csv";
pub const ATTACHMENTS_TABLE: &str = "EMAIL_ATTACHMENTS.csv";

/// All rows a delivery run works from, in file order
#[derive(Debug, Clone, Default)]
pub struct InputTables {
    pub emails: Vec<EmailRule>,
    pub subscribers: Vec<Subscriber>,
    pub attachments: Vec<AttachmentSpec>,
}

impl InputTables {
    /// Load the three tables from one directory, normally `<data_dir>/in/tables`
    #[instrument]
    pub fn load(tables_dir: &Path) -> Result<Self, UserError> {

        let open = |name: &str| {
            std::fs::File::open(tables_dir.join(name)).map_err(|e| UserError::InvalidTable {
                table: name.to_string(),
                reason: format!("cannot open {}: {}", tables_dir.join(name).display(), e),
            })
        };

        let tables = Self::from_readers(
            open(EMAILS_TABLE)?,
            open(SUBSCRIBERS_TABLE)?,
            open(ATTACHMENTS_TABLE)?,
        )?;

        info!(
            emails = tables.emails.len(),
            subscribers = tables.subscribers.len(),
            attachments = tables.attachments.len(),
            "Input tables loaded"
        );

        Ok(tables)
    }

    /// Parse the tables from any CSV sources
    pub fn from_readers<E: Read, S: Read, A: Read>(
        emails: E,
        subscribers: S,
        attachments: A,
    ) -> Result<Self, UserError> {
        let emails: Vec<EmailRule> = read_rows(EMAILS_TABLE, emails)?;
        for (index, rule) in emails.iter().enumerate() {
            require(EMAILS_TABLE, index, "EMAIL_ID", &rule.email_id)?;
            require(EMAILS_TABLE, index, "GROUP_ID", &rule.group_id)?;
        }

        let subscribers: Vec<Subscriber> = read_rows(SUBSCRIBERS_TABLE, subscribers)?;
        for (index, subscriber) in subscribers.iter().enumerate() {
            require(SUBSCRIBERS_TABLE, index, "GROUP_ID", &subscriber.group_id)?;
        }

        let attachments: Vec<AttachmentSpec> = read_rows(ATTACHMENTS_TABLE, attachments)?;
        for (index, attachment) in attachments.iter().enumerate() {
            require(ATTACHMENTS_TABLE, index, "EMAIL_ID", &attachment.email_id)?;
        }

        Ok(Self {
            emails,
            subscribers,
            attachments,
        })
    }
}

fn read_rows<T: DeserializeOwned, R: Read>(table: &str, source: R) -> Result<Vec<T>, UserError> {
    let mut reader = ReaderBuilder::new().trim(csv::Trim::Headers).from_reader(source);

    reader
        .deserialize()
        .collect::<Result<Vec<T>, csv::Error>>()
        .map_err(|e| UserError::InvalidTable {
            table: table.to_string(),
            reason: e.to_string(),
        })
}

fn require(table: &str, row: usize, field: &str, value: &str) -> Result<(), UserError> {
    if value.trim().is_empty() {
        return Err(UserError::MissingField {
            table: table.to_string(),
            row: row + 1,
            field: field.to_string(),
        });
    }
    Ok(())
}
