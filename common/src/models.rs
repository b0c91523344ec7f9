use serde::de::DeserializeOwned;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;
use std::fmt;

// ============================================================================
// Column helpers
// ============================================================================

/// Parse a JSON text cell, treating an empty cell as the default value
fn json_column<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    match raw.as_deref().map(str::trim) {
        None | Some("") => Ok(T::default()),
        Some(text) => serde_json::from_str(text).map_err(serde::de::Error::custom),
    }
}

fn merge_flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw.as_deref().map(str::trim) == Some("merge"))
}

fn trimmed_opt<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<String>::deserialize(deserializer)?;
    Ok(raw
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty()))
}

// ============================================================================
// Email rule models
// ============================================================================

/// Mode decides who receives a rule's messages
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Mode {
    Test,
    Run,
    SendMeACopy,
    Deprecated,
    /// Anything else; rejected when recipients are computed
    Other(String),
}

impl From<String> for Mode {
    fn from(value: String) -> Self {
        match value.trim() {
            "test" => Mode::Test,
            "run" => Mode::Run,
            "send me a copy" => Mode::SendMeACopy,
            "deprecated" => Mode::Deprecated,
            other => Mode::Other(other.to_string()),
        }
    }
}

impl Mode {
    pub fn as_str(&self) -> &str {
        match self {
            Mode::Test => "test",
            Mode::Run => "run",
            Mode::SendMeACopy => "send me a copy",
            Mode::Deprecated => "deprecated",
            Mode::Other(value) => value.as_str(),
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How often a rule fires
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum Periodicity {
    /// Only fired through the single-rule override
    Run,
    Daily,
    Weekly,
    Monthly,
    Other(String),
}

impl From<String> for Periodicity {
    fn from(value: String) -> Self {
        match value.trim() {
            "run" => Periodicity::Run,
            "daily" => Periodicity::Daily,
            "weekly" => Periodicity::Weekly,
            "monthly" => Periodicity::Monthly,
            other => Periodicity::Other(other.to_string()),
        }
    }
}

/// EmailRule is one row of the EMAILS table
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct EmailRule {
    pub email_id: String,
    pub mode: Mode,
    pub periodicity: Periodicity,
    #[serde(default, deserialize_with = "trimmed_opt")]
    pub periodicity_specification: Option<String>,
    #[serde(default, deserialize_with = "trimmed_opt")]
    pub timing: Option<String>,
    pub group_id: String,
    #[serde(default)]
    pub owner: String,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, deserialize_with = "merge_flag")]
    pub merge_attachments: bool,
}

// ============================================================================
// Subscriber models
// ============================================================================

/// A scalar from a subscriber's filter payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Null,
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

/// Renders in JSON scalar form: `true`, `false`, `null`, numbers as written
impl fmt::Display for PayloadValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PayloadValue::Null => f.write_str("null"),
            PayloadValue::Bool(value) => write!(f, "{}", value),
            PayloadValue::Number(value) => write!(f, "{}", value),
            PayloadValue::Text(value) => f.write_str(value),
        }
    }
}

impl PayloadValue {
    pub fn is_null(&self) -> bool {
        matches!(self, PayloadValue::Null)
    }
}

impl From<&str> for PayloadValue {
    fn from(value: &str) -> Self {
        PayloadValue::Text(value.to_string())
    }
}

impl From<i64> for PayloadValue {
    fn from(value: i64) -> Self {
        PayloadValue::Number(value.into())
    }
}

impl From<bool> for PayloadValue {
    fn from(value: bool) -> Self {
        PayloadValue::Bool(value)
    }
}

/// Tag to text, used only for message templating
pub type MessageLoads = HashMap<String, String>;

/// Tag to scalar, used for templating and export filters
pub type FilterPayload = HashMap<String, PayloadValue>;

/// Subscriber is one row of the EMAIL_SUBSCRIBERS table
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct Subscriber {
    pub group_id: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub is_active: Option<String>,
    #[serde(default, deserialize_with = "json_column")]
    pub message_loads: MessageLoads,
    #[serde(default, deserialize_with = "json_column")]
    pub filter_payload: FilterPayload,
}

impl Subscriber {
    /// Only the exact literal "disabled" deactivates a subscriber
    pub fn active(&self) -> bool {
        self.is_active.as_deref() != Some("disabled")
    }
}

// ============================================================================
// Attachment models
// ============================================================================

/// Kind of BI-server object an attachment exports
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "String")]
pub enum TableauObject {
    Workbook,
    View,
    Other(String),
}

impl From<String> for TableauObject {
    fn from(value: String) -> Self {
        match value.trim() {
            "workbook" => TableauObject::Workbook,
            "view" => TableauObject::View,
            other => TableauObject::Other(other.to_string()),
        }
    }
}

impl TableauObject {
    pub fn as_str(&self) -> &str {
        match self {
            TableauObject::Workbook => "workbook",
            TableauObject::View => "view",
            TableauObject::Other(value) => value.as_str(),
        }
    }
}

/// One entry of an attachment's FILTER_FIELDS list
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum FilterField {
    /// Name of a filter_payload tag, emitted as `vf_<tag>`
    Tag(String),
    /// Literal query parameters merged as-is
    Literal(serde_json::Map<String, serde_json::Value>),
}

/// AttachmentSpec is one row of the EMAIL_ATTACHMENTS table
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AttachmentSpec {
    pub email_id: String,
    pub tableau_object: TableauObject,
    #[serde(default)]
    pub workbook: String,
    #[serde(default)]
    pub project: String,
    #[serde(default, deserialize_with = "trimmed_opt")]
    pub view: Option<String>,
    pub attachment_type: String,
    #[serde(default, deserialize_with = "json_column")]
    pub filter_fields: Vec<FilterField>,
    #[serde(default, deserialize_with = "trimmed_opt")]
    pub luid: Option<String>,
}

/// An attachment paired with a verified object identifier
#[derive(Debug, Clone)]
pub struct ResolvedAttachment {
    pub spec: AttachmentSpec,
    pub luid: String,
}

// ============================================================================
// Timing and routing
// ============================================================================

/// Named half-open hour interval [start, end); wraps past midnight when start >= end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimingWindow {
    pub label: String,
    pub start: u32,
    pub end: u32,
}

impl TimingWindow {
    pub fn new(label: impl Into<String>, start: u32, end: u32) -> Self {
        Self {
            label: label.into(),
            start,
            end,
        }
    }

    pub fn contains(&self, hour: u32) -> bool {
        if self.start < self.end {
            self.start <= hour && hour < self.end
        } else {
            hour >= self.start || hour < self.end
        }
    }
}

/// Where a compiled message goes, decided once per (rule, subscriber)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recipient {
    Email(Vec<String>),
    ChatSpace(String),
}

impl Recipient {
    /// A target containing `@` is a comma-separated address list, anything else a chat space
    pub fn from_target(target: &str) -> Self {
        if target.contains('@') {
            Recipient::Email(
                target
                    .split(',')
                    .map(str::trim)
                    .filter(|address| !address.is_empty())
                    .map(str::to_string)
                    .collect(),
            )
        } else {
            Recipient::ChatSpace(target.trim().to_string())
        }
    }

    pub fn is_email(&self) -> bool {
        matches!(self, Recipient::Email(_))
    }
}

impl fmt::Display for Recipient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Recipient::Email(addresses) => f.write_str(&addresses.join(",")),
            Recipient::ChatSpace(space) => write!(f, "spaces/{}", space),
        }
    }
}
