// Error handling framework
// UserError is operator-facing; everything else is a transport or internal failure.

use thiserror::Error;

/// Process exit code for successful runs
pub const EXIT_OK: i32 = 0;

/// Process exit code for bad input data or configuration
pub const EXIT_USER_ERROR: i32 = 1;

/// Process exit code for transport and internal failures
pub const EXIT_INTERNAL_ERROR: i32 = 2;

/// Errors caused by bad input tables or configuration
#[derive(Error, Debug)]
pub enum UserError {
    #[error("Ambiguous Tableau workbook: {project}/{workbook} - {email_id} ({matches} matches)")]
    AmbiguousWorkbook {
        project: String,
        workbook: String,
        email_id: String,
        matches: usize,
    },

    #[error("Ambiguous Tableau view: {project}/{workbook}/{view} - {email_id} ({matches} matches)")]
    AmbiguousView {
        project: String,
        workbook: String,
        view: String,
        email_id: String,
        matches: usize,
    },

    #[error("Workbook {luid} not found ({email_id})")]
    WorkbookNotFound { luid: String, email_id: String },

    #[error("View {luid} not found ({email_id})")]
    ViewNotFound { luid: String, email_id: String },

    #[error(
        "Unexpected MODE '{mode}' in email ~{email_id}~. Please configure mode to 'test', 'run' or 'send me a copy'. Or set mode to 'deprecated'."
    )]
    UnexpectedMode { email_id: String, mode: String },

    #[error("Unexpected TABLEAU_OBJECT '{object}' in attachment of email ~{email_id}~. Use 'view' or 'workbook'.")]
    UnexpectedObjectType { email_id: String, object: String },

    #[error(
        "Unexpected ATTACHMENT_TYPE '{attachment_type}' in attachment ~{luid}~. Specify ATTACHMENT_TYPE from {allowed:?} for '{object}'."
    )]
    DisallowedFormat {
        luid: String,
        attachment_type: String,
        object: String,
        allowed: Vec<String>,
    },

    #[error("Missing required field {field} in {table} (row {row})")]
    MissingField {
        table: String,
        row: usize,
        field: String,
    },

    #[error("Missing required message field: {0}")]
    IncompleteMessage(String),

    #[error("Invalid input table {table}: {reason}")]
    InvalidTable { table: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Errors raised while fetching exports or handing messages to a transport
#[derive(Error, Debug)]
pub enum TransportError {
    #[error(
        "Download of attachment fails. url: {url}, url_params: {params:?} with server response {status}: {body}"
    )]
    DownloadFailed {
        url: String,
        params: Vec<(String, String)>,
        status: u16,
        body: String,
    },

    #[error("Email delivery failed: {0}")]
    Mail(String),

    #[error("Chat post failed: {0}")]
    Chat(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("Authorization failed: {0}")]
    Auth(String),
}

/// BI server client errors
#[derive(Error, Debug)]
pub enum TableauError {
    #[error("Unable to login with server response {status}: {body}")]
    SignIn { status: u16, body: String },

    #[error("Tableau request failed: {0}")]
    Request(String),

    #[error("Unexpected Tableau response from {url} ({status}): {body}")]
    UnexpectedResponse {
        url: String,
        status: u16,
        body: String,
    },
}

/// Local artifact errors (scratch files, PDF assembly)
#[derive(Error, Debug)]
pub enum ArtifactError {
    #[error("Scratch file operation failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("PDF merge failed: {0}")]
    Pdf(String),
}

/// Top-level error of a delivery run
#[derive(Error, Debug)]
pub enum DeliveryError {
    #[error(transparent)]
    User(#[from] UserError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Tableau(#[from] TableauError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl DeliveryError {
    /// True for failures the operator fixes by editing input data or config
    pub fn is_user_error(&self) -> bool {
        matches!(self, DeliveryError::User(_))
    }

    /// Process exit code for this failure class
    pub fn exit_code(&self) -> i32 {
        if self.is_user_error() {
            EXIT_USER_ERROR
        } else {
            EXIT_INTERNAL_ERROR
        }
    }
}

impl From<reqwest::Error> for TableauError {
    fn from(err: reqwest::Error) -> Self {
        TableauError::Request(err.to_string())
    }
}

impl From<config::ConfigError> for UserError {
    fn from(err: config::ConfigError) -> Self {
        UserError::InvalidConfig(err.to_string())
    }
}
