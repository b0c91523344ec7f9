// BI server integration
// Provides the client trait the resolver and delivery loop depend on.

pub mod client;
pub mod export;

pub use client::TableauClient;
pub use export::ExportRequest;

use crate::errors::TableauError;
use async_trait::async_trait;

/// Signed-in session facts needed to build export URLs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    /// REST API root, e.g. `https://bi.example.com/api/3.23`
    pub base_url: String,
    pub site_id: String,
}

/// One workbook of the catalog listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkbookRow {
    pub id: String,
    pub name: String,
    pub project: String,
}

/// One view of a workbook
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewRow {
    pub id: String,
    pub name: String,
}

/// Raw response of an authenticated GET
#[derive(Debug, Clone)]
pub struct HttpPayload {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpPayload {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// TableauApi is the BI-server surface the delivery pipeline needs
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TableauApi: Send + Sync {
    fn session(&self) -> &Session;

    /// All workbooks visible to the signed-in user
    async fn list_workbooks(&self) -> Result<Vec<WorkbookRow>, TableauError>;

    async fn list_views(&self, workbook_id: &str) -> Result<Vec<ViewRow>, TableauError>;

    async fn workbook_exists(&self, luid: &str) -> Result<bool, TableauError>;

    async fn view_exists(&self, luid: &str) -> Result<bool, TableauError>;

    /// GET with the session token; non-2xx statuses are returned, not raised
    async fn authenticated_get(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<HttpPayload, TableauError>;
}
