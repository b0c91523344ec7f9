// Tableau REST API client

use crate::config::TableauConfig;
use crate::errors::TableauError;
use crate::tableau::{HttpPayload, Session, TableauApi, ViewRow, WorkbookRow};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info, instrument};

const AUTH_HEADER: &str = "X-Tableau-Auth";

#[derive(Debug, Deserialize)]
struct SignInResponse {
    credentials: SignInCredentials,
}

#[derive(Debug, Deserialize)]
struct SignInCredentials {
    token: String,
    site: IdOnly,
}

#[derive(Debug, Deserialize)]
struct IdOnly {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    #[serde(rename = "pageNumber")]
    page_number: String,
    #[serde(rename = "totalAvailable")]
    total_available: String,
}

#[derive(Debug, Deserialize)]
struct WorkbooksPage {
    pagination: Pagination,
    #[serde(default)]
    workbooks: WorkbookList,
}

#[derive(Debug, Default, Deserialize)]
struct WorkbookList {
    #[serde(default)]
    workbook: Vec<WorkbookItem>,
}

#[derive(Debug, Deserialize)]
struct WorkbookItem {
    id: String,
    name: String,
    #[serde(default)]
    project: Option<NamedItem>,
}

#[derive(Debug, Deserialize)]
struct NamedItem {
    #[serde(default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct ViewsResponse {
    #[serde(default)]
    views: ViewList,
}

#[derive(Debug, Default, Deserialize)]
struct ViewList {
    #[serde(default)]
    view: Vec<ViewItem>,
}

#[derive(Debug, Deserialize)]
struct ViewItem {
    id: String,
    name: String,
}

/// TableauClient talks to the REST API with a personal access token session
pub struct TableauClient {
    client: Client,
    session: Session,
    token: String,
    page_size: u32,
}

impl TableauClient {
    /// Sign in with the configured personal access token
    #[instrument(skip(config), fields(server = %config.server, site = %config.site))]
    pub async fn sign_in(config: &TableauConfig) -> Result<Self, TableauError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| {
                TableauError::Request(format!("Failed to create HTTP client: {}", e))
            })?;

        let base_url = config.base_url();
        let body = json!({
            "credentials": {
                "personalAccessTokenName": config.token_name,
                "personalAccessTokenSecret": config.token_secret,
                "site": { "contentUrl": config.site },
            }
        });

        let response = client
            .post(format!("{}/auth/signin", base_url))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(TableauError::SignIn {
                status: status.as_u16(),
                body,
            });
        }

        let signed_in: SignInResponse = response.json().await?;
        info!(site_id = %signed_in.credentials.site.id, "Tableau server successfully authorized");

        Ok(Self {
            client,
            session: Session {
                base_url,
                site_id: signed_in.credentials.site.id,
            },
            token: signed_in.credentials.token,
            page_size: config.page_size,
        })
    }

    fn site_url(&self, path: &str) -> String {
        format!(
            "{}/sites/{}/{}",
            self.session.base_url, self.session.site_id, path
        )
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<T, TableauError> {
        let response = self
            .client
            .get(url)
            .header(AUTH_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .query(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(TableauError::UnexpectedResponse {
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        Ok(response.json().await?)
    }

    /// Existence probe; 404 means absent, other failures are errors
    async fn exists(&self, url: &str) -> Result<bool, TableauError> {
        let response = self
            .client
            .get(url)
            .header(AUTH_HEADER, &self.token)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => Err(TableauError::UnexpectedResponse {
                url: url.to_string(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            }),
        }
    }
}

fn parse_count(value: &str, field: &str) -> Result<u64, TableauError> {
    value.parse().map_err(|_| {
        TableauError::Request(format!("Invalid pagination {}: {}", field, value))
    })
}

#[async_trait]
impl TableauApi for TableauClient {
    fn session(&self) -> &Session {
        &self.session
    }

    #[instrument(skip(self))]
    async fn list_workbooks(&self) -> Result<Vec<WorkbookRow>, TableauError> {
        let url = self.site_url("workbooks");
        let mut workbooks = Vec::new();
        let mut page_number: u64 = 1;

        loop {
            let page: WorkbooksPage = self
                .get_json(
                    &url,
                    &[
                        ("pageSize", self.page_size.to_string()),
                        ("pageNumber", page_number.to_string()),
                    ],
                )
                .await?;

            let fetched = page.workbooks.workbook.len();
            workbooks.extend(page.workbooks.workbook.into_iter().map(|item| WorkbookRow {
                id: item.id,
                name: item.name,
                project: item.project.map(|p| p.name).unwrap_or_default(),
            }));

            let total = parse_count(&page.pagination.total_available, "totalAvailable")?;
            let current = parse_count(&page.pagination.page_number, "pageNumber")?;
            debug!(page = current, fetched, total, "Fetched workbook page");

            if fetched == 0 || workbooks.len() as u64 >= total {
                break;
            }
            page_number = current + 1;
        }

        info!(workbooks = workbooks.len(), "Workbook catalog loaded");
        Ok(workbooks)
    }

    #[instrument(skip(self))]
    async fn list_views(&self, workbook_id: &str) -> Result<Vec<ViewRow>, TableauError> {
        let url = self.site_url(&format!("workbooks/{}/views", workbook_id));
        let response: ViewsResponse = self.get_json(&url, &[]).await?;

        Ok(response
            .views
            .view
            .into_iter()
            .map(|item| ViewRow {
                id: item.id,
                name: item.name,
            })
            .collect())
    }

    async fn workbook_exists(&self, luid: &str) -> Result<bool, TableauError> {
        self.exists(&self.site_url(&format!("workbooks/{}", luid)))
            .await
    }

    async fn view_exists(&self, luid: &str) -> Result<bool, TableauError> {
        self.exists(&self.site_url(&format!("views/{}", luid))).await
    }

    #[instrument(skip(self, params))]
    async fn authenticated_get(
        &self,
        url: &str,
        params: &[(String, String)],
    ) -> Result<HttpPayload, TableauError> {
        let response = self
            .client
            .get(url)
            .header(AUTH_HEADER, &self.token)
            .query(params)
            .send()
            .await?;

        let status = response.status().as_u16();
        let body = response.bytes().await?.to_vec();
        debug!(status, bytes = body.len(), "Export response received");

        Ok(HttpPayload { status, body })
    }
}
