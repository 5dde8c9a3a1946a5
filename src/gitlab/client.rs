use super::utils::error_message;
use super::{Approvals, GitlabApi, MergeRequest, Project, ProjectId};
use crate::errors::ApiError;

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::header::{HeaderValue, USER_AGENT};
use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing as log;
use url::Url;

const TOKEN_HEADER: &str = "PRIVATE-TOKEN";
const PER_PAGE: usize = 100;
/// Upper bound on `/projects` pages, for servers that ignore `page`.
const MAX_PAGES: usize = 50;

#[derive(Clone)]
pub struct GitlabClient {
    client: Client,
    api_url: String,
}

impl GitlabClient {
    /// Creates a client for the REST v4 API of the server at `server_url`.
    pub fn new(server_url: &Url, timeout: Duration) -> anyhow::Result<Self> {
        let api_url = format!("{}/api/v4", server_url.as_str().trim_end_matches('/'));
        Self::with_api_url(api_url, timeout)
    }

    /// Creates a client talking to `api_url` directly, without appending
    /// the `/api/v4` prefix.
    pub fn with_api_url(api_url: String, timeout: Duration) -> anyhow::Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("building HTTP client")?;
        Ok(GitlabClient { client, api_url })
    }

    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    async fn send_req(&self, req: RequestBuilder) -> Result<(Bytes, String), ApiError> {
        log::debug!("send_req with {:?}", req);
        let req_dbg = format!("{req:?}");
        let req = req
            .build()
            .with_context(|| format!("building reqwest {req_dbg}"))?;

        let resp = self
            .client
            .execute(req)
            .await
            .with_context(|| format!("sending {req_dbg}"))?;
        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .with_context(|| format!("failed to read response body {req_dbg}"))?;

        match status {
            s if s.is_success() => Ok((body, req_dbg)),
            StatusCode::UNAUTHORIZED => {
                log::debug!("{req_dbg} was rejected as unauthorized");
                Err(ApiError::Unauthorized)
            }
            StatusCode::NOT_FOUND => Err(ApiError::NotFound),
            s => Err(ApiError::Transport(
                anyhow::anyhow!("{s}: {}", error_message(&body))
                    .context(format!("unexpected response to {req_dbg}")),
            )),
        }
    }

    pub async fn json<T>(&self, req: RequestBuilder) -> Result<T, ApiError>
    where
        T: serde::de::DeserializeOwned,
    {
        let (body, req_dbg) = self.send_req(req).await?;
        let value = crate::deserialize_payload(&body)
            .with_context(|| format!("decoding response of {req_dbg}"))?;
        Ok(value)
    }

    fn get(&self, path: &str, credential: &SecretString) -> RequestBuilder {
        let url = format!("{}/{}", self.api_url, path);
        log::trace!("get {:?}", url);
        self.client.get(url).configure(credential)
    }

    /// Lists member projects, optionally filtered by a search term.
    ///
    /// Pages are requested until GitLab returns a short page, or
    /// `MAX_PAGES` pages have been read.
    pub async fn projects(
        &self,
        credential: &SecretString,
        search: Option<&str>,
    ) -> Result<Vec<Project>, ApiError> {
        let mut projects = Vec::new();
        let per_page = PER_PAGE.to_string();
        let mut page = 1usize;
        loop {
            let mut req = self.get("projects", credential).query(&[
                ("membership", "true"),
                ("simple", "true"),
                ("order_by", "id"),
                ("sort", "asc"),
                ("per_page", per_page.as_str()),
                ("page", page.to_string().as_str()),
            ]);
            if let Some(search) = search.filter(|s| !s.is_empty()) {
                req = req.query(&[("search", search)]);
            }
            let batch: Vec<Project> = match self.json(req).await {
                Ok(batch) => batch,
                Err(ApiError::NotFound) => Vec::new(),
                Err(e) => return Err(e),
            };
            let len = batch.len();
            projects.extend(batch);
            if len < PER_PAGE {
                break;
            }
            if page == MAX_PAGES {
                log::warn!(
                    "stopping project listing after {MAX_PAGES} pages ({} projects)",
                    projects.len()
                );
                break;
            }
            page += 1;
        }
        log::trace!("listed {} projects in {} page(s)", projects.len(), page);
        Ok(projects)
    }
}

#[async_trait]
impl GitlabApi for GitlabClient {
    async fn list_projects(&self, credential: &SecretString) -> Result<Vec<Project>, ApiError> {
        self.projects(credential, None).await
    }

    async fn list_open_requests(
        &self,
        project_id: ProjectId,
        credential: &SecretString,
    ) -> Result<Vec<MergeRequest>, ApiError> {
        let req = self
            .get(&format!("projects/{project_id}/merge_requests"), credential)
            .query(&[
                ("state", "opened"),
                ("with_merge_status_recheck", "true"),
                ("per_page", "100"),
            ]);
        match self.json(req).await {
            Err(ApiError::NotFound) => Ok(Vec::new()),
            res => res,
        }
    }

    async fn get_approvals(
        &self,
        project_id: ProjectId,
        iid: u64,
        credential: &SecretString,
    ) -> Result<Approvals, ApiError> {
        self.json(self.get(
            &format!("projects/{project_id}/merge_requests/{iid}/approvals"),
            credential,
        ))
        .await
    }
}

trait RequestSend: Sized {
    fn configure(self, credential: &SecretString) -> Self;
}

impl RequestSend for RequestBuilder {
    fn configure(self, credential: &SecretString) -> RequestBuilder {
        let req = self.header(USER_AGENT, "mergewatch");
        match HeaderValue::from_str(credential.expose_secret()) {
            Ok(mut token) => {
                token.set_sensitive(true);
                req.header(TOKEN_HEADER, token)
            }
            Err(_) => {
                // The server will answer 401, which forces a new login.
                log::warn!("access token contains characters not allowed in a header");
                req
            }
        }
    }
}
