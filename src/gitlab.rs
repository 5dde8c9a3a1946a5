pub(crate) mod client;
pub(crate) mod merge_request;
pub(crate) mod project;
pub(crate) mod utils;

pub use client::GitlabClient;
pub use merge_request::*;
pub use project::*;

use crate::errors::ApiError;
use async_trait::async_trait;
use secrecy::SecretString;

pub type ProjectId = u64;
pub type RequestId = u64;

/// The three remote reads a poll cycle is built from.
///
/// Every call is scoped to the credential passed in, so the same gateway
/// can be used to verify a freshly entered token before it is stored.
#[async_trait]
pub trait GitlabApi: Send + Sync {
    /// Lists every project the credential is a member of.
    async fn list_projects(&self, credential: &SecretString) -> Result<Vec<Project>, ApiError>;

    /// Lists the merge requests of `project_id` that are still open.
    async fn list_open_requests(
        &self,
        project_id: ProjectId,
        credential: &SecretString,
    ) -> Result<Vec<MergeRequest>, ApiError>;

    /// Fetches the approval state of the merge request `iid` of `project_id`.
    async fn get_approvals(
        &self,
        project_id: ProjectId,
        iid: u64,
        credential: &SecretString,
    ) -> Result<Approvals, ApiError>;
}
