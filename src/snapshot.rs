//! The in-memory view a poll cycle produces.

use crate::gitlab::{MergeRequest, Project, ProjectId, RequestId, User};

/// A merge request joined with its approval state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReviewRequestInfo {
    pub id: RequestId,
    pub iid: u64,
    pub title: String,
    pub author: User,
    pub web_url: String,
    pub comment_count: u32,
    pub approved_by: Vec<User>,
}

impl ReviewRequestInfo {
    pub fn new(request: MergeRequest, approved_by: Vec<User>) -> Self {
        ReviewRequestInfo {
            id: request.id,
            iid: request.iid,
            title: request.title,
            author: request.author,
            web_url: request.web_url,
            comment_count: request.comment_count,
            approved_by,
        }
    }
}

/// The open requests of one watched project.
///
/// `requests` is empty when the project's request list could not be
/// fetched during the cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectRequestsSnapshot {
    pub project: Project,
    pub requests: Vec<ReviewRequestInfo>,
}

/// Everything one poll cycle observed, in watched-project order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollSnapshot {
    pub projects: Vec<ProjectRequestsSnapshot>,
}

impl PollSnapshot {
    pub fn new(projects: Vec<ProjectRequestsSnapshot>) -> Self {
        PollSnapshot { projects }
    }

    /// Number of open requests over all projects; this is what the badge shows.
    pub fn total_count(&self) -> usize {
        self.projects.iter().map(|p| p.requests.len()).sum()
    }

    /// All requests, flattened in project order then request order.
    pub fn requests(&self) -> impl Iterator<Item = (ProjectId, &ReviewRequestInfo)> {
        self.projects
            .iter()
            .flat_map(|p| p.requests.iter().map(move |r| (p.project.id, r)))
    }
}
