//! Builds a [`PollSnapshot`] from the watched projects.
//!
//! The fan-out has two levels: request lists of all watched projects are
//! fetched concurrently, and once a project's list is known, the approvals
//! of its requests are fetched concurrently. Everything is joined before
//! the snapshot is returned, so a snapshot is never partial.
//!
//! Only a failure of the project directory aborts the assembly. A project
//! whose request list fails contributes no requests, and a request whose
//! approvals fail has no approvers.

use crate::errors::ApiError;
use crate::gitlab::{GitlabApi, MergeRequest, Project, ProjectId};
use crate::snapshot::{PollSnapshot, ProjectRequestsSnapshot, ReviewRequestInfo};
use futures::future::join_all;
use secrecy::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tracing as log;

type Directory = Arc<HashMap<ProjectId, Project>>;

/// Result of one assembly.
#[derive(Debug)]
pub struct Assembly {
    pub snapshot: PollSnapshot,
    /// Some sub-fetch was rejected with 401 during this assembly.
    pub unauthorized: bool,
}

/// Records that an `Unauthorized` answer was seen, once per assembly no
/// matter how many concurrent sub-fetches report it.
#[derive(Default)]
struct UnauthorizedFlag(AtomicBool);

impl UnauthorizedFlag {
    /// Returns `true` only for the first caller.
    fn raise(&self) -> bool {
        !self.0.swap(true, Ordering::SeqCst)
    }

    fn is_raised(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct SnapshotAssembler {
    api: Arc<dyn GitlabApi>,
    /// How long a fetched project directory may be reused. Zero disables reuse.
    directory_refresh: Duration,
    directory: RwLock<Option<(Directory, Instant)>>,
}

impl SnapshotAssembler {
    pub fn new(api: Arc<dyn GitlabApi>, directory_refresh: Duration) -> Self {
        SnapshotAssembler {
            api,
            directory_refresh,
            directory: RwLock::new(None),
        }
    }

    /// Drops the cached project directory, e.g. after a logout.
    pub fn invalidate(&self) {
        *self.directory.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Fetches requests and approvals of every watched project present in
    /// the directory, in `watched` order.
    ///
    /// `refresh_directory` bypasses the cached directory.
    pub async fn assemble(
        &self,
        watched: &[ProjectId],
        credential: &SecretString,
        refresh_directory: bool,
    ) -> Result<Assembly, ApiError> {
        if watched.is_empty() {
            log::debug!("no watched projects");
            return Ok(Assembly {
                snapshot: PollSnapshot::default(),
                unauthorized: false,
            });
        }

        let directory = self.directory(credential, refresh_directory).await?;
        let projects = watched.iter().filter_map(|id| {
            let project = directory.get(id);
            if project.is_none() {
                log::debug!("watched project {id} is not accessible, skipping");
            }
            project.cloned()
        });

        let unauthorized = UnauthorizedFlag::default();
        let snapshot = PollSnapshot::new(
            join_all(projects.map(|project| self.project(project, credential, &unauthorized)))
                .await,
        );
        log::debug!(
            "assembled {} requests over {} projects",
            snapshot.total_count(),
            snapshot.projects.len()
        );
        Ok(Assembly {
            snapshot,
            unauthorized: unauthorized.is_raised(),
        })
    }

    async fn directory(
        &self,
        credential: &SecretString,
        refresh: bool,
    ) -> Result<Directory, ApiError> {
        if !refresh {
            if let Some(directory) = self.cached_directory() {
                log::trace!("returning project directory from cache");
                return Ok(directory);
            }
        }

        log::trace!("fetching fresh project directory");
        let projects = self.api.list_projects(credential).await?;
        let directory: Directory = Arc::new(projects.into_iter().map(|p| (p.id, p)).collect());
        *self.directory.write().unwrap_or_else(PoisonError::into_inner) =
            Some((directory.clone(), Instant::now()));
        Ok(directory)
    }

    fn cached_directory(&self) -> Option<Directory> {
        let cache = self.directory.read().unwrap_or_else(PoisonError::into_inner);
        cache.as_ref().and_then(|(directory, fetched_at)| {
            (fetched_at.elapsed() < self.directory_refresh).then(|| directory.clone())
        })
    }

    async fn project(
        &self,
        project: Project,
        credential: &SecretString,
        unauthorized: &UnauthorizedFlag,
    ) -> ProjectRequestsSnapshot {
        let requests = match self.api.list_open_requests(project.id, credential).await {
            Ok(requests) => requests,
            Err(e) => {
                absorb(unauthorized, &e);
                log::warn!(
                    "failed to list requests of project {} ({}), treating as empty: {e}",
                    project.id,
                    project.name
                );
                Vec::new()
            }
        };

        let requests = join_all(
            requests
                .into_iter()
                .map(|request| self.request(project.id, request, credential, unauthorized)),
        )
        .await;

        ProjectRequestsSnapshot { project, requests }
    }

    async fn request(
        &self,
        project_id: ProjectId,
        request: MergeRequest,
        credential: &SecretString,
        unauthorized: &UnauthorizedFlag,
    ) -> ReviewRequestInfo {
        let approved_by = match self
            .api
            .get_approvals(project_id, request.iid, credential)
            .await
        {
            Ok(approvals) => approvals.approvers(),
            Err(e) => {
                absorb(unauthorized, &e);
                log::warn!(
                    "failed to fetch approvals of {project_id}!{}, assuming none: {e}",
                    request.iid
                );
                Vec::new()
            }
        };
        ReviewRequestInfo::new(request, approved_by)
    }
}

fn absorb(unauthorized: &UnauthorizedFlag, error: &ApiError) {
    if error.is_unauthorized() && unauthorized.raise() {
        log::warn!("credential rejected during poll cycle");
    }
}
