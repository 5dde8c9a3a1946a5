//! Classifies the difference between two consecutive snapshots.
//!
//! Requests are identified by `(project id, request id)`. Requests that
//! disappear between two snapshots (merged or closed) are not reported.

use crate::gitlab::{ProjectId, RequestId};
use crate::snapshot::{PollSnapshot, ReviewRequestInfo};
use std::collections::{HashMap, HashSet};

type RequestKey = (ProjectId, RequestId);

/// A request mentioned by a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AffectedRequest {
    pub title: String,
    pub web_url: String,
}

impl From<&ReviewRequestInfo> for AffectedRequest {
    fn from(request: &ReviewRequestInfo) -> Self {
        AffectedRequest {
            title: request.title.clone(),
            web_url: request.web_url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    /// The total number of open requests grew by `count`.
    ///
    /// `sample_url` is set only when exactly one request of the new
    /// snapshot was absent from the previous one.
    NewRequests {
        count: usize,
        sample_url: Option<String>,
    },
    NewComments {
        affected: Vec<AffectedRequest>,
        total_new_comments: u32,
    },
    NewApprovals {
        affected: Vec<AffectedRequest>,
    },
}

/// Computes the events raised by moving from `previous` to `current`.
///
/// Without a previous snapshot (first cycle after start) nothing is
/// reported. Events come out in the order new requests, new comments,
/// new approvals, each at most once.
pub fn diff(previous: Option<&PollSnapshot>, current: &PollSnapshot) -> Vec<ChangeEvent> {
    let Some(previous) = previous else {
        return Vec::new();
    };

    let mut events = Vec::new();
    if let Some(event) = new_requests(previous, current) {
        events.push(event);
    }
    if let Some(event) = new_comments(previous, current) {
        events.push(event);
    }
    if let Some(event) = new_approvals(previous, current) {
        events.push(event);
    }
    events
}

fn new_requests(previous: &PollSnapshot, current: &PollSnapshot) -> Option<ChangeEvent> {
    let (before, after) = (previous.total_count(), current.total_count());
    if after <= before {
        return None;
    }

    let known: HashSet<RequestKey> = previous.requests().map(|(p, r)| (p, r.id)).collect();
    let mut fresh = current.requests().filter(|(p, r)| !known.contains(&(*p, r.id)));
    let sample_url = match (fresh.next(), fresh.next()) {
        (Some((_, only)), None) => Some(only.web_url.clone()),
        _ => None,
    };

    Some(ChangeEvent::NewRequests {
        count: after - before,
        sample_url,
    })
}

fn new_comments(previous: &PollSnapshot, current: &PollSnapshot) -> Option<ChangeEvent> {
    let mut total_new_comments = 0;
    let affected = grown(previous, current, |r| r.comment_count as usize)
        .map(|(request, delta)| {
            total_new_comments += delta as u32;
            AffectedRequest::from(request)
        })
        .collect::<Vec<_>>();

    if affected.is_empty() {
        return None;
    }
    Some(ChangeEvent::NewComments {
        affected,
        total_new_comments,
    })
}

fn new_approvals(previous: &PollSnapshot, current: &PollSnapshot) -> Option<ChangeEvent> {
    let affected = grown(previous, current, |r| r.approved_by.len())
        .map(|(request, _)| AffectedRequest::from(request))
        .collect::<Vec<_>>();

    if affected.is_empty() {
        return None;
    }
    Some(ChangeEvent::NewApprovals { affected })
}

/// Requests present in both snapshots whose `measure` increased, with the
/// size of the increase, in `current` order.
fn grown<'a>(
    previous: &PollSnapshot,
    current: &'a PollSnapshot,
    measure: impl Fn(&ReviewRequestInfo) -> usize,
) -> impl Iterator<Item = (&'a ReviewRequestInfo, usize)> {
    let before: HashMap<RequestKey, usize> = previous
        .requests()
        .map(|(p, r)| ((p, r.id), measure(r)))
        .collect();

    current.requests().filter_map(move |(p, r)| {
        let old = *before.get(&(p, r.id))?;
        let new = measure(r);
        (new > old).then(|| (r, new - old))
    })
}
