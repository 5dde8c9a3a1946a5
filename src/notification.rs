//! Turns change events into user-facing alerts.
//!
//! Every alert carries a stable category so the presentation layer can
//! replace a previous alert of the same kind instead of stacking them. A
//! single dispatch never produces two alerts of one category.

use crate::diff::{AffectedRequest, ChangeEvent};
use crate::utils::pluralize;
use itertools::Itertools;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing as log;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlertCategory {
    NewRequest,
    NewComments,
    NewApprovals,
}

impl AlertCategory {
    /// Identifier handed to the presentation layer.
    pub fn id(self) -> &'static str {
        match self {
            AlertCategory::NewRequest => "new_request",
            AlertCategory::NewComments => "new_comments",
            AlertCategory::NewApprovals => "new_approvals",
        }
    }
}

impl fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.id())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    pub category: AlertCategory,
    pub title: String,
    pub subtitle: Option<String>,
    /// Deep link, only present when the alert is about a single request.
    pub url: Option<String>,
}

impl Alert {
    pub fn from_event(event: &ChangeEvent) -> Alert {
        match event {
            ChangeEvent::NewRequests { count, sample_url } => Alert {
                category: AlertCategory::NewRequest,
                title: format!("Found new merge requests: {count}"),
                subtitle: None,
                url: sample_url.clone(),
            },
            ChangeEvent::NewComments {
                affected,
                total_new_comments,
            } => {
                let total = *total_new_comments as usize;
                Alert {
                    category: AlertCategory::NewComments,
                    title: titled("New comments for", affected),
                    subtitle: Some(format!("{total} new {}", pluralize("comment", total))),
                    url: single_url(affected),
                }
            }
            ChangeEvent::NewApprovals { affected } => Alert {
                category: AlertCategory::NewApprovals,
                title: titled("New approvals for", affected),
                subtitle: (affected.len() > 1).then(|| {
                    format!(
                        "{} {} approved",
                        affected.len(),
                        pluralize("request", affected.len())
                    )
                }),
                url: single_url(affected),
            },
        }
    }
}

fn titled(prefix: &str, affected: &[AffectedRequest]) -> String {
    match affected {
        [only] => format!("{prefix} request: {}", only.title),
        many => format!(
            "{prefix} requests: [{}]",
            many.iter().map(|r| r.title.as_str()).format(", ")
        ),
    }
}

fn single_url(affected: &[AffectedRequest]) -> Option<String> {
    match affected {
        [only] => Some(only.web_url.clone()),
        _ => None,
    }
}

/// The presentation boundary: something that shows an alert to the user.
pub trait Notifier: Send + Sync {
    fn deliver(&self, alert: &Alert);
}

pub struct NotificationDispatcher {
    notifier: Arc<dyn Notifier>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Arc<dyn Notifier>) -> Self {
        NotificationDispatcher { notifier }
    }

    /// Delivers one alert per event, skipping repeated categories.
    ///
    /// Returns the alerts that were delivered.
    pub fn dispatch(&self, events: &[ChangeEvent]) -> Vec<Alert> {
        let mut seen = HashSet::new();
        let mut delivered = Vec::new();
        for event in events {
            let alert = Alert::from_event(event);
            if !seen.insert(alert.category) {
                log::debug!("dropping repeated {} alert: {:?}", alert.category, alert.title);
                continue;
            }
            log::info!("alert {}: {}", alert.category, alert.title);
            self.notifier.deliver(&alert);
            delivered.push(alert);
        }
        delivered
    }
}
