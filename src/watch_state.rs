//! Credential, server and watched projects, persisted to a flat JSON file.
//!
//! The file holds three keys: `private_token`, `projects` (records of
//! `{id, name, web_url}`) and `server_url`. Missing keys read as empty.
//! The badge count lives in memory only.

use crate::gitlab::{Project, ProjectId};
use anyhow::Context;
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;
use tokio::sync::watch;
use tracing as log;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct WatchedProject {
    pub id: ProjectId,
    pub name: String,
    pub web_url: String,
}

impl From<&Project> for WatchedProject {
    fn from(project: &Project) -> Self {
        WatchedProject {
            id: project.id,
            name: project.name.clone(),
            web_url: project.web_url.clone(),
        }
    }
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Settings {
    #[serde(default)]
    private_token: Option<String>,
    #[serde(default)]
    projects: Vec<WatchedProject>,
    #[serde(default)]
    server_url: Option<String>,
}

/// Modification time and length of the settings file, if it exists.
type Stamp = Option<(SystemTime, u64)>;

fn stamp(path: &Path) -> Stamp {
    let meta = std::fs::metadata(path).ok()?;
    Some((meta.modified().ok()?, meta.len()))
}

fn read_settings(path: &Path) -> anyhow::Result<Settings> {
    match std::fs::read(path) {
        Ok(contents) => crate::deserialize_payload::<Settings>(&contents)
            .with_context(|| format!("malformed settings file {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            log::debug!("no settings at {}, starting empty", path.display());
            Ok(Settings::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

#[derive(Default)]
struct Inner {
    credential: Option<SecretString>,
    server_url: Option<Url>,
    projects: Vec<WatchedProject>,
    /// Version of the file the fields above reflect.
    stamp: Stamp,
}

impl Inner {
    fn apply(&mut self, settings: Settings) {
        self.server_url = settings.server_url.and_then(|url| match Url::parse(&url) {
            Ok(url) => Some(url),
            Err(e) => {
                log::warn!("ignoring stored server url {url:?}: {e}");
                None
            }
        });
        self.credential = settings.private_token.map(SecretString::from);
        self.projects.clear();
        for project in settings.projects {
            insert_unique(&mut self.projects, project);
        }
    }
}

pub struct WatchState {
    /// `None` keeps everything in memory.
    path: Option<PathBuf>,
    inner: Mutex<Inner>,
    badge: watch::Sender<usize>,
}

impl WatchState {
    /// Loads the settings stored at `path`; a missing file is an empty state.
    pub fn load(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let stamp = stamp(&path);
        let mut inner = Inner::default();
        inner.apply(read_settings(&path)?);
        inner.stamp = stamp;
        Ok(Self::with_inner(Some(path), inner))
    }

    /// Re-reads the settings file if another process has rewritten it
    /// since it was last read or written here. Returns whether anything
    /// was reloaded.
    pub fn refresh(&self) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        self.sync(&mut inner)
    }

    fn sync(&self, inner: &mut Inner) -> anyhow::Result<bool> {
        let Some(path) = &self.path else {
            return Ok(false);
        };
        let current = stamp(path);
        if current == inner.stamp {
            return Ok(false);
        }
        let was_authorized = inner.credential.is_some();
        inner.apply(read_settings(path)?);
        inner.stamp = current;
        log::debug!("reloaded settings changed on disk at {}", path.display());
        if was_authorized && inner.credential.is_none() {
            self.badge.send_replace(0);
        }
        Ok(true)
    }

    pub fn in_memory() -> Self {
        Self::with_inner(None, Inner::default())
    }

    fn with_inner(path: Option<PathBuf>, inner: Inner) -> Self {
        let (badge, _) = watch::channel(0);
        WatchState {
            path,
            inner: Mutex::new(inner),
            badge,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn credential(&self) -> Option<SecretString> {
        self.lock().credential.clone()
    }

    pub fn server_url(&self) -> Option<Url> {
        self.lock().server_url.clone()
    }

    pub fn is_authorized(&self) -> bool {
        let inner = self.lock();
        inner.credential.is_some() && inner.server_url.is_some()
    }

    /// Watched project ids in the order the user picked them.
    pub fn watched_project_ids(&self) -> Vec<ProjectId> {
        self.lock().projects.iter().map(|p| p.id).collect()
    }

    pub fn watched_projects(&self) -> Vec<WatchedProject> {
        self.lock().projects.clone()
    }

    pub fn badge_count(&self) -> usize {
        *self.badge.borrow()
    }

    pub fn set_badge_count(&self, count: usize) {
        let previous = self.badge.send_replace(count);
        if previous != count {
            log::debug!("badge count {previous} -> {count}");
        }
    }

    /// Receives every badge update.
    pub fn subscribe_badge(&self) -> watch::Receiver<usize> {
        self.badge.subscribe()
    }

    /// Stores a verified server and credential.
    pub fn authorize(&self, server_url: Url, credential: SecretString) -> anyhow::Result<()> {
        let mut inner = self.lock();
        self.sync(&mut inner)?;
        inner.server_url = Some(server_url);
        inner.credential = Some(credential);
        self.save(&mut inner)
    }

    /// Adds `project` at the end of the watched set. Returns `false` if it
    /// was already watched.
    pub fn watch(&self, project: WatchedProject) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        self.sync(&mut inner)?;
        if !insert_unique(&mut inner.projects, project) {
            return Ok(false);
        }
        self.save(&mut inner)?;
        Ok(true)
    }

    /// Removes `id` from the watched set. Returns `false` if it was not watched.
    pub fn unwatch(&self, id: ProjectId) -> anyhow::Result<bool> {
        let mut inner = self.lock();
        self.sync(&mut inner)?;
        let before = inner.projects.len();
        inner.projects.retain(|p| p.id != id);
        if inner.projects.len() == before {
            return Ok(false);
        }
        self.save(&mut inner)?;
        Ok(true)
    }

    /// Forgets the credential and the watched projects; the server url is kept
    /// so the next login can prefill it.
    pub fn logout(&self) -> anyhow::Result<()> {
        let mut inner = self.lock();
        // A malformed file must not block a logout.
        if let Err(e) = self.sync(&mut inner) {
            log::warn!("{e:#}");
        }
        inner.credential = None;
        inner.projects.clear();
        self.badge.send_replace(0);
        log::info!("logged out");
        self.save(&mut inner)
    }

    fn save(&self, inner: &mut Inner) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let settings = Settings {
            private_token: inner
                .credential
                .as_ref()
                .map(|c| c.expose_secret().to_string()),
            projects: inner.projects.clone(),
            server_url: inner.server_url.as_ref().map(|u| u.to_string()),
        };
        let contents = serde_json::to_vec_pretty(&settings)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
        std::fs::rename(&tmp, path).with_context(|| format!("replacing {}", path.display()))?;
        inner.stamp = stamp(path);
        log::trace!("saved settings to {}", path.display());
        Ok(())
    }
}

fn insert_unique(projects: &mut Vec<WatchedProject>, project: WatchedProject) -> bool {
    if projects.iter().any(|p| p.id == project.id) {
        return false;
    }
    projects.push(project);
    true
}
