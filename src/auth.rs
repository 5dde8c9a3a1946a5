//! Logging in: turning what the user typed into a server url and checking
//! the token against it before anything is stored.

use crate::errors::ApiError;
use crate::gitlab::GitlabApi;
use crate::watch_state::WatchState;
use anyhow::Context;
use secrecy::SecretString;
use tracing as log;
use url::Url;

/// Normalizes a user-entered server address.
///
/// A bare host such as `gitlab.example.com` gets the `https` scheme; a
/// trailing path is kept for servers mounted under a prefix.
pub fn normalize_server_url(input: &str) -> anyhow::Result<Url> {
    let input = input.trim();
    anyhow::ensure!(!input.is_empty(), "server address is empty");

    let with_scheme = if input.contains("://") {
        input.to_string()
    } else {
        format!("https://{input}")
    };
    let mut url =
        Url::parse(&with_scheme).with_context(|| format!("invalid server address {input:?}"))?;
    anyhow::ensure!(
        matches!(url.scheme(), "http" | "https"),
        "unsupported scheme {:?} in {input:?}",
        url.scheme()
    );
    anyhow::ensure!(url.host().is_some(), "no host in {input:?}");

    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

/// Verifies `credential` by listing projects through `api` and, if the
/// server accepts it, stores it together with `server_url`.
///
/// Returns the number of projects visible with the credential.
pub async fn authorize(
    state: &WatchState,
    api: &dyn GitlabApi,
    server_url: Url,
    credential: SecretString,
) -> anyhow::Result<usize> {
    let projects = match api.list_projects(&credential).await {
        Ok(projects) => projects,
        Err(ApiError::Unauthorized) => anyhow::bail!("{server_url} rejected the access token"),
        Err(e) => return Err(e).with_context(|| format!("could not reach {server_url}")),
    };
    log::info!("authorized against {server_url}, {} projects visible", projects.len());
    state.authorize(server_url, credential)?;
    Ok(projects.len())
}
