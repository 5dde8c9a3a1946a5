use anyhow::Context;
use clap::{Parser, Subcommand};
use itertools::Itertools;
use mergewatch::assembler::SnapshotAssembler;
use mergewatch::auth;
use mergewatch::config::Config;
use mergewatch::gitlab::{GitlabClient, Project, ProjectId};
use mergewatch::notification::{Alert, NotificationDispatcher, Notifier};
use mergewatch::poll::{PollEvent, Poller, TriggerOutcome};
use mergewatch::snapshot::PollSnapshot;
use mergewatch::watch_state::{WatchState, WatchedProject};
use secrecy::SecretString;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(version, about = "Watch GitLab merge requests and get notified about changes")]
struct Cli {
    /// Configuration file (defaults to `mergewatch.toml` if present).
    #[arg(long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Verify an access token against a GitLab server and store it.
    Login {
        /// Server address, e.g. `gitlab.example.com`.
        #[arg(long)]
        server: String,
        /// Personal access token; read from `MERGEWATCH_TOKEN` when omitted.
        #[arg(long)]
        token: Option<String>,
    },
    /// Forget the token and the watched projects.
    Logout,
    /// List the projects available to the stored token.
    Projects {
        #[arg(long)]
        search: Option<String>,
    },
    /// Start watching projects.
    Watch {
        #[arg(required = true)]
        ids: Vec<ProjectId>,
    },
    /// Stop watching projects.
    Unwatch {
        #[arg(required = true)]
        ids: Vec<ProjectId>,
    },
    /// Poll the watched projects until interrupted. Press Enter to refresh.
    Run,
}

/// Prints alerts to standard output.
struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn deliver(&self, alert: &Alert) {
        println!("[{}] {}", alert.category, alert.title);
        if let Some(subtitle) = &alert.subtitle {
            println!("    {subtitle}");
        }
        if let Some(url) = &alert.url {
            println!("    {url}");
        }
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    mergewatch::logger::init();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .or_else(|| std::env::var_os("MERGEWATCH_CONFIG").map(PathBuf::from));
    let config = Config::load(config_path.as_deref())?;
    let state = Arc::new(WatchState::load(config.state_file())?);

    match cli.command {
        Command::Login { server, token } => login(&config, &state, &server, token).await,
        Command::Logout => {
            state.logout()?;
            println!("Logged out.");
            Ok(())
        }
        Command::Projects { search } => projects(&config, &state, search.as_deref()).await,
        Command::Watch { ids } => watch(&config, &state, &ids).await,
        Command::Unwatch { ids } => {
            for id in ids {
                if !state.unwatch(id)? {
                    println!("Project {id} was not watched.");
                }
            }
            Ok(())
        }
        Command::Run => run(&config, state).await,
    }
}

async fn login(
    config: &Config,
    state: &WatchState,
    server: &str,
    token: Option<String>,
) -> anyhow::Result<()> {
    let token = match token {
        Some(token) => token,
        None => std::env::var("MERGEWATCH_TOKEN")
            .context("pass --token or set MERGEWATCH_TOKEN")?,
    };
    let server_url = auth::normalize_server_url(server)?;
    let client = GitlabClient::new(&server_url, config.http_timeout())?;
    let visible = auth::authorize(state, &client, server_url.clone(), SecretString::from(token))
        .await?;
    println!("Logged in to {server_url}, {visible} projects available.");
    Ok(())
}

/// The client and credential of the stored login.
fn session(config: &Config, state: &WatchState) -> anyhow::Result<(GitlabClient, SecretString)> {
    match (state.server_url(), state.credential()) {
        (Some(server_url), Some(credential)) => Ok((
            GitlabClient::new(&server_url, config.http_timeout())?,
            credential,
        )),
        _ => anyhow::bail!("not logged in, run `mergewatch login` first"),
    }
}

async fn projects(config: &Config, state: &WatchState, search: Option<&str>) -> anyhow::Result<()> {
    let (client, credential) = session(config, state)?;
    let mut projects = client
        .projects(&credential, search)
        .await
        .context("failed to fetch projects")?;
    if projects.is_empty() {
        match search {
            Some(_) => println!("No projects found."),
            None => println!("You don't have any projects available."),
        }
        return Ok(());
    }

    projects.sort_by(|a, b| a.name.cmp(&b.name));
    let watched = state.watched_project_ids();
    for project in projects {
        let marker = if watched.contains(&project.id) { "*" } else { " " };
        println!(
            "{marker} {:>8}  {}  {}",
            project.id,
            project.display_name(),
            project.web_url
        );
    }
    Ok(())
}

async fn watch(config: &Config, state: &WatchState, ids: &[ProjectId]) -> anyhow::Result<()> {
    let (client, credential) = session(config, state)?;
    let directory: HashMap<ProjectId, Project> = client
        .projects(&credential, None)
        .await
        .context("failed to fetch projects")?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    for id in ids {
        let Some(project) = directory.get(id) else {
            println!("Project {id} is not available to this account.");
            continue;
        };
        if state.watch(WatchedProject::from(project))? {
            println!("Watching {}.", project.display_name());
        } else {
            println!("Already watching {}.", project.display_name());
        }
    }
    Ok(())
}

async fn run(config: &Config, state: Arc<WatchState>) -> anyhow::Result<()> {
    let (client, _) = session(config, &state)?;
    if state.watched_project_ids().is_empty() {
        println!("No watched projects yet, see `mergewatch projects` and `mergewatch watch`.");
    }

    let handle = Poller::new(
        state.clone(),
        SnapshotAssembler::new(Arc::new(client), config.directory_refresh()),
        NotificationDispatcher::new(Arc::new(TerminalNotifier)),
        config.poll_interval(),
    )
    .start();
    let mut events = handle.subscribe_events();
    let mut snapshots = handle.subscribe_snapshots();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => break,
            line = stdin.next_line(), if stdin_open => match line {
                Ok(Some(_)) => {
                    if handle.trigger_refresh_now().await? == TriggerOutcome::AlreadyFetching {
                        println!("Already refreshing.");
                    }
                }
                Ok(None) => stdin_open = false,
                Err(e) => {
                    tracing::warn!("stdin closed: {e}");
                    stdin_open = false;
                }
            },
            Ok(()) = snapshots.changed() => {
                if let Some(snapshot) = snapshots.borrow_and_update().clone() {
                    print_snapshot(&snapshot, state.badge_count());
                }
            }
            Ok(event) = events.recv() => {
                if event == PollEvent::LoggedOut {
                    println!("The server rejected the access token, run `mergewatch login` again.");
                    break;
                }
            }
        }
    }

    handle.stop().await;
    Ok(())
}

fn print_snapshot(snapshot: &PollSnapshot, badge: usize) {
    println!("Open merge requests: {badge}");
    for project in &snapshot.projects {
        println!("  {} ({})", project.project.display_name(), project.requests.len());
        for request in &project.requests {
            let approvals = if request.approved_by.is_empty() {
                String::new()
            } else {
                format!(
                    ", approved by {}",
                    request.approved_by.iter().map(|u| &u.name).format(", ")
                )
            };
            println!(
                "    !{} {} by {} ({} comments{approvals})",
                request.iid, request.title, request.author.name, request.comment_count
            );
            println!("      {}", request.web_url);
        }
    }
}
