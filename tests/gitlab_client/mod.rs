//! `GitlabClient` tests.
//!
//! These tests start a local HTTP server answering like a GitLab instance,
//! point a `GitlabClient` at it, execute some action and validate the
//! result together with the requests the server saw.
//!
//! Handlers are registered with [`server`]; the path patterns are described
//! on [`HttpServer::new`].

use super::common::{Events, HttpServer, HttpServerHandle, Request, RequestCallback, Response};
use mergewatch::assembler::SnapshotAssembler;
use mergewatch::errors::ApiError;
use mergewatch::gitlab::{GitlabApi, GitlabClient};
use mergewatch::notification::{Alert, NotificationDispatcher, Notifier};
use mergewatch::poll::Poller;
use mergewatch::watch_state::{WatchState, WatchedProject};
use secrecy::SecretString;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use url::Url;

const TOKEN: &str = "glpat-test-token";

struct GlTestCtx {
    gl: GitlabClient,
    events: Events,
    #[allow(dead_code)] // held for drop
    server: HttpServerHandle,
}

fn server(routes: Vec<(&'static str, RequestCallback)>) -> GlTestCtx {
    super::common::maybe_enable_logging();
    let routes: HashMap<_, _> = routes.into_iter().collect();
    let events = Events::new();
    let server = HttpServer::new(routes, events.clone());
    let gl = GitlabClient::with_api_url(server.api_url(), Duration::from_secs(10)).unwrap();
    GlTestCtx { gl, events, server }
}

fn authorized(responder: impl Fn(Request) -> Response + Send + 'static) -> RequestCallback {
    Box::new(move |req: Request| {
        if req.headers.get("private-token").map(String::as_str) != Some(TOKEN) {
            return Response::json(json!({"message": "401 Unauthorized"})).status(401);
        }
        responder(req)
    })
}

fn token() -> SecretString {
    SecretString::from(TOKEN)
}

fn project_json(id: u64) -> serde_json::Value {
    json!({
        "id": id,
        "name": format!("project-{id}"),
        "web_url": format!("https://gitlab.example.com/group/project-{id}"),
        "namespace": {"name": "group"},
    })
}

fn request_json(id: u64, iid: u64, comments: u32) -> serde_json::Value {
    json!({
        "id": id,
        "iid": iid,
        "title": format!("Request {id}"),
        "state": "opened",
        "author": {"name": "Ada", "avatar_url": null},
        "web_url": format!("https://gitlab.example.com/group/project/-/merge_requests/{iid}"),
        "user_notes_count": comments,
    })
}

#[tokio::test]
async fn projects_are_paginated() {
    let ctx = server(vec![(
        "api/v4/projects",
        authorized(|req| {
            assert_eq!(req.query_value("membership"), Some("true"));
            assert_eq!(req.query_value("per_page"), Some("100"));
            let ids: Vec<u64> = match req.query_value("page") {
                Some("1") => (1..=100).collect(),
                Some("2") => vec![101],
                page => panic!("unexpected page {page:?}"),
            };
            Response::json(ids.into_iter().map(project_json).collect())
        }),
    )]);

    let projects = ctx.gl.list_projects(&token()).await.unwrap();
    assert_eq!(projects.len(), 101);
    assert_eq!(projects[100].id, 101);
    assert_eq!(projects[0].display_name(), "group / project-1");
    ctx.events
        .assert_eq(&["/api/v4/projects", "/api/v4/projects"]);
}

#[tokio::test]
async fn pagination_stops_when_page_is_ignored() {
    let ctx = server(vec![(
        "api/v4/projects",
        authorized(|_| Response::json((1..=100).map(project_json).collect())),
    )]);

    let projects = ctx.gl.list_projects(&token()).await.unwrap();
    assert_eq!(projects.len(), 50 * 100);
    ctx.events.assert_eq(&vec!["/api/v4/projects"; 50]);
}

#[tokio::test]
async fn search_is_forwarded() {
    let ctx = server(vec![(
        "api/v4/projects",
        authorized(|req| {
            assert_eq!(req.query_value("search"), Some("tools"), "{}", req.query_string());
            Response::json(json!([project_json(3)]))
        }),
    )]);

    let projects = ctx.gl.projects(&token(), Some("tools")).await.unwrap();
    assert_eq!(projects.len(), 1);
}

#[tokio::test]
async fn rejected_token_is_unauthorized() {
    let ctx = server(vec![(
        "api/v4/projects",
        authorized(|_| Response::json(json!([]))),
    )]);

    let err = ctx
        .gl
        .list_projects(&SecretString::from("wrong"))
        .await
        .unwrap_err();
    assert!(err.is_unauthorized());
}

#[tokio::test]
async fn open_requests_are_decoded() {
    let ctx = server(vec![(
        "api/v4/projects/{id}/merge_requests",
        authorized(|req| {
            assert_eq!(req.components["id"], "7");
            assert_eq!(req.query_value("state"), Some("opened"));
            Response::json(json!([request_json(70, 1, 3), request_json(71, 2, 0)]))
        }),
    )]);

    let requests = ctx.gl.list_open_requests(7, &token()).await.unwrap();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].iid, 1);
    assert_eq!(requests[0].comment_count, 3);
    assert_eq!(requests[0].author.avatar_url, "");
    ctx.events
        .assert_eq(&["/api/v4/projects/7/merge_requests"]);
}

#[tokio::test]
async fn missing_project_has_no_requests() {
    let ctx = server(vec![]);
    let requests = ctx.gl.list_open_requests(404, &token()).await.unwrap();
    assert!(requests.is_empty());
}

#[tokio::test]
async fn approvals_are_decoded() {
    let ctx = server(vec![(
        "api/v4/projects/{id}/merge_requests/{iid}/approvals",
        authorized(|req| {
            assert_eq!(req.components["iid"], "2");
            Response::json(json!({
                "approvals_required": 2,
                "approvals_left": 1,
                "approved_by": [{"user": {"name": "Grace", "avatar_url": "https://example.com/g.png"}}],
            }))
        }),
    )]);

    let approvals = ctx.gl.get_approvals(7, 2, &token()).await.unwrap();
    assert_eq!(approvals.approvals_left, Some(1));
    let approvers = approvals.approvers();
    assert_eq!(approvers.len(), 1);
    assert_eq!(approvers[0].name, "Grace");
}

#[tokio::test]
async fn server_errors_carry_the_message() {
    let ctx = server(vec![(
        "api/v4/projects",
        authorized(|_| Response::json(json!({"message": "500 Internal Server Error"})).status(500)),
    )]);

    let err = ctx.gl.list_projects(&token()).await.unwrap_err();
    let ApiError::Transport(e) = err else {
        panic!("expected a transport error, got {err:?}");
    };
    assert!(format!("{e:#}").contains("500 Internal Server Error"), "{e:#}");
}

#[tokio::test]
async fn malformed_body_is_a_transport_error() {
    let ctx = server(vec![(
        "api/v4/projects",
        authorized(|_| Response::json(json!([{"id": "not a number"}]))),
    )]);

    let err = ctx.gl.list_projects(&token()).await.unwrap_err();
    assert!(matches!(err, ApiError::Transport(_)), "{err:?}");
}

#[derive(Default)]
struct Collect(Mutex<Vec<Alert>>);

impl Notifier for Collect {
    fn deliver(&self, alert: &Alert) {
        self.0.lock().unwrap().push(alert.clone());
    }
}

#[tokio::test]
async fn poll_cycle_over_http() {
    let ctx = server(vec![
        (
            "api/v4/projects",
            authorized(|_| Response::json(json!([project_json(1), project_json(2)]))),
        ),
        (
            "api/v4/projects/{id}/merge_requests",
            authorized(|req| match req.components["id"].as_str() {
                "1" => Response::json(json!([request_json(10, 1, 1), request_json(11, 2, 0)])),
                _ => Response::json(json!([])),
            }),
        ),
        (
            "api/v4/projects/{id}/merge_requests/{iid}/approvals",
            authorized(|_| Response::json(json!({"approved_by": []}))),
        ),
    ]);

    let state = Arc::new(WatchState::in_memory());
    state
        .authorize(Url::parse("https://gitlab.example.com/").unwrap(), token())
        .unwrap();
    state
        .watch(WatchedProject {
            id: 1,
            name: "project-1".to_string(),
            web_url: "https://gitlab.example.com/group/project-1".to_string(),
        })
        .unwrap();

    let notifier = Arc::new(Collect::default());
    let handle = Poller::new(
        state.clone(),
        SnapshotAssembler::new(Arc::new(ctx.gl.clone()), Duration::ZERO),
        NotificationDispatcher::new(notifier.clone()),
        Duration::from_secs(3600),
    )
    .start();
    let mut snapshots = handle.subscribe_snapshots();
    snapshots.changed().await.unwrap();
    let snapshot = snapshots.borrow_and_update().clone().unwrap();
    handle.stop().await;

    assert_eq!(snapshot.total_count(), 2);
    assert_eq!(state.badge_count(), 2);
    assert!(notifier.0.lock().unwrap().is_empty());
    ctx.events.assert_unordered(&[
        "/api/v4/projects",
        "/api/v4/projects/1/merge_requests",
        "/api/v4/projects/1/merge_requests/1/approvals",
        "/api/v4/projects/1/merge_requests/2/approvals",
    ]);
}
