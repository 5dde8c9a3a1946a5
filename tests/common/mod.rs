//! Utility code to help writing mergewatch tests.
//!
//! The tests stand up a tiny HTTP/1.1 server on a random local port that
//! answers GET requests the way a GitLab instance would.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::{Arc, Mutex};
use url::Url;

/// The callback type for HTTP route handlers.
pub type RequestCallback = Box<dyn Send + Fn(Request) -> Response>;

/// A GET request received on the HTTP server.
#[derive(Clone, Debug)]
pub struct Request {
    /// Segments captured with the `{name}` syntax of the route.
    pub components: HashMap<String, String>,
    /// The query pairs of the URL, in order.
    pub query: Vec<(String, String)>,
    /// HTTP headers, with lowercase names.
    pub headers: HashMap<String, String>,
}

impl Request {
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    pub fn query_string(&self) -> String {
        let vs: Vec<_> = self.query.iter().map(|(k, v)| format!("{k}={v}")).collect();
        vs.join("&")
    }
}

/// The response the HTTP server should send to the client.
pub struct Response {
    pub code: u32,
    pub body: Vec<u8>,
}

impl Response {
    pub fn json(value: serde_json::Value) -> Response {
        Response {
            code: 200,
            body: value.to_string().into_bytes(),
        }
    }

    pub fn status(mut self, code: u32) -> Self {
        self.code = code;
        self
    }
}

/// The paths requested from the server, in arrival order.
#[derive(Clone)]
pub struct Events(Arc<Mutex<Vec<String>>>);

impl Events {
    pub fn new() -> Events {
        Events(Arc::new(Mutex::new(Vec::new())))
    }

    fn push(&self, path: &str) {
        self.0.lock().unwrap().push(path.to_string());
    }

    pub fn assert_eq(&self, expected: &[&str]) {
        let actual = self.0.lock().unwrap();
        assert_eq!(*actual, expected, "requests seen by the server");
    }

    /// Like [`Events::assert_eq`], for requests sent concurrently.
    pub fn assert_unordered(&self, expected: &[&str]) {
        let mut actual = self.0.lock().unwrap().clone();
        let mut expected = expected.to_vec();
        actual.sort();
        expected.sort();
        assert_eq!(actual, expected, "requests seen by the server");
    }
}

/// A primitive HTTP server standing in for a GitLab instance.
pub struct HttpServer {
    listener: TcpListener,
    routes: HashMap<&'static str, RequestCallback>,
    events: Events,
}

/// Keeps the server alive; dropping it shuts the server down.
pub struct HttpServerHandle {
    pub addr: SocketAddr,
}

impl HttpServerHandle {
    /// Base URL of the REST API served by this server.
    pub fn api_url(&self) -> String {
        format!("http://{}/api/v4", self.addr)
    }
}

impl Drop for HttpServerHandle {
    fn drop(&mut self) {
        if let Ok(mut stream) = TcpStream::connect(self.addr) {
            let _ = stream.write_all(b"STOP\r\n");
        }
    }
}

/// Request line, URL and headers of one incoming request.
struct Incoming {
    method: String,
    url: Url,
    headers: HashMap<String, String>,
}

impl HttpServer {
    /// Starts a server on a random local port.
    ///
    /// Routes are paths like `api/v4/projects`. A `{name}` segment matches
    /// any value, which the handler finds in [`Request::components`].
    /// Unrouted paths answer 404.
    pub fn new(routes: HashMap<&'static str, RequestCallback>, events: Events) -> HttpServerHandle {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let server = HttpServer {
            listener,
            routes,
            events,
        };
        std::thread::spawn(move || server.serve());
        HttpServerHandle { addr }
    }

    fn serve(&self) {
        for socket in self.listener.incoming() {
            let mut reader = BufReader::new(socket.unwrap());
            let Some(incoming) = read_request(&mut reader) else {
                continue;
            };
            if incoming.method == "STOP" {
                return;
            }
            assert_eq!(incoming.method, "GET", "only GET is served");
            self.events.push(incoming.url.path());
            let response = self.respond(incoming);

            let stream = reader.get_mut();
            write!(
                stream,
                "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                response.code,
                response.body.len()
            )
            .unwrap();
            stream.write_all(&response.body).unwrap();
            stream.flush().unwrap();
        }
    }

    fn respond(&self, incoming: Incoming) -> Response {
        let segments: Vec<_> = incoming.url.path_segments().unwrap().collect();
        let routed = self
            .routes
            .iter()
            .find_map(|(pattern, responder)| Some((capture(pattern, &segments)?, responder)));
        let Some((components, responder)) = routed else {
            eprintln!("no route for {}", incoming.url);
            return Response::json(serde_json::json!({"message": "404 Not found"})).status(404);
        };
        let request = Request {
            components,
            query: incoming
                .url
                .query_pairs()
                .map(|(k, v)| (k.into_owned(), v.into_owned()))
                .collect(),
            headers: incoming.headers,
        };
        tracing::debug!("request={request:?}");
        responder(request)
    }
}

/// Reads the request line and headers; `None` if the client hung up early.
fn read_request(reader: &mut BufReader<TcpStream>) -> Option<Incoming> {
    let mut line = String::new();
    if reader.read_line(&mut line).ok()? == 0 {
        return None;
    }
    let mut parts = line.split_ascii_whitespace();
    let method = parts.next()?.to_ascii_uppercase();
    // The host is irrelevant; it only lets `Url` parse path and query.
    let url = Url::parse(&format!("http://gitlab.test{}", parts.next().unwrap_or("/"))).ok()?;

    let mut headers = HashMap::new();
    if method != "STOP" {
        loop {
            let mut header = String::new();
            if reader.read_line(&mut header).ok()? == 0 {
                return None;
            }
            let Some((name, value)) = header.trim_end().split_once(':') else {
                break;
            };
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_string());
        }
    }
    Some(Incoming {
        method,
        url,
        headers,
    })
}

/// Matches `segments` against `pattern`, returning the `{name}` captures.
fn capture(pattern: &str, segments: &[&str]) -> Option<HashMap<String, String>> {
    let parts: Vec<_> = pattern.split('/').collect();
    if parts.len() != segments.len() {
        return None;
    }
    let mut components = HashMap::new();
    for (part, segment) in parts.iter().zip(segments) {
        match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some(name) => {
                components.insert(name.to_string(), segment.to_string());
            }
            None if part == segment => {}
            None => return None,
        }
    }
    Some(components)
}

/// Enables logging if `MERGEWATCH_TEST_LOG` is set. This can help with
/// debugging a test.
pub fn maybe_enable_logging() {
    const LOG_VAR: &str = "MERGEWATCH_TEST_LOG";
    use std::sync::Once;
    static DO_INIT: Once = Once::new();
    if std::env::var_os(LOG_VAR).is_some() {
        DO_INIT.call_once(|| {
            dotenvy::dotenv().ok();
            tracing_subscriber::fmt::Subscriber::builder()
                .with_env_filter(tracing_subscriber::EnvFilter::from_env(LOG_VAR))
                .with_ansi(std::env::var_os("DISABLE_COLOR").is_none())
                .try_init()
                .unwrap();
        });
    }
}

#[test]
fn routes_capture_components() {
    let components = capture(
        "api/v4/projects/{id}/merge_requests",
        &["api", "v4", "projects", "7", "merge_requests"],
    )
    .unwrap();
    assert_eq!(components["id"], "7");
    assert!(capture("api/v4/projects", &["api", "v4", "projects", "7"]).is_none());
    assert!(capture("api/v4/groups", &["api", "v4", "projects"]).is_none());
}
