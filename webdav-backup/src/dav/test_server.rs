//! In-process WebDAV server for tests.
//!
//! Understands just enough PROPFIND/MKCOL/PUT to exercise the client, keeps
//! everything in memory and records every request it sees.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Router;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Notify;

/// Every fake server is mounted under this path.
const ROOT: &str = "/dav";

#[derive(Default)]
struct FakeDavState {
    collections: HashSet<String>,
    objects: HashMap<String, Vec<u8>>,
    requests: Vec<(String, String)>,
    authorizations: Vec<Option<String>>,
    put_failures: usize,
    drop_uploads: bool,
    deny_propfind: bool,
    redirect_propfind: bool,
    mkcol_failures: HashSet<String>,
}

type Shared = Arc<Mutex<FakeDavState>>;

pub(crate) struct FakeDav {
    /// `http://127.0.0.1:<port>/dav`
    pub base_url: String,
    state: Shared,
    server: tokio::task::JoinHandle<()>,
}

impl FakeDav {
    pub(crate) async fn start() -> Self {
        let state: Shared = Arc::default();
        state.lock().unwrap().collections.insert(ROOT.to_string());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = Router::new().fallback(handle).with_state(Arc::clone(&state));
        let server = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url: format!("http://{}{}", addr, ROOT),
            state,
            server,
        }
    }

    fn state(&self) -> MutexGuard<'_, FakeDavState> {
        self.state.lock().unwrap()
    }

    pub(crate) fn requests(&self) -> Vec<(String, String)> {
        self.state().requests.clone()
    }

    pub(crate) fn clear_requests(&self) {
        self.state().requests.clear();
    }

    pub(crate) fn authorizations(&self) -> Vec<Option<String>> {
        self.state().authorizations.clone()
    }

    pub(crate) fn has_collection(&self, path: &str) -> bool {
        self.state().collections.contains(path)
    }

    pub(crate) fn add_collection(&self, path: &str) {
        self.state().collections.insert(path.to_string());
    }

    pub(crate) fn object(&self, path: &str) -> Option<Vec<u8>> {
        self.state().objects.get(path).cloned()
    }

    /// Answer the next `n` PUTs with 503.
    pub(crate) fn fail_next_puts(&self, n: usize) {
        self.state().put_failures = n;
    }

    /// Accept PUTs with 201 but never store the body.
    pub(crate) fn drop_uploads(&self) {
        self.state().drop_uploads = true;
    }

    /// Answer every PROPFIND with 403.
    pub(crate) fn deny_propfind(&self) {
        self.state().deny_propfind = true;
    }

    /// Answer every PROPFIND with a 301 to a login page.
    pub(crate) fn redirect_propfind(&self) {
        self.state().redirect_propfind = true;
    }

    /// Answer MKCOL on `path` with 500.
    pub(crate) fn fail_mkcol(&self, path: &str) {
        self.state().mkcol_failures.insert(path.to_string());
    }
}

impl Drop for FakeDav {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Base URL of a port nothing listens on.
pub(crate) fn unreachable_base_url() -> String {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    format!("http://{}{}", addr, ROOT)
}

fn parent(path: &str) -> &str {
    path.rsplit_once('/').map(|(p, _)| p).unwrap_or("")
}

fn multistatus(path: &str, size: Option<usize>) -> String {
    let prop = match size {
        Some(size) => format!("<d:resourcetype/><d:getcontentlength>{}</d:getcontentlength>", size),
        None => "<d:resourcetype><d:collection/></d:resourcetype>".to_string(),
    };
    format!(
        r#"<?xml version="1.0" encoding="utf-8"?><d:multistatus xmlns:d="DAV:"><d:response><d:href>{}</d:href><d:propstat><d:prop>{}</d:prop><d:status>HTTP/1.1 200 OK</d:status></d:propstat></d:response></d:multistatus>"#,
        path, prop
    )
}

async fn handle(
    State(state): State<Shared>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri.path().trim_end_matches('/').to_string();
    let mut s = state.lock().unwrap();
    s.requests.push((method.as_str().to_string(), path.clone()));
    let auth = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    s.authorizations.push(auth);

    match method.as_str() {
        "PROPFIND" => {
            if s.deny_propfind {
                (StatusCode::FORBIDDEN, "propfind denied").into_response()
            } else if s.redirect_propfind {
                (
                    StatusCode::MOVED_PERMANENTLY,
                    [(header::LOCATION, "http://elsewhere.invalid/login")],
                )
                    .into_response()
            } else if s.collections.contains(&path) {
                (StatusCode::MULTI_STATUS, multistatus(&path, None)).into_response()
            } else if let Some(data) = s.objects.get(&path) {
                (StatusCode::MULTI_STATUS, multistatus(&path, Some(data.len()))).into_response()
            } else {
                StatusCode::NOT_FOUND.into_response()
            }
        }
        "MKCOL" => {
            if s.mkcol_failures.contains(&path) {
                (StatusCode::INTERNAL_SERVER_ERROR, "mkcol exploded").into_response()
            } else if s.collections.contains(&path) || s.objects.contains_key(&path) {
                StatusCode::METHOD_NOT_ALLOWED.into_response()
            } else if !s.collections.contains(parent(&path)) {
                StatusCode::CONFLICT.into_response()
            } else {
                s.collections.insert(path);
                StatusCode::CREATED.into_response()
            }
        }
        "PUT" => {
            if s.put_failures > 0 {
                s.put_failures -= 1;
                (StatusCode::SERVICE_UNAVAILABLE, "try again later").into_response()
            } else if !s.collections.contains(parent(&path)) {
                StatusCode::CONFLICT.into_response()
            } else {
                if !s.drop_uploads {
                    s.objects.insert(path, body.to_vec());
                }
                StatusCode::CREATED.into_response()
            }
        }
        _ => StatusCode::METHOD_NOT_ALLOWED.into_response(),
    }
}

/// How a [`RawServer`] treats each connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RawBehavior {
    /// Send a 207 status line, then close before the promised body is complete.
    TruncatedPropfind,
    /// 404 on PROPFIND and 201 on MKCOL, but every PUT loses its connection
    /// partway through the body.
    DropPuts,
    /// Accept the connection and never answer.
    Stall,
}

/// Hand-written HTTP/1.1 server for failures axum cannot produce: cut-off
/// bodies and sockets closed under a request.
pub(crate) struct RawServer {
    /// `http://127.0.0.1:<port>/dav`
    pub base_url: String,
    connections: Arc<AtomicUsize>,
    connected: Arc<Notify>,
    server: tokio::task::JoinHandle<()>,
}

impl RawServer {
    pub(crate) async fn start(behavior: RawBehavior) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let connections = Arc::new(AtomicUsize::new(0));
        let connected = Arc::new(Notify::new());

        let (count, notify) = (Arc::clone(&connections), Arc::clone(&connected));
        let server = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                count.fetch_add(1, Ordering::SeqCst);
                notify.notify_one();
                tokio::spawn(serve_raw(stream, behavior));
            }
        });

        Self {
            base_url: format!("http://{}{}", addr, ROOT),
            connections,
            connected,
            server,
        }
    }

    /// Connections accepted so far.
    pub(crate) fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Resolves once a client has connected.
    pub(crate) async fn wait_for_connection(&self) {
        self.connected.notified().await;
    }
}

impl Drop for RawServer {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Request line method, declared body length and the body bytes that
/// arrived together with the head.
async fn read_head(stream: &mut TcpStream) -> Option<(String, usize, usize)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..end]).to_string();
            let method = head.split_whitespace().next().unwrap_or_default().to_string();
            let length = head
                .lines()
                .filter_map(|line| line.split_once(':'))
                .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
                .and_then(|(_, value)| value.trim().parse().ok())
                .unwrap_or(0);
            return Some((method, length, buf.len() - end - 4));
        }
    }
}

/// Read and discard `remaining` body bytes.
async fn drain(stream: &mut TcpStream, mut remaining: usize) {
    let mut chunk = [0u8; 8192];
    while remaining > 0 {
        match stream.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => remaining = remaining.saturating_sub(n),
        }
    }
}

async fn respond_empty(stream: &mut TcpStream, status: &str) {
    let response = format!("HTTP/1.1 {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n", status);
    let _ = stream.write_all(response.as_bytes()).await;
    let _ = stream.shutdown().await;
}

async fn serve_raw(mut stream: TcpStream, behavior: RawBehavior) {
    if behavior == RawBehavior::Stall {
        std::future::pending::<()>().await;
    }
    let Some((method, length, received)) = read_head(&mut stream).await else {
        return;
    };

    match (behavior, method.as_str()) {
        (RawBehavior::TruncatedPropfind, _) => {
            drain(&mut stream, length.saturating_sub(received)).await;
            let head = "HTTP/1.1 207 Multi-Status\r\nContent-Type: application/xml\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n";
            let _ = stream.write_all(head.as_bytes()).await;
            let _ = stream.write_all(b"<?xml version=\"1.0\"?><d:multistatus xmlns:d=\"DAV:\"><d:resp").await;
            let _ = stream.flush().await;
            // dropping the stream cuts the body short
        }
        (RawBehavior::DropPuts, "PUT") => {
            // take a little of the body, then hang up mid-transfer
            drain(&mut stream, length.saturating_sub(received).min(16 * 1024)).await;
        }
        (RawBehavior::DropPuts, "PROPFIND") => {
            drain(&mut stream, length.saturating_sub(received)).await;
            respond_empty(&mut stream, "404 Not Found").await;
        }
        (RawBehavior::DropPuts, _) => {
            drain(&mut stream, length.saturating_sub(received)).await;
            respond_empty(&mut stream, "201 Created").await;
        }
        (RawBehavior::Stall, _) => {}
    }
}
