//! In-process stand-in for the container daemon.
//!
//! [`FakeDaemon`] serves the handful of container endpoints the client uses
//! on a Unix socket in a temporary directory. Each created container follows
//! a [`Script`] chosen from its create body, so tests control exit codes, log
//! output, timing and failures. [`RawDaemon`] instead replays canned bytes,
//! for exercising response framing directly.

use daemon_wire::{encode_frame, StreamOrigin};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Timestamp stamped on every log line the fake emits.
pub const FAKE_TIMESTAMP: &str = "2024-01-01T00:00:00.000000000Z";

/// Behaviour of one container.
#[derive(Debug, Clone)]
pub struct Script {
    pub exit_code: i64,
    pub logs: Vec<(StreamOrigin, String)>,
    pub wait_delay: Duration,
    pub fail_create: Option<(u16, String)>,
    pub fail_start: Option<(u16, String)>,
}

impl Script {
    pub fn exit(code: i64) -> Self {
        Self {
            exit_code: code,
            logs: Vec::new(),
            wait_delay: Duration::ZERO,
            fail_create: None,
            fail_start: None,
        }
    }

    pub fn stdout(mut self, line: impl Into<String>) -> Self {
        self.logs.push((StreamOrigin::Stdout, line.into()));
        self
    }

    pub fn stderr(mut self, line: impl Into<String>) -> Self {
        self.logs.push((StreamOrigin::Stderr, line.into()));
        self
    }

    pub fn delay(mut self, delay: Duration) -> Self {
        self.wait_delay = delay;
        self
    }

    pub fn create_fails(mut self, status: u16, message: impl Into<String>) -> Self {
        self.fail_create = Some((status, message.into()));
        self
    }

    pub fn start_fails(mut self, status: u16, message: impl Into<String>) -> Self {
        self.fail_start = Some((status, message.into()));
        self
    }
}

impl Default for Script {
    fn default() -> Self {
        Self::exit(0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl RecordedRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    pub fn json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

type Scripter = Arc<dyn Fn(&Value) -> Script + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Status {
    Created,
    Running,
    Exited(i64),
}

struct FakeContainer {
    script: Script,
    create_body: Value,
    status: Status,
    interrupted: Option<i64>,
    wake: Arc<Notify>,
}

struct State {
    scripter: Scripter,
    write_chunk: Option<usize>,
    next_id: AtomicU64,
    containers: Mutex<HashMap<String, FakeContainer>>,
    removed: Mutex<Vec<String>>,
    requests: Mutex<Vec<RecordedRequest>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poison| poison.into_inner())
}

pub struct FakeDaemonBuilder {
    scripter: Scripter,
    write_chunk: Option<usize>,
}

impl FakeDaemonBuilder {
    /// Pick a script for each create request from its JSON body.
    pub fn script<F>(mut self, scripter: F) -> Self
    where
        F: Fn(&Value) -> Script + Send + Sync + 'static,
    {
        self.scripter = Arc::new(scripter);
        self
    }

    /// Write every response in pieces of at most `bytes` bytes.
    pub fn write_chunk(mut self, bytes: usize) -> Self {
        self.write_chunk = Some(bytes.max(1));
        self
    }

    pub async fn spawn(self) -> io::Result<FakeDaemon> {
        let dir = tempfile::tempdir()?;
        let socket_path = dir.path().join("daemon.sock");
        let listener = UnixListener::bind(&socket_path)?;
        let state = Arc::new(State {
            scripter: self.scripter,
            write_chunk: self.write_chunk,
            next_id: AtomicU64::new(1),
            containers: Mutex::new(HashMap::new()),
            removed: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
        });

        let accept_state = Arc::clone(&state);
        let task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve_connection(stream, Arc::clone(&accept_state)));
            }
        });

        Ok(FakeDaemon {
            _dir: dir,
            socket_path,
            state,
            task,
        })
    }
}

pub struct FakeDaemon {
    _dir: TempDir,
    socket_path: PathBuf,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl FakeDaemon {
    pub fn builder() -> FakeDaemonBuilder {
        FakeDaemonBuilder {
            scripter: Arc::new(|_: &Value| Script::default()),
            write_chunk: None,
        }
    }

    /// Daemon where every container exits 0 without output.
    pub async fn spawn() -> io::Result<Self> {
        Self::builder().spawn().await
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        lock(&self.state.requests).clone()
    }

    /// Ids of containers that exist and have not been removed.
    pub fn live_containers(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.state.containers).keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn running_containers(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.state.containers)
            .iter()
            .filter(|(_, container)| container.status == Status::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    pub fn removed_containers(&self) -> Vec<String> {
        lock(&self.state.removed).clone()
    }

    pub fn created_count(&self) -> usize {
        (self.state.next_id.load(Ordering::SeqCst) - 1) as usize
    }

    /// JSON bodies of every create request, in arrival order, including ones
    /// whose containers are already gone.
    pub fn create_requests(&self) -> Vec<Value> {
        lock(&self.state.requests)
            .iter()
            .filter(|request| request.method == "POST" && request.path.ends_with("/containers/create"))
            .filter_map(RecordedRequest::json)
            .collect()
    }

    /// Create body the daemon received for `id`, while it still exists.
    pub fn create_body(&self, id: &str) -> Option<Value> {
        lock(&self.state.containers)
            .get(id)
            .map(|container| container.create_body.clone())
    }
}

impl Drop for FakeDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}

struct Response {
    status: u16,
    reason: &'static str,
    headers: Vec<(&'static str, String)>,
    body: Vec<u8>,
}

impl Response {
    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            reason: reason(status),
            headers: vec![("Content-Type", "application/json".to_string())],
            body: body.to_string().into_bytes(),
        }
    }

    fn empty(status: u16) -> Self {
        Self {
            status,
            reason: reason(status),
            headers: Vec::new(),
            body: Vec::new(),
        }
    }

    fn message(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "message": message.into() }))
    }

    /// Serialize, using chunked encoding with one chunk per entry of `chunks`
    /// when given.
    fn to_bytes(&self, chunks: Option<&[Vec<u8>]>) -> Vec<u8> {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason).into_bytes();
        out.extend_from_slice(b"Api-Version: 1.43\r\nServer: fake-daemon\r\n");
        for (name, value) in &self.headers {
            out.extend_from_slice(format!("{name}: {value}\r\n").as_bytes());
        }
        match chunks {
            Some(chunks) => {
                out.extend_from_slice(b"Transfer-Encoding: chunked\r\n\r\n");
                for chunk in chunks.iter().filter(|chunk| !chunk.is_empty()) {
                    out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
                    out.extend_from_slice(chunk);
                    out.extend_from_slice(b"\r\n");
                }
                out.extend_from_slice(b"0\r\n\r\n");
            }
            None => {
                if self.status != 204 && self.status != 304 {
                    out.extend_from_slice(
                        format!("Content-Length: {}\r\n", self.body.len()).as_bytes(),
                    );
                }
                out.extend_from_slice(b"\r\n");
                out.extend_from_slice(&self.body);
            }
        }
        out
    }
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        409 => "Conflict",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Read one request off `stream`, keeping any extra bytes in `buffer`.
async fn read_request(
    stream: &mut UnixStream,
    buffer: &mut Vec<u8>,
) -> io::Result<Option<RecordedRequest>> {
    let mut scratch = [0u8; 4096];
    let head_end = loop {
        if let Some(end) = find(buffer, b"\r\n\r\n") {
            break end;
        }
        let read = stream.read(&mut scratch).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&scratch[..read]);
    };

    let head = String::from_utf8_lossy(&buffer[..head_end]).into_owned();
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_string(), value.trim().to_string()))
        .collect();
    let length = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("Content-Length"))
        .and_then(|(_, value)| value.parse::<usize>().ok())
        .unwrap_or(0);

    let body_start = head_end + 4;
    while buffer.len() < body_start + length {
        let read = stream.read(&mut scratch).await?;
        if read == 0 {
            return Ok(None);
        }
        buffer.extend_from_slice(&scratch[..read]);
    }
    let body = buffer[body_start..body_start + length].to_vec();
    buffer.drain(..body_start + length);

    Ok(Some(RecordedRequest {
        method,
        path,
        headers,
        body,
    }))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

async fn write_response(
    stream: &mut UnixStream,
    bytes: &[u8],
    chunk: Option<usize>,
) -> io::Result<()> {
    match chunk {
        Some(size) => {
            for piece in bytes.chunks(size) {
                stream.write_all(piece).await?;
                stream.flush().await?;
                tokio::task::yield_now().await;
            }
        }
        None => stream.write_all(bytes).await?,
    }
    stream.flush().await
}

async fn serve_connection(mut stream: UnixStream, state: Arc<State>) {
    let mut buffer = Vec::new();
    loop {
        let request = match read_request(&mut stream, &mut buffer).await {
            Ok(Some(request)) => request,
            Ok(None) | Err(_) => return,
        };
        debug!(method = %request.method, path = %request.path, "fake daemon request");
        lock(&state.requests).push(request.clone());

        let bytes = route(&state, &request).await;
        if write_response(&mut stream, &bytes, state.write_chunk)
            .await
            .is_err()
        {
            return;
        }
    }
}

/// Split `/v1.43/containers/abc/start?x=y` into (`containers/abc/start`, query).
fn split_path(path: &str) -> (String, HashMap<String, String>) {
    let (path, query) = path.split_once('?').unwrap_or((path, ""));
    let mut segments: Vec<&str> = path.trim_start_matches('/').split('/').collect();
    let versioned = segments
        .first()
        .map(|first| {
            first.starts_with('v') && first[1..].starts_with(|c: char| c.is_ascii_digit())
        })
        .unwrap_or(false);
    if versioned {
        segments.remove(0);
    }
    let query = query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect();
    (segments.join("/"), query)
}

async fn route(state: &State, request: &RecordedRequest) -> Vec<u8> {
    let (path, query) = split_path(&request.path);
    let segments: Vec<&str> = path.split('/').collect();

    let response = match (request.method.as_str(), segments.as_slice()) {
        ("GET", ["_ping"]) => Response {
            status: 200,
            reason: "OK",
            headers: vec![("Content-Type", "text/plain".to_string())],
            body: b"OK".to_vec(),
        },
        ("GET", ["containers", "json"]) => list(state, query.get("all").map(String::as_str)),
        ("POST", ["containers", "create"]) => create(state, &request.body),
        ("POST", ["containers", id, "start"]) => start(state, id),
        ("POST", ["containers", id, "wait"]) => wait(state, id).await,
        ("POST", ["containers", id, "kill"]) => interrupt(state, id, 137, true),
        ("POST", ["containers", id, "stop"]) => interrupt(state, id, 143, false),
        ("GET", ["containers", id, "logs"]) => return logs(state, id),
        ("DELETE", ["containers", id]) => {
            remove(state, id, query.get("force").map(String::as_str) == Some("true"))
        }
        _ => Response::message(404, "page not found"),
    };
    response.to_bytes(None)
}

fn no_such_container(id: &str) -> Response {
    Response::message(404, format!("No such container: {id}"))
}

fn list(state: &State, all: Option<&str>) -> Response {
    let all = all == Some("true") || all == Some("1");
    let containers = lock(&state.containers);
    let mut ids: Vec<&String> = containers.keys().collect();
    ids.sort();
    let entries: Vec<Value> = ids
        .into_iter()
        .filter_map(|id| containers.get(id).map(|container| (id, container)))
        .filter(|(_, container)| all || container.status == Status::Running)
        .map(|(id, container)| {
            let (state_name, status_text) = match container.status {
                Status::Created => ("created", "Created".to_string()),
                Status::Running => ("running", "Up".to_string()),
                Status::Exited(code) => ("exited", format!("Exited ({code})")),
            };
            json!({
                "Id": id,
                "Names": [format!("/{id}")],
                "Image": container.create_body.get("Image").cloned().unwrap_or(Value::Null),
                "State": state_name,
                "Status": status_text,
                "Labels": container.create_body.get("Labels").cloned().unwrap_or_else(|| json!({})),
            })
        })
        .collect();
    Response::json(200, Value::Array(entries))
}

fn create(state: &State, body: &[u8]) -> Response {
    let Ok(body) = serde_json::from_slice::<Value>(body) else {
        return Response::message(400, "invalid JSON");
    };
    if body.get("Image").and_then(Value::as_str).unwrap_or_default().is_empty() {
        return Response::message(400, "config cannot be empty in order to create a container");
    }
    let script = (state.scripter)(&body);
    if let Some((status, message)) = &script.fail_create {
        return Response::message(*status, message.clone());
    }

    let id = format!(
        "{:064x}",
        state.next_id.fetch_add(1, Ordering::SeqCst) as u128 * 0x9e37_79b9
    );
    lock(&state.containers).insert(
        id.clone(),
        FakeContainer {
            script,
            create_body: body,
            status: Status::Created,
            interrupted: None,
            wake: Arc::new(Notify::new()),
        },
    );
    Response::json(201, json!({ "Id": id, "Warnings": [] }))
}

fn start(state: &State, id: &str) -> Response {
    let mut containers = lock(&state.containers);
    let Some(container) = containers.get_mut(id) else {
        return no_such_container(id);
    };
    if let Some((status, message)) = &container.script.fail_start {
        return Response::message(*status, message.clone());
    }
    match container.status {
        Status::Running => Response::empty(304),
        Status::Created => {
            container.status = Status::Running;
            Response::empty(204)
        }
        Status::Exited(_) => Response::message(409, format!("container {id} has exited")),
    }
}

async fn wait(state: &State, id: &str) -> Response {
    let (delay, wake) = {
        let containers = lock(&state.containers);
        let Some(container) = containers.get(id) else {
            return no_such_container(id);
        };
        if let Status::Exited(code) = container.status {
            return Response::json(200, json!({ "StatusCode": code, "Error": null }));
        }
        (container.script.wait_delay, Arc::clone(&container.wake))
    };

    if !delay.is_zero() {
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = wake.notified() => {}
        }
    }

    let mut containers = lock(&state.containers);
    let Some(container) = containers.get_mut(id) else {
        return no_such_container(id);
    };
    let code = match container.status {
        Status::Exited(code) => code,
        _ => container.interrupted.unwrap_or(container.script.exit_code),
    };
    container.status = Status::Exited(code);
    Response::json(200, json!({ "StatusCode": code, "Error": null }))
}

fn interrupt(state: &State, id: &str, code: i64, kill: bool) -> Response {
    let mut containers = lock(&state.containers);
    let Some(container) = containers.get_mut(id) else {
        return no_such_container(id);
    };
    if container.status != Status::Running {
        return if kill {
            Response::message(409, format!("Container {id} is not running"))
        } else {
            Response::empty(304)
        };
    }
    container.interrupted = Some(code);
    container.wake.notify_one();
    Response::empty(204)
}

fn logs(state: &State, id: &str) -> Vec<u8> {
    let containers = lock(&state.containers);
    let Some(container) = containers.get(id) else {
        return no_such_container(id).to_bytes(None);
    };
    let frames: Vec<Vec<u8>> = container
        .script
        .logs
        .iter()
        .map(|(origin, line)| {
            encode_frame(*origin, format!("{FAKE_TIMESTAMP} {line}\n").as_bytes())
        })
        .collect();
    Response {
        status: 200,
        reason: "OK",
        headers: vec![(
            "Content-Type",
            "application/vnd.docker.multiplexed-stream".to_string(),
        )],
        body: Vec::new(),
    }
    .to_bytes(Some(&frames))
}

fn remove(state: &State, id: &str, force: bool) -> Response {
    let mut containers = lock(&state.containers);
    let Some(container) = containers.get(id) else {
        return no_such_container(id);
    };
    if container.status == Status::Running && !force {
        return Response::message(
            409,
            format!("You cannot remove a running container {id}. Stop the container before attempting removal or force remove"),
        );
    }
    if let Some(container) = containers.remove(id) {
        container.wake.notify_one();
    }
    drop(containers);
    lock(&state.removed).push(id.to_string());
    Response::empty(204)
}

/// Single-connection server that answers with canned bytes.
///
/// Once `requests` complete requests have arrived it writes `reply` in pieces
/// of `chunk` bytes, then keeps reading until the client hangs up (or closes
/// immediately when `close_after_reply` is set).
pub struct RawDaemon {
    _dir: TempDir,
    socket_path: PathBuf,
    received: Arc<Mutex<Vec<String>>>,
    task: JoinHandle<()>,
}

impl RawDaemon {
    pub async fn spawn(
        requests: usize,
        reply: Vec<u8>,
        chunk: usize,
        close_after_reply: bool,
    ) -> io::Result<Self> {
        let dir = tempfile::tempdir()?;
        let socket_path = dir.path().join("raw.sock");
        let listener = UnixListener::bind(&socket_path)?;
        let received = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&received);

        let task = tokio::spawn(async move {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let mut buffer = Vec::new();
            for _ in 0..requests {
                match read_request(&mut stream, &mut buffer).await {
                    Ok(Some(request)) => {
                        lock(&seen).push(format!("{} {}", request.method, request.path))
                    }
                    _ => return,
                }
            }
            if write_response(&mut stream, &reply, Some(chunk.max(1)))
                .await
                .is_err()
                || close_after_reply
            {
                return;
            }
            let mut scratch = [0u8; 1024];
            while let Ok(read) = stream.read(&mut scratch).await {
                if read == 0 {
                    break;
                }
            }
        });

        Ok(Self {
            _dir: dir,
            socket_path,
            received,
            task,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Request lines (`METHOD path`) in arrival order.
    pub fn received(&self) -> Vec<String> {
        lock(&self.received).clone()
    }
}

impl Drop for RawDaemon {
    fn drop(&mut self) {
        self.task.abort();
    }
}
