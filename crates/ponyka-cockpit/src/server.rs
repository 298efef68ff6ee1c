//! [`CockpitServer`] – HTTP command surface for the teleop dashboard.
//!
//! Listens on `0.0.0.0:3001` (configurable via [`CockpitServer::with_port`]).
//! One request per connection, JSON in and out, permissive CORS so the
//! dashboard can be served from anywhere.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ponyka_middleware::command::build_task_command;
use ponyka_middleware::{CommandMultiplexer, TaskCommander};
use ponyka_types::{BridgeError, Direction, TaskCommand};
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tokio::net::TcpListener;
use tokio::time;
use tracing::{debug, error, info, warn};

/// Default TCP port for the command surface.
pub const DEFAULT_PORT: u16 = 3001;

/// Largest request body accepted.
const MAX_BODY: usize = 64 * 1024;
/// Longest request line or header line accepted, terminator included.
const MAX_LINE: usize = 8 * 1024;
const MAX_HEADERS: usize = 64;
/// Time a client gets to deliver one complete request.
const READ_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// HTTP plumbing
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Option<Value>,
}

impl HttpResponse {
    pub fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            body: Some(body),
        }
    }

    pub fn no_content() -> Self {
        Self {
            status: 204,
            body: None,
        }
    }

    fn error(status: u16, message: impl Into<String>) -> Self {
        Self::json(status, json!({ "success": false, "error": message.into() }))
    }

    fn reason(&self) -> &'static str {
        match self.status {
            200 => "OK",
            204 => "No Content",
            400 => "Bad Request",
            404 => "Not Found",
            408 => "Request Timeout",
            413 => "Payload Too Large",
            _ => "Internal Server Error",
        }
    }

    /// Serialise status line, CORS headers and body.
    pub fn to_bytes(&self) -> Vec<u8> {
        let body = self.body.as_ref().map(Value::to_string).unwrap_or_default();
        let mut head = format!(
            "HTTP/1.1 {} {}\r\n\
             Access-Control-Allow-Origin: *\r\n\
             Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
             Access-Control-Allow-Headers: Content-Type\r\n\
             Content-Length: {}\r\n\
             Connection: close\r\n",
            self.status,
            self.reason(),
            body.len()
        );
        if self.body.is_some() {
            head.push_str("Content-Type: application/json\r\n");
        }
        head.push_str("\r\n");

        let mut bytes = head.into_bytes();
        bytes.extend_from_slice(body.as_bytes());
        bytes
    }
}

/// Read one HTTP/1.1 request. `Ok(None)` when the peer closed before
/// sending anything.
pub async fn read_request<R>(reader: &mut R) -> Result<Option<HttpRequest>, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    if read_line_capped(reader, &mut line).await? == 0 {
        return Ok(None);
    }
    let mut parts = line.split_whitespace();
    let (Some(method), Some(target)) = (parts.next(), parts.next()) else {
        return Err(BridgeError::InvalidRequest(format!("bad request line {:?}", line.trim_end())));
    };
    let method = method.to_ascii_uppercase();
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut content_length = 0usize;
    for n in 0.. {
        if n == MAX_HEADERS {
            return Err(BridgeError::InvalidRequest(format!("more than {MAX_HEADERS} headers")));
        }
        if read_line_capped(reader, &mut line).await? == 0 {
            break;
        }
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':')
            && name.trim().eq_ignore_ascii_case("content-length")
        {
            content_length = value.trim().parse().map_err(|_| {
                BridgeError::InvalidRequest(format!("bad content-length {:?}", value.trim()))
            })?;
        }
    }

    if content_length > MAX_BODY {
        return Err(BridgeError::PayloadTooLarge {
            size: content_length,
            limit: MAX_BODY,
        });
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).await.map_err(io_err)?;

    Ok(Some(HttpRequest { method, path, body }))
}

fn io_err(e: std::io::Error) -> BridgeError {
    BridgeError::Connection(format!("http read: {e}"))
}

/// Replace `line` with the next line, reading at most [`MAX_LINE`] bytes.
async fn read_line_capped<R>(reader: &mut R, line: &mut String) -> Result<usize, BridgeError>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let n = AsyncReadExt::take(&mut *reader, MAX_LINE as u64)
        .read_line(line)
        .await
        .map_err(io_err)?;
    if n == MAX_LINE && !line.ends_with('\n') {
        return Err(BridgeError::InvalidRequest(format!("line longer than {MAX_LINE} bytes")));
    }
    Ok(n)
}

// ---------------------------------------------------------------------------
// Routes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct MovementRequest {
    speed: f64,
    direction: String,
}

#[derive(Debug, Deserialize)]
struct StreamCommandRequest {
    command: String,
}

/// Everything a route handler may touch.
pub struct CockpitState {
    pub commands: CommandMultiplexer,
    pub tasks: Arc<dyn TaskCommander>,
}

fn parse_body<T: for<'de> Deserialize<'de>>(req: &HttpRequest) -> Result<T, HttpResponse> {
    serde_json::from_slice(&req.body)
        .map_err(|e| HttpResponse::error(400, format!("invalid request body: {e}")))
}

/// Dispatch `req` to its handler.
pub async fn route(req: &HttpRequest, state: &CockpitState) -> HttpResponse {
    if req.method == "OPTIONS" {
        return HttpResponse::no_content();
    }
    let result = match (req.method.as_str(), req.path.as_str()) {
        ("POST", "/api/movement") => movement(req, state),
        ("POST", "/api/command") => stream_command(req, state),
        ("POST", "/api/sendRobotCommand") => send_robot_command(req, state).await,
        ("GET", "/api/status") => Ok(status(state)),
        _ => Err(HttpResponse::error(404, format!("no route for {} {}", req.method, req.path))),
    };
    result.unwrap_or_else(|response| response)
}

fn movement(req: &HttpRequest, state: &CockpitState) -> Result<HttpResponse, HttpResponse> {
    let body: MovementRequest = parse_body(req)?;
    if !body.speed.is_finite() {
        return Err(HttpResponse::error(400, "speed must be a number"));
    }
    let direction: Direction = body
        .direction
        .parse()
        .map_err(|e: BridgeError| HttpResponse::error(400, e.to_string()))?;

    let speed = body.speed.clamp(0.0, 100.0);
    let setpoint = state.commands.set_direction(direction, speed);
    debug!(?direction, speed, ?setpoint, "movement");
    Ok(HttpResponse::json(200, json!({ "success": true })))
}

fn stream_command(req: &HttpRequest, state: &CockpitState) -> Result<HttpResponse, HttpResponse> {
    let body: StreamCommandRequest = parse_body(req)?;
    match body.command.as_str() {
        "Start" => state
            .commands
            .start()
            .map_err(|e| HttpResponse::error(500, e.to_string()))?,
        "Stop" => state.commands.stop(),
        "E-STOP" => {
            warn!("emergency stop requested");
            state.commands.stop();
        }
        other => return Err(HttpResponse::error(400, format!("Invalid command '{other}'"))),
    }
    Ok(HttpResponse::json(200, json!({ "success": true })))
}

async fn send_robot_command(req: &HttpRequest, state: &CockpitState) -> Result<HttpResponse, HttpResponse> {
    let task: TaskCommand = parse_body(req)?;
    let command = build_task_command(task, Utc::now());

    match state.tasks.send(command).await {
        Ok(ack) => Ok(HttpResponse::json(
            200,
            json!({
                "success": true,
                "response": { "success": ack.success, "message": ack.message },
            }),
        )),
        Err(e) => {
            error!(error = %e, "RobotCommand failed");
            Err(HttpResponse::error(500, e.to_string()))
        }
    }
}

fn status(state: &CockpitState) -> HttpResponse {
    let setpoint = state.commands.setpoint();
    HttpResponse::json(
        200,
        json!({
            "command_stream": state.commands.is_active(),
            "setpoint": setpoint,
        }),
    )
}

// ---------------------------------------------------------------------------
// CockpitServer
// ---------------------------------------------------------------------------

/// HTTP front for the [`CommandMultiplexer`] and the task command client.
pub struct CockpitServer {
    state: Arc<CockpitState>,
    port: u16,
}

impl CockpitServer {
    /// Create a server on the [`DEFAULT_PORT`].
    pub fn new(commands: CommandMultiplexer, tasks: Arc<dyn TaskCommander>) -> Self {
        Self {
            state: Arc::new(CockpitState { commands, tasks }),
            port: DEFAULT_PORT,
        }
    }

    /// Override the listening port (builder-style).
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Bind `0.0.0.0:<port>` and serve forever.
    ///
    /// # Errors
    ///
    /// [`BridgeError::Connection`] if the listener cannot bind.
    pub async fn run(self) -> Result<(), BridgeError> {
        let addr = SocketAddr::from(([0, 0, 0, 0], self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| BridgeError::Connection(format!("http bind error on {addr}: {e}")))?;
        info!(addr = %addr, "command surface listening");
        self.serve(listener).await;
        Ok(())
    }

    pub async fn serve(self, listener: TcpListener) {
        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let state = Arc::clone(&self.state);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, &state).await {
                            debug!(peer = %peer, error = %e, "http client error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "http accept error");
                }
            }
        }
    }
}

async fn handle_connection<S>(stream: S, state: &CockpitState) -> Result<(), BridgeError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut reader = BufReader::new(stream);
    let response = match time::timeout(READ_TIMEOUT, read_request(&mut reader)).await {
        Ok(Ok(Some(req))) => {
            let response = route(&req, state).await;
            debug!(method = %req.method, path = %req.path, status = response.status, "http request");
            response
        }
        Ok(Ok(None)) => return Ok(()),
        Ok(Err(e @ BridgeError::PayloadTooLarge { .. })) => HttpResponse::error(413, e.to_string()),
        Ok(Err(BridgeError::InvalidRequest(msg))) => HttpResponse::error(400, msg),
        Ok(Err(e)) => return Err(e),
        Err(_) => {
            debug!(timeout_s = READ_TIMEOUT.as_secs(), "http request timed out");
            HttpResponse::error(408, "request not received in time")
        }
    };

    let mut stream = reader.into_inner();
    stream
        .write_all(&response.to_bytes())
        .await
        .map_err(|e| BridgeError::Connection(format!("http write: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| BridgeError::Connection(format!("http shutdown: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
