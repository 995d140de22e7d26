//! HTTP API server for the control panel
//!
//! Serves the JSON API under `/api/*` behind HTTP Basic authentication, and
//! the static front end (`/`, `/static/*`, `/assets/*`) without it.

use crate::auth::Credentials;
use crate::error::{json_error_response, ErrorCode, PanelError, PanelResult};
use crate::panel::{ControlPanel, UpdateOutcome};
use http_body_util::{BodyExt, Full, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::header::{AUTHORIZATION, CONTENT_TYPE};
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode, Uri};
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

/// Version information for the panel
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const PKG_NAME: &str = env!("CARGO_PKG_NAME");

/// Largest request body accepted (config files are small)
const MAX_BODY_BYTES: usize = 1024 * 1024;

/// Helper to create a simple response - infallible with valid StatusCode
fn response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum")
}

/// Helper to create a JSON response
fn json_response(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(Full::new(body.into()))
        .expect("valid response with StatusCode enum and static header")
}

fn json_ok(value: serde_json::Value) -> Response<Full<Bytes>> {
    json_response(StatusCode::OK, value.to_string())
}

/// `{"status": "success", "message": ...}`
fn success(message: impl Into<String>) -> Response<Full<Bytes>> {
    json_ok(serde_json::json!({
        "status": "success",
        "message": message.into(),
    }))
}

#[derive(Debug, Deserialize)]
struct FilenameRequest {
    filename: String,
}

#[derive(Debug, Deserialize)]
struct ConfigUpdateRequest {
    filename: String,
    content: String,
}

/// Shared state for all connections
struct ServerContext {
    panel: Arc<ControlPanel>,
    credentials: Credentials,
    static_dir: PathBuf,
}

/// Panel HTTP server
pub struct PanelServer {
    bind_addr: SocketAddr,
    context: Arc<ServerContext>,
    shutdown_rx: watch::Receiver<bool>,
    tls_acceptor: Option<TlsAcceptor>,
    listener: Option<TcpListener>,
}

impl PanelServer {
    pub fn new(
        bind_addr: SocketAddr,
        panel: Arc<ControlPanel>,
        credentials: Credentials,
        static_dir: impl Into<PathBuf>,
        shutdown_rx: watch::Receiver<bool>,
    ) -> Self {
        Self {
            bind_addr,
            context: Arc::new(ServerContext {
                panel,
                credentials,
                static_dir: static_dir.into(),
            }),
            shutdown_rx,
            tls_acceptor: None,
            listener: None,
        }
    }

    pub fn with_tls(mut self, acceptor: TlsAcceptor) -> Self {
        self.tls_acceptor = Some(acceptor);
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls_acceptor.is_some()
    }

    /// Bind the listening socket now so address errors surface before `run`
    pub async fn bind(mut self) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(self.bind_addr)
            .await
            .map_err(|e| anyhow::anyhow!("cannot bind {}: {}", self.bind_addr, e))?;
        self.listener = Some(listener);
        Ok(self)
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        let listener = match self.listener.take() {
            Some(listener) => listener,
            None => TcpListener::bind(self.bind_addr).await?,
        };
        let protocol = if self.tls_acceptor.is_some() { "HTTPS" } else { "HTTP" };
        info!(addr = %self.bind_addr, protocol, "Panel server listening");

        let mut shutdown_rx = self.shutdown_rx.clone();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            let context = Arc::clone(&self.context);
                            let tls_acceptor = self.tls_acceptor.clone();

                            tokio::spawn(async move {
                                if let Some(acceptor) = tls_acceptor {
                                    match acceptor.accept(stream).await {
                                        Ok(tls_stream) => {
                                            if let Err(e) = serve_connection(tls_stream, context).await {
                                                debug!(addr = %addr, error = %e, "TLS connection error");
                                            }
                                        }
                                        Err(e) => {
                                            debug!(addr = %addr, error = %e, "TLS handshake failed");
                                        }
                                    }
                                } else if let Err(e) = serve_connection(stream, context).await {
                                    debug!(addr = %addr, error = %e, "Connection error");
                                }
                            });
                        }
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                        }
                    }
                }
                _ = shutdown_rx.changed() => {
                    if *shutdown_rx.borrow() {
                        info!("Panel server shutting down");
                        break;
                    }
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S>(stream: S, context: Arc<ServerContext>) -> anyhow::Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let io = TokioIo::new(stream);
    let service = service_fn(move |req| {
        let context = Arc::clone(&context);
        async move { handle_request(req, context).await }
    });

    AutoBuilder::new(TokioExecutor::new())
        .serve_connection(io, service)
        .await
        .map_err(|e| anyhow::anyhow!("Connection error: {}", e))?;

    Ok(())
}

async fn handle_request(
    req: Request<Incoming>,
    context: Arc<ServerContext>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();
    let method = req.method().clone();

    debug!(%method, %path, "API request");

    // Unauthenticated endpoints
    if method == Method::GET {
        match path.as_str() {
            "/health" => return Ok(response(StatusCode::OK, "ok")),
            "/version" => {
                return Ok(json_ok(serde_json::json!({
                    "name": PKG_NAME,
                    "version": VERSION,
                })))
            }
            "/" | "/index.html" => {
                return Ok(serve_static(&context.static_dir, "index.html").await);
            }
            _ => {}
        }
        if let Some(rel) = path.strip_prefix("/static/") {
            return Ok(serve_static(&context.static_dir, rel).await);
        }
        if let Some(rel) = path.strip_prefix("/assets/") {
            return Ok(serve_static(&context.static_dir.join("assets"), rel).await);
        }
    }

    // Auth required for everything else
    let auth_header = req.headers().get(AUTHORIZATION).and_then(|v| v.to_str().ok());
    if !context.credentials.check_header(auth_header) {
        warn!(%path, "Unauthorized API request");
        return Ok(PanelError::Unauthorized.into_response());
    }

    let panel = &context.panel;
    let result = match (method, path.as_str()) {
        (Method::GET, "/api/logs") => Ok(json_ok(serde_json::json!({ "logs": panel.logs().await }))),
        (Method::GET, "/api/configs") => list_configs(panel).await,
        (Method::POST, "/api/configs") => create_config(panel, req).await,
        (Method::GET, "/api/config") => read_config(panel, req.uri()).await,
        (Method::POST, "/api/config") => update_config(panel, req).await,
        (Method::DELETE, "/api/config") => delete_config(panel, req.uri()).await,
        (Method::POST, "/api/run") => run_config(panel, req).await,
        (Method::POST, "/api/stop") => {
            panel.stop().await;
            Ok(success("frpc stopped"))
        }
        (Method::GET, "/api/status") => Ok(json_ok(serde_json::to_value(panel.status().await)
            .unwrap_or_else(|_| serde_json::json!({ "status": "stopped" })))),
        _ => Ok(json_error_response(ErrorCode::UnknownRoute, "Not found")),
    };

    Ok(result.unwrap_or_else(|e| {
        match &e {
            PanelError::Io(io) => error!(%path, error = %io, "API error"),
            other => debug!(%path, error = %other, "Request rejected"),
        }
        e.into_response()
    }))
}

async fn list_configs(panel: &ControlPanel) -> PanelResult<Response<Full<Bytes>>> {
    let listing = panel.list_configs().await?;
    Ok(json_ok(serde_json::json!({
        "configs": listing.configs,
        "active": listing.active,
    })))
}

async fn create_config(panel: &ControlPanel, req: Request<Incoming>) -> PanelResult<Response<Full<Bytes>>> {
    let body: FilenameRequest = read_json(req).await?;
    let filename = panel.create_config(&body.filename).await?;
    Ok(success(format!("Config file {} created", filename)))
}

async fn read_config(panel: &ControlPanel, uri: &Uri) -> PanelResult<Response<Full<Bytes>>> {
    let filename = required_filename(uri)?;
    let content = panel.read_config(&filename).await?;
    Ok(json_ok(serde_json::json!({ "content": content })))
}

async fn update_config(panel: &ControlPanel, req: Request<Incoming>) -> PanelResult<Response<Full<Bytes>>> {
    let body: ConfigUpdateRequest = read_json(req).await?;
    let message = match panel.update_config(&body.filename, &body.content).await? {
        UpdateOutcome::SavedAndRestarted => "Config updated and frpc restarted",
        UpdateOutcome::Saved => "Config saved",
    };
    Ok(success(message))
}

async fn delete_config(panel: &ControlPanel, uri: &Uri) -> PanelResult<Response<Full<Bytes>>> {
    let filename = required_filename(uri)?;
    panel.delete_config(&filename).await?;
    Ok(success(format!("Config file {} deleted", filename)))
}

async fn run_config(panel: &ControlPanel, req: Request<Incoming>) -> PanelResult<Response<Full<Bytes>>> {
    let body: FilenameRequest = read_json(req).await?;
    panel.run_config(&body.filename).await?;
    Ok(success(format!("Switched to {} and restarted frpc", body.filename)))
}

async fn read_json<T: DeserializeOwned>(req: Request<Incoming>) -> PanelResult<T> {
    let body = Limited::new(req.into_body(), MAX_BODY_BYTES)
        .collect()
        .await
        .map_err(|e| PanelError::BadRequest(format!("Failed to read request body: {}", e)))?
        .to_bytes();

    serde_json::from_slice(&body)
        .map_err(|e| PanelError::BadRequest(format!("Invalid JSON: {}", e)))
}

fn required_filename(uri: &Uri) -> PanelResult<String> {
    query_param(uri, "filename")
        .ok_or_else(|| PanelError::BadRequest("Missing query parameter: filename".to_string()))
}

/// Decode a single query parameter (`+` and percent escapes)
pub fn query_param(uri: &Uri, key: &str) -> Option<String> {
    uri.query()?.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
        if decode_component(k)? != key {
            return None;
        }
        decode_component(v)
    })
}

fn decode_component(raw: &str) -> Option<String> {
    urlencoding::decode(&raw.replace('+', " "))
        .ok()
        .map(|s| s.into_owned())
}

fn content_type_for(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()) {
        Some("html") | Some("htm") => "text/html; charset=utf-8",
        Some("css") => "text/css",
        Some("js") | Some("mjs") => "application/javascript",
        Some("json") | Some("map") => "application/json",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("txt") => "text/plain; charset=utf-8",
        _ => "application/octet-stream",
    }
}

/// Serve `rel` from `root`, refusing anything that could leave it
async fn serve_static(root: &Path, rel: &str) -> Response<Full<Bytes>> {
    let safe = !rel.is_empty()
        && rel
            .split('/')
            .all(|segment| !segment.is_empty() && !segment.starts_with('.') && !segment.contains('\\'));
    if !safe {
        return response(StatusCode::NOT_FOUND, "not found");
    }

    let path = root.join(rel);
    match tokio::fs::read(&path).await {
        Ok(bytes) => Response::builder()
            .status(StatusCode::OK)
            .header(CONTENT_TYPE, content_type_for(&path))
            .body(Full::new(Bytes::from(bytes)))
            .expect("valid response with static content type"),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "Static file not served");
            response(StatusCode::NOT_FOUND, "not found")
        }
    }
}
