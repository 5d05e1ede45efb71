//! # HTTP Server
//!
//! HTTP/1 boundary built on Hyper and Tokio. Turns each HTTP request into a
//! [`Request`], runs the [`Dispatcher`] and serializes the outcome as JSON.
//!
//! ## Key Features
//!
//! - Query string and JSON or form body merged into one parameter bag
//! - Body size limit (413 when exceeded)
//! - Request id propagation (`x-request-id`)
//! - Graceful shutdown on Ctrl-C, draining in-flight connections

use crate::config::ServerConfig;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::json::to_json;
use crate::reply::Reply;
use crate::request::Request;
use http_body_util::Full;
use hyper::body::{Bytes, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info};

/// HTTP server around a dispatcher
#[derive(Debug, Clone)]
pub struct Server {
    config: ServerConfig,
    dispatcher: Arc<Dispatcher>,
}

impl Server {
    /// Create a server with the default configuration
    #[must_use]
    pub fn new(dispatcher: Dispatcher) -> Self {
        Self {
            config: ServerConfig::default(),
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// Replace the configuration
    #[must_use]
    pub fn with_config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind the configured address and serve until Ctrl-C
    ///
    /// # Errors
    ///
    /// Socket setup or accept failures.
    pub async fn serve(&self) -> Result<()> {
        let addr = self.config.address;

        let socket = if addr.is_ipv4() {
            tokio::net::TcpSocket::new_v4()?
        } else {
            tokio::net::TcpSocket::new_v6()?
        };
        socket.set_reuseaddr(true)?;
        socket.bind(addr)?;
        let listener = socket.listen(1024)?;

        info!("Server listening on http://{}", addr);
        self.serve_listener(listener, shutdown_signal()).await
    }

    /// Serve connections from `listener` until `shutdown` completes
    ///
    /// In-flight connections get up to the configured shutdown timeout to
    /// finish.
    ///
    /// # Errors
    ///
    /// Accept failures.
    pub async fn serve_listener<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let tracker = ConnectionTracker::default();
        let max_body_size = self.config.max_body_size;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accept_result = listener.accept() => {
                    let (stream, remote_addr) = accept_result?;
                    let io = TokioIo::new(stream);
                    let dispatcher = self.dispatcher.clone();
                    let connection = tracker.enter();

                    tokio::task::spawn(async move {
                        let _connection = connection;
                        let service = service_fn(move |req| {
                            let dispatcher = dispatcher.clone();
                            async move {
                                let method = req.method().clone();
                                let path = req.uri().path().to_string();
                                let response =
                                    handle_request(req, &dispatcher, remote_addr, max_body_size).await;
                                info!(
                                    remote = %remote_addr,
                                    method = %method,
                                    path = %path,
                                    status = response.status().as_u16(),
                                    "Request served"
                                );
                                Ok::<_, Infallible>(response)
                            }
                        });

                        if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                            error!("Error serving connection: {:?}", err);
                        }
                    });
                }
                () = &mut shutdown => {
                    info!("Shutdown signal received, stopping server...");
                    break;
                }
            }
        }

        if !tracker.drain(self.config.shutdown_timeout).await {
            info!(
                remaining = tracker.active(),
                "Shutdown timeout elapsed with connections still open"
            );
        }
        Ok(())
    }

    /// Execute a request directly without the network stack
    pub async fn test_request(&self, request: Request) -> Reply {
        process_request(request, &self.dispatcher).await
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to install Ctrl-C handler: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Core request processing logic (network agnostic)
async fn process_request(mut request: Request, dispatcher: &Dispatcher) -> Reply {
    let request_id = match request.header("x-request-id") {
        Some(id) => id.to_string(),
        None => {
            let id = generate_request_id();
            request.set_header("x-request-id", &id);
            id
        }
    };

    let reply = match dispatcher.handle(request).await {
        Ok(outcome) => outcome.into_reply(),
        Err(Error::Validation(errors)) => {
            Reply::json(json!({ "errors": errors.to_json() })).with_status(422)
        }
        Err(err) => {
            error!(request_id = %request_id, error = %err, "Unhandled fault");
            Reply::json(json!({ "msg": "Internal Server Error" })).with_status(500)
        }
    };
    reply.with_header("x-request-id", &request_id)
}

async fn handle_request(
    req: hyper::Request<Incoming>,
    dispatcher: &Dispatcher,
    remote_addr: SocketAddr,
    max_body_size: usize,
) -> Response<Full<Bytes>> {
    let reply = match Request::from_hyper_with_limit(req, max_body_size).await {
        Ok(mut request) => {
            request.set_header("x-client-ip", &remote_addr.ip().to_string());
            process_request(request, dispatcher).await
        }
        Err(Error::PayloadTooLarge { limit, actual }) => {
            info!(limit, actual, "Payload too large");
            Reply::json(json!({ "msg": "Payload Too Large" })).with_status(413)
        }
        Err(err) => {
            info!(error = %err, "Bad request");
            Reply::json(json!({ "msg": "Bad Request" })).with_status(400)
        }
    };
    into_hyper(reply)
}

fn into_hyper(reply: Reply) -> Response<Full<Bytes>> {
    let status = StatusCode::from_u16(reply.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let body = to_json(&reply.body).unwrap_or_else(|_| "null".to_string());

    let mut builder = Response::builder()
        .status(status)
        .header("content-type", "application/json");
    for (k, v) in &reply.headers {
        if !k.eq_ignore_ascii_case("content-type") {
            builder = builder.header(k.as_str(), v.as_str());
        }
    }

    builder.body(Full::new(Bytes::from(body))).unwrap_or_else(|err| {
        error!("Invalid response header: {}", err);
        let mut response = Response::new(Full::new(Bytes::from_static(b"Internal Server Error")));
        *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
        response
    })
}

/// Count of connections still being served
#[derive(Debug, Clone, Default)]
struct ConnectionTracker(Arc<AtomicUsize>);

impl ConnectionTracker {
    /// Count a connection until the returned guard drops
    fn enter(&self) -> ActiveConnection {
        self.0.fetch_add(1, Ordering::AcqRel);
        ActiveConnection(self.0.clone())
    }

    fn active(&self) -> usize {
        self.0.load(Ordering::Acquire)
    }

    /// Wait for every connection to finish; `false` if `timeout` elapsed first
    async fn drain(&self, timeout: Duration) -> bool {
        let wait = async {
            while self.active() > 0 {
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(timeout, wait).await.is_ok()
    }
}

struct ActiveConnection(Arc<AtomicUsize>);

impl Drop for ActiveConnection {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

static REQUEST_COUNTER: AtomicUsize = AtomicUsize::new(1);

fn generate_request_id() -> String {
    use std::time::{SystemTime, UNIX_EPOCH};
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let counter = REQUEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("{:x}-{:x}", now.as_nanos(), counter)
}
