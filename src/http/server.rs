//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Create Axum Router with the single gateway handler
//! - Wire up middleware (request ID, tracing, timeout, body limit)
//! - Bind server to listener, stop on shutdown
//! - Hand each request to the poll loop and stream its answer back

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, Request, StatusCode},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use futures_util::StreamExt;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc, oneshot};
use tower_http::{
    limit::RequestBodyLimitLayer,
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ListenerConfig;
use crate::http::exchange::{BodyReader, ChannelExchange, RequestLine, ResponseHead};
use crate::http::request::{request_id, MakeRequestUuidV4, X_REQUEST_ID};

/// Request body chunks buffered ahead of the poll loop.
const BODY_CHANNEL_DEPTH: usize = 4;

/// Application state injected into handlers.
#[derive(Clone)]
pub struct AppState {
    pub queue: mpsc::Sender<ChannelExchange>,
    pub body_read_wait: Duration,
}

/// HTTP front end of the gateway.
pub struct HttpServer {
    router: Router,
    config: ListenerConfig,
}

impl HttpServer {
    /// Create a server that queues requests on `queue`.
    pub fn new(config: ListenerConfig, queue: mpsc::Sender<ChannelExchange>) -> Self {
        let state = AppState {
            queue,
            body_read_wait: Duration::from_millis(config.body_read_wait_ms),
        };
        let router = Self::build_router(&config, state);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &ListenerConfig, state: AppState) -> Router {
        Router::new()
            .route("/{*path}", any(gateway_handler))
            .route("/", any(gateway_handler))
            .with_state(state)
            .layer(RequestBodyLimitLayer::new(config.max_body_bytes))
            .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
            .layer(PropagateRequestIdLayer::new(X_REQUEST_ID))
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::new(X_REQUEST_ID, MakeRequestUuidV4))
    }

    /// The router, for driving the server without a socket.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

/// Queue the request for the poll loop and stream back whatever it answers.
async fn gateway_handler(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request<Body>,
) -> Response {
    let (parts, body) = request.into_parts();
    let request_id = request_id(&parts.headers);
    let content_length = parts
        .headers
        .get(header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let line = RequestLine {
        method: parts.method.to_string(),
        path: parts.uri.path().to_string(),
        query: parts.uri.query().map(str::to_string),
        client_addr: addr.ip(),
        content_length,
        request_id: request_id.clone(),
    };

    tracing::debug!(
        request_id = ?request_id,
        method = %line.method,
        path = %line.path,
        client = %addr,
        "Queueing request for bus"
    );

    let (body_tx, body_rx) = mpsc::channel(BODY_CHANNEL_DEPTH);
    let (head_tx, head_rx) = oneshot::channel();
    let (chunk_tx, chunk_rx) = mpsc::unbounded_channel();
    let exchange = ChannelExchange::new(
        line,
        BodyReader::new(body_rx, state.body_read_wait),
        head_tx,
        chunk_tx,
    );

    if content_length.unwrap_or(0) > 0 {
        tokio::spawn(pump_body(body, body_tx));
    } else {
        drop(body_tx);
    }

    if let Err(e) = state.queue.try_send(exchange) {
        let reason = match e {
            mpsc::error::TrySendError::Full(_) => "queue full",
            mpsc::error::TrySendError::Closed(_) => "poll loop stopped",
        };
        tracing::warn!(request_id = ?request_id, reason, "Request turned away");
        return (StatusCode::SERVICE_UNAVAILABLE, "Gateway busy").into_response();
    }

    match head_rx.await {
        Ok(head) => stream_response(head, chunk_rx),
        Err(_) => {
            tracing::warn!(request_id = ?request_id, "Request dropped without a response");
            (StatusCode::BAD_GATEWAY, "No response from bus").into_response()
        }
    }
}

/// Forward request body chunks until the client or the poll loop is done.
async fn pump_body(body: Body, tx: mpsc::Sender<Bytes>) {
    let mut stream = body.into_data_stream();
    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(bytes) => {
                if tx.send(bytes).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!(error = %e, "Request body stream ended with error");
                break;
            }
        }
    }
}

fn stream_response(head: ResponseHead, chunks: mpsc::UnboundedReceiver<Bytes>) -> Response {
    let status = StatusCode::from_u16(head.status).unwrap_or(StatusCode::BAD_GATEWAY);
    let stream = futures_util::stream::unfold(chunks, |mut rx| async move {
        rx.recv().await.map(|chunk| (Ok::<_, Infallible>(chunk), rx))
    });

    Response::builder()
        .status(status)
        .header(header::CONTENT_TYPE, head.content_type)
        .header(header::CONTENT_LENGTH, head.content_length)
        .header(header::CACHE_CONTROL, "no-cache, no-store, must-revalidate")
        .body(Body::from_stream(stream))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
