use std::collections::HashSet;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::ops::Deref;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::future::join_all;
use http::header::{HeaderValue, ALLOW, CONTENT_TYPE};
use http::{Method, StatusCode};
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use serde_json::value::RawValue;
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::task::{JoinError, JoinHandle};

use crate::dispatcher::{Dispatcher, RequestContext};
use crate::jsonrpc::{Call, Id, Response, RpcError};
use crate::observe::{FaultReporter, NoopObserver, Observer, TracingReporter};
use crate::Result;

const FALLBACK_BODY: &str =
    r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32603,"message":"something went wrong!"}}"#;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub max_body_size: usize,
    pub pretty: bool, // indent response bodies
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8000)),
            max_body_size: 1024 * 1024,
            pretty: false,
        }
    }
}

/// Output of one exchange, shaped like its input: a lone object for a single
/// call, an array for a batch.
#[derive(serde::Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum Reply {
    Single(Response),
    Batch(Vec<Response>),
}

impl Reply {
    fn failure(error: RpcError) -> Self {
        Reply::Single(Response::error(Id::Null, error))
    }

    /// Error code of the exchange as a whole. Batches report `None`, their
    /// per-call outcomes go through [`Observer::call_completed`].
    pub fn code(&self) -> Option<i64> {
        match self {
            Reply::Single(resp) => resp.code(),
            Reply::Batch(_) => None,
        }
    }
}

enum Slot {
    Ready(Response),
    Pending {
        handle: JoinHandle<Response>,
        method: String,
        id: Id,
        start: Instant,
    },
}

pub struct ServerBuilder {
    config: ServerConfig,
    dispatcher: Arc<dyn Dispatcher>,
    observer: Arc<dyn Observer>,
    reporter: Arc<dyn FaultReporter>,
}

impl ServerBuilder {
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn observer<O: Observer + 'static>(mut self, observer: O) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    pub fn reporter<R: FaultReporter + 'static>(mut self, reporter: R) -> Self {
        self.reporter = Arc::new(reporter);
        self
    }

    pub fn build(self) -> Server {
        Server {
            inner: Arc::new(ServerInner {
                config: self.config,
                dispatcher: self.dispatcher,
                observer: self.observer,
                reporter: self.reporter,
            }),
        }
    }
}

#[derive(Clone)]
pub struct Server {
    inner: Arc<ServerInner>,
}

impl Deref for Server {
    type Target = ServerInner;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

impl Server {
    pub fn builder<D: Dispatcher + 'static>(dispatcher: D) -> ServerBuilder {
        ServerBuilder {
            config: ServerConfig::default(),
            dispatcher: Arc::new(dispatcher),
            observer: Arc::new(NoopObserver),
            reporter: Arc::new(TracingReporter),
        }
    }

    pub fn new<D: Dispatcher + 'static>(config: ServerConfig, dispatcher: D) -> Self {
        Self::builder(dispatcher).config(config).build()
    }

    /// Bind the configured address and serve until accepting fails.
    pub async fn run(self) -> Result<()> {
        let listener = TcpListener::bind(self.config.bind_address).await?;
        self.serve(listener).await
    }

    pub async fn serve(self, listener: TcpListener) -> Result<()> {
        tracing::info!("jsonrpc server listening on {}", listener.local_addr()?);
        loop {
            let (stream, peer) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.handle(req, Some(peer)).await) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!("connection from {peer} closed: {e}");
                }
            });
        }
    }
}

pub struct ServerInner {
    config: ServerConfig,
    dispatcher: Arc<dyn Dispatcher>,
    observer: Arc<dyn Observer>,
    reporter: Arc<dyn FaultReporter>,
}

impl ServerInner {
    /// Answer one HTTP exchange.
    pub async fn handle<B>(
        &self,
        req: http::Request<B>,
        remote_addr: Option<SocketAddr>,
    ) -> http::Response<Full<Bytes>>
    where
        B: hyper::body::Body,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let start = Instant::now();
        let (parts, body) = req.into_parts();

        let (status, reply) = if parts.method != Method::POST {
            tracing::warn!("rejecting {} request", parts.method);
            (
                StatusCode::METHOD_NOT_ALLOWED,
                Reply::failure(RpcError::invalid_request(
                    "jsonrpc: rpc calls should be done via a POST request",
                )),
            )
        } else {
            match Limited::new(body, self.config.max_body_size).collect().await {
                Ok(collected) => {
                    let ctx = RequestContext::from_parts(&parts, remote_addr);
                    (StatusCode::OK, self.process(&collected.to_bytes(), ctx).await)
                }
                Err(e) => {
                    let status = if e.downcast_ref::<LengthLimitError>().is_some() {
                        StatusCode::PAYLOAD_TOO_LARGE
                    } else {
                        StatusCode::BAD_REQUEST
                    };
                    tracing::warn!("unable to read request body: {e}");
                    (status, Reply::failure(RpcError::invalid_request(e.to_string())))
                }
            }
        };

        self.observer.request_completed(reply.code(), start.elapsed());
        self.render(status, &reply)
    }

    /// Parse `body` as a batch or a single call, dispatch every call
    /// concurrently and collect the responses in input order.
    pub async fn process(&self, body: &[u8], ctx: RequestContext) -> Reply {
        let (elements, single) = match parse(body) {
            Ok(parsed) => parsed,
            Err(e) => return Reply::failure(RpcError::parse_error(e.to_string())),
        };
        if elements.is_empty() {
            return Reply::failure(RpcError::invalid_request("jsonrpc: empty batch"));
        }

        let ctx = Arc::new(ctx);
        let mut seen = HashSet::new();
        let slots: Vec<Slot> = elements
            .iter()
            .map(|raw| {
                let call = match decode_call(raw) {
                    Ok(call) => call,
                    Err(resp) => return Slot::Ready(resp),
                };
                let mut resp = Response::for_call(&call);
                if !call.id.is_null() && !seen.insert(call.id.clone()) {
                    resp.set_error(RpcError::invalid_request("The 'id' element is not unique"));
                    return Slot::Ready(resp);
                }
                if !call.has_valid_version() {
                    resp.set_error(RpcError::invalid_request(
                        r#"jsonrpc: the "jsonrpc" member must be exactly "2.0""#,
                    ));
                    return Slot::Ready(resp);
                }
                self.spawn(call, resp, ctx.clone())
            })
            .collect();

        let mut responses = join_all(slots.into_iter().map(|slot| self.settle(slot))).await;
        if single {
            Reply::Single(responses.remove(0))
        } else {
            Reply::Batch(responses)
        }
    }

    fn spawn(&self, call: Call, mut resp: Response, ctx: Arc<RequestContext>) -> Slot {
        let method = call.method.clone();
        let id = call.id.clone();
        let dispatcher = self.dispatcher.clone();
        let handle = tokio::spawn(async move {
            dispatcher.dispatch(&mut resp, &call, &ctx).await;
            resp.finish();
            resp
        });
        Slot::Pending {
            handle,
            method,
            id,
            start: Instant::now(),
        }
    }

    async fn settle(&self, slot: Slot) -> Response {
        let (handle, method, id, start) = match slot {
            Slot::Ready(resp) => return resp,
            Slot::Pending {
                handle,
                method,
                id,
                start,
            } => (handle, method, id, start),
        };
        let resp = match handle.await {
            Ok(resp) => resp,
            Err(e) => {
                let fault = fault_message(e);
                let mut error = RpcError::internal(format!(
                    "jsonrpc: internal error while handling {method}"
                ));
                if let Some(token) = self.reporter.report(&method, &fault) {
                    error = error.with_data(token);
                }
                Response::error(id, error)
            }
        };
        self.observer
            .call_completed(&method, resp.code(), start.elapsed());
        resp
    }

    fn render(&self, status: StatusCode, reply: &Reply) -> http::Response<Full<Bytes>> {
        let encoded = if self.config.pretty {
            serde_json::to_vec_pretty(reply)
        } else {
            serde_json::to_vec(reply)
        };
        let (status, body) = match encoded {
            Ok(body) => (status, Bytes::from(body)),
            Err(e) => {
                tracing::error!("unable to encode response: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Bytes::from_static(FALLBACK_BODY.as_bytes()),
                )
            }
        };

        let mut resp = http::Response::new(Full::new(body));
        *resp.status_mut() = status;
        resp.headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if status == StatusCode::METHOD_NOT_ALLOWED {
            resp.headers_mut().insert(ALLOW, HeaderValue::from_static("POST"));
        }
        resp
    }
}

/// Array first, then any other JSON value as a lone call. The array error is
/// the one reported when the body is not JSON at all.
fn parse(body: &[u8]) -> serde_json::Result<(Vec<Box<RawValue>>, bool)> {
    match serde_json::from_slice::<Vec<Box<RawValue>>>(body) {
        Ok(elements) => Ok((elements, false)),
        Err(e) => match serde_json::from_slice::<Box<RawValue>>(body) {
            Ok(element) => Ok((vec![element], true)),
            Err(_) => Err(e),
        },
    }
}

/// Decode one element. One that is not a call is answered in its own slot
/// with `Invalid Request`, keeping its `id` when that much can be read.
fn decode_call(raw: &RawValue) -> std::result::Result<Call, Response> {
    serde_json::from_str::<Call>(raw.get()).map_err(|e| {
        let id = serde_json::from_str::<Map<String, Value>>(raw.get())
            .ok()
            .and_then(|mut obj| obj.remove("id"))
            .and_then(|id| serde_json::from_value(id).ok())
            .unwrap_or_default();
        Response::error(id, RpcError::invalid_request(e.to_string()))
    })
}

fn fault_message(err: JoinError) -> String {
    if !err.is_panic() {
        return err.to_string();
    }
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown fault".to_string()
    }
}

impl std::fmt::Debug for ServerInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerInner")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
