use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;

use crate::error::Error;
use crate::jsonrpc::{Call, Response, RpcError};
use crate::Result;

/// What a handler gets to know about the HTTP request that carried its call.
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    pub method: http::Method,
    pub uri: http::Uri,
    pub headers: http::HeaderMap,
    pub remote_addr: Option<SocketAddr>,
}

impl RequestContext {
    pub fn from_parts(parts: &http::request::Parts, remote_addr: Option<SocketAddr>) -> Self {
        Self {
            method: parts.method.clone(),
            uri: parts.uri.clone(),
            headers: parts.headers.clone(),
            remote_addr,
        }
    }
}

/// Target of a registered method. The handler writes its outcome into
/// `resp.result` or `resp.error`, there is nothing to return.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, resp: &mut Response, call: &Call, ctx: &RequestContext);
}

/// Resolves a call to its handler. Like [`Handler`], all outcomes are written
/// into the supplied response.
#[async_trait]
pub trait Dispatcher: Send + Sync {
    async fn dispatch(&self, resp: &mut Response, call: &Call, ctx: &RequestContext);
}

#[async_trait]
impl<D: Dispatcher + ?Sized> Dispatcher for Arc<D> {
    async fn dispatch(&self, resp: &mut Response, call: &Call, ctx: &RequestContext) {
        (**self).dispatch(resp, call, ctx).await
    }
}

/// Synchronous closure handler, see [`MapDispatcher::register_fn`].
pub struct SyncFn<F>(F);

#[async_trait]
impl<F> Handler for SyncFn<F>
where
    F: Fn(&mut Response, &Call, &RequestContext) + Send + Sync,
{
    async fn handle(&self, resp: &mut Response, call: &Call, ctx: &RequestContext) {
        (self.0)(resp, call, ctx)
    }
}

/// Async closure handler, see [`MapDispatcher::register_async`].
pub struct AsyncFn<F>(F);

#[async_trait]
impl<F, Fut> Handler for AsyncFn<F>
where
    F: Fn(Call, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = std::result::Result<Value, RpcError>> + Send,
{
    async fn handle(&self, resp: &mut Response, call: &Call, ctx: &RequestContext) {
        match (self.0)(call.clone(), ctx.clone()).await {
            Ok(value) => resp.result = Some(value),
            Err(err) => resp.set_error(err),
        }
    }
}

/// Dispatches on method name.
#[derive(Default)]
pub struct MapDispatcher {
    methods: RwLock<HashMap<String, Arc<dyn Handler>>>,
}

impl MapDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `name` to `handler`. Fails without touching the existing binding
    /// if the name is taken.
    pub fn register<H: Handler + 'static>(&self, name: &str, handler: H) -> Result<()> {
        match self.methods.write().entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::DuplicateMethod(name.to_string())),
            Entry::Vacant(slot) => {
                slot.insert(Arc::new(handler));
                Ok(())
            }
        }
    }

    pub fn register_fn<F>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(&mut Response, &Call, &RequestContext) + Send + Sync + 'static,
    {
        self.register(name, SyncFn(f))
    }

    pub fn register_async<F, Fut>(&self, name: &str, f: F) -> Result<()>
    where
        F: Fn(Call, RequestContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<Value, RpcError>> + Send + 'static,
    {
        self.register(name, AsyncFn(f))
    }

    pub fn registered(&self) -> Vec<String> {
        let mut names: Vec<String> = self.methods.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Handler>> {
        self.methods.read().get(name).cloned()
    }
}

#[async_trait]
impl Dispatcher for MapDispatcher {
    async fn dispatch(&self, resp: &mut Response, call: &Call, ctx: &RequestContext) {
        let Some(handler) = self.lookup(&call.method) else {
            resp.set_error(RpcError::method_not_found(&call.method));
            return;
        };
        handler.handle(resp, call, ctx).await
    }
}
