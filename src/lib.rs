//! JSON-RPC 2.0 over HTTP.
//!
//! The server side parses a single call or a batch, dispatches every call
//! concurrently to a [`Dispatcher`] and answers in input order. The client
//! side sends single calls or a [`Batch`] and writes each result into the
//! destination given for its call.

mod batch;
mod client;
pub mod dispatcher;
mod error;
pub mod jsonrpc;
mod method;
pub mod observe;
pub mod server;

use std::net::SocketAddr;

pub use batch::{Batch, Destination};
pub use client::Client;
pub use dispatcher::{Dispatcher, Handler, MapDispatcher, RequestContext};
pub use error::Error;
pub use jsonrpc::{Call, ErrorKind, Id, Response, RpcError};
pub use method::Method;
pub use server::{Reply, Server, ServerConfig};

pub type Result<T> = std::result::Result<T, Error>;

/// Serve `dispatcher` on `addr` with default settings.
pub async fn serve<D: Dispatcher + 'static>(addr: SocketAddr, dispatcher: D) -> Result<()> {
    let config = ServerConfig {
        bind_address: addr,
        ..ServerConfig::default()
    };
    Server::new(config, dispatcher).run().await
}
