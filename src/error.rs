use crate::jsonrpc::{Id, RpcError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("Decode error {0}")]
    Decode(serde_json::Error),
    #[error("Encode error {0}")]
    Encode(serde_json::Error),
    #[error("Http error {0}")]
    Http(#[from] reqwest::Error),
    #[error("Invalid url {0}")]
    Url(#[from] url::ParseError),
    #[error("jsonrpc: no calls in batch, refusing to send empty request")]
    EmptyBatch,
    #[error("jsonrpc: unable to find a call with the response id {0}")]
    NoMatchingCall(Id),
    #[error("jsonrpc: unable to register method with name {0} as it already exists")]
    DuplicateMethod(String),
    #[error("Io error {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// The error the peer answered with, if this failure came from one.
    pub fn rpc(&self) -> Option<&RpcError> {
        match self {
            Error::Rpc(err) => Some(err),
            _ => None,
        }
    }
}
