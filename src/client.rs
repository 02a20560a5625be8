use bytes::Bytes;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::Instrument;

use crate::batch::Batch;
use crate::error::Error;
use crate::jsonrpc::{Call, Id, RpcError};
use crate::method::Method;
use crate::Result;

/// A response as seen by the client. The `jsonrpc` member is not checked.
#[derive(serde::Deserialize, Debug)]
pub(crate) struct Reply {
    #[serde(default)]
    pub id: Id,
    pub result: Option<Box<RawValue>>,
    pub error: Option<RpcError>,
}

pub(crate) fn json_post(url: &str, body: Vec<u8>) -> Result<reqwest::Request> {
    let mut req = reqwest::Request::new(reqwest::Method::POST, url::Url::parse(url)?);
    req.headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    *req.body_mut() = Some(body.into());
    Ok(req)
}

fn decode<T: DeserializeOwned>(result: Option<&RawValue>) -> Result<T> {
    let json = result.map_or("null", RawValue::get);
    serde_json::from_str(json).map_err(Error::Decode)
}

/// A batch refused as a whole comes back as one error object instead of an
/// array.
fn rejection(body: &[u8]) -> Option<Error> {
    let reply: Reply = serde_json::from_slice(body).ok()?;
    reply.error.map(Error::Rpc)
}

/// Issues calls over HTTP. Timeouts and connection reuse belong to the
/// underlying `reqwest::Client`.
#[derive(Debug, Clone, Default)]
pub struct Client {
    http: reqwest::Client,
}

impl Client {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_http_client(http: reqwest::Client) -> Self {
        Self { http }
    }

    /// Single-call request with id `"1"`, to be run with [`Client::execute`].
    pub fn new_request<P: Serialize>(url: &str, method: &str, params: P) -> Result<reqwest::Request> {
        let call = Call::new(Id::from("1"), method, params).map_err(Error::Encode)?;
        let body = serde_json::to_vec(&call).map_err(Error::Encode)?;
        json_post(url, body)
    }

    /// Call `method` and write its result into `dest`. An error answer
    /// comes back as [`Error::Rpc`] and leaves `dest` untouched.
    pub async fn call<P, T>(&self, url: &str, method: &str, params: P, dest: &mut T) -> Result<()>
    where
        P: Serialize,
        T: DeserializeOwned,
    {
        let req = Self::new_request(url, method, params)?;
        *dest = self
            .exchange(req)
            .instrument(tracing::debug_span!("jsonrpc.call", rpc.method = method))
            .await?;
        Ok(())
    }

    pub async fn invoke<M: Method>(&self, url: &str, method: M) -> Result<M::Output> {
        let name = method.name().to_string();
        let req = Self::new_request(url, &name, method)?;
        self.exchange(req)
            .instrument(tracing::debug_span!("jsonrpc.call", rpc.method = %name))
            .await
    }

    /// Run a request built by [`Client::new_request`].
    pub async fn execute<T: DeserializeOwned>(&self, req: reqwest::Request, dest: &mut T) -> Result<()> {
        *dest = self.exchange(req).await?;
        Ok(())
    }

    pub async fn batch(&self, url: &str, batch: &Batch<'_>) -> Result<()> {
        let req = batch.build_request(url)?;
        self.execute_batch(req, batch).await
    }

    /// Run a request built by [`Batch::build_request`] and hand each result to
    /// its call's destination.
    pub async fn execute_batch(&self, req: reqwest::Request, batch: &Batch<'_>) -> Result<()> {
        let body = self
            .send(req)
            .instrument(tracing::debug_span!("jsonrpc.batch", calls = batch.len()))
            .await?;
        let replies: Vec<Reply> = match serde_json::from_slice(&body) {
            Ok(replies) => replies,
            Err(e) => return Err(rejection(&body).unwrap_or(Error::Decode(e))),
        };
        batch.demux(replies)
    }

    async fn exchange<T: DeserializeOwned>(&self, req: reqwest::Request) -> Result<T> {
        let body = self.send(req).await?;
        let reply: Reply = serde_json::from_slice(&body).map_err(Error::Decode)?;
        if let Some(err) = reply.error {
            return Err(err.into());
        }
        decode(reply.result.as_deref())
    }

    async fn send(&self, req: reqwest::Request) -> Result<Bytes> {
        if let Some(body) = req.body().and_then(reqwest::Body::as_bytes) {
            tracing::debug!("request: {}", String::from_utf8_lossy(body));
        }
        let resp = self.http.execute(req).await?;
        let body = resp.bytes().await?;
        tracing::debug!("response: {}", String::from_utf8_lossy(&body));
        Ok(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn single_request_shape() {
        let req = Client::new_request("http://localhost:8000/rpc", "add", [1, 2, 3]).unwrap();
        assert_eq!(req.url().as_str(), "http://localhost:8000/rpc");
        assert_eq!(req.headers()[CONTENT_TYPE], "application/json");
        let body: serde_json::Value =
            serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(
            body,
            json!({"jsonrpc": "2.0", "id": "1", "method": "add", "params": [1, 2, 3]})
        );
    }

    #[test]
    fn decode_result() {
        let reply: Reply = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"1","result":[1,2]}"#).unwrap();
        assert_eq!(reply.id, Id::from("1"));
        let v: Vec<u8> = decode(reply.result.as_deref()).unwrap();
        assert_eq!(v, vec![1, 2]);

        let reply: Reply = serde_json::from_str(r#"{"jsonrpc":"2.0","id":"1","result":null}"#).unwrap();
        let v: Option<u8> = decode(reply.result.as_deref()).unwrap();
        assert_eq!(v, None);
        assert!(matches!(decode::<String>(reply.result.as_deref()), Err(Error::Decode(_))));
    }

    #[test]
    fn whole_batch_rejection() {
        let body = br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32600,"message":"too big"}}"#;
        let err = rejection(body).unwrap();
        assert_eq!(err.to_string(), "jsonrpc: too big (-32600)");
        assert!(rejection(br#"{"jsonrpc":"2.0","id":"1","result":1}"#).is_none());
        assert!(rejection(b"hello").is_none());
    }
}
