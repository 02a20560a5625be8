use std::collections::HashMap;

use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::client::{json_post, Reply};
use crate::error::Error;
use crate::jsonrpc::{Call, Id};
use crate::method::Method;
use crate::Result;

/// Somewhere a decoded result can be written to. A failed decode leaves the
/// target untouched.
pub trait Destination: Send {
    fn fill(&mut self, json: &str) -> serde_json::Result<()>;
}

impl<T: DeserializeOwned + Send> Destination for &mut T {
    fn fill(&mut self, json: &str) -> serde_json::Result<()> {
        **self = serde_json::from_str(json)?;
        Ok(())
    }
}

struct BatchInner<'a> {
    next_id: u64,
    calls: Vec<Call>,
    destinations: HashMap<Id, Box<dyn Destination + 'a>>,
}

/// Calls sent together in one HTTP request. Each call gets a sequential
/// string id starting at `"1"`, its result is written into the destination
/// given to [`Batch::add_call`].
pub struct Batch<'a> {
    inner: Mutex<BatchInner<'a>>,
    discard_errors: bool,
}

impl Default for Batch<'_> {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Batch<'a> {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(BatchInner {
                next_id: 1,
                calls: Vec::new(),
                destinations: HashMap::new(),
            }),
            discard_errors: true,
        }
    }

    /// When set (the default), failed entries are skipped and their
    /// destinations left alone. Otherwise the first failure aborts the batch.
    pub fn discard_errors(mut self, discard: bool) -> Self {
        self.discard_errors = discard;
        self
    }

    pub fn set_discard_errors(&mut self, discard: bool) {
        self.discard_errors = discard;
    }

    pub fn discards_errors(&self) -> bool {
        self.discard_errors
    }

    pub fn add_call<P, T>(&self, method: &str, params: P, dest: &'a mut T) -> Result<Id>
    where
        P: Serialize,
        T: DeserializeOwned + Send,
    {
        let params = serde_json::value::to_raw_value(&params).map_err(Error::Encode)?;

        let mut inner = self.inner.lock();
        let id = Id::String(inner.next_id.to_string());
        inner.next_id += 1;
        inner.calls.push(Call {
            version: Some(crate::jsonrpc::VERSION.to_string()),
            id: id.clone(),
            method: method.to_string(),
            params: Some(params),
        });
        inner.destinations.insert(id.clone(), Box::new(dest));
        Ok(id)
    }

    pub fn add_method<M: Method>(&self, method: M, dest: &'a mut M::Output) -> Result<Id>
    where
        M::Output: Send,
    {
        let name = method.name().to_string();
        self.add_call(&name, method, dest)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// POST request carrying every call as a JSON array, in insertion order.
    pub fn build_request(&self, url: &str) -> Result<reqwest::Request> {
        let inner = self.inner.lock();
        if inner.calls.is_empty() {
            return Err(Error::EmptyBatch);
        }
        let body = serde_json::to_vec(&inner.calls).map_err(Error::Encode)?;
        json_post(url, body)
    }

    /// Route each response to the destination of the call with the same id.
    pub(crate) fn demux(&self, replies: Vec<Reply>) -> Result<()> {
        let mut inner = self.inner.lock();
        for reply in replies {
            let Some(dest) = inner.destinations.get_mut(&reply.id) else {
                if self.discard_errors {
                    tracing::debug!("skipping response with unknown id {}", reply.id);
                    continue;
                }
                return Err(Error::NoMatchingCall(reply.id));
            };

            if let Some(err) = reply.error {
                if self.discard_errors {
                    tracing::debug!("skipping failed call {}: {err}", reply.id);
                    continue;
                }
                return Err(err.into());
            }

            let json = reply.result.as_deref().map_or("null", |raw| raw.get());
            if let Err(e) = dest.fill(json) {
                if self.discard_errors {
                    tracing::debug!("skipping undecodable result for {}: {e}", reply.id);
                    continue;
                }
                return Err(Error::Decode(e));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jsonrpc::codes;
    use serde_json::json;

    fn replies(json: serde_json::Value) -> Vec<Reply> {
        serde_json::from_str(&json.to_string()).unwrap()
    }

    #[test]
    fn build_request() {
        let (mut a, mut b, mut c) = (0i64, 0i64, 0i64);
        let batch = Batch::new();
        batch.add_call("add", [1, 2, 3], &mut a).unwrap();
        batch.add_call("multiply", [4, 5, 6], &mut b).unwrap();
        batch.add_call("add", [7, 8, 9], &mut c).unwrap();
        assert_eq!(batch.len(), 3);

        let req = batch.build_request("https://foobar.com").unwrap();
        assert_eq!(req.method(), &reqwest::Method::POST);
        assert_eq!(
            req.headers()[reqwest::header::CONTENT_TYPE],
            "application/json"
        );
        let body: serde_json::Value =
            serde_json::from_slice(req.body().unwrap().as_bytes().unwrap()).unwrap();
        assert_eq!(
            body,
            json!([
                {"jsonrpc": "2.0", "id": "1", "method": "add", "params": [1, 2, 3]},
                {"jsonrpc": "2.0", "id": "2", "method": "multiply", "params": [4, 5, 6]},
                {"jsonrpc": "2.0", "id": "3", "method": "add", "params": [7, 8, 9]}
            ])
        );
    }

    #[test]
    fn empty_batch_is_refused() {
        let batch = Batch::new();
        assert!(batch.is_empty());
        assert!(matches!(
            batch.build_request("https://foobar.com"),
            Err(Error::EmptyBatch)
        ));
    }

    #[test]
    fn bad_url() {
        let mut a = 0;
        let batch = Batch::new();
        batch.add_call("add", [1], &mut a).unwrap();
        assert!(matches!(batch.build_request("not a url"), Err(Error::Url(_))));
    }

    #[test]
    fn concurrent_adds_get_distinct_ids() {
        let mut slots = vec![0u8; 64];
        let batch = Batch::new();
        let ids = std::thread::scope(|s| {
            let handles: Vec<_> = slots
                .iter_mut()
                .map(|slot| {
                    let batch = &batch;
                    s.spawn(move || batch.add_call("noop", (), slot).unwrap())
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .collect::<std::collections::HashSet<_>>()
        });
        assert_eq!(ids.len(), 64);
        assert!(ids.contains(&Id::from("1")));
        assert!(ids.contains(&Id::from("64")));
    }

    #[test]
    fn demux_discarding_errors() {
        let (mut a, mut b, mut c) = (0i64, 0i64, 0i64);
        let batch = Batch::new();
        batch.add_call("add", [1, 2, 3], &mut a).unwrap();
        batch.add_call("multiply", [4, 5, 6], &mut b).unwrap();
        batch.add_call("add", [7, 8, 9], &mut c).unwrap();

        batch
            .demux(replies(json!([
                {"jsonrpc": "2.0", "id": "1", "result": 6},
                {"jsonrpc": "2.0", "id": "2", "error": {"code": codes::METHOD_NOT_FOUND, "message": "nope"}},
                {"jsonrpc": "2.0", "id": "99", "result": 1},
                {"jsonrpc": "2.0", "id": "3", "result": 24}
            ])))
            .unwrap();
        drop(batch);
        assert_eq!((a, b, c), (6, 0, 24));
    }

    #[test]
    fn demux_failing_fast() {
        let (mut a, mut b, mut c) = (0i64, 0i64, 0i64);
        let batch = Batch::new().discard_errors(false);
        batch.add_call("add", [1, 2, 3], &mut a).unwrap();
        batch.add_call("multiply", [4, 5, 6], &mut b).unwrap();
        batch.add_call("add", [7, 8, 9], &mut c).unwrap();

        let err = batch
            .demux(replies(json!([
                {"jsonrpc": "2.0", "id": "1", "result": 6},
                {"jsonrpc": "2.0", "id": "2", "error": {"code": codes::METHOD_NOT_FOUND, "message": "nope"}},
                {"jsonrpc": "2.0", "id": "3", "result": 24}
            ])))
            .unwrap_err();
        assert_eq!(err.rpc().map(|e| e.code), Some(codes::METHOD_NOT_FOUND));
        drop(batch);
        assert_eq!((a, b, c), (6, 0, 0));
    }

    #[test]
    fn demux_unknown_id_and_bad_shape() {
        let mut a = 0i64;
        let batch = Batch::new().discard_errors(false);
        batch.add_call("add", [1], &mut a).unwrap();

        let err = batch
            .demux(replies(json!([{"jsonrpc": "2.0", "id": 1, "result": 1}])))
            .unwrap_err();
        assert!(matches!(err, Error::NoMatchingCall(ref id) if *id == Id::from(1)));

        let err = batch
            .demux(replies(json!([{"jsonrpc": "2.0", "id": "1", "result": "six"}])))
            .unwrap_err();
        assert!(matches!(err, Error::Decode(_)));
        drop(batch);
        assert_eq!(a, 0);
    }
}
