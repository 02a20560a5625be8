use serde::de::DeserializeOwned;
use serde::Serialize;

/// A typed remote method. The value itself is serialized as the call's
/// `params`, the result decodes into `Output`.
///
/// ```
/// #[derive(serde::Serialize)]
/// struct Add(Vec<i64>);
///
/// impl jsonrpc_http::Method for Add {
///     type Output = i64;
///
///     fn name(&self) -> &str {
///         "add"
///     }
/// }
/// ```
pub trait Method: Serialize {
    type Output: DeserializeOwned;

    fn name(&self) -> &str;
}
