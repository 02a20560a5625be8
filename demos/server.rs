use jsonrpc_http::observe::TracingObserver;
use jsonrpc_http::{MapDispatcher, Result, RpcError, Server, ServerConfig};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let dispatcher = MapDispatcher::new();
    dispatcher.register_fn("add", |resp, call, _| match call.parse_params::<Vec<i64>>() {
        Ok(params) => resp.set_result(params.iter().sum::<i64>()),
        Err(e) => resp.set_error(e),
    })?;
    dispatcher.register_fn("multiply", |resp, call, _| match call.parse_params::<Vec<i64>>() {
        Ok(params) => resp.set_result(params.iter().product::<i64>()),
        Err(e) => resp.set_error(e),
    })?;
    dispatcher.register_async("whoami", |_call, ctx| async move {
        Ok::<_, RpcError>(serde_json::json!({
            "remote": ctx.remote_addr.map(|a| a.to_string()),
            "agent": ctx.headers.get("user-agent").and_then(|v| v.to_str().ok()),
        }))
    })?;

    let config = ServerConfig {
        pretty: true,
        ..ServerConfig::default()
    };
    Server::builder(dispatcher)
        .config(config)
        .observer(TracingObserver)
        .build()
        .run()
        .await
}
