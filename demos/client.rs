use jsonrpc_http::{Batch, Client, Result};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let url = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "http://127.0.0.1:8000/".to_string());
    let client = Client::new();

    let mut sum = 0i64;
    client.call(&url, "add", [1, 2, 3], &mut sum).await?;
    println!("add: {sum}");

    let mut whoami = serde_json::Value::Null;
    client.call(&url, "whoami", (), &mut whoami).await?;
    println!("whoami: {whoami}");

    let (mut a, mut b, mut c) = (0i64, 0i64, 0i64);
    let batch = Batch::new().discard_errors(false);
    batch.add_call("add", [1, 2, 3], &mut a)?;
    batch.add_call("multiply", [4, 5, 6], &mut b)?;
    batch.add_call("add", [7, 8, 9], &mut c)?;
    client.batch(&url, &batch).await?;
    drop(batch);
    println!("batch: {a} {b} {c}");

    Ok(())
}
