//! Minimal end-to-end run: load configuration, build the pool over the HTTP
//! transport, execute a few operations, print the stats snapshot.
//!
//! ```sh
//! export POOL_API_KEYS="sk-one,sk-two"
//! cargo run -p keypool --example pool_usage -- pool.toml https://api.example.test/v1/generate
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use keypool::{KeyPool, PoolClient, PoolConfig};
use serde_json::json;
use upstream::HttpTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,keypool=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let config_path: PathBuf = args
        .next()
        .context("usage: pool_usage <config.toml> <endpoint>")?
        .into();
    let endpoint = args
        .next()
        .context("usage: pool_usage <config.toml> <endpoint>")?;

    let config = PoolConfig::load(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;
    let pool = Arc::new(KeyPool::from_config(&config)?);
    let transport = Arc::new(HttpTransport::new(reqwest::Client::new(), endpoint));
    let client = PoolClient::from_config(Arc::clone(&pool), transport, &config)?;

    let handle = keypool::telemetry::install_recorder();

    for i in 0..3 {
        let payload = json!({"prompt": format!("hello #{i}"), "max_tokens": 32});
        match client.execute("generate", &payload).await {
            Ok(response) => println!("request {i}: status {}", response.status),
            Err(err) => println!("request {i}: {err}"),
        }
    }

    println!(
        "\npool stats:\n{}",
        serde_json::to_string_pretty(&pool.get_stats())?
    );
    println!("\nprometheus:\n{}", handle.render());
    Ok(())
}
