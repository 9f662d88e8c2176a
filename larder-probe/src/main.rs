use larder::events::CacheEvent;
use larder::ports::Cache;
use serde_json::Value;
use shared::config::CacheConfig;
use std::convert::Infallible;
use std::time::Duration;
use storage_engine::Backend;
use tokio::sync::broadcast;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const USAGE: &str = "usage: larder-probe <get KEY | put KEY VALUE | del KEY | fetch KEY VALUE>";

enum Command {
    Get(String),
    Put(String, Value),
    Del(String),
    Fetch(String, Value),
}

impl Command {
    fn parse(args: &[String]) -> Option<Self> {
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        let command = match args.as_slice() {
            ["get", key] => Command::Get(key.to_string()),
            ["put", key, value] => Command::Put(key.to_string(), parse_value(value)),
            ["del", key] => Command::Del(key.to_string()),
            ["fetch", key, value] => Command::Fetch(key.to_string(), parse_value(value)),
            _ => return None,
        };
        Some(command)
    }
}

/// JSON when it parses, a plain string otherwise.
fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(command) = Command::parse(&args) else {
        return Err(USAGE.into());
    };

    let config = CacheConfig::from_env();
    let (tx, mut rx) = broadcast::channel::<CacheEvent>(64);
    let backend = Backend::from_config(&config)?.with_event_broadcaster(tx);

    let listener = tokio::spawn(async move {
        while let Ok(event) = rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => info!(event = %json, "cache event"),
                Err(err) => warn!(error = %err, "failed to render cache event"),
            }
        }
    });

    run(&backend, command).await?;

    backend.shutdown().await;
    drop(backend);
    let _ = tokio::time::timeout(Duration::from_millis(200), listener).await;
    Ok(())
}

async fn run(backend: &Backend, command: Command) -> shared::Result<()> {
    match command {
        Command::Get(key) => {
            let mut value = Value::Null;
            if backend.load(&key, &mut value).await {
                println!("{value}");
            } else {
                println!("(miss)");
            }
        }
        Command::Put(key, value) => {
            backend.store(&key, value).await;
            println!("OK");
        }
        Command::Del(key) => {
            backend.delete(&key).await?;
            println!("OK");
        }
        Command::Fetch(key, fallback) => {
            let mut value = Value::Null;
            let hit = backend
                .load_or_store(&key, &mut value, || async move {
                    Ok::<_, Infallible>(fallback)
                })
                .await?;
            println!("{} {value}", if hit { "hit" } else { "computed" });
        }
    }
    Ok(())
}
