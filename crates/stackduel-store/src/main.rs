use std::sync::{Arc, Mutex};

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use stackduel_core::net::DEFAULT_STORE_PORT;
use stackduel_store::service;
use stackduel_store::storage::MemStore;

#[derive(Parser, Debug)]
#[command(name = "stackduel-store", about = "Stackduel persistence service")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port.
    #[arg(long, default_value_t = DEFAULT_STORE_PORT)]
    port: u16,
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    tracing::info!(host = %args.host, port = args.port, "persistence service listening");

    let store = Arc::new(Mutex::new(MemStore::new()));
    service::serve(listener, store).await
}
