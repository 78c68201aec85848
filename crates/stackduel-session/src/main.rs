use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use stackduel_core::net::{DEFAULT_MATCH_PORT_BASE, DEFAULT_SESSION_PORT, DEFAULT_STORE_PORT};
use stackduel_session::launcher::{Launcher, LauncherConfig};
use stackduel_session::state::AppState;
use stackduel_store::client::StoreClient;

#[derive(Parser, Debug)]
#[command(name = "stackduel-session", about = "Stackduel session service")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port.
    #[arg(long, default_value_t = DEFAULT_SESSION_PORT)]
    port: u16,

    /// Address of the persistence service.
    #[arg(long, default_value_t = format!("127.0.0.1:{DEFAULT_STORE_PORT}"))]
    store_addr: String,

    /// Host clients are told to reach match servers on.
    #[arg(long, default_value = "127.0.0.1")]
    advertise_host: String,

    /// Path to the match server binary. Defaults to `stackduel-match`
    /// beside this executable.
    #[arg(long)]
    match_bin: Option<PathBuf>,

    /// First port of the match port pool.
    #[arg(long, default_value_t = DEFAULT_MATCH_PORT_BASE)]
    match_port_base: u16,

    /// Size of the match port pool.
    #[arg(long, default_value_t = 200)]
    match_port_span: u16,

    /// Hard cap on match duration before the child is killed, in seconds.
    #[arg(long, default_value_t = 1800)]
    max_match_secs: u64,
}

fn default_match_bin() -> std::io::Result<PathBuf> {
    let mut path = std::env::current_exe()?;
    path.set_file_name("stackduel-match");
    Ok(path)
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    let local = listener.local_addr()?;
    tracing::info!(host = %args.host, port = local.port(), "session service listening");

    let store = StoreClient::connect(&args.store_addr).await?;
    tracing::info!(store = %args.store_addr, "persistence connected");

    let match_bin = match args.match_bin {
        Some(path) => path,
        None => default_match_bin()?,
    };
    let launcher = Launcher::new(LauncherConfig {
        match_bin,
        listen_host: args.host.clone(),
        // Children run on this machine; they report completion locally.
        session_addr: format!("127.0.0.1:{}", local.port()),
        port_base: args.match_port_base,
        port_span: args.match_port_span,
        max_match_duration: Duration::from_secs(args.max_match_secs),
    });

    let state = AppState::new(store, launcher, args.advertise_host);
    stackduel_session::serve(listener, state).await
}
