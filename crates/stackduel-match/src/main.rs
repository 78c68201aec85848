use clap::Parser;
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

use stackduel_core::net::{DEFAULT_MATCH_PORT_BASE, GRAVITY_DROP_MS};
use stackduel_core::types::Role;
use stackduel_match::MatchConfig;

#[derive(Parser, Debug)]
#[command(name = "stackduel-match", about = "Stackduel authoritative match server")]
struct Args {
    /// Listen address.
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Listen port (allocated by the launcher).
    #[arg(long, default_value_t = DEFAULT_MATCH_PORT_BASE)]
    port: u16,

    /// Match identifier recorded in the log.
    #[arg(long)]
    match_id: String,

    /// Shared 64-bit bag seed; both players receive it in WELCOME.
    #[arg(long)]
    seed: u64,

    /// Room this match belongs to; HELLO frames must carry it.
    #[arg(long)]
    room_id: u64,

    /// Authorized player as `user_id:role`. Given exactly twice.
    #[arg(long = "player", value_parser = parse_player)]
    players: Vec<(u64, Role)>,

    /// Session-service endpoint for the completion report.
    #[arg(long)]
    session_addr: Option<String>,

    /// Gravity interval in milliseconds.
    #[arg(long, default_value_t = GRAVITY_DROP_MS)]
    drop_ms: u64,
}

fn parse_player(s: &str) -> Result<(u64, Role), String> {
    let (user, role) = s
        .split_once(':')
        .ok_or_else(|| format!("expected user_id:role, got {s}"))?;
    let user_id = user
        .parse::<u64>()
        .map_err(|e| format!("bad user id {user}: {e}"))?;
    let role = role.parse::<Role>()?;
    Ok((user_id, role))
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let &[p1, p2] = args.players.as_slice() else {
        return Err(std::io::Error::other("exactly two --player flags required"));
    };

    let listener = TcpListener::bind((args.host.as_str(), args.port)).await?;
    tracing::info!(
        match_id = %args.match_id,
        port = args.port,
        room_id = args.room_id,
        "match server listening"
    );

    let mut config = MatchConfig::new(args.match_id, args.room_id, args.seed, [p1, p2]);
    config.drop_ms = args.drop_ms;
    config.session_addr = args.session_addr;

    stackduel_match::run_match(listener, config).await?;
    Ok(())
}
