pub mod handler;
pub mod launcher;
pub mod registry;
pub mod state;

use tokio::net::TcpListener;

use state::AppState;

/// Accept loop: one worker task per client connection.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
    loop {
        let (stream, _peer) = listener.accept().await?;
        let state = state.clone();
        tokio::spawn(handler::handle_client(stream, state));
    }
}
