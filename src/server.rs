//! WebSocket listener
//!
//! Accepts clients on `/ws` and gives each one its own [`ConnectionSession`]
//! with a fresh Gemini conversation. Sessions share nothing with each other.

use crate::config::Config;
use crate::gemini_client::GeminiClient;
use crate::session::ConnectionSession;

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tracing::{debug, error, info, warn};

/// Path clients connect to
pub const WS_PATH: &str = "/ws";

/// Bind to the configured address and serve until `shutdown` resolves.
pub async fn serve<F>(config: Config, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on ws://{}{}", listener.local_addr()?, WS_PATH);
    serve_listener(listener, Arc::new(config), shutdown).await;
    Ok(())
}

/// Accept clients from an already bound listener until `shutdown` resolves.
///
/// Open sessions are aborted on shutdown.
pub async fn serve_listener<F>(listener: TcpListener, config: Arc<Config>, shutdown: F)
where
    F: Future<Output = ()>,
{
    let mut sessions = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested, closing {} sessions", sessions.len());
                break;
            }
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    sessions.spawn(handle_connection(stream, peer, config.clone()));
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            Some(finished) = sessions.join_next(), if !sessions.is_empty() => {
                if let Err(e) = finished {
                    if !e.is_cancelled() {
                        error!("Session task failed: {}", e);
                    }
                }
            }
        }
    }

    sessions.shutdown().await;
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, config: Arc<Config>) {
    debug!("New TCP connection from {}", peer);
    let ws = match tokio_tungstenite::accept_hdr_async(stream, check_path).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
    };

    let gemini = GeminiClient::new(config.gemini.clone(), config.api_key.clone());
    ConnectionSession::new(peer.to_string(), gemini, config.session_options())
        .run(ws)
        .await;
}

fn check_path(request: &Request, response: Response) -> Result<Response, ErrorResponse> {
    if request.uri().path() == WS_PATH {
        return Ok(response);
    }
    debug!("Rejecting upgrade for {}", request.uri());
    let mut rejection = ErrorResponse::new(Some(format!("no endpoint at {}", request.uri().path())));
    *rejection.status_mut() = StatusCode::NOT_FOUND;
    Err(rejection)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::sync::oneshot;
    use tokio::time::timeout;
    use tokio_tungstenite::tungstenite::{Error as WsError, Message};

    async fn start() -> (SocketAddr, oneshot::Sender<()>, tokio::task::JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();
        let server = tokio::spawn(serve_listener(
            listener,
            Arc::new(Config::default()),
            async move {
                let _ = stop_rx.await;
            },
        ));
        (addr, stop_tx, server)
    }

    #[tokio::test]
    async fn test_ws_path_accepts_clients() {
        let (addr, stop_tx, server) = start().await;

        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();
        client.send(Message::text("{\"type\": \"noop\"}".to_string())).await.unwrap();
        client.close(None).await.unwrap();
        while let Some(Ok(_)) = client.next().await {}

        stop_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), server)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_other_paths_are_not_found() {
        let (addr, stop_tx, server) = start().await;

        let result = tokio_tungstenite::connect_async(format!("ws://{}/stream", addr)).await;
        match result {
            Err(WsError::Http(response)) => assert_eq!(response.status(), StatusCode::NOT_FOUND),
            other => panic!("expected a 404 rejection, got {:?}", other.map(|_| ())),
        }

        stop_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), server)
            .await
            .expect("server did not stop")
            .unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_sessions() {
        let (addr, stop_tx, server) = start().await;
        let (_client, _) = tokio_tungstenite::connect_async(format!("ws://{}/ws", addr))
            .await
            .unwrap();

        stop_tx.send(()).unwrap();
        timeout(Duration::from_secs(2), server)
            .await
            .expect("server did not stop with a client attached")
            .unwrap();
    }
}
