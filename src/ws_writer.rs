//! WebSocket writer task that serializes and sends all outgoing alerts
//! This is the single point where alerts are written to the client connection

use futures_util::{Sink, SinkExt};
use serde_json::Value;
use tokio::sync::mpsc::Receiver;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

/// Run the websocket writer task.
///
/// Returns the number of alerts delivered. Stops when the relay drops its
/// sender or the client stops accepting writes.
pub async fn run_writer<W>(mut alert_rx: Receiver<Value>, mut sink: W) -> usize
where
    W: Sink<Message> + Unpin,
    W::Error: std::fmt::Display,
{
    debug!("WebSocket writer task started");
    let mut delivered = 0;

    while let Some(alert) = alert_rx.recv().await {
        let text = match serde_json::to_string(&alert) {
            Ok(text) => text,
            Err(e) => {
                warn!("Failed to serialize alert: {}", e);
                continue;
            }
        };

        if let Err(e) = sink.send(Message::text(text)).await {
            warn!("Failed to send alert to client: {}", e);
            break;
        }
        delivered += 1;
    }

    if let Err(e) = sink.close().await {
        debug!("Closing client sink failed: {}", e);
    }
    info!("WebSocket writer task stopped after {} alerts", delivered);
    delivered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_alerts_are_written_as_text_frames() {
        let (alert_tx, alert_rx) = mpsc::channel(4);
        let mut frames: Vec<Message> = Vec::new();

        alert_tx.send(json!({"status": "NORMAL"})).await.unwrap();
        alert_tx.send(json!({"status": "WARNING", "symptoms": []})).await.unwrap();
        drop(alert_tx);

        let delivered = run_writer(alert_rx, &mut frames).await;
        assert_eq!(delivered, 2);

        let texts: Vec<Value> = frames
            .iter()
            .map(|frame| serde_json::from_str(frame.to_text().unwrap()).unwrap())
            .collect();
        assert_eq!(
            texts,
            vec![
                json!({"status": "NORMAL"}),
                json!({"status": "WARNING", "symptoms": []})
            ]
        );
    }

    #[tokio::test]
    async fn test_writer_stops_when_client_is_gone() {
        let (alert_tx, alert_rx) = mpsc::channel(4);
        let broken = Box::pin(futures_util::sink::unfold((), |(), _frame: Message| async {
            Err::<(), _>("client gone")
        }));

        alert_tx.send(json!({"a": 1})).await.unwrap();
        let delivered = run_writer(alert_rx, broken).await;

        assert_eq!(delivered, 0);
        assert!(alert_tx.is_closed());
    }
}
