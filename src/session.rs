//! Per-connection orchestration
//!
//! A session ties one client WebSocket to one inference conversation. The
//! ingress loop (this task) classifies incoming frames and offers them to the
//! bounded queue without ever waiting; the relay task drains the queue at the
//! model's pace; the writer task sends alerts back to the client. Only the
//! queue is shared between ingress and relay.

use crate::ingress_queue::{MediaIngressQueue, QueueStats, DEFAULT_QUEUE_CAPACITY};
use crate::media_event::MediaItem;
use crate::relay::{InferenceRelay, InferenceSession, RelayStats, DEFAULT_TURN_TIMEOUT};
use crate::ws_writer::run_writer;

use futures_util::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

/// Alerts buffered between the relay and the writer
const ALERT_CHANNEL_CAPACITY: usize = 32;

/// Lifecycle of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Draining,
    Closed,
}

/// Tunables for one session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub queue_capacity: usize,
    pub turn_timeout: Duration,
    pub shutdown_timeout: Duration,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            turn_timeout: DEFAULT_TURN_TIMEOUT,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// What happened during a session, available once it is closed
#[derive(Debug, Clone, Default)]
pub struct SessionReport {
    pub frames: u64,
    pub queue: QueueStats,
    /// Present when the relay stopped on its own before teardown
    pub relay: Option<RelayStats>,
    pub alerts_delivered: usize,
}

pub struct ConnectionSession<S> {
    peer: String,
    inference: S,
    options: SessionOptions,
}

impl<S: InferenceSession + 'static> ConnectionSession<S> {
    pub fn new(peer: impl Into<String>, inference: S, options: SessionOptions) -> Self {
        Self {
            peer: peer.into(),
            inference,
            options,
        }
    }

    /// Drive the session over an accepted WebSocket until the client leaves.
    pub async fn run<T>(self, ws: WebSocketStream<T>) -> SessionReport
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let Self {
            peer,
            inference,
            options,
        } = self;
        let mut state = SessionState::Connecting;
        info!("Client {} connected, starting session", peer);

        let queue = Arc::new(MediaIngressQueue::new(options.queue_capacity));
        let (sink, mut stream) = ws.split();
        let (alert_tx, alert_rx) = mpsc::channel(ALERT_CHANNEL_CAPACITY);

        let writer_task = tokio::spawn(run_writer(alert_rx, sink));
        let relay = InferenceRelay::new(inference, queue.clone(), alert_tx, options.turn_timeout);
        let relay_task = tokio::spawn(relay.run());
        let _tasks = TaskGuard(vec![relay_task.abort_handle(), writer_task.abort_handle()]);

        transition(&peer, &mut state, SessionState::Active);

        let mut frames = 0u64;
        while let Some(frame) = stream.next().await {
            match frame {
                Ok(Message::Close(close)) => {
                    info!("Client {} closed the connection: {:?}", peer, close);
                    break;
                }
                Ok(message) => {
                    if matches!(message, Message::Binary(_) | Message::Text(_)) {
                        frames += 1;
                    }
                    if let Some(item) = classify(message) {
                        queue.try_enqueue(item);
                    }
                }
                Err(e) => {
                    warn!("Transport error from {}: {}", peer, e);
                    break;
                }
            }
        }

        transition(&peer, &mut state, SessionState::Draining);
        queue.close();
        relay_task.abort();

        let relay_stats = match tokio::time::timeout(options.shutdown_timeout, relay_task).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) if e.is_cancelled() => {
                debug!("Relay task for {} cancelled", peer);
                None
            }
            Ok(Err(e)) => {
                error!("Relay task for {} failed: {}", peer, e);
                None
            }
            Err(_) => {
                warn!(
                    "Relay task for {} did not stop within {:?}",
                    peer, options.shutdown_timeout
                );
                None
            }
        };

        let writer_abort = writer_task.abort_handle();
        let alerts_delivered =
            match tokio::time::timeout(options.shutdown_timeout, writer_task).await {
                Ok(Ok(delivered)) => delivered,
                Ok(Err(e)) => {
                    error!("Writer task for {} failed: {}", peer, e);
                    0
                }
                Err(_) => {
                    warn!("Writer task for {} did not finish, aborting", peer);
                    writer_abort.abort();
                    0
                }
            };

        transition(&peer, &mut state, SessionState::Closed);

        let report = SessionReport {
            frames,
            queue: queue.stats(),
            relay: relay_stats,
            alerts_delivered,
        };
        info!(
            "Session {} closed: {} frames, {} queued, {} evicted, {} dropped, {} alerts",
            peer,
            report.frames,
            report.queue.enqueued,
            report.queue.evicted,
            report.queue.dropped,
            report.alerts_delivered
        );
        report
    }
}

/// Aborts the session's tasks when `run` is dropped before it finishes
struct TaskGuard(Vec<AbortHandle>);

impl Drop for TaskGuard {
    fn drop(&mut self) {
        for task in &self.0 {
            task.abort();
        }
    }
}

fn transition(peer: &str, state: &mut SessionState, next: SessionState) {
    info!("🔄 Session {} state transition: {:?} -> {:?}", peer, state, next);
    *state = next;
}

/// Turn a client frame into a media item; anything unusable is ignored.
pub fn classify(message: Message) -> Option<MediaItem> {
    match message {
        Message::Binary(bytes) if !bytes.is_empty() => Some(MediaItem::Audio(bytes.to_vec())),
        Message::Text(text) => match MediaItem::from_envelope(text.as_str()) {
            Ok(item) => Some(item),
            Err(e) => {
                debug!("Ignoring text frame: {}", e);
                None
            }
        },
        _ => None,
    }
}
