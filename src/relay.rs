//! Inference relay: queue in, alerts out
//!
//! The relay owns the connection's inference session. It takes one item at a
//! time from the ingress queue, submits it, streams the reply through a
//! [`JsonStreamExtractor`] and forwards each extracted value immediately. A
//! reply is consumed completely before the next item is dequeued, so alerts
//! leave in the order their items were submitted.

use crate::alert::log_alert;
use crate::gemini::{self, GeminiError};
use crate::ingress_queue::MediaIngressQueue;
use crate::json_stream::JsonStreamExtractor;
use crate::media_event::MediaItem;

use async_trait::async_trait;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Default bound on one submitted item and its complete reply
pub const DEFAULT_TURN_TIMEOUT: Duration = Duration::from_secs(30);

/// A stateful conversation with the inference service
#[async_trait]
pub trait InferenceSession: Send {
    /// Submit one media item as a new turn.
    async fn submit(&mut self, item: &MediaItem) -> gemini::Result<()>;

    /// Next text fragment of the current reply, `None` once the turn is complete.
    async fn next_fragment(&mut self) -> gemini::Result<Option<String>>;

    /// Called after a failed turn so a late reply cannot leak into the next one.
    async fn reset(&mut self) {}
}

/// Why a single turn failed
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("inference service error: {0}")]
    Service(#[from] GeminiError),

    #[error("turn timed out after {0:?}")]
    Timeout(Duration),

    #[error("alert sink closed")]
    SinkClosed,
}

impl RelayError {
    /// Whether the relay can go on with the next item.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::SinkClosed)
    }
}

/// Per-relay counters, returned when the relay stops on its own
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub turns: u64,
    pub failed_turns: u64,
    pub alerts: u64,
}

pub struct InferenceRelay<S> {
    session: S,
    extractor: JsonStreamExtractor,
    queue: Arc<MediaIngressQueue>,
    alert_tx: mpsc::Sender<Value>,
    turn_timeout: Duration,
    stats: RelayStats,
}

impl<S: InferenceSession> InferenceRelay<S> {
    pub fn new(
        session: S,
        queue: Arc<MediaIngressQueue>,
        alert_tx: mpsc::Sender<Value>,
        turn_timeout: Duration,
    ) -> Self {
        Self {
            session,
            extractor: JsonStreamExtractor::new(),
            queue,
            alert_tx,
            turn_timeout,
            stats: RelayStats::default(),
        }
    }

    /// Process items until the queue is closed and drained or the sink goes away.
    pub async fn run(mut self) -> RelayStats {
        info!("Inference relay started");

        while let Some(item) = self.queue.dequeue().await {
            match self.process_item(item).await {
                Ok(_) => {}
                Err(e) if e.is_recoverable() => {
                    warn!("Turn failed, continuing with next item: {}", e);
                }
                Err(e) => {
                    info!("Stopping relay: {}", e);
                    break;
                }
            }
        }

        info!(
            "Inference relay stopped after {} turns ({} failed, {} alerts)",
            self.stats.turns, self.stats.failed_turns, self.stats.alerts
        );
        self.stats
    }

    /// Submit one item and forward every value in its reply.
    ///
    /// Returns the number of values forwarded. On a recoverable failure the
    /// session and the extractor are reset before returning.
    pub async fn process_item(&mut self, item: MediaItem) -> Result<usize, RelayError> {
        let kind = item.kind();
        let started = Instant::now();
        self.stats.turns += 1;

        let result = self.run_turn(&item).await;

        match &result {
            Ok(count) => {
                self.stats.alerts += *count as u64;
                debug!(
                    "{} turn finished in {:?} with {} alerts",
                    kind.as_str(),
                    started.elapsed(),
                    count
                );
            }
            Err(e) => {
                self.stats.failed_turns += 1;
                if e.is_recoverable() {
                    error!("{} turn failed after {:?}: {}", kind.as_str(), started.elapsed(), e);
                    self.session.reset().await;
                    self.extractor.reset();
                }
            }
        }

        result
    }

    /// The turn timeout covers time spent waiting on the service only;
    /// waiting for a slow client to take alerts is not charged to it.
    async fn run_turn(&mut self, item: &MediaItem) -> Result<usize, RelayError> {
        let limit = self.turn_timeout;
        let mut budget = limit;
        charged(&mut budget, limit, self.session.submit(item)).await?;

        let mut forwarded = 0;
        while let Some(fragment) = charged(&mut budget, limit, self.session.next_fragment()).await? {
            for value in self.extractor.process(&fragment) {
                log_alert(&value);
                self.alert_tx
                    .send(value)
                    .await
                    .map_err(|_| RelayError::SinkClosed)?;
                forwarded += 1;
            }
        }

        Ok(forwarded)
    }
}

/// Run one service call against what is left of the turn's time budget.
async fn charged<T, F>(budget: &mut Duration, limit: Duration, call: F) -> Result<T, RelayError>
where
    F: Future<Output = gemini::Result<T>>,
{
    let started = Instant::now();
    let result = tokio::time::timeout(*budget, call).await;
    *budget = budget.saturating_sub(started.elapsed());
    let reply = result.map_err(|_| RelayError::Timeout(limit))?;
    Ok(reply?)
}
