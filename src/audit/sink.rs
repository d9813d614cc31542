use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use diesel::prelude::*;
use diesel::upsert::excluded;
use diesel_async::RunQueryDsl;
use tokio::sync::{mpsc, Mutex};
use tracing::{error, warn};

use crate::db::DieselPool;
use crate::schema::audit_events;

use super::{schema_model::NewAuditEventRow, AuditEvent};

const BATCH_FLUSH_INTERVAL: Duration = Duration::from_millis(100);
const BATCH_CHANNEL_CAPACITY: usize = 4096;
const SYNC_WRITE_RETRIES: u32 = 3;

/// Where audit events ultimately land. `record` dispatches synchronously or
/// batches per `AuditKind::is_synchronous`; implementors only need to provide
/// the raw persistence primitive.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Record one event, respecting its own synchronous/batched discipline.
    async fn record(&self, event: AuditEvent);

    /// Persist a batch. Called by the synchronous path (batch of one, with
    /// retry) and by the background flush task.
    async fn persist_batch(&self, events: &[AuditEvent]) -> Result<(), String>;
}

pub struct PostgresAuditSink {
    pool: DieselPool,
    batch_tx: mpsc::Sender<AuditEvent>,
}

impl PostgresAuditSink {
    /// Spawns the background flush task. The task drains the channel every
    /// `BATCH_FLUSH_INTERVAL` (or sooner if it fills), giving the at-least-once,
    /// at-most-100ms batched delivery §4.4 requires for non-critical events.
    pub fn new(pool: DieselPool) -> Arc<Self> {
        let (tx, rx) = mpsc::channel(BATCH_CHANNEL_CAPACITY);
        let sink = Arc::new(Self {
            pool,
            batch_tx: tx,
        });
        let flush_sink = sink.clone();
        tokio::spawn(async move { flush_sink.run_batch_flusher(rx).await });
        sink
    }

    async fn run_batch_flusher(&self, mut rx: mpsc::Receiver<AuditEvent>) {
        let mut pending = Vec::new();
        loop {
            let deadline = tokio::time::sleep(BATCH_FLUSH_INTERVAL);
            tokio::pin!(deadline);
            tokio::select! {
                maybe_event = rx.recv() => {
                    match maybe_event {
                        Some(event) => pending.push(event),
                        None => break, // sender dropped, shut down
                    }
                }
                _ = &mut deadline => {
                    if !pending.is_empty() {
                        self.flush(&mut pending).await;
                    }
                }
            }
            if pending.len() >= 256 {
                self.flush(&mut pending).await;
            }
        }
        if !pending.is_empty() {
            self.flush(&mut pending).await;
        }
    }

    async fn flush(&self, pending: &mut Vec<AuditEvent>) {
        if let Err(e) = self.persist_batch(pending).await {
            error!("audit batch flush failed, events dropped: {}", e);
        }
        pending.clear();
    }

    async fn persist_with_retry(&self, event: &AuditEvent) {
        let mut attempt = 0;
        loop {
            match self.persist_batch(std::slice::from_ref(event)).await {
                Ok(()) => return,
                Err(e) if attempt < SYNC_WRITE_RETRIES => {
                    attempt += 1;
                    warn!(
                        "synchronous audit write failed (attempt {}/{}): {}",
                        attempt, SYNC_WRITE_RETRIES, e
                    );
                    tokio::time::sleep(Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(e) => {
                    error!(
                        "synchronous audit write permanently failed for {:?}: {}",
                        event.kind, e
                    );
                    return;
                }
            }
        }
    }
}

#[async_trait]
impl AuditSink for PostgresAuditSink {
    async fn record(&self, event: AuditEvent) {
        if event.kind.is_synchronous() {
            self.persist_with_retry(&event).await;
        } else if self.batch_tx.send(event).await.is_err() {
            error!("audit batch channel closed, event dropped");
        }
    }

    async fn persist_batch(&self, events: &[AuditEvent]) -> Result<(), String> {
        if events.is_empty() {
            return Ok(());
        }
        let rows: Vec<NewAuditEventRow> = events.iter().map(NewAuditEventRow::from).collect();
        let mut conn = self.pool.get().await.map_err(|e| e.to_string())?;
        diesel::insert_into(audit_events::table)
            .values(&rows)
            .on_conflict(audit_events::id)
            .do_update()
            .set(audit_events::detail.eq(excluded(audit_events::detail)))
            .execute(&mut conn)
            .await
            .map_err(|e| e.to_string())?;
        Ok(())
    }
}

/// In-memory sink for tests -- records everything synchronously so assertions
/// don't race the batch flusher.
#[derive(Default)]
pub struct InMemoryAuditSink {
    events: Mutex<Vec<AuditEvent>>,
}

impl InMemoryAuditSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for InMemoryAuditSink {
    async fn record(&self, event: AuditEvent) {
        self.events.lock().await.push(event);
    }

    async fn persist_batch(&self, events: &[AuditEvent]) -> Result<(), String> {
        self.events.lock().await.extend_from_slice(events);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn in_memory_sink_records_events() {
        let sink = InMemoryAuditSink::new();
        sink.record(AuditEvent::new(
            super::super::AuditKind::TheftDetected,
            "user-1:client-1",
            json!({"reason": "jti_mismatch"}),
        ))
        .await;
        let events = sink.events().await;
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].shard_key, "user-1:client-1");
    }
}
