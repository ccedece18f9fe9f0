//! Batched record persistence.
//!
//! Workers submit fetched records to a single background task that groups
//! them into batches and upserts each batch atomically. A submission is
//! acknowledged with a [`WriteReceipt`] only after its batch committed; the
//! receipt is the sole way to advance a cursor.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use finsync_market_data::{DataType, Record};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::policy::WriterPolicy;
use crate::constants::WRITER_CHANNEL_CAPACITY;
use crate::errors::{Error, Result, ValidationError};
use crate::events::{SyncEvent, SyncEventSink};

/// Durable record storage.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Upserts `records` by natural key in one transaction.
    ///
    /// Either every record is written or none is. Returns the number of rows touched.
    async fn upsert_records(&self, records: &[Record]) -> Result<usize>;
}

/// Proof that a submission's records are durable.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WriteReceipt {
    symbol: String,
    data_type: DataType,
    watermark: DateTime<Utc>,
    records: usize,
}

impl WriteReceipt {
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    /// Latest watermark among the persisted records.
    pub fn watermark(&self) -> DateTime<Utc> {
        self.watermark
    }

    pub fn records(&self) -> usize {
        self.records
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WriterStats {
    pub batches_written: usize,
    pub batches_failed: usize,
    pub records_written: usize,
    pub retries: u32,
}

struct WriteJob {
    receipt: WriteReceipt,
    records: Vec<Record>,
    ack: oneshot::Sender<Result<WriteReceipt>>,
}

/// Submission side of the writer. Cheap to clone.
#[derive(Clone)]
pub struct UpsertWriter {
    sender: mpsc::Sender<WriteJob>,
}

/// Owner side of the writer task.
pub struct WriterHandle {
    task: JoinHandle<WriterStats>,
    closing: CancellationToken,
}

impl UpsertWriter {
    pub fn spawn(
        store: Arc<dyn RecordStore>,
        policy: WriterPolicy,
        events: Arc<dyn SyncEventSink>,
    ) -> (Self, WriterHandle) {
        let (sender, receiver) = mpsc::channel(WRITER_CHANNEL_CAPACITY);
        let closing = CancellationToken::new();
        let task = tokio::spawn(run_writer(
            store,
            policy,
            events,
            receiver,
            closing.clone(),
        ));
        (Self { sender }, WriterHandle { task, closing })
    }

    /// Submits records for one (symbol, data type) and waits for the batch
    /// containing them to commit.
    pub async fn write(
        &self,
        symbol: &str,
        data_type: DataType,
        records: Vec<Record>,
    ) -> Result<WriteReceipt> {
        self.submit(symbol, data_type, records).await?.committed().await
    }

    /// Queues records for one (symbol, data type) without waiting for the commit.
    ///
    /// Only waits while the submission channel is full.
    pub async fn submit(
        &self,
        symbol: &str,
        data_type: DataType,
        records: Vec<Record>,
    ) -> Result<PendingWrite> {
        let watermark = records
            .iter()
            .map(Record::watermark)
            .max()
            .ok_or_else(|| {
                ValidationError::InvalidInput(format!("no records to write for {}", symbol))
            })?;
        let receipt = WriteReceipt {
            symbol: symbol.to_string(),
            data_type,
            watermark,
            records: records.len(),
        };

        let (ack, acked) = oneshot::channel();
        self.sender
            .send(WriteJob {
                receipt,
                records,
                ack,
            })
            .await
            .map_err(|_| Error::Persistence("upsert writer has stopped".to_string()))?;

        Ok(PendingWrite { acked })
    }
}

/// A queued submission; resolves once its batch committed or failed.
pub struct PendingWrite {
    acked: oneshot::Receiver<Result<WriteReceipt>>,
}

impl PendingWrite {
    pub async fn committed(self) -> Result<WriteReceipt> {
        self.acked
            .await
            .map_err(|_| Error::Persistence("upsert writer dropped the submission".to_string()))?
    }
}

impl WriterHandle {
    /// Flushes whatever is pending and waits for the task to finish.
    ///
    /// Resolves once every [`UpsertWriter`] clone has been dropped.
    pub async fn shutdown(self) -> WriterStats {
        self.closing.cancel();
        self.task.await.unwrap_or_else(|e| {
            warn!("Upsert writer task ended abnormally: {}", e);
            WriterStats::default()
        })
    }
}

async fn run_writer(
    store: Arc<dyn RecordStore>,
    policy: WriterPolicy,
    events: Arc<dyn SyncEventSink>,
    mut receiver: mpsc::Receiver<WriteJob>,
    closing: CancellationToken,
) -> WriterStats {
    let mut stats = WriterStats::default();
    let mut pending: Vec<WriteJob> = Vec::new();
    let mut pending_records = 0usize;
    let mut deadline: Option<Instant> = None;
    let mut is_closing = false;

    loop {
        let flush_timer = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            message = receiver.recv() => match message {
                Some(job) => {
                    pending_records += job.records.len();
                    pending.push(job);
                    if deadline.is_none() {
                        deadline = Some(Instant::now() + policy.flush_interval);
                    }
                    if is_closing || pending_records >= policy.batch_size {
                        flush(&*store, &policy, &*events, std::mem::take(&mut pending), &mut stats).await;
                        pending_records = 0;
                        deadline = None;
                    }
                }
                None => {
                    flush(&*store, &policy, &*events, std::mem::take(&mut pending), &mut stats).await;
                    break;
                }
            },
            _ = flush_timer => {
                flush(&*store, &policy, &*events, std::mem::take(&mut pending), &mut stats).await;
                pending_records = 0;
                deadline = None;
            }
            _ = closing.cancelled(), if !is_closing => {
                is_closing = true;
                flush(&*store, &policy, &*events, std::mem::take(&mut pending), &mut stats).await;
                pending_records = 0;
                deadline = None;
            }
        }
    }

    debug!(
        "Upsert writer stopped: {} batches written, {} failed, {} records",
        stats.batches_written, stats.batches_failed, stats.records_written
    );
    stats
}

/// Writes one batch with whole-batch retries, then answers every submission in it.
async fn flush(
    store: &dyn RecordStore,
    policy: &WriterPolicy,
    events: &dyn SyncEventSink,
    jobs: Vec<WriteJob>,
    stats: &mut WriterStats,
) {
    if jobs.is_empty() {
        return;
    }

    let mut batch = Vec::with_capacity(jobs.iter().map(|j| j.records.len()).sum());
    let mut acks = Vec::with_capacity(jobs.len());
    for job in jobs {
        batch.extend(job.records);
        acks.push((job.receipt, job.ack));
    }

    let mut attempts = 0u32;
    let result = loop {
        attempts += 1;
        match store.upsert_records(&batch).await {
            Ok(_) => break Ok(()),
            Err(e) if attempts <= policy.max_retries => {
                warn!(
                    "Batch of {} records failed (attempt {}): {}. Retrying",
                    batch.len(),
                    attempts,
                    e
                );
                stats.retries += 1;
                sleep(policy.retry_delay).await;
            }
            Err(e) => break Err(e),
        }
    };

    match result {
        Ok(()) => {
            stats.batches_written += 1;
            stats.records_written += batch.len();
            events.emit(SyncEvent::BatchWritten {
                records: batch.len(),
                submissions: acks.len(),
                attempts,
            });
            for (receipt, ack) in acks {
                // A worker that stopped waiting no longer needs its receipt.
                let _ = ack.send(Ok(receipt));
            }
        }
        Err(e) => {
            stats.batches_failed += 1;
            let message = e.to_string();
            events.emit(SyncEvent::BatchFailed {
                records: batch.len(),
                submissions: acks.len(),
                attempts,
                error: message.clone(),
            });
            for (_, ack) in acks {
                let _ = ack.send(Err(Error::Persistence(message.clone())));
            }
        }
    }
}
