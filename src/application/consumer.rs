//! Per-partition consumer pipeline.
//!
//! Every partition of the subscribed topic gets its own task, which handles
//! one record at a time: decode, act (with a bounded timeout), commit.
//!
//! - A record that fails to decode is logged, committed and skipped.
//! - A record whose action fails or times out is *not* committed. The error is
//!   logged and forwarded to the failure channel, and the task moves on to the
//!   next record. After a backoff the task rewinds its stream to the committed
//!   cursor and the withheld record is delivered again. The backoff doubles
//!   while rewound records keep failing, up to a ceiling, and resets once a
//!   record is handled with no redelivery pending.
//!
//! No per-record fault ever ends a partition task. Tasks only stop on
//! [`ConsumerHandle::shutdown`] or when the bus closes.

use crate::domain::ports::{InboundRecord, MessageBus, PartitionStreamBox};
use crate::error::{Result, SagaError};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

/// The component-specific action run for every decoded event.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    type Event: DeserializeOwned + Send + 'static;

    async fn handle(&self, event: Self::Event) -> Result<()>;
}

/// An unhandled error raised while processing one record.
#[derive(Debug)]
pub struct RecordFailure {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub error: SagaError,
}

/// Counters shared by all partition tasks of one pipeline.
#[derive(Debug, Default)]
pub struct PipelineStats {
    handled: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl PipelineStats {
    /// Records acted upon and committed.
    pub fn handled(&self) -> u64 {
        self.handled.load(Ordering::Relaxed)
    }

    /// Malformed records committed without being acted upon.
    pub fn skipped(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Records left uncommitted because of an unhandled error.
    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn seen(&self) -> u64 {
        self.handled() + self.skipped() + self.failed()
    }
}

pub struct ConsumerPipeline<H: EventHandler> {
    topic: String,
    group: String,
    handler: H,
    timeout: Duration,
    backoff: Backoff,
    failures: Option<mpsc::UnboundedSender<RecordFailure>>,
}

/// Delay before a partition rewinds to redeliver withheld records.
#[derive(Debug, Clone, Copy)]
struct Backoff {
    initial: Duration,
    max: Duration,
}

impl<H: EventHandler> ConsumerPipeline<H> {
    pub fn new(topic: impl Into<String>, group: impl Into<String>, handler: H) -> Self {
        Self {
            topic: topic.into(),
            group: group.into(),
            handler,
            timeout: Duration::from_secs(5),
            backoff: Backoff {
                initial: Duration::from_millis(200),
                max: Duration::from_secs(10),
            },
            failures: None,
        }
    }

    /// Bounds the time spent acting on a single record.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the first redelivery delay after a withheld record and the
    /// ceiling it doubles up to.
    pub fn with_redelivery_backoff(mut self, initial: Duration, max: Duration) -> Self {
        self.backoff = Backoff {
            initial,
            max: max.max(initial),
        };
        self
    }

    /// Forwards every unhandled record failure to `failures`.
    pub fn with_failure_channel(mut self, failures: mpsc::UnboundedSender<RecordFailure>) -> Self {
        self.failures = Some(failures);
        self
    }

    /// Subscribes to the topic and spawns one task per partition.
    ///
    /// Only the subscription itself can fail; once running, the pipeline
    /// survives any per-record error.
    pub async fn start(self, bus: &dyn MessageBus) -> Result<ConsumerHandle> {
        let streams = bus.subscribe(&self.topic, &self.group).await?;
        let stats = Arc::new(PipelineStats::default());
        let (shutdown, shutdown_rx) = watch::channel(false);

        let worker = Arc::new(RecordWorker {
            handler: self.handler,
            timeout: self.timeout,
            failures: self.failures,
            stats: Arc::clone(&stats),
        });

        info!(
            topic = %self.topic,
            group = %self.group,
            partitions = streams.len(),
            "consumer started"
        );

        let tasks = streams
            .into_iter()
            .map(|stream| {
                tokio::spawn(run_partition(
                    stream,
                    Arc::clone(&worker),
                    self.backoff,
                    shutdown_rx.clone(),
                ))
            })
            .collect();

        Ok(ConsumerHandle {
            topic: self.topic,
            group: self.group,
            stats,
            shutdown,
            tasks,
        })
    }
}

/// Running pipeline. Dropping it also stops the partition tasks.
pub struct ConsumerHandle {
    topic: String,
    group: String,
    stats: Arc<PipelineStats>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl ConsumerHandle {
    pub fn stats(&self) -> Arc<PipelineStats> {
        Arc::clone(&self.stats)
    }

    /// Stops all partition tasks after their in-flight record and waits for them.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                error!(topic = %self.topic, error = %err, "partition task panicked");
            }
        }
        info!(topic = %self.topic, group = %self.group, "consumer stopped");
    }
}

struct RecordWorker<H: EventHandler> {
    handler: H,
    timeout: Duration,
    failures: Option<mpsc::UnboundedSender<RecordFailure>>,
    stats: Arc<PipelineStats>,
}

/// Redelivery schedule of one partition task.
struct Redelivery {
    backoff: Backoff,
    delay: Duration,
    due: Option<Instant>,
}

impl Redelivery {
    fn new(backoff: Backoff) -> Self {
        Self {
            backoff,
            delay: backoff.initial,
            due: None,
        }
    }

    fn withheld(&mut self) {
        if self.due.is_none() {
            self.due = Some(Instant::now() + self.delay);
            self.delay = (self.delay * 2).min(self.backoff.max);
        }
    }

    fn handled(&mut self) {
        if self.due.is_none() {
            self.delay = self.backoff.initial;
        }
    }
}

async fn run_partition<H: EventHandler>(
    mut stream: PartitionStreamBox,
    worker: Arc<RecordWorker<H>>,
    backoff: Backoff,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(partition = stream.partition(), "partition task started");
    let mut redelivery = Redelivery::new(backoff);
    loop {
        let due = redelivery.due;
        let record = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            _ = tokio::time::sleep_until(due.unwrap_or_else(Instant::now)), if due.is_some() => {
                redelivery.due = None;
                match stream.rewind().await {
                    Ok(offset) => info!(
                        partition = stream.partition(),
                        offset,
                        "redelivering withheld records"
                    ),
                    Err(err) => {
                        warn!(partition = stream.partition(), error = %err, "rewind failed");
                        redelivery.withheld();
                    }
                }
                continue;
            }
            next = stream.next() => match next {
                Some(record) => record,
                None => break,
            },
        };
        if worker.process(&mut stream, record).await {
            redelivery.handled();
        } else {
            redelivery.withheld();
        }
    }
    debug!(partition = stream.partition(), "partition task finished");
}

impl<H: EventHandler> RecordWorker<H> {
    /// Returns `false` when the record was left uncommitted.
    async fn process(&self, stream: &mut PartitionStreamBox, record: InboundRecord) -> bool {
        debug!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            key = %record.key,
            value = %record.value,
            "Message received"
        );

        let event = match serde_json::from_str::<H::Event>(&record.value) {
            Ok(event) => event,
            Err(err) => {
                warn!(
                    topic = %record.topic,
                    partition = record.partition,
                    offset = record.offset,
                    error = %SagaError::from(err),
                    "skipping malformed record"
                );
                let committed = self.commit(stream, &record).await;
                if committed {
                    self.stats.skipped.fetch_add(1, Ordering::Relaxed);
                }
                return committed;
            }
        };

        let outcome = match tokio::time::timeout(self.timeout, self.handler.handle(event)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(SagaError::Timeout(self.timeout)),
        };

        match outcome {
            Ok(()) => {
                let committed = self.commit(stream, &record).await;
                if committed {
                    self.stats.handled.fetch_add(1, Ordering::Relaxed);
                }
                committed
            }
            Err(err) => {
                self.report(&record, err);
                false
            }
        }
    }

    async fn commit(&self, stream: &mut PartitionStreamBox, record: &InboundRecord) -> bool {
        match stream.commit(record).await {
            Ok(()) => true,
            Err(err) => {
                self.report(record, err);
                false
            }
        }
    }

    fn report(&self, record: &InboundRecord, error: SagaError) {
        error!(
            topic = %record.topic,
            partition = record.partition,
            offset = record.offset,
            kind = ?error.kind(),
            error = %error,
            "Error processing record, offset not committed"
        );
        self.stats.failed.fetch_add(1, Ordering::Relaxed);
        if let Some(failures) = &self.failures {
            // A dropped receiver only means nobody is watching
            let _ = failures.send(RecordFailure {
                topic: record.topic.clone(),
                partition: record.partition,
                offset: record.offset,
                error,
            });
        }
    }
}
