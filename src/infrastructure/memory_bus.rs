//! In-process, partitioned message bus with consumer-group offsets.
//!
//! Each topic is split into a fixed number of append-only partition logs.
//! Consumer groups keep one committed cursor per partition. Acknowledgements
//! may arrive out of order; the cursor only advances across the contiguous
//! prefix of acknowledged offsets, so a withheld record (and everything after
//! it) is delivered again to the next subscription of that group, or to a
//! live stream after [`PartitionStream::rewind`]. Rewinding drops the
//! acknowledgements held past the cursor, since those records are about to be
//! delivered and acknowledged again.

use crate::domain::ports::{InboundRecord, MessageBus, PartitionStream, PartitionStreamBox};
use crate::error::{Result, SagaError};
use async_trait::async_trait;
use std::collections::hash_map::DefaultHasher;
use std::collections::{BTreeSet, HashMap};
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use tokio::sync::{RwLock, watch};
use tracing::debug;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: String,
    value: String,
}

struct PartitionLog {
    records: Vec<StoredRecord>,
    tail: watch::Sender<usize>,
}

impl PartitionLog {
    fn new() -> Self {
        let (tail, _) = watch::channel(0);
        Self {
            records: Vec::new(),
            tail,
        }
    }
}

#[derive(Debug, Default)]
struct GroupCursor {
    next: u64,
    acked: BTreeSet<u64>,
}

impl GroupCursor {
    fn acknowledge(&mut self, offset: u64) {
        if offset < self.next {
            return;
        }
        self.acked.insert(offset);
        while self.acked.remove(&self.next) {
            self.next += 1;
        }
    }

    fn rewind(&mut self) -> u64 {
        self.acked.clear();
        self.next
    }
}

struct TopicLog {
    partitions: Vec<PartitionLog>,
    cursors: HashMap<(String, u32), GroupCursor>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| PartitionLog::new()).collect(),
            cursors: HashMap::new(),
        }
    }
}

#[derive(Default)]
struct BusState {
    topics: HashMap<String, TopicLog>,
    closed: bool,
}

impl BusState {
    fn topic_mut(&mut self, topic: &str, partitions: u32) -> &mut TopicLog {
        self.topics
            .entry(topic.to_string())
            .or_insert_with(|| TopicLog::new(partitions))
    }
}

/// Shared handle to the bus. Clones refer to the same topics.
#[derive(Clone)]
pub struct InMemoryBus {
    state: Arc<RwLock<BusState>>,
    partitions: u32,
}

impl InMemoryBus {
    /// Creates a bus whose topics get `partitions` partitions on first use.
    pub fn new(partitions: u32) -> Self {
        Self {
            state: Arc::new(RwLock::new(BusState::default())),
            partitions: partitions.max(1),
        }
    }

    /// Partition a key routes to.
    pub fn partition_for(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % u64::from(self.partitions)) as u32
    }

    /// Committed cursor of `group` on one partition: the offset the next
    /// subscription will start from.
    pub async fn committed_offset(&self, topic: &str, group: &str, partition: u32) -> u64 {
        let state = self.state.read().await;
        state
            .topics
            .get(topic)
            .and_then(|log| log.cursors.get(&(group.to_string(), partition)))
            .map(|cursor| cursor.next)
            .unwrap_or(0)
    }

    /// Every record published to `topic`, partition by partition.
    pub async fn records(&self, topic: &str) -> Vec<InboundRecord> {
        let state = self.state.read().await;
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        log.partitions
            .iter()
            .enumerate()
            .flat_map(|(partition, plog)| {
                plog.records
                    .iter()
                    .enumerate()
                    .map(move |(offset, stored)| InboundRecord {
                        topic: topic.to_string(),
                        partition: partition as u32,
                        offset: offset as u64,
                        key: stored.key.clone(),
                        value: stored.value.clone(),
                    })
            })
            .collect()
    }

    /// Ends every open stream once it has drained its partition, and rejects
    /// further publishes and subscriptions.
    pub async fn close(&self) {
        let mut state = self.state.write().await;
        state.closed = true;
        for log in state.topics.values() {
            for plog in &log.partitions {
                plog.tail.send_modify(|_| {});
            }
        }
    }
}

#[async_trait]
impl MessageBus for InMemoryBus {
    async fn publish(&self, topic: &str, key: &str, value: &str) -> Result<()> {
        let partition = self.partition_for(key);
        let mut state = self.state.write().await;
        if state.closed {
            return Err(SagaError::Transport("bus is closed".to_string()));
        }
        let log = state.topic_mut(topic, self.partitions);
        let plog = &mut log.partitions[partition as usize];
        plog.records.push(StoredRecord {
            key: key.to_string(),
            value: value.to_string(),
        });
        let len = plog.records.len();
        plog.tail.send_replace(len);
        debug!(topic, partition, offset = len - 1, "record appended");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Vec<PartitionStreamBox>> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(SagaError::Transport("bus is closed".to_string()));
        }
        let log = state.topic_mut(topic, self.partitions);
        let mut streams: Vec<PartitionStreamBox> = Vec::with_capacity(log.partitions.len());
        for (index, plog) in log.partitions.iter().enumerate() {
            let partition = index as u32;
            let position = log
                .cursors
                .get(&(group.to_string(), partition))
                .map(|cursor| cursor.next)
                .unwrap_or(0);
            streams.push(Box::new(MemoryPartitionStream {
                state: Arc::clone(&self.state),
                topic: topic.to_string(),
                group: group.to_string(),
                partition,
                position,
                tail: plog.tail.subscribe(),
            }));
        }
        Ok(streams)
    }
}

struct MemoryPartitionStream {
    state: Arc<RwLock<BusState>>,
    topic: String,
    group: String,
    partition: u32,
    position: u64,
    tail: watch::Receiver<usize>,
}

#[async_trait]
impl PartitionStream for MemoryPartitionStream {
    fn partition(&self) -> u32 {
        self.partition
    }

    async fn next(&mut self) -> Option<InboundRecord> {
        loop {
            {
                let state = self.state.read().await;
                let plog = state
                    .topics
                    .get(&self.topic)?
                    .partitions
                    .get(self.partition as usize)?;
                if let Some(stored) = plog.records.get(self.position as usize) {
                    let record = InboundRecord {
                        topic: self.topic.clone(),
                        partition: self.partition,
                        offset: self.position,
                        key: stored.key.clone(),
                        value: stored.value.clone(),
                    };
                    self.position += 1;
                    return Some(record);
                }
                if state.closed {
                    return None;
                }
            }
            if self.tail.changed().await.is_err() {
                return None;
            }
        }
    }

    async fn commit(&mut self, record: &InboundRecord) -> Result<()> {
        let mut state = self.state.write().await;
        let log = state.topics.get_mut(&self.topic).ok_or_else(|| {
            SagaError::Transport(format!("unknown topic {}", self.topic))
        })?;
        log.cursors
            .entry((self.group.clone(), self.partition))
            .or_default()
            .acknowledge(record.offset);
        Ok(())
    }

    async fn rewind(&mut self) -> Result<u64> {
        let mut state = self.state.write().await;
        if state.closed {
            return Err(SagaError::Transport("bus is closed".to_string()));
        }
        let log = state.topics.get_mut(&self.topic).ok_or_else(|| {
            SagaError::Transport(format!("unknown topic {}", self.topic))
        })?;
        let from = log
            .cursors
            .entry((self.group.clone(), self.partition))
            .or_default()
            .rewind();
        debug!(
            topic = %self.topic,
            partition = self.partition,
            skipped_back = self.position.saturating_sub(from),
            "stream rewound to committed cursor"
        );
        self.position = from;
        Ok(from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_cursor_advances_over_contiguous_prefix() {
        let mut cursor = GroupCursor::default();
        cursor.acknowledge(1);
        assert_eq!(cursor.next, 0);
        cursor.acknowledge(0);
        assert_eq!(cursor.next, 2);
        cursor.acknowledge(0);
        assert_eq!(cursor.next, 2);
        assert!(cursor.acked.is_empty());
    }

    #[tokio::test]
    async fn test_same_key_routes_to_same_partition() {
        let bus = InMemoryBus::new(4);
        bus.publish("t", "k", "a").await.unwrap();
        bus.publish("t", "k", "b").await.unwrap();

        let records = bus.records("t").await;
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].partition, records[1].partition);
        assert_eq!(records[0].offset, 0);
        assert_eq!(records[1].offset, 1);
        assert_eq!(records[0].partition, bus.partition_for("k"));
    }

    #[tokio::test]
    async fn test_stream_waits_for_late_records() {
        let bus = InMemoryBus::new(1);
        let mut streams = bus.subscribe("t", "g").await.unwrap();
        let mut stream = streams.pop().unwrap();

        let publisher = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            publisher.publish("t", "k", "late").await.unwrap();
        });

        let record = tokio::time::timeout(Duration::from_secs(1), stream.next())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.value, "late");
    }

    #[tokio::test]
    async fn test_uncommitted_records_are_redelivered() {
        let bus = InMemoryBus::new(1);
        for value in ["a", "b", "c"] {
            bus.publish("t", "k", value).await.unwrap();
        }

        let mut stream = bus.subscribe("t", "g").await.unwrap().pop().unwrap();
        let a = stream.next().await.unwrap();
        let b = stream.next().await.unwrap();
        let c = stream.next().await.unwrap();
        stream.commit(&a).await.unwrap();
        // b is withheld, c is acknowledged
        stream.commit(&c).await.unwrap();
        drop(b);
        assert_eq!(bus.committed_offset("t", "g", 0).await, 1);

        let mut again = bus.subscribe("t", "g").await.unwrap().pop().unwrap();
        assert_eq!(again.next().await.unwrap().value, "b");
    }

    #[tokio::test]
    async fn test_groups_have_independent_cursors() {
        let bus = InMemoryBus::new(1);
        bus.publish("t", "k", "a").await.unwrap();

        let mut first = bus.subscribe("t", "g1").await.unwrap().pop().unwrap();
        let record = first.next().await.unwrap();
        first.commit(&record).await.unwrap();

        let mut second = bus.subscribe("t", "g2").await.unwrap().pop().unwrap();
        assert_eq!(second.next().await.unwrap().value, "a");
        assert_eq!(bus.committed_offset("t", "g1", 0).await, 1);
        assert_eq!(bus.committed_offset("t", "g2", 0).await, 0);
    }

    #[tokio::test]
    async fn test_close_ends_streams_and_rejects_publish() {
        let bus = InMemoryBus::new(1);
        let mut stream = bus.subscribe("t", "g").await.unwrap().pop().unwrap();

        bus.close().await;
        assert!(stream.next().await.is_none());
        assert!(matches!(
            bus.publish("t", "k", "v").await,
            Err(SagaError::Transport(_))
        ));
    }

    #[tokio::test]
    async fn test_rewind_redelivers_withheld_record_and_drops_pending_acks() {
        let bus = InMemoryBus::new(1);
        for n in 0..1001 {
            bus.publish("t", "k", &n.to_string()).await.unwrap();
        }

        let mut stream = bus.subscribe("t", "g").await.unwrap().pop().unwrap();
        let withheld = stream.next().await.unwrap();
        for _ in 1..1001 {
            let record = stream.next().await.unwrap();
            stream.commit(&record).await.unwrap();
        }
        assert_eq!(bus.committed_offset("t", "g", 0).await, 0);

        assert_eq!(stream.rewind().await.unwrap(), 0);
        {
            let state = bus.state.read().await;
            let cursor = &state.topics["t"].cursors[&("g".to_string(), 0)];
            assert!(cursor.acked.is_empty());
        }

        // Same stream, no resubscription
        let again = stream.next().await.unwrap();
        assert_eq!(again.offset, withheld.offset);
        stream.commit(&again).await.unwrap();
        assert_eq!(bus.committed_offset("t", "g", 0).await, 1);
        assert_eq!(stream.next().await.unwrap().offset, 1);
    }
}
