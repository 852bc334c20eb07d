use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::{partition_for, Emitter, KeyedView, Message, PartitionStream};
use crate::common::error::Result;

/// In-process message bus: named topics with a fixed partition count,
/// each partition an append-only log. Used by tests and single-process
/// runs; a broker-backed bus would implement the same traits.
pub struct MemoryBus {
    partitions: usize,
    topics: Mutex<HashMap<String, Arc<MemoryTopic>>>,
}

impl MemoryBus {
    pub fn new(partitions: usize) -> Arc<MemoryBus> {
        Arc::new(MemoryBus {
            partitions: partitions.max(1),
            topics: Mutex::new(HashMap::new()),
        })
    }

    /// Gets or creates the named topic.
    pub fn topic(&self, name: &str) -> Arc<MemoryTopic> {
        let mut topics = self.topics.lock().unwrap();
        topics
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryTopic::new(self.partitions)))
            .clone()
    }

    /// An emitter bound to the named topic.
    pub fn emitter(&self, name: &str) -> Arc<dyn Emitter> {
        Arc::new(TopicEmitter {
            topic: self.topic(name),
        })
    }

    /// One ordered stream per partition of the named topic, starting
    /// from the beginning of the log.
    pub fn subscribe(&self, name: &str) -> Vec<Box<dyn PartitionStream>> {
        self.topic(name)
            .partitions
            .iter()
            .map(|partition| {
                Box::new(MemoryPartitionStream {
                    partition: partition.clone(),
                    offset: 0,
                }) as Box<dyn PartitionStream>
            })
            .collect()
    }

    /// A keyed view over the named topic, rebuilt by replay.
    pub fn view(&self, name: &str) -> Arc<MaterializedView> {
        Arc::new(MaterializedView::new(self.topic(name)))
    }
}

pub struct MemoryTopic {
    partitions: Vec<Arc<Partition>>,
}

impl MemoryTopic {
    fn new(partitions: usize) -> MemoryTopic {
        MemoryTopic {
            partitions: (0..partitions).map(|_| Arc::new(Partition::new())).collect(),
        }
    }

    fn publish(&self, message: Message) {
        let partition = &self.partitions[partition_for(&message.key, self.partitions.len())];
        partition.log.lock().unwrap().push(message);
        partition.available.notify_waiters();
    }

    /// Total messages written across all partitions.
    pub fn len(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.log.lock().unwrap().len())
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

struct Partition {
    log: Mutex<Vec<Message>>,
    available: Notify,
}

impl Partition {
    fn new() -> Partition {
        Partition {
            log: Mutex::new(Vec::new()),
            available: Notify::new(),
        }
    }

    fn get(&self, offset: usize) -> Option<Message> {
        self.log.lock().unwrap().get(offset).cloned()
    }
}

struct TopicEmitter {
    topic: Arc<MemoryTopic>,
}

#[async_trait]
impl Emitter for TopicEmitter {
    async fn emit(&self, key: &str, payload: Vec<u8>) -> Result<()> {
        self.topic.publish(Message {
            key: key.to_string(),
            payload,
        });
        Ok(())
    }
}

struct MemoryPartitionStream {
    partition: Arc<Partition>,
    offset: usize,
}

#[async_trait]
impl PartitionStream for MemoryPartitionStream {
    async fn next(&mut self) -> Result<Message> {
        loop {
            // Register for the wakeup before checking the log, so a
            // publish between the check and the await is not missed.
            let available = self.partition.available.notified();
            tokio::pin!(available);
            available.as_mut().enable();
            if let Some(message) = self.partition.get(self.offset) {
                self.offset += 1;
                return Ok(message);
            }
            available.await;
        }
    }
}

/// Presence-only keyed projection over a topic. Replays each partition
/// in write order on demand; contents are the set union of the
/// partition logs, so cross-partition replay order never changes the
/// result. Append-only, no eviction.
pub struct MaterializedView {
    topic: Arc<MemoryTopic>,
    state: Mutex<ViewState>,
}

struct ViewState {
    keys: HashSet<String>,
    offsets: Vec<usize>,
}

impl MaterializedView {
    fn new(topic: Arc<MemoryTopic>) -> MaterializedView {
        let offsets = vec![0; topic.partitions.len()];
        MaterializedView {
            topic,
            state: Mutex::new(ViewState {
                keys: HashSet::new(),
                offsets,
            }),
        }
    }

    fn catch_up(&self, state: &mut ViewState) {
        let ViewState { keys, offsets } = state;
        for (i, partition) in self.topic.partitions.iter().enumerate() {
            let log = partition.log.lock().unwrap();
            while offsets[i] < log.len() {
                keys.insert(log[offsets[i]].key.clone());
                offsets[i] += 1;
            }
        }
    }
}

#[async_trait]
impl KeyedView for MaterializedView {
    async fn has(&self, key: &str) -> Result<bool> {
        let mut state = self.state.lock().unwrap();
        self.catch_up(&mut state);
        Ok(state.keys.contains(key))
    }
}
