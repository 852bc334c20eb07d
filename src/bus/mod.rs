pub mod memory;

use async_trait::async_trait;

use crate::common::error::Result;

/// One message on a topic. The key determines partition placement and
/// is the unit of ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub key: String,
    pub payload: Vec<u8>,
}

/// Writes messages onto a single topic. Delivery is at-least-once;
/// messages with equal keys land on the same partition in emit order.
#[async_trait]
pub trait Emitter: Send + Sync {
    async fn emit(&self, key: &str, payload: Vec<u8>) -> Result<()>;
}

/// An ordered stream over one partition of a topic. `next` waits until
/// a message is available; within a partition, messages are delivered
/// strictly in write order.
#[async_trait]
pub trait PartitionStream: Send {
    async fn next(&mut self) -> Result<Message>;
}

/// A keyed projection over a topic, rebuilt by replaying every
/// partition in write order. Eventually consistent: callers must
/// tolerate brief false negatives.
#[async_trait]
pub trait KeyedView: Send + Sync {
    async fn has(&self, key: &str) -> Result<bool>;
}

/// Stable key-to-partition assignment.
pub(crate) fn partition_for(key: &str, partitions: usize) -> usize {
    let hash = key
        .bytes()
        .fold(0u64, |h, b| h.wrapping_mul(31).wrapping_add(u64::from(b)));
    (hash % partitions as u64) as usize
}
