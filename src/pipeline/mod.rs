pub mod consume;
pub mod feed;
pub mod fetch;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::bus::{Message, PartitionStream};
use crate::common::error::{IngestError, Result};

/// Sleeps for `duration`, returning false immediately if shutdown is
/// requested first.
pub(crate) async fn interruptible_sleep(duration: Duration, shutdown: &CancellationToken) -> bool {
    if duration.is_zero() {
        return !shutdown.is_cancelled();
    }
    tokio::select! {
        _ = shutdown.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Per-message processing logic of a consuming stage.
///
/// An `Err` is stage-fatal and escalates; recoverable conditions are
/// logged and swallowed by the handler itself.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    async fn handle(&self, message: Message, shutdown: &CancellationToken) -> Result<()>;
}

/// Drives one consuming stage: every partition gets its own worker so
/// partitions progress independently, while messages within a
/// partition are handled strictly in order. The first handler error
/// cancels the token and is returned once all workers have stopped.
pub async fn run_stage(
    handler: Arc<dyn MessageHandler>,
    streams: Vec<Box<dyn PartitionStream>>,
    shutdown: CancellationToken,
) -> Result<()> {
    let mut workers = JoinSet::new();
    for mut stream in streams {
        let handler = handler.clone();
        let shutdown = shutdown.clone();
        workers.spawn(async move {
            loop {
                let message = tokio::select! {
                    _ = shutdown.cancelled() => return Ok(()),
                    message = stream.next() => message?,
                };
                handler.handle(message, &shutdown).await?;
            }
        });
    }

    let mut result = Ok(());
    while let Some(joined) = workers.join_next().await {
        let worker_result = match joined {
            Ok(r) => r,
            Err(e) => Err(IngestError::Bus(format!("stage worker panicked: {e}"))),
        };
        if let Err(e) = worker_result {
            shutdown.cancel();
            if result.is_ok() {
                result = Err(e);
            }
        }
    }
    result
}
