// ── Write queue ──
//
// FIFO, single-consumer, unbounded. Producers are the writers; the
// consumer is the connector's dispatch task. Backpressure is the
// consumer's business, so `append` never blocks.

use tokio::sync::mpsc;

use super::WriteCommand;
use crate::error::CoreError;

/// Create a connected queue producer/consumer pair.
pub fn write_queue() -> (WriteQueue, WriteQueueReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (WriteQueue { tx }, WriteQueueReceiver { rx })
}

/// Producer side. Cheaply cloneable.
#[derive(Debug, Clone)]
pub struct WriteQueue {
    tx: mpsc::UnboundedSender<WriteCommand>,
}

impl WriteQueue {
    /// Append a command. Fails only when the consumer is gone.
    pub fn append(&self, command: WriteCommand) -> Result<(), CoreError> {
        self.tx.send(command).map_err(|_| CoreError::QueueClosed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Consumer side.
#[derive(Debug)]
pub struct WriteQueueReceiver {
    rx: mpsc::UnboundedReceiver<WriteCommand>,
}

impl WriteQueueReceiver {
    /// Wait for the next command. `None` once every producer is dropped
    /// and the queue is drained.
    pub async fn next(&mut self) -> Option<WriteCommand> {
        self.rx.recv().await
    }

    /// Take the next command if one is ready.
    pub fn try_next(&mut self) -> Option<WriteCommand> {
        self.rx.try_recv().ok()
    }

    /// Take every command that is ready, in FIFO order.
    pub fn drain(&mut self) -> Vec<WriteCommand> {
        std::iter::from_fn(|| self.try_next()).collect()
    }
}
