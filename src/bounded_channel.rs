// SPDX-License-Identifier: Apache-2.0

//! Bounded multi-producer channel used for work queues inside the agent.
//!
//! Sending waits for capacity, so a slow consumer pushes back on producers
//! instead of growing the queue.

use flume::{Receiver, Sender, TrySendError as FlumeTrySendError};
use std::fmt;

pub struct BoundedSender<T> {
    tx: Sender<T>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum SendError {
    Disconnected,
}

#[derive(Debug, PartialEq, Eq)]
pub enum TrySendError {
    Full,
    Disconnected,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl fmt::Display for TrySendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full => write!(f, "channel full"),
            TrySendError::Disconnected => write!(f, "channel disconnected"),
        }
    }
}

impl std::error::Error for SendError {}
impl std::error::Error for TrySendError {}

impl<T> BoundedSender<T> {
    /// Wait for capacity, then enqueue `item`.
    pub async fn send(&self, item: T) -> Result<(), SendError> {
        self.tx
            .send_async(item)
            .await
            .map_err(|_| SendError::Disconnected)
    }

    /// Enqueue without waiting.
    pub fn try_send(&self, item: T) -> Result<(), TrySendError> {
        self.tx.try_send(item).map_err(|e| match e {
            FlumeTrySendError::Full(_) => TrySendError::Full,
            FlumeTrySendError::Disconnected(_) => TrySendError::Disconnected,
        })
    }

    pub fn len(&self) -> usize {
        self.tx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tx.is_empty()
    }
}

impl<T> Clone for BoundedSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

pub struct BoundedReceiver<T> {
    rx: Receiver<T>,
}

impl<T> BoundedReceiver<T> {
    /// Next item, or `None` once every sender is gone and the queue is drained.
    pub async fn next(&mut self) -> Option<T> {
        self.rx.recv_async().await.ok()
    }

    pub fn try_recv(&self) -> Option<T> {
        self.rx.try_recv().ok()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

pub fn bounded<T>(size: usize) -> (BoundedSender<T>, BoundedReceiver<T>) {
    let (tx, rx) = flume::bounded::<T>(size);
    (BoundedSender { tx }, BoundedReceiver { rx })
}

#[cfg(test)]
mod tests {
    use super::{SendError, TrySendError, bounded};
    use tokio_test::{assert_ok, assert_pending, assert_ready, task::spawn};

    #[tokio::test]
    async fn full_queue_applies_backpressure() {
        let (tx, mut rx) = bounded(1);

        assert_ok!(tx.send("first").await);
        assert_eq!(Err(TrySendError::Full), tx.try_send("dropped"));

        let mut blocked = spawn(async { tx.send("second").await });
        assert_pending!(blocked.poll());

        assert_eq!(Some("first"), rx.next().await);
        assert!(blocked.is_woken());
        assert_ok!(assert_ready!(blocked.poll()));
        drop(blocked);

        assert_eq!(Some("second"), rx.try_recv());
        assert!(rx.is_empty());
    }

    #[tokio::test]
    async fn closed_channel() {
        let (tx, rx) = bounded::<u32>(4);
        drop(rx);
        assert_eq!(Err(SendError::Disconnected), tx.send(1).await);
        assert_eq!(Err(TrySendError::Disconnected), tx.try_send(1));

        let (tx, mut rx) = bounded::<u32>(4);
        tx.try_send(7).unwrap();
        drop(tx);
        assert_eq!(Some(7), rx.next().await);
        assert_eq!(None, rx.next().await);
    }
}
