use serde_json::Value;
use tokio::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// One endpoint of a dedicated two-way message pipe.
///
/// Endpoints are created in connected pairs; whatever one endpoint posts,
/// the other receives in order. An endpoint can be transferred to a worker
/// process alongside a message, which is how dedicated channels are
/// established beyond the generic message stream.
#[derive(Debug)]
pub struct MessagePort {
    tx: UnboundedSender<Value>,
    rx: Mutex<UnboundedReceiver<Value>>,
}

/// Factory for connected [`MessagePort`] pairs.
pub struct MessageChannel;

impl MessageChannel {
    pub fn pair() -> (MessagePort, MessagePort) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MessagePort {
                tx: a_tx,
                rx: Mutex::new(b_rx),
            },
            MessagePort {
                tx: b_tx,
                rx: Mutex::new(a_rx),
            },
        )
    }
}

impl MessagePort {
    /// Posts a message to the peer endpoint. Returns false when the peer
    /// was dropped.
    pub fn post(&self, message: Value) -> bool {
        self.tx.send(message).is_ok()
    }

    /// Receives the next message from the peer, or `None` once the peer was
    /// dropped and the queue is drained.
    pub async fn recv(&self) -> Option<Value> {
        self.rx.lock().await.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&self) -> Option<Value> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_pair_is_bidirectional_and_ordered() {
        let (a, b) = MessageChannel::pair();
        assert!(a.post(json!(1)));
        assert!(a.post(json!(2)));
        assert!(b.post(json!("back")));

        assert_eq!(b.recv().await, Some(json!(1)));
        assert_eq!(b.recv().await, Some(json!(2)));
        assert_eq!(a.recv().await, Some(json!("back")));
    }

    #[tokio::test]
    async fn test_dropped_peer_ends_the_stream() {
        let (a, b) = MessageChannel::pair();
        a.post(json!("last"));
        drop(a);
        assert_eq!(b.recv().await, Some(json!("last")));
        assert_eq!(b.recv().await, None);
        assert!(!b.post(json!("into the void")));
    }

    #[tokio::test]
    async fn test_try_recv_does_not_block() {
        let (a, b) = MessageChannel::pair();
        assert_eq!(b.try_recv(), None);
        a.post(json!(5));
        assert_eq!(b.try_recv(), Some(json!(5)));
    }
}
