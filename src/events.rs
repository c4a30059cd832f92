use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Fan-out of typed events, one unbounded queue per subscriber.
///
/// Every subscriber sees every event published after it subscribed, in
/// publish order. Nothing is dropped for a slow reader; its queue grows
/// instead. Subscribers that hang up are pruned on the next publish.
pub struct EventBus<T> {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<T>>>,
}

impl<T: Clone> EventBus<T> {
    pub fn new() -> Self {
        Self { subscribers: Mutex::new(Vec::new()) }
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    /// The lock is held across the fan-out so concurrent publishers are seen
    /// in the same order by every subscriber.
    pub fn publish(&self, event: T) {
        self.subscribers.lock().retain(|s| s.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

impl<T: Clone> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}
