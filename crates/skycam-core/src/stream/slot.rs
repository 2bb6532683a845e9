// Capacity-1 latest-wins handoff between the polling and delivery tasks.

use std::sync::{Mutex, PoisonError};

use tokio::sync::Notify;

pub(crate) struct LatestSlot<T> {
    value: Mutex<Option<T>>,
    notify: Notify,
}

impl<T> LatestSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            value: Mutex::new(None),
            notify: Notify::new(),
        }
    }

    /// Store `value`, replacing any unconsumed one. Returns `true` when a
    /// value was replaced (dropped).
    pub(crate) fn put(&self, value: T) -> bool {
        let replaced = self
            .value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(value)
            .is_some();
        self.notify.notify_one();
        replaced
    }

    /// Wait for and take the current value.
    pub(crate) async fn take(&self) -> T {
        loop {
            if let Some(value) = self.try_take() {
                return value;
            }
            self.notify.notified().await;
        }
    }

    pub(crate) fn try_take(&self) -> Option<T> {
        self.value
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn newer_value_replaces_unconsumed_one() {
        let slot = LatestSlot::new();
        assert!(!slot.put(1));
        assert!(slot.put(2));
        assert_eq!(slot.try_take(), Some(2));
        assert_eq!(slot.try_take(), None);
    }

    #[tokio::test]
    async fn take_waits_for_put() {
        let slot = Arc::new(LatestSlot::new());
        let producer = Arc::clone(&slot);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.put("frame");
        });
        let value = tokio::time::timeout(Duration::from_secs(2), slot.take())
            .await
            .unwrap();
        assert_eq!(value, "frame");
    }
}
