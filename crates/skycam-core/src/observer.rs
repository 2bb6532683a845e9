// ── Consumer callbacks ──
//
// Observers are stored in a copy-on-write list so the streaming tasks can
// fan out without taking a lock; subscribe/unsubscribe swap in a new list.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use arc_swap::ArcSwap;

use crate::error::CoreError;
use crate::model::{CameraState, FrameImage};

/// Receives frames, per-cycle errors and state changes.
///
/// Callbacks run on the controller's worker tasks (or the caller's task for
/// state changes) and must not block; hand heavy work off to a channel.
pub trait CameraObserver: Send + Sync {
    fn on_frame(&self, frame: Arc<FrameImage>) {
        let _ = frame;
    }

    fn on_error(&self, error: &CoreError) {
        let _ = error;
    }

    fn on_state_changed(&self, state: CameraState) {
        let _ = state;
    }
}

/// Handle returned by `subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Entry = (SubscriptionId, Arc<dyn CameraObserver>);

#[derive(Default)]
pub(crate) struct ObserverSet {
    entries: ArcSwap<Vec<Entry>>,
    next_id: AtomicU64,
}

impl ObserverSet {
    pub(crate) fn subscribe(&self, observer: Arc<dyn CameraObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.entries.rcu(|current| {
            let mut next = Vec::clone(current);
            next.push((id, Arc::clone(&observer)));
            next
        });
        id
    }

    /// Returns whether `id` was registered.
    pub(crate) fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let previous = self.entries.rcu(|current| {
            current
                .iter()
                .filter(|(entry_id, _)| *entry_id != id)
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|(entry_id, _)| *entry_id == id)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.load().len()
    }

    pub(crate) fn frame(&self, frame: &Arc<FrameImage>) {
        for (_, observer) in self.entries.load().iter() {
            observer.on_frame(Arc::clone(frame));
        }
    }

    pub(crate) fn error(&self, error: &CoreError) {
        for (_, observer) in self.entries.load().iter() {
            observer.on_error(error);
        }
    }

    pub(crate) fn state_changed(&self, state: CameraState) {
        for (_, observer) in self.entries.load().iter() {
            observer.on_state_changed(state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<CameraState>>);

    impl CameraObserver for Recorder {
        fn on_state_changed(&self, state: CameraState) {
            self.0.lock().unwrap().push(state);
        }
    }

    #[test]
    fn subscribe_and_unsubscribe() {
        let set = ObserverSet::default();
        let a = Arc::new(Recorder::default());
        let b = Arc::new(Recorder::default());
        let id_a = set.subscribe(a.clone());
        let id_b = set.subscribe(b.clone());
        assert_ne!(id_a, id_b);
        assert_eq!(set.len(), 2);

        set.state_changed(CameraState::Connecting);
        assert!(set.unsubscribe(id_a));
        assert!(!set.unsubscribe(id_a));
        set.state_changed(CameraState::Connected);

        assert_eq!(*a.0.lock().unwrap(), vec![CameraState::Connecting]);
        assert_eq!(
            *b.0.lock().unwrap(),
            vec![CameraState::Connecting, CameraState::Connected]
        );
    }
}
