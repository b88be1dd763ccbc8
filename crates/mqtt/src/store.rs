use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use awg_core::{ApplicationState, FieldUpdate};
use chrono::{DateTime, Utc};
use tokio::sync::watch;

/// Holds the current `ApplicationState` snapshot and hands out watchers.
///
/// Inbound messages and optimistic command updates both land here, one
/// replacement at a time, in call order. Once closed (session teardown) every
/// further write is ignored.
#[derive(Clone)]
pub struct StateStore {
    tx: Arc<watch::Sender<ApplicationState>>,
    closed: Arc<AtomicBool>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ApplicationState::default());
        Self { tx: Arc::new(tx), closed: Arc::new(AtomicBool::new(false)) }
    }

    pub fn snapshot(&self) -> ApplicationState {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<ApplicationState> {
        self.tx.subscribe()
    }

    pub fn apply(&self, update: FieldUpdate, at: DateTime<Utc>) -> bool {
        self.update(|state| state.apply(update, at))
    }

    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&ApplicationState) -> ApplicationState,
    {
        if self.is_closed() {
            return false;
        }
        self.tx.send_modify(|state| *state = f(state));
        true
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use awg_core::{Relay, SensorKey};

    #[test]
    fn watchers_see_each_replacement() {
        let store = StateStore::new();
        let mut rx = store.subscribe();
        assert!(store.apply(FieldUpdate::Sensor(SensorKey::Energy, 3.2), Utc::now()));
        assert!(rx.has_changed().unwrap());
        assert_eq!(rx.borrow_and_update().sensors.energy, Some(3.2));
    }

    #[test]
    fn closed_store_rejects_writes() {
        let store = StateStore::new();
        store.close();
        assert!(!store.apply(FieldUpdate::Relay(Relay::Condenser, true), Utc::now()));
        assert!(!store.update(|s| s.with_drain_mode(true)));
        assert_eq!(store.snapshot(), ApplicationState::default());
    }
}
