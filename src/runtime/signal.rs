use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::Notify;

use super::history::HistoryEvent;

/// Pending named signals of one instance.
///
/// A signal is a flag: raising it twice before it is consumed has the same
/// effect as raising it once, and a signal raised before anyone waits for it
/// is kept until the next wait consumes it.
#[derive(Debug, Default)]
pub struct SignalMailbox {
    pending: Mutex<HashSet<String>>,
    notify: Notify,
}

impl SignalMailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild pending flags from history: received signals not yet consumed by a wait.
    pub fn from_history(events: &[HistoryEvent]) -> Self {
        let mut pending = HashSet::new();
        for event in events {
            match event {
                HistoryEvent::SignalReceived { name } => {
                    pending.insert(name.clone());
                }
                HistoryEvent::WaitCompleted {
                    signal,
                    signalled: true,
                    ..
                } => {
                    pending.remove(signal);
                }
                _ => {}
            }
        }
        Self {
            pending: Mutex::new(pending),
            notify: Notify::new(),
        }
    }

    pub fn raise(&self, name: &str) {
        self.pending
            .lock()
            .expect("mailbox lock poisoned")
            .insert(name.to_string());
        // notify_one stores a permit when nobody is waiting yet.
        self.notify.notify_one();
    }

    pub fn is_pending(&self, name: &str) -> bool {
        self.pending
            .lock()
            .expect("mailbox lock poisoned")
            .contains(name)
    }

    fn try_take(&self, name: &str) -> bool {
        self.pending
            .lock()
            .expect("mailbox lock poisoned")
            .remove(name)
    }

    /// Resolve once `name` is pending, clearing the flag.
    pub async fn take(&self, name: &str) {
        loop {
            if self.try_take(name) {
                return;
            }
            self.notify.notified().await;
        }
    }
}
