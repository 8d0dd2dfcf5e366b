use crate::model::PinnedEntry;
use log::warn;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    Loaded,
    Pinned(PinnedEntry),
    Unpinned(PinnedEntry),
    MovedToEnd(PinnedEntry),
    Sorted,
    StartupChanged { entry: PinnedEntry, enabled: bool },
    OrphansRemoved(Vec<String>),
}

/// What every listener receives: the event plus the registry state after it.
#[derive(Debug, Clone, Copy)]
pub struct Change<'a> {
    pub event: &'a RegistryEvent,
    pub entries: &'a [PinnedEntry],
    /// Persisted keys of the entries marked "launch at login".
    pub startup: &'a [String],
    pub custom_links: &'a [String],
}

pub type Listener = Box<dyn FnMut(&Change<'_>) -> anyhow::Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

/// Synchronous fan-out of registry changes. Listeners run in subscription
/// order; a listener returning an error is logged and skipped over.
#[derive(Default)]
pub struct ChangeNotifier {
    listeners: Vec<(SubscriptionId, Listener)>,
    next_id: u64,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.listeners.push((id, listener));
        id
    }

    /// Returns false if the subscription was already disposed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.listeners.len();
        self.listeners.retain(|(sid, _)| *sid != id);
        self.listeners.len() != before
    }

    /// Drops every listener. Safe to call repeatedly.
    pub fn dispose_all(&mut self) -> usize {
        let count = self.listeners.len();
        self.listeners.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn publish(&mut self, change: &Change<'_>) {
        for (id, listener) in self.listeners.iter_mut() {
            if let Err(e) = listener(change) {
                warn!("Listener {:?} failed on {:?}: {:#}", id, change.event, e);
            }
        }
    }
}
