use std::rc::Rc;
use log::{debug, info, warn};
use crate::config::{SettingsStore, schema};
use crate::error::RegistryError;
use crate::model::{EntryKind, PinnedEntry, normalize};
use crate::notifier::{Change, ChangeNotifier, Listener, RegistryEvent, SubscriptionId};
use crate::sources::AppResolver;

/// The ordered, deduplicated set of pinned entries, together with the
/// "launch at login" subset and the custom links.
///
/// Every mutation is written back to the settings store and then published,
/// in that order, to the subscribed listeners.
pub struct PinnedRegistry<S: SettingsStore> {
    store: S,
    resolver: Rc<dyn AppResolver>,
    notifier: ChangeNotifier,
    entries: Vec<PinnedEntry>,
    startup: Vec<String>,
    custom_links: Vec<String>,
    capacity: usize,
    sort_alphabetically: bool,
}

impl<S: SettingsStore> PinnedRegistry<S> {
    /// Seeds the registry from `store`. Duplicates collapse onto their first
    /// occurrence, entries beyond the capacity are dropped and the trimmed
    /// list written back, and startup-set orphans are pruned.
    pub fn load(store: S, resolver: Rc<dyn AppResolver>) -> Self {
        let capacity = usize::try_from(store.get_int(schema::MAX_APPS))
            .ok()
            .filter(|&c| c > 0)
            .unwrap_or(schema::default_max_apps() as usize);

        let mut entries: Vec<PinnedEntry> = Vec::new();
        for raw in store.get_strv(schema::PINNED_APPS) {
            let entry = normalize(&raw);
            if entry.identifier.is_empty() || entries.contains(&entry) {
                continue;
            }
            entries.push(entry);
        }
        let truncated = entries.len() > capacity;
        if truncated {
            warn!("Registry: {} pinned entries exceed capacity {}, keeping the first {}", entries.len(), capacity, capacity);
            entries.truncate(capacity);
        }

        let mut startup: Vec<String> = Vec::new();
        for raw in store.get_strv(schema::STARTUP_APPS) {
            let key = normalize(&raw).key();
            if !startup.contains(&key) {
                startup.push(key);
            }
        }

        let mut custom_links: Vec<String> = Vec::new();
        for raw in store.get_strv(schema::CUSTOM_LINKS) {
            let url = raw.trim().to_string();
            if !url.is_empty() && !custom_links.contains(&url) {
                custom_links.push(url);
            }
        }

        let sort_alphabetically = store.get_bool(schema::SORT_ALPHABETICALLY);
        let mut registry = Self {
            store,
            resolver,
            notifier: ChangeNotifier::new(),
            entries,
            startup,
            custom_links,
            capacity,
            sort_alphabetically,
        };

        // pinned-apps and startup-apps must agree before orphans are pruned
        if truncated {
            registry.persist_entries();
        }
        registry.cleanup_orphans();
        if registry.sort_alphabetically && registry.apply_sort() {
            registry.persist_entries();
        }
        info!("Registry: loaded {} pinned entries", registry.entries.len());
        registry
    }

    pub fn entries(&self) -> &[PinnedEntry] {
        &self.entries
    }

    pub fn startup(&self) -> &[String] {
        &self.startup
    }

    pub fn custom_links(&self) -> &[String] {
        &self.custom_links
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn resolver(&self) -> &Rc<dyn AppResolver> {
        &self.resolver
    }

    /// Entry at 1-based `position`.
    pub fn entry_at(&self, position: usize) -> Option<&PinnedEntry> {
        position.checked_sub(1).and_then(|i| self.entries.get(i))
    }

    pub fn is_pinned(&self, identifier: &str) -> bool {
        let entry = normalize(identifier);
        self.entries.contains(&entry)
    }

    pub fn is_launch_at_login(&self, identifier: &str) -> bool {
        self.startup.contains(&normalize(identifier).key())
    }

    pub fn subscribe(&mut self, listener: Listener) -> SubscriptionId {
        self.notifier.subscribe(listener)
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        self.notifier.unsubscribe(id)
    }

    pub fn dispose_subscriptions(&mut self) -> usize {
        self.notifier.dispose_all()
    }

    /// Appends `entry` unless it is already pinned. Fails only when full.
    pub fn pin(&mut self, entry: PinnedEntry) -> Result<(), RegistryError> {
        let entry = normalize(&entry.key());
        if entry.identifier.is_empty() {
            debug!("Registry: ignoring empty identifier");
            return Ok(());
        }
        if self.entries.contains(&entry) {
            debug!("Registry: '{}' already pinned", entry.key());
            return Ok(());
        }
        if self.entries.len() >= self.capacity {
            return Err(RegistryError::CapacityExceeded { capacity: self.capacity });
        }

        info!("Registry: pinning '{}'", entry.key());
        self.entries.push(entry.clone());
        let sorted = self.sort_alphabetically && self.apply_sort();
        self.persist_entries();
        self.publish(RegistryEvent::Pinned(entry));
        if sorted {
            self.publish(RegistryEvent::Sorted);
        }
        Ok(())
    }

    /// Pins a web link and records it in the custom-links set.
    pub fn add_link(&mut self, url: &str) -> Result<(), RegistryError> {
        let entry = match normalize(url) {
            e if e.kind == EntryKind::Link => e,
            _ => PinnedEntry::link(url.trim()),
        };
        self.pin(entry.clone())?;
        if !self.custom_links.contains(&entry.identifier) {
            self.custom_links.push(entry.identifier);
            self.persist_links();
        }
        Ok(())
    }

    /// Removes the entry and every reference to it. Returns whether anything
    /// changed; an unknown identifier is not an error.
    pub fn unpin(&mut self, identifier: &str) -> bool {
        let entry = normalize(identifier);
        let key = entry.key();

        let position = self.entries.iter().position(|e| *e == entry);
        if let Some(index) = position {
            self.entries.remove(index);
            self.persist_entries();
        }

        let startup_before = self.startup.len();
        self.startup.retain(|k| *k != key);
        let startup_changed = self.startup.len() != startup_before;
        if startup_changed {
            self.persist_startup();
        }

        let mut links_changed = false;
        if entry.is_link() {
            let before = self.custom_links.len();
            self.custom_links.retain(|u| *u != entry.identifier);
            links_changed = self.custom_links.len() != before;
            if links_changed {
                self.persist_links();
            }
        }

        let changed = position.is_some() || startup_changed || links_changed;
        if changed {
            info!("Registry: unpinned '{}'", key);
            self.publish(RegistryEvent::Unpinned(entry));
        }
        changed
    }

    /// Relocates the entry to the tail. No write and no event when the entry
    /// is absent, already last, or the active sort puts it back.
    pub fn move_to_end(&mut self, identifier: &str) -> bool {
        let entry = normalize(identifier);
        let Some(index) = self.entries.iter().position(|e| *e == entry) else {
            return false;
        };
        if index + 1 == self.entries.len() {
            return false;
        }

        let before = self.entries.clone();
        let moved = self.entries.remove(index);
        self.entries.push(moved);
        if self.sort_alphabetically {
            self.apply_sort();
        }
        if self.entries == before {
            return false;
        }

        self.persist_entries();
        self.publish(RegistryEvent::MovedToEnd(entry));
        true
    }

    /// Sorts by case-insensitive display name. Writes and publishes only when
    /// the order actually changed.
    pub fn sort_alphabetically(&mut self) -> bool {
        if !self.apply_sort() {
            return false;
        }
        self.persist_entries();
        self.publish(RegistryEvent::Sorted);
        true
    }

    pub fn set_sort_enabled(&mut self, enabled: bool) {
        if self.sort_alphabetically != enabled {
            self.sort_alphabetically = enabled;
            if let Err(e) = self.store.set_bool(schema::SORT_ALPHABETICALLY, enabled) {
                warn!("Registry: failed to persist {}: {}", schema::SORT_ALPHABETICALLY, e);
            }
        }
        if enabled {
            self.sort_alphabetically();
        }
    }

    /// Changes the capacity. Shrinking below the current entry count fails.
    pub fn set_capacity(&mut self, capacity: usize) -> Result<(), RegistryError> {
        if capacity == 0 || capacity < self.entries.len() {
            return Err(RegistryError::CapacityExceeded { capacity: self.entries.len() });
        }
        self.capacity = capacity;
        if let Err(e) = self.store.set_int(schema::MAX_APPS, capacity as i64) {
            warn!("Registry: failed to persist {}: {}", schema::MAX_APPS, e);
        }
        Ok(())
    }

    /// Marks or unmarks an entry for launch at login. The identifier has to
    /// be pinned or be a custom link.
    pub fn set_launch_at_login(&mut self, identifier: &str, enabled: bool) -> Result<(), RegistryError> {
        let entry = normalize(identifier);
        let key = entry.key();
        if !self.has_source(&key) {
            return Err(RegistryError::NotFound(key));
        }

        let present = self.startup.contains(&key);
        if present == enabled {
            return Ok(());
        }
        if enabled {
            self.startup.push(key);
        } else {
            self.startup.retain(|k| *k != key);
        }
        self.persist_startup();
        self.publish(RegistryEvent::StartupChanged { entry, enabled });
        Ok(())
    }

    /// Drops startup-set members whose pin or custom link no longer exists.
    /// Returns the removed keys.
    pub fn cleanup_orphans(&mut self) -> Vec<String> {
        let (kept, orphans): (Vec<String>, Vec<String>) = std::mem::take(&mut self.startup)
            .into_iter()
            .partition(|key| self.has_source(key));
        self.startup = kept;

        if !orphans.is_empty() {
            info!("Registry: removed {} orphaned startup entries", orphans.len());
            self.persist_startup();
            self.publish(RegistryEvent::OrphansRemoved(orphans.clone()));
        }
        orphans
    }

    /// Publishes the current state to every listener.
    pub fn refresh(&mut self) {
        self.publish(RegistryEvent::Loaded);
    }

    pub fn display_name(&self, entry: &PinnedEntry) -> String {
        match entry.kind {
            EntryKind::Application => self
                .resolver
                .resolve(&entry.identifier)
                .map(|app| app.name)
                .unwrap_or_else(|| entry.identifier.clone()),
            EntryKind::Link => entry.identifier.clone(),
        }
    }

    fn has_source(&self, key: &str) -> bool {
        let entry = normalize(key);
        self.entries.contains(&entry) || (entry.is_link() && self.custom_links.contains(&entry.identifier))
    }

    /// Sorts in memory; returns whether the order changed.
    fn apply_sort(&mut self) -> bool {
        let mut sorted: Vec<(String, PinnedEntry)> = self
            .entries
            .iter()
            .map(|e| (self.display_name(e).to_lowercase(), e.clone()))
            .collect();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        let sorted: Vec<PinnedEntry> = sorted.into_iter().map(|(_, e)| e).collect();

        if sorted == self.entries {
            return false;
        }
        self.entries = sorted;
        true
    }

    fn publish(&mut self, event: RegistryEvent) {
        self.notifier.publish(&Change {
            event: &event,
            entries: &self.entries,
            startup: &self.startup,
            custom_links: &self.custom_links,
        });
    }

    fn persist_entries(&mut self) {
        let keys: Vec<String> = self.entries.iter().map(PinnedEntry::key).collect();
        if let Err(e) = self.store.set_strv(schema::PINNED_APPS, &keys) {
            warn!("Registry: failed to persist {}: {}", schema::PINNED_APPS, e);
        }
    }

    fn persist_startup(&mut self) {
        if let Err(e) = self.store.set_strv(schema::STARTUP_APPS, &self.startup) {
            warn!("Registry: failed to persist {}: {}", schema::STARTUP_APPS, e);
        }
    }

    fn persist_links(&mut self) {
        if let Err(e) = self.store.set_strv(schema::CUSTOM_LINKS, &self.custom_links) {
            warn!("Registry: failed to persist {}: {}", schema::CUSTOM_LINKS, e);
        }
    }
}
