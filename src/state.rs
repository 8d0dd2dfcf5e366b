use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;
use calloop::LoopHandle;
use log::{info, warn};
use crate::autostart::{self, AutostartDir, AutostartWorker};
use crate::config::{PanelSettings, SettingsStore, schema};
use crate::error::{AcceleratorError, RegistryError};
use crate::executor;
use crate::longpress::{LongPress, LongPressTarget};
use crate::matcher::FuzzyMatcher;
use crate::model::{AppDescriptor, PinnedEntry, normalize};
use crate::notifier::SubscriptionId;
use crate::registry::PinnedRegistry;
use crate::running::RunningProcesses;
use crate::shortcuts::{self, KeyGrabber, ShortcutTable};
use crate::view::{MenuView, PanelView};

/// Where autostart reconciliations run.
pub enum AutostartSink {
    /// On the calling thread; for one-shot commands that exit right after.
    Inline(AutostartDir),
    /// On a worker thread; for the long-running service.
    Background(AutostartWorker),
    Disabled,
}

/// Everything the panel extension holds while enabled: the registry, the
/// views subscribed to it, the shortcut grabs and the long-press timers.
pub struct Pinner<S: SettingsStore + 'static, G: KeyGrabber + 'static> {
    pub registry: PinnedRegistry<S>,
    pub shortcuts: ShortcutTable<G>,
    pub panel: Rc<RefCell<PanelView>>,
    pub menu: Rc<RefCell<MenuView>>,
    pub should_exit: bool,
    autostart: Rc<AutostartSink>,
    running: Rc<RefCell<RunningProcesses>>,
    long_press: Option<LongPress<Self>>,
    matcher: FuzzyMatcher,
    subscriptions: Vec<SubscriptionId>,
    grab_shortcuts: bool,
    enabled: bool,
}

impl<S: SettingsStore + 'static, G: KeyGrabber + 'static> Pinner<S, G> {
    pub fn new(registry: PinnedRegistry<S>, grabber: G, autostart: AutostartSink) -> Self {
        let settings = PanelSettings::load(registry.store());
        let panel = PanelView::render(&[], &settings, registry.resolver().as_ref(), &RunningProcesses::default());
        Self {
            registry,
            shortcuts: ShortcutTable::new(grabber),
            panel: Rc::new(RefCell::new(panel)),
            menu: Rc::new(RefCell::new(MenuView::default())),
            should_exit: false,
            autostart: Rc::new(autostart),
            running: Rc::new(RefCell::new(RunningProcesses::default())),
            long_press: None,
            matcher: FuzzyMatcher::new(),
            subscriptions: Vec::new(),
            grab_shortcuts: true,
            enabled: false,
        }
    }

    /// Leaves global key grabs to another process; shortcut strings are
    /// still validated and stored.
    pub fn without_shortcut_grabs(mut self) -> Self {
        self.grab_shortcuts = false;
        self
    }

    /// Arms long-press handling on `handle`'s event loop.
    pub fn attach_event_loop(&mut self, handle: LoopHandle<'static, Self>, threshold: Duration) {
        self.long_press = Some(LongPress::new(handle, threshold));
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Subscribes the views and the autostart synchronizer, prunes orphans,
    /// renders once and repairs the autostart directory. No-op when enabled.
    pub fn enable(&mut self) {
        if self.enabled {
            return;
        }
        self.enabled = true;

        let resolver = self.registry.resolver().clone();
        let settings = PanelSettings::load(self.registry.store());
        let panel = self.panel.clone();
        let running = self.running.clone();
        let panel_resolver = resolver.clone();
        self.subscriptions.push(self.registry.subscribe(Box::new(move |change| {
            let view = PanelView::render(change.entries, &settings, panel_resolver.as_ref(), &running.borrow());
            *panel.try_borrow_mut()? = view;
            Ok(())
        })));

        let menu = self.menu.clone();
        let menu_resolver = resolver.clone();
        self.subscriptions.push(self.registry.subscribe(Box::new(move |change| {
            *menu.try_borrow_mut()? = MenuView::render(change.entries, change.startup, menu_resolver.as_ref());
            Ok(())
        })));

        let sink = self.autostart.clone();
        self.subscriptions.push(self.registry.subscribe(Box::new(move |change| {
            let expected = autostart::expected_descriptors(change.entries, change.startup, change.custom_links, resolver.as_ref());
            match sink.as_ref() {
                AutostartSink::Inline(dir) => {
                    dir.sync(&expected)?;
                }
                AutostartSink::Background(worker) => worker.schedule(expected),
                AutostartSink::Disabled => {}
            }
            Ok(())
        })));

        self.registry.cleanup_orphans();
        self.registry.refresh();
        if self.grab_shortcuts {
            self.shortcuts.sync(self.registry.store_mut());
        }
        info!("Pinner: enabled with {} entries", self.registry.entries().len());
    }

    /// Releases every subscription, timer and grab. No-op when disabled.
    pub fn disable(&mut self) {
        if !self.enabled {
            return;
        }
        self.enabled = false;
        for id in self.subscriptions.drain(..) {
            self.registry.unsubscribe(id);
        }
        if let Some(lp) = self.long_press.as_mut() {
            lp.cancel_all();
        }
        self.shortcuts.release_all();
        info!("Pinner: disabled");
    }

    /// Swaps in a freshly loaded registry, re-subscribing if enabled.
    pub fn replace_registry(&mut self, registry: PinnedRegistry<S>) {
        let was_enabled = self.enabled;
        self.disable();
        self.registry = registry;
        if was_enabled {
            self.enable();
        }
    }

    /// Installed applications matching `query`, excluding pinned ones.
    pub fn search(&mut self, query: &str) -> Vec<AppDescriptor> {
        let candidates: Vec<AppDescriptor> = self
            .registry
            .resolver()
            .installed()
            .into_iter()
            .filter(|app| !self.registry.is_pinned(&app.id))
            .collect();
        self.matcher
            .rank(query, &candidates, |app| app.name.as_str())
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn pin(&mut self, entry: PinnedEntry) -> Result<(), RegistryError> {
        self.registry.pin(entry)
    }

    pub fn set_shortcut(&mut self, position: usize, raw: &str) -> Result<(), AcceleratorError> {
        if self.grab_shortcuts {
            self.shortcuts.set(self.registry.store_mut(), position, raw)
        } else {
            shortcuts::store_accelerator(self.registry.store_mut(), position, raw).map(|_| ())
        }
    }

    /// Launches the entry at 1-based `position`. Out of range is a logged no-op.
    pub fn launch_position(&self, position: usize) -> bool {
        let Some(entry) = self.registry.entry_at(position) else {
            warn!("Pinner: no entry at position {} ({} pinned)", position, self.registry.entries().len());
            return false;
        };
        self.launch(entry)
    }

    pub fn launch(&self, entry: &PinnedEntry) -> bool {
        let terminal = self.registry.store().get_string(schema::TERMINAL);
        match executor::launch(entry, self.registry.resolver().as_ref(), &terminal) {
            Ok(launched) => launched,
            Err(e) => {
                warn!("Pinner: failed to launch '{}': {:#}", entry.key(), e);
                false
            }
        }
    }

    pub fn press(&mut self, key: &str) {
        if let Some(lp) = self.long_press.as_mut() {
            lp.press(key);
        }
    }

    /// A release before the long-press threshold counts as a click and
    /// launches the entry.
    pub fn release(&mut self, key: &str) {
        let clicked = self.long_press.as_mut().is_some_and(|lp| lp.release(key));
        if clicked {
            let entry = normalize(key);
            if self.registry.entries().contains(&entry) {
                self.launch(&entry);
            }
        }
    }

    /// Rescans running processes and re-renders the panel if the indicator
    /// state changed.
    pub fn refresh_running(&mut self) {
        let snapshot = RunningProcesses::scan();
        *self.running.borrow_mut() = snapshot;

        let settings = PanelSettings::load(self.registry.store());
        let view = PanelView::render(
            self.registry.entries(),
            &settings,
            self.registry.resolver().as_ref(),
            &self.running.borrow(),
        );
        let mut panel = self.panel.borrow_mut();
        if *panel != view {
            *panel = view;
        }
    }
}

impl<S: SettingsStore + 'static, G: KeyGrabber + 'static> LongPressTarget for Pinner<S, G> {
    fn long_press(&mut self) -> Option<&mut LongPress<Self>> {
        self.long_press.as_mut()
    }

    fn on_long_press(&mut self, key: &str) {
        self.registry.move_to_end(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;
    use crate::sources::fake::StaticResolver;
    use anyhow::Result;
    use calloop::EventLoop;
    use std::time::Instant;

    #[derive(Default)]
    struct NoGrab {
        grabbed: usize,
    }

    impl KeyGrabber for NoGrab {
        fn grab(&mut self, _: usize, _: &str) -> Result<()> {
            self.grabbed += 1;
            Ok(())
        }

        fn ungrab(&mut self, _: usize) -> Result<()> {
            self.grabbed -= 1;
            Ok(())
        }
    }

    fn resolver() -> Rc<StaticResolver> {
        Rc::new(StaticResolver::with(&[
            ("org.mozilla.firefox", "Firefox"),
            ("org.gnome.Nautilus", "Files"),
            ("org.videolan.VLC", "VLC media player"),
            ("firewall-config", "Firewall"),
        ]))
    }

    fn pinner(store: MemoryStore, sink: AutostartSink) -> Pinner<MemoryStore, NoGrab> {
        let registry = PinnedRegistry::load(store, resolver());
        Pinner::new(registry, NoGrab::default(), sink)
    }

    fn panel_keys(p: &Pinner<MemoryStore, NoGrab>) -> Vec<String> {
        p.panel.borrow().slots.iter().map(|s| s.key.clone()).collect()
    }

    #[test]
    fn views_follow_registry_mutations() {
        let mut p = pinner(MemoryStore::new(), AutostartSink::Disabled);
        p.enable();
        p.pin(normalize("org.mozilla.firefox")).unwrap();
        p.pin(normalize("org.gnome.Nautilus")).unwrap();
        p.pin(normalize("org.videolan.VLC")).unwrap();

        assert!(p.registry.move_to_end("org.mozilla.firefox"));
        let expected = vec!["org.gnome.Nautilus", "org.videolan.VLC", "org.mozilla.firefox"];
        assert_eq!(panel_keys(&p), expected);
        assert_eq!(p.registry.store().get_strv(schema::PINNED_APPS), expected);
        let menu: Vec<String> = p.menu.borrow().rows.iter().map(|r| r.name.clone()).collect();
        assert_eq!(menu, vec!["Files", "VLC media player", "Firefox"]);
    }

    #[test]
    fn enable_and_disable_are_idempotent() {
        let mut store = MemoryStore::new();
        store.set_string("shortcut-1", "<Super>1").unwrap();
        let mut p = pinner(store, AutostartSink::Disabled);

        p.enable();
        p.enable();
        assert_eq!(p.registry.dispose_subscriptions(), 3);
        assert_eq!(p.shortcuts.bindings().len(), 1);

        p.disable();
        p.disable();
        assert!(!p.is_enabled());
        assert!(p.shortcuts.bindings().is_empty());

        // disabled: views no longer follow
        p.pin(normalize("org.mozilla.firefox")).unwrap();
        assert!(panel_keys(&p).is_empty());
    }

    #[test]
    fn shortcuts_are_stored_but_not_grabbed_when_grabs_are_off() {
        let mut store = MemoryStore::new();
        store.set_string("shortcut-1", "<Super>1").unwrap();
        let mut p = pinner(store, AutostartSink::Disabled).without_shortcut_grabs();
        p.enable();
        p.set_shortcut(2, "<Super>2").unwrap();

        assert!(p.shortcuts.bindings().is_empty());
        assert_eq!(p.registry.store().get_string("shortcut-2"), "<Super>2");
        assert!(p.set_shortcut(2, "<Super>").is_err());
        assert_eq!(p.registry.store().get_string("shortcut-2"), "");
    }

    #[test]
    fn search_excludes_pinned_apps() {
        let mut p = pinner(MemoryStore::new(), AutostartSink::Disabled);
        p.pin(normalize("org.mozilla.firefox")).unwrap();
        let names: Vec<String> = p.search("fire").into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Firewall"]);
        assert!(p.search("f").is_empty());
    }

    #[test]
    fn launch_position_out_of_range_is_a_no_op() {
        let p = pinner(MemoryStore::new(), AutostartSink::Disabled);
        assert!(!p.launch_position(0));
        assert!(!p.launch_position(1));
    }

    #[test]
    fn enable_repairs_autostart_directory() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::write(tmp.path().join("app-pinner-stale.desktop"), "x").unwrap();

        let mut store = MemoryStore::new();
        store.set_strv(schema::PINNED_APPS, &["org.mozilla.firefox".into()]).unwrap();
        store.set_strv(schema::STARTUP_APPS, &["org.mozilla.firefox".into(), "gone".into()]).unwrap();
        let mut p = pinner(store, AutostartSink::Inline(AutostartDir::new(tmp.path())));
        p.enable();

        let files = AutostartDir::new(tmp.path()).scan().unwrap();
        let names: Vec<&String> = files.keys().collect();
        assert_eq!(names, vec!["app-pinner-org_mozilla_firefox-7d0c67a4.desktop"]);

        p.registry.unpin("org.mozilla.firefox");
        assert!(AutostartDir::new(tmp.path()).scan().unwrap().is_empty());
    }

    #[test]
    fn long_press_moves_entry_to_end() {
        let mut event_loop: EventLoop<'static, Pinner<MemoryStore, NoGrab>> = EventLoop::try_new().unwrap();
        let mut p = pinner(MemoryStore::new(), AutostartSink::Disabled);
        p.attach_event_loop(event_loop.handle(), Duration::from_millis(20));
        p.enable();
        for id in ["org.mozilla.firefox", "org.gnome.Nautilus"] {
            p.pin(normalize(id)).unwrap();
        }

        p.press("org.mozilla.firefox");
        let deadline = Instant::now() + Duration::from_millis(150);
        while Instant::now() < deadline {
            event_loop.dispatch(Some(Duration::from_millis(10)), &mut p).unwrap();
        }
        assert_eq!(panel_keys(&p), vec!["org.gnome.Nautilus", "org.mozilla.firefox"]);

        // disabling cancels a pending press
        p.press("org.gnome.Nautilus");
        p.disable();
        let deadline = Instant::now() + Duration::from_millis(100);
        while Instant::now() < deadline {
            event_loop.dispatch(Some(Duration::from_millis(10)), &mut p).unwrap();
        }
        assert_eq!(p.registry.entries()[0], normalize("org.gnome.Nautilus"));
    }
}
