use serde::Serialize;
use crate::config::{PanelPosition, PanelSettings, Rgba};
use crate::model::{EntryKind, PinnedEntry};
use crate::running::RunningProcesses;
use crate::sources::AppResolver;

/// One icon in the panel. `position` is the entry's 1-based registry
/// position, which is also what the position shortcuts target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PanelSlot {
    pub position: usize,
    pub key: String,
    pub label: Option<String>,
    pub icon: Option<String>,
    pub running: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PanelView {
    pub position: PanelPosition,
    pub icon_size: u32,
    pub spacing: u32,
    pub indicator_color: Rgba,
    pub slots: Vec<PanelSlot>,
}

impl PanelView {
    /// Rebuilds the slots from the registry order. Applications that no
    /// longer resolve get no slot; the remaining slots keep their positions.
    pub fn render(
        entries: &[PinnedEntry],
        settings: &PanelSettings,
        resolver: &dyn AppResolver,
        running: &RunningProcesses,
    ) -> Self {
        let slots = if settings.show_in_panel {
            entries
                .iter()
                .enumerate()
                .filter_map(|(i, entry)| {
                    let (name, icon, is_running) = match entry.kind {
                        EntryKind::Application => {
                            let app = resolver.resolve(&entry.identifier)?;
                            let is_running = running.is_running(&app);
                            (app.name, app.icon, is_running)
                        }
                        EntryKind::Link => (entry.identifier.clone(), Some("web-browser".to_string()), false),
                    };
                    Some(PanelSlot {
                        position: i + 1,
                        key: entry.key(),
                        label: settings.enable_labels.then_some(name),
                        icon,
                        running: is_running,
                    })
                })
                .collect()
        } else {
            Vec::new()
        };

        Self {
            position: settings.position,
            icon_size: settings.icon_size,
            spacing: settings.spacing,
            indicator_color: settings.indicator_color,
            slots,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MenuRow {
    pub position: usize,
    pub key: String,
    pub name: String,
    pub kind: EntryKind,
    pub launch_at_login: bool,
    pub installed: bool,
}

/// Rows of the popup menu, one per pinned entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MenuView {
    pub rows: Vec<MenuRow>,
}

impl MenuView {
    pub fn render(entries: &[PinnedEntry], startup: &[String], resolver: &dyn AppResolver) -> Self {
        let rows = entries
            .iter()
            .enumerate()
            .map(|(i, entry)| {
                let key = entry.key();
                let resolved = match entry.kind {
                    EntryKind::Application => resolver.resolve(&entry.identifier).map(|a| a.name),
                    EntryKind::Link => Some(entry.identifier.clone()),
                };
                MenuRow {
                    position: i + 1,
                    name: resolved.clone().unwrap_or_else(|| entry.identifier.clone()),
                    kind: entry.kind,
                    launch_at_login: startup.contains(&key),
                    installed: resolved.is_some(),
                    key,
                }
            })
            .collect();
        Self { rows }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MemoryStore, SettingsStore, schema};
    use crate::model::normalize;
    use crate::sources::fake::StaticResolver;

    fn entries(raw: &[&str]) -> Vec<PinnedEntry> {
        raw.iter().map(|r| normalize(r)).collect()
    }

    #[test]
    fn panel_skips_unresolved_apps_but_keeps_positions() {
        let resolver = StaticResolver::with(&[("firefox", "Firefox"), ("vlc", "VLC")]);
        let mut store = MemoryStore::new();
        store.set_bool(schema::ENABLE_LABELS, true).unwrap();
        let settings = PanelSettings::load(&store);

        let view = PanelView::render(
            &entries(&["firefox", "gone", "link://https://a.b", "vlc"]),
            &settings,
            &resolver,
            &RunningProcesses::default(),
        );
        let positions: Vec<usize> = view.slots.iter().map(|s| s.position).collect();
        assert_eq!(positions, vec![1, 3, 4]);
        assert_eq!(view.slots[0].label.as_deref(), Some("Firefox"));
        assert_eq!(view.slots[1].key, "link://https://a.b");
        assert!(!view.slots[2].running);
    }

    #[test]
    fn hidden_panel_has_no_slots() {
        let resolver = StaticResolver::with(&[("firefox", "Firefox")]);
        let mut store = MemoryStore::new();
        store.set_bool(schema::SHOW_IN_PANEL, false).unwrap();
        let view = PanelView::render(
            &entries(&["firefox"]),
            &PanelSettings::load(&store),
            &resolver,
            &RunningProcesses::default(),
        );
        assert!(view.slots.is_empty());
        assert_eq!(view.icon_size, 24);
    }

    #[test]
    fn menu_marks_startup_and_missing_entries() {
        let resolver = StaticResolver::with(&[("firefox", "Firefox")]);
        let menu = MenuView::render(&entries(&["firefox", "gone"]), &["firefox".to_string()], &resolver);
        assert_eq!(menu.rows.len(), 2);
        assert!(menu.rows[0].launch_at_login);
        assert_eq!(menu.rows[0].name, "Firefox");
        assert!(!menu.rows[1].installed);
        assert_eq!(menu.rows[1].name, "gone");
    }
}
