use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use anyhow::{Context, Result, bail};
use log::{debug, info, warn};
use regex::Regex;
use xkbcommon::xkb::{self, keysyms};
use crate::config::{SettingsStore, schema};
use crate::error::AcceleratorError;

fn accelerator_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^((?:<[A-Za-z0-9]+>)*)([^<>\s]+)$").ok()).as_ref()
}

fn modifier_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<([A-Za-z0-9]+)>").ok()).as_ref()
}

fn strv_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"'([^']*)'").ok()).as_ref()
}

/// Validates a GTK-style accelerator such as `<Super>1` or `<Ctrl><Alt>t` and
/// returns it in canonical spelling (`<Control><Alt>t`).
pub fn parse_accelerator(raw: &str) -> Result<String, AcceleratorError> {
    let invalid = || AcceleratorError::Invalid(raw.to_string());
    let caps = accelerator_re()
        .and_then(|re| re.captures(raw.trim()))
        .ok_or_else(invalid)?;
    let modifiers = modifier_re().ok_or_else(invalid)?;

    let mut canonical = String::new();
    for m in modifiers.captures_iter(&caps[1]) {
        let name = match m[1].to_ascii_lowercase().as_str() {
            "super" => "Super",
            "control" | "ctrl" | "primary" => "Control",
            "alt" => "Alt",
            "shift" => "Shift",
            "meta" => "Meta",
            "hyper" => "Hyper",
            "mod1" => "Mod1",
            "mod2" => "Mod2",
            "mod3" => "Mod3",
            "mod4" => "Mod4",
            "mod5" => "Mod5",
            _ => return Err(invalid()),
        };
        let tag = format!("<{}>", name);
        if !canonical.contains(&tag) {
            canonical.push_str(&tag);
        }
    }

    let key = &caps[2];
    let mut sym = xkb::keysym_from_name(key, xkb::KEYSYM_NO_FLAGS);
    if u32::from(sym) == keysyms::KEY_NoSymbol {
        sym = xkb::keysym_from_name(key, xkb::KEYSYM_CASE_INSENSITIVE);
    }
    if u32::from(sym) == keysyms::KEY_NoSymbol {
        return Err(invalid());
    }

    canonical.push_str(key);
    Ok(canonical)
}

/// Validates `raw` and writes the canonical form to `shortcut-<position>`.
/// An empty string clears the slot; an invalid one is rejected and the
/// stored value reset to empty.
pub fn store_accelerator(store: &mut dyn SettingsStore, position: usize, raw: &str) -> Result<String, AcceleratorError> {
    if !(1..=schema::SHORTCUT_SLOTS).contains(&position) {
        return Err(AcceleratorError::Invalid(format!("position {}", position)));
    }
    let key = schema::shortcut_key(position);

    let parsed = if raw.trim().is_empty() {
        Ok(String::new())
    } else {
        parse_accelerator(raw)
    };
    let stored = parsed.as_deref().unwrap_or("");
    if let Err(e) = store.set_string(&key, stored) {
        warn!("Shortcuts: failed to persist {}: {}", key, e);
    }
    parsed
}

/// The desktop's global key-grab facility.
pub trait KeyGrabber {
    fn grab(&mut self, position: usize, accelerator: &str) -> Result<()>;
    fn ungrab(&mut self, position: usize) -> Result<()>;
}

/// Mirrors the `shortcut-<n>` keys into a `KeyGrabber`. Bindings are keyed by
/// position: whatever entry occupies position n when the shortcut fires is
/// the one launched.
pub struct ShortcutTable<G: KeyGrabber> {
    grabber: G,
    bound: BTreeMap<usize, String>,
}

impl<G: KeyGrabber> ShortcutTable<G> {
    pub fn new(grabber: G) -> Self {
        Self {
            grabber,
            bound: BTreeMap::new(),
        }
    }

    pub fn bindings(&self) -> &BTreeMap<usize, String> {
        &self.bound
    }

    pub fn binding(&self, position: usize) -> Option<&str> {
        self.bound.get(&position).map(String::as_str)
    }

    /// Brings the grabs in line with the stored strings. Stored strings that
    /// fail validation are reset to empty.
    pub fn sync(&mut self, store: &mut dyn SettingsStore) {
        for position in 1..=schema::SHORTCUT_SLOTS {
            let key = schema::shortcut_key(position);
            let raw = store.get_string(&key);
            if raw.trim().is_empty() {
                self.release(position);
                continue;
            }
            match parse_accelerator(&raw) {
                Ok(accelerator) => self.bind(position, accelerator),
                Err(e) => {
                    warn!("Shortcuts: {} for position {}, clearing it", e, position);
                    if let Err(e) = store.set_string(&key, "") {
                        warn!("Shortcuts: failed to persist {}: {}", key, e);
                    }
                    self.release(position);
                }
            }
        }
    }

    /// Sets the shortcut for `position` from user input and updates the grab.
    pub fn set(&mut self, store: &mut dyn SettingsStore, position: usize, raw: &str) -> Result<(), AcceleratorError> {
        let accelerator = store_accelerator(store, position, raw);
        match &accelerator {
            Ok(accelerator) if !accelerator.is_empty() => self.bind(position, accelerator.clone()),
            _ => self.release(position),
        }
        accelerator.map(|_| ())
    }

    /// Drops every grab. Safe to call repeatedly.
    pub fn release_all(&mut self) {
        let positions: Vec<usize> = self.bound.keys().copied().collect();
        for position in positions {
            self.release(position);
        }
    }

    fn bind(&mut self, position: usize, accelerator: String) {
        if self.bound.get(&position) == Some(&accelerator) {
            return;
        }
        self.release(position);
        match self.grabber.grab(position, &accelerator) {
            Ok(()) => {
                debug!("Shortcuts: {} -> position {}", accelerator, position);
                self.bound.insert(position, accelerator);
            }
            Err(e) => warn!("Shortcuts: could not grab {}: {:#}", accelerator, e),
        }
    }

    fn release(&mut self, position: usize) {
        if self.bound.remove(&position).is_some() {
            if let Err(e) = self.grabber.ungrab(position) {
                warn!("Shortcuts: could not release position {}: {:#}", position, e);
            }
        }
    }
}

const MEDIA_KEYS_SCHEMA: &str = "org.gnome.settings-daemon.plugins.media-keys";
const CUSTOM_BINDING_SCHEMA: &str = "org.gnome.settings-daemon.plugins.media-keys.custom-keybinding";
const CUSTOM_BINDING_ROOT: &str = "/org/gnome/settings-daemon/plugins/media-keys/custom-keybindings";

/// Registers GNOME custom keybindings that run
/// `<program> --settings <file> launch <n>` against the same settings file
/// the service uses.
pub struct GsettingsGrabber {
    program: PathBuf,
    settings: PathBuf,
}

impl GsettingsGrabber {
    pub fn new(settings: &Path) -> Result<Self> {
        let program = std::env::current_exe().context("cannot locate own executable")?;
        Ok(Self {
            program,
            settings: settings.to_path_buf(),
        })
    }

    /// Shell-quoted command line stored in the keybinding.
    fn launch_command(&self, position: usize) -> Result<String> {
        let program = self.program.to_string_lossy();
        let settings = self.settings.to_string_lossy();
        let position = position.to_string();
        let argv = [program.as_ref(), "--settings", settings.as_ref(), "launch", position.as_str()];
        shlex::try_join(argv).context("keybinding command cannot be quoted")
    }

    fn binding_path(position: usize) -> String {
        format!("{}/app-pinner-{}/", CUSTOM_BINDING_ROOT, position)
    }

    fn binding_list(&self) -> Result<Vec<String>> {
        let out = gsettings(&["get", MEDIA_KEYS_SCHEMA, "custom-keybindings"])?;
        Ok(parse_strv(&out))
    }

    fn set_binding_list(&self, list: &[String]) -> Result<()> {
        gsettings(&["set", MEDIA_KEYS_SCHEMA, "custom-keybindings", &format_strv(list)])?;
        Ok(())
    }
}

impl KeyGrabber for GsettingsGrabber {
    fn grab(&mut self, position: usize, accelerator: &str) -> Result<()> {
        let path = Self::binding_path(position);
        let schema_path = format!("{}:{}", CUSTOM_BINDING_SCHEMA, path);
        let command = self.launch_command(position)?;

        gsettings(&["set", &schema_path, "name", &format!("App Pinner position {}", position)])?;
        gsettings(&["set", &schema_path, "command", &command])?;
        gsettings(&["set", &schema_path, "binding", accelerator])?;

        let mut list = self.binding_list()?;
        if !list.contains(&path) {
            list.push(path);
            self.set_binding_list(&list)?;
        }
        info!("Shortcuts: registered {} for position {}", accelerator, position);
        Ok(())
    }

    fn ungrab(&mut self, position: usize) -> Result<()> {
        let path = Self::binding_path(position);
        let mut list = self.binding_list()?;
        let before = list.len();
        list.retain(|p| *p != path);
        if list.len() != before {
            self.set_binding_list(&list)?;
        }
        let schema_path = format!("{}:{}", CUSTOM_BINDING_SCHEMA, path);
        for key in ["name", "command", "binding"] {
            gsettings(&["reset", &schema_path, key])?;
        }
        Ok(())
    }
}

fn gsettings(args: &[&str]) -> Result<String> {
    let output = Command::new("gsettings").args(args).output().context("failed to run gsettings")?;
    if !output.status.success() {
        bail!("gsettings {} failed: {}", args.join(" "), String::from_utf8_lossy(&output.stderr).trim());
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parses GVariant text of type `as`, e.g. `['/a/', '/b/']` or `@as []`.
fn parse_strv(text: &str) -> Vec<String> {
    match strv_re() {
        Some(re) => re.captures_iter(text).map(|c| c[1].to_string()).collect(),
        None => Vec::new(),
    }
}

fn format_strv(list: &[String]) -> String {
    let items: Vec<String> = list.iter().map(|s| format!("'{}'", s)).collect();
    format!("[{}]", items.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MemoryStore;

    #[derive(Default)]
    struct RecordingGrabber {
        calls: Vec<String>,
    }

    impl KeyGrabber for RecordingGrabber {
        fn grab(&mut self, position: usize, accelerator: &str) -> Result<()> {
            self.calls.push(format!("grab {position} {accelerator}"));
            Ok(())
        }

        fn ungrab(&mut self, position: usize) -> Result<()> {
            self.calls.push(format!("ungrab {position}"));
            Ok(())
        }
    }

    #[test]
    fn accelerators_are_validated_and_canonicalized() {
        assert_eq!(parse_accelerator("<Super>1").unwrap(), "<Super>1");
        assert_eq!(parse_accelerator("<ctrl><Alt>t").unwrap(), "<Control><Alt>t");
        assert_eq!(parse_accelerator("<Primary><Shift>F5").unwrap(), "<Control><Shift>F5");
        assert!(parse_accelerator("<Super>").is_err());
        assert!(parse_accelerator("<Banana>1").is_err());
        assert!(parse_accelerator("<Super>NotAKey").is_err());
        assert!(parse_accelerator("Super+1").is_err());
    }

    #[test]
    fn sync_grabs_and_clears_invalid_strings() {
        let mut store = MemoryStore::new();
        store.set_string("shortcut-1", "<Super>1").unwrap();
        store.set_string("shortcut-2", "<Nope>2").unwrap();

        let mut table = ShortcutTable::new(RecordingGrabber::default());
        table.sync(&mut store);

        assert_eq!(table.binding(1), Some("<Super>1"));
        assert_eq!(table.binding(2), None);
        assert_eq!(store.get_string("shortcut-2"), "");
        assert_eq!(table.grabber.calls, vec!["grab 1 <Super>1"]);

        // unchanged strings do not regrab
        table.sync(&mut store);
        assert_eq!(table.grabber.calls.len(), 1);
    }

    #[test]
    fn clearing_and_invalid_input_release_the_grab() {
        let mut store = MemoryStore::new();
        let mut table = ShortcutTable::new(RecordingGrabber::default());

        table.set(&mut store, 3, "<Super>3").unwrap();
        table.set(&mut store, 3, "").unwrap();
        assert!(table.set(&mut store, 4, "<Super>4").is_ok());
        assert!(table.set(&mut store, 4, "garbage<").is_err());
        assert_eq!(store.get_string("shortcut-4"), "");
        assert!(table.set(&mut store, 0, "<Super>0").is_err());

        assert_eq!(
            table.grabber.calls,
            vec!["grab 3 <Super>3", "ungrab 3", "grab 4 <Super>4", "ungrab 4"]
        );
        assert!(table.bindings().is_empty());
    }

    #[test]
    fn release_all_is_idempotent() {
        let mut store = MemoryStore::new();
        let mut table = ShortcutTable::new(RecordingGrabber::default());
        table.set(&mut store, 1, "<Super>1").unwrap();
        table.set(&mut store, 2, "<Super>2").unwrap();

        table.release_all();
        table.release_all();
        assert_eq!(table.grabber.calls.iter().filter(|c| c.starts_with("ungrab")).count(), 2);
    }

    #[test]
    fn storing_without_a_grabber_still_validates() {
        let mut store = MemoryStore::new();
        assert_eq!(store_accelerator(&mut store, 2, "<super>2").unwrap(), "<Super>2");
        assert_eq!(store.get_string("shortcut-2"), "<Super>2");
        assert!(store_accelerator(&mut store, 2, "<Super>").is_err());
        assert_eq!(store.get_string("shortcut-2"), "");
        assert!(store_accelerator(&mut store, 11, "<Super>1").is_err());
    }

    #[test]
    fn launch_command_carries_settings_and_survives_spaces() {
        let grabber = GsettingsGrabber {
            program: PathBuf::from("/opt/my apps/app-pinner"),
            settings: PathBuf::from("/home/me/pinner settings.toml"),
        };
        let command = grabber.launch_command(3).unwrap();
        assert_eq!(
            shlex::split(&command).unwrap(),
            vec!["/opt/my apps/app-pinner", "--settings", "/home/me/pinner settings.toml", "launch", "3"]
        );
    }

    #[test]
    fn gvariant_string_lists() {
        assert_eq!(parse_strv("@as []\n"), Vec::<String>::new());
        assert_eq!(parse_strv("['/a/', '/b/']\n"), vec!["/a/", "/b/"]);
        assert_eq!(format_strv(&["/a/".to_string(), "/b/".to_string()]), "['/a/', '/b/']");
    }
}
