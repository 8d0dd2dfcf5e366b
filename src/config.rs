use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use directories::ProjectDirs;
use crate::error::StoreError;

pub mod schema {
    pub const PINNED_APPS: &str = "pinned-apps";
    pub const CUSTOM_LINKS: &str = "custom-links";
    pub const STARTUP_APPS: &str = "startup-apps";
    pub const ICON_SIZE: &str = "icon-size";
    pub const SPACING: &str = "spacing";
    pub const ENABLE_LABELS: &str = "enable-labels";
    pub const POSITION_IN_PANEL: &str = "position-in-panel";
    pub const MAX_APPS: &str = "max-apps";
    pub const INDICATOR_COLOR: &str = "indicator-color";
    pub const SORT_ALPHABETICALLY: &str = "sort-alphabetically";
    pub const SHOW_IN_PANEL: &str = "show-in-panel";
    /// Terminal command used for `Terminal=true` applications.
    pub const TERMINAL: &str = "terminal";

    /// Number of position shortcuts (`shortcut-1` .. `shortcut-N`).
    pub const SHORTCUT_SLOTS: usize = 10;

    pub fn shortcut_key(position: usize) -> String {
        format!("shortcut-{}", position)
    }

    pub fn default_max_apps() -> i64 { 10 }
    pub fn default_icon_size() -> i64 { 24 }
    pub fn default_spacing() -> i64 { 4 }
    pub fn default_position() -> &'static str { "right" }
    pub fn default_indicator_color() -> &'static str { "#3584e4ff" }
}

/// A typed settings value, mirroring the GSettings types the keys use.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Str(String),
    StrList(Vec<String>),
}

impl Value {
    fn type_name(&self) -> &'static str {
        match self {
            Value::Bool(_) => "boolean",
            Value::Int(_) => "integer",
            Value::Str(_) => "string",
            Value::StrList(_) => "string list",
        }
    }
}

/// Schema default for `key`, or `None` for keys outside the schema.
pub fn default_value(key: &str) -> Option<Value> {
    let value = match key {
        schema::PINNED_APPS | schema::CUSTOM_LINKS | schema::STARTUP_APPS => Value::StrList(Vec::new()),
        schema::ICON_SIZE => Value::Int(schema::default_icon_size()),
        schema::SPACING => Value::Int(schema::default_spacing()),
        schema::MAX_APPS => Value::Int(schema::default_max_apps()),
        schema::ENABLE_LABELS | schema::SORT_ALPHABETICALLY => Value::Bool(false),
        schema::SHOW_IN_PANEL => Value::Bool(true),
        schema::POSITION_IN_PANEL => Value::Str(schema::default_position().to_string()),
        schema::INDICATOR_COLOR => Value::Str(schema::default_indicator_color().to_string()),
        schema::TERMINAL => Value::Str(String::new()),
        k if is_shortcut_key(k) => Value::Str(String::new()),
        _ => return None,
    };
    Some(value)
}

fn is_shortcut_key(key: &str) -> bool {
    key.strip_prefix("shortcut-")
        .and_then(|n| n.parse::<usize>().ok())
        .is_some_and(|n| (1..=schema::SHORTCUT_SLOTS).contains(&n))
}

/// Key/value configuration backend with read-your-writes consistency and no
/// multi-key atomicity. Getters fall back to the schema default.
pub trait SettingsStore {
    fn get(&self, key: &str) -> Option<Value>;
    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError>;

    fn get_strv(&self, key: &str) -> Vec<String> {
        match self.get(key).or_else(|| default_value(key)) {
            Some(Value::StrList(v)) => v,
            _ => Vec::new(),
        }
    }

    fn get_string(&self, key: &str) -> String {
        match self.get(key).or_else(|| default_value(key)) {
            Some(Value::Str(s)) => s,
            _ => String::new(),
        }
    }

    fn get_int(&self, key: &str) -> i64 {
        match self.get(key).or_else(|| default_value(key)) {
            Some(Value::Int(i)) => i,
            _ => 0,
        }
    }

    fn get_bool(&self, key: &str) -> bool {
        match self.get(key).or_else(|| default_value(key)) {
            Some(Value::Bool(b)) => b,
            _ => false,
        }
    }

    fn set_strv(&mut self, key: &str, value: &[String]) -> Result<(), StoreError> {
        self.set(key, Value::StrList(value.to_vec()))
    }

    fn set_string(&mut self, key: &str, value: &str) -> Result<(), StoreError> {
        self.set(key, Value::Str(value.to_string()))
    }

    fn set_int(&mut self, key: &str, value: i64) -> Result<(), StoreError> {
        self.set(key, Value::Int(value))
    }

    fn set_bool(&mut self, key: &str, value: bool) -> Result<(), StoreError> {
        self.set(key, Value::Bool(value))
    }
}

/// Rejects values whose type disagrees with the schema default of the key.
fn check_type(key: &str, value: &Value) -> Result<(), StoreError> {
    let expected = default_value(key).ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;
    if std::mem::discriminant(&expected) != std::mem::discriminant(value) {
        return Err(StoreError::TypeMismatch {
            key: key.to_string(),
            expected: expected.type_name(),
        });
    }
    Ok(())
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    values: BTreeMap<String, Value>,
    writes: usize,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `set` calls so far.
    pub fn writes(&self) -> usize {
        self.writes
    }
}

impl SettingsStore for MemoryStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        check_type(key, &value)?;
        self.values.insert(key.to_string(), value);
        self.writes += 1;
        Ok(())
    }
}

/// TOML-file backed store. Every `set` rewrites the whole file.
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    values: BTreeMap<String, Value>,
}

impl FileStore {
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let values = if path.exists() {
            let content = fs::read_to_string(path)?;
            toml::from_str(&content)?
        } else {
            BTreeMap::new()
        };
        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let content = toml::to_string(&self.values)?;
        fs::write(&self.path, content)?;
        Ok(())
    }
}

impl SettingsStore for FileStore {
    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) -> Result<(), StoreError> {
        check_type(key, &value)?;
        self.values.insert(key.to_string(), value);
        self.flush()
    }
}

pub fn settings_path() -> PathBuf {
    let proj_dirs = ProjectDirs::from("org", "app-pinner", "app-pinner");
    if let Some(dirs) = &proj_dirs {
        dirs.config_dir().join("settings.toml")
    } else {
        PathBuf::from("settings.toml")
    }
}

/// Parses a command-line value into the type the schema expects for `key`.
pub fn parse_value(key: &str, raw: &str) -> Result<Value, StoreError> {
    let expected = default_value(key).ok_or_else(|| StoreError::UnknownKey(key.to_string()))?;
    let mismatch = || StoreError::TypeMismatch {
        key: key.to_string(),
        expected: expected.type_name(),
    };
    let value = match &expected {
        Value::Bool(_) => Value::Bool(raw.parse().map_err(|_| mismatch())?),
        Value::Int(_) => Value::Int(raw.parse().map_err(|_| mismatch())?),
        Value::Str(_) => Value::Str(raw.to_string()),
        Value::StrList(_) => Value::StrList(
            raw.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        ),
    };
    Ok(value)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PanelPosition {
    Left,
    Center,
    Right,
}

impl PanelPosition {
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "left" => PanelPosition::Left,
            "center" => PanelPosition::Center,
            _ => PanelPosition::Right,
        }
    }
}

/// Typed snapshot of the presentation keys.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelSettings {
    pub icon_size: u32,
    pub spacing: u32,
    pub enable_labels: bool,
    pub position: PanelPosition,
    pub indicator_color: Rgba,
    pub show_in_panel: bool,
}

impl PanelSettings {
    pub fn load(store: &dyn SettingsStore) -> Self {
        let color = store.get_string(schema::INDICATOR_COLOR);
        let indicator_color = Rgba::parse(&color).unwrap_or_else(|| {
            log::warn!("Invalid indicator color '{}', using default", color);
            Rgba::parse(schema::default_indicator_color()).unwrap_or(Rgba::WHITE)
        });
        Self {
            icon_size: clamp_u32(store.get_int(schema::ICON_SIZE), schema::default_icon_size()),
            spacing: clamp_u32(store.get_int(schema::SPACING), schema::default_spacing()),
            enable_labels: store.get_bool(schema::ENABLE_LABELS),
            position: PanelPosition::parse(&store.get_string(schema::POSITION_IN_PANEL)),
            indicator_color,
            show_in_panel: store.get_bool(schema::SHOW_IN_PANEL),
        }
    }
}

fn clamp_u32(value: i64, fallback: i64) -> u32 {
    u32::try_from(value).or_else(|_| u32::try_from(fallback)).unwrap_or(0)
}

#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rgba {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Rgba {
    pub const WHITE: Rgba = Rgba { r: 255, g: 255, b: 255, a: 255 };

    /// Accepts `rrggbb` or `rrggbbaa`, with or without a leading `#`.
    pub fn parse(hex: &str) -> Option<Self> {
        let hex = hex.trim().trim_start_matches('#');
        if !(hex.len() == 6 || hex.len() == 8) || !hex.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
        let a = if hex.len() == 8 { channel(6)? } else { 255 };
        Some(Rgba {
            r: channel(0)?,
            g: channel(2)?,
            b: channel(4)?,
            a,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn getters_fall_back_to_schema_defaults() {
        let store = MemoryStore::new();
        assert_eq!(store.get_int(schema::MAX_APPS), 10);
        assert!(store.get_bool(schema::SHOW_IN_PANEL));
        assert!(store.get_strv(schema::PINNED_APPS).is_empty());
        assert_eq!(store.get_string(&schema::shortcut_key(3)), "");
    }

    #[test]
    fn type_mismatch_is_rejected() {
        let mut store = MemoryStore::new();
        let err = store.set_string(schema::MAX_APPS, "ten").unwrap_err();
        assert!(matches!(err, StoreError::TypeMismatch { .. }));
        assert!(matches!(store.set_bool("no-such-key", true), Err(StoreError::UnknownKey(_))));
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn file_store_round_trips_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("settings.toml");

        let mut store = FileStore::open(&path).unwrap();
        store.set_strv(schema::PINNED_APPS, &["firefox".to_string(), "link://https://a.b".to_string()]).unwrap();
        store.set_int(schema::MAX_APPS, 4).unwrap();
        store.set_string(&schema::shortcut_key(1), "<Super>1").unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.get_strv(schema::PINNED_APPS), vec!["firefox", "link://https://a.b"]);
        assert_eq!(reopened.get_int(schema::MAX_APPS), 4);
        assert_eq!(reopened.get_string("shortcut-1"), "<Super>1");
    }

    #[test]
    fn parses_cli_values_by_schema_type() {
        assert_eq!(parse_value(schema::ICON_SIZE, "32").unwrap(), Value::Int(32));
        assert_eq!(parse_value(schema::ENABLE_LABELS, "true").unwrap(), Value::Bool(true));
        assert_eq!(
            parse_value(schema::CUSTOM_LINKS, "https://a, https://b").unwrap(),
            Value::StrList(vec!["https://a".into(), "https://b".into()])
        );
        assert!(parse_value(schema::ICON_SIZE, "big").is_err());
    }

    #[test]
    fn panel_settings_parse_position_and_color() {
        let mut store = MemoryStore::new();
        store.set_string(schema::POSITION_IN_PANEL, "Center").unwrap();
        store.set_string(schema::INDICATOR_COLOR, "#ff000080").unwrap();
        let settings = PanelSettings::load(&store);
        assert_eq!(settings.position, PanelPosition::Center);
        assert_eq!(settings.indicator_color, Rgba { r: 255, g: 0, b: 0, a: 128 });

        store.set_string(schema::INDICATOR_COLOR, "nope").unwrap();
        store.set_string(schema::POSITION_IN_PANEL, "bottom").unwrap();
        let settings = PanelSettings::load(&store);
        assert_eq!(settings.position, PanelPosition::Right);
        assert_eq!(settings.indicator_color, Rgba { r: 0x35, g: 0x84, b: 0xe4, a: 255 });
    }
}
