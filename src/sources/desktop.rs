use crate::model::{AppDescriptor, normalize};
use crate::sources::AppResolver;
use std::collections::{HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use directories::BaseDirs;
use log::{info, debug};
use walkdir::WalkDir;

/// In-memory index of the installed desktop entries.
///
/// Search order, first hit wins:
/// 1. `$XDG_DATA_HOME/applications`
/// 2. `<dir>/applications` for each `$XDG_DATA_DIRS` entry
///    (default `/usr/local/share:/usr/share`)
/// 3. flatpak exports, user then system
///
/// Desktop ids follow the XDG rule: `kde/foo.desktop` below an applications
/// directory is `kde-foo`. Lookups try the exact id, then a case-insensitive
/// match. A `Hidden=true` entry masks same-id entries further down the list.
pub struct DesktopDatabase {
    apps: Vec<AppDescriptor>,
    index: HashMap<String, usize>,
    lower_index: HashMap<String, usize>,
}

impl DesktopDatabase {
    pub fn load() -> Self {
        Self::from_dirs(&search_dirs())
    }

    pub fn from_dirs(dirs: &[PathBuf]) -> Self {
        let mut apps = Vec::new();
        let mut seen = HashSet::new();

        for dir in dirs {
            if !dir.exists() {
                continue;
            }
            debug!("Scanning desktop files in {:?}", dir);
            for entry in WalkDir::new(dir).follow_links(true).sort_by_file_name().into_iter().flatten() {
                let path = entry.path();
                if path.extension().and_then(|s| s.to_str()) != Some("desktop") {
                    continue;
                }
                let Some(id) = desktop_id(dir, path) else { continue };
                if !seen.insert(id.clone()) {
                    continue;
                }
                if let Ok(content) = fs::read_to_string(path) {
                    if let Some(app) = parse_desktop_file(&id, &content) {
                        apps.push(app);
                    }
                }
            }
        }

        let mut index = HashMap::new();
        let mut lower_index = HashMap::new();
        for (i, app) in apps.iter().enumerate() {
            index.insert(app.id.clone(), i);
            lower_index.entry(app.id.to_lowercase()).or_insert(i);
        }

        info!("DesktopDatabase: found {} entries", apps.len());
        Self { apps, index, lower_index }
    }
}

impl AppResolver for DesktopDatabase {
    fn resolve(&self, id: &str) -> Option<AppDescriptor> {
        let id = normalize(id).identifier;
        self.index
            .get(&id)
            .or_else(|| self.lower_index.get(&id.to_lowercase()))
            .map(|&i| self.apps[i].clone())
    }

    fn installed(&self) -> Vec<AppDescriptor> {
        self.apps.iter().filter(|a| !a.no_display).cloned().collect()
    }
}

pub fn search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    let base_dirs = BaseDirs::new();

    if let Some(base) = &base_dirs {
        dirs.push(base.data_dir().join("applications"));
    }

    let data_dirs = env::var("XDG_DATA_DIRS")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| "/usr/local/share:/usr/share".to_string());
    for dir in data_dirs.split(':').filter(|d| !d.is_empty()) {
        dirs.push(Path::new(dir).join("applications"));
    }

    if let Some(base) = &base_dirs {
        dirs.push(base.data_dir().join("flatpak/exports/share/applications"));
    }
    dirs.push(PathBuf::from("/var/lib/flatpak/exports/share/applications"));

    let mut unique = HashSet::new();
    dirs.retain(|d| unique.insert(d.clone()));
    dirs
}

fn desktop_id(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let joined = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("-");
    Some(normalize(&joined).identifier)
}

fn parse_desktop_file(id: &str, content: &str) -> Option<AppDescriptor> {
    let mut name = None;
    let mut exec = None;
    let mut terminal = false;
    let mut no_display = false;
    let mut hidden = false;
    let mut icon = None;
    let mut is_application = true;
    let mut is_desktop_entry = false;

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') { continue; }

        if line == "[Desktop Entry]" {
            is_desktop_entry = true;
            continue;
        }

        if line.starts_with('[') {
            is_desktop_entry = false;
            continue;
        }

        if !is_desktop_entry { continue; }

        let Some((key, value)) = line.split_once('=') else { continue };
        match key.trim() {
            "Name" => name = Some(value.trim().to_string()),
            "Exec" => exec = Some(clean_exec(value)),
            "Terminal" => terminal = value.trim() == "true",
            "NoDisplay" => no_display = value.trim() == "true",
            "Hidden" => hidden = value.trim() == "true",
            "Icon" => icon = Some(value.trim().to_string()),
            "Type" => is_application = value.trim() == "Application",
            _ => {}
        }
    }

    if hidden || !is_application { return None; }

    match (name, exec) {
        (Some(name), Some(exec)) if !exec.is_empty() => Some(AppDescriptor {
            id: id.to_string(),
            name,
            exec,
            icon,
            terminal,
            no_display,
        }),
        _ => None,
    }
}

/// Drops field codes such as `%u` or `%F` from an Exec line.
fn clean_exec(raw: &str) -> String {
    raw.split_whitespace()
        .filter(|s| !s.starts_with('%'))
        .collect::<Vec<_>>()
        .join(" ")
}
