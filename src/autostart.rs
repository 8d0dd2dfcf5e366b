use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{Sender, channel};
use std::thread;
use directories::BaseDirs;
use log::{debug, info, warn};
use sha2::{Digest, Sha256};
use crate::model::{EntryKind, PinnedEntry, normalize};
use crate::sources::AppResolver;

/// Namespace of the files this program owns inside the autostart directory.
pub const FILE_PREFIX: &str = "app-pinner-";
const MAX_STEM_LEN: usize = 64;
const DIGEST_BYTES: usize = 4;
pub const STARTUP_DELAY_SECS: u32 = 5;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartupDescriptor {
    pub file_name: String,
    pub name: String,
    pub exec: String,
    pub icon: Option<String>,
    pub terminal: bool,
    pub enabled: bool,
    pub delay: u32,
}

impl StartupDescriptor {
    pub fn for_entry(entry: &PinnedEntry, resolver: &dyn AppResolver) -> Self {
        // resolved Exec lines are still in desktop-entry escaped form
        let (name, exec, icon, terminal) = match entry.kind {
            EntryKind::Application => match resolver.resolve(&entry.identifier) {
                Some(app) => (app.name, app.exec, app.icon, app.terminal),
                None => {
                    debug!("Autostart: '{}' not installed, falling back to gtk-launch", entry.identifier);
                    (
                        entry.identifier.clone(),
                        format!("gtk-launch {}", quote_exec_arg(&entry.identifier)),
                        None,
                        false,
                    )
                }
            },
            EntryKind::Link => (
                entry.identifier.clone(),
                format!("xdg-open {}", quote_exec_arg(&entry.identifier)),
                Some("web-browser".to_string()),
                false,
            ),
        };

        Self {
            file_name: file_name(entry),
            name,
            exec,
            icon,
            terminal,
            enabled: true,
            delay: STARTUP_DELAY_SECS,
        }
    }

    pub fn render(&self) -> String {
        let mut out = String::from("[Desktop Entry]\nType=Application\n");
        out.push_str(&format!("Name={}\n", self.name.replace('\n', " ")));
        out.push_str(&format!("Exec={}\n", self.exec));
        if let Some(icon) = &self.icon {
            out.push_str(&format!("Icon={}\n", icon));
        }
        if self.terminal {
            out.push_str("Terminal=true\n");
        }
        out.push_str("Comment=Started at login by App Pinner\n");
        out.push_str(&format!("X-GNOME-Autostart-enabled={}\n", self.enabled));
        out.push_str(&format!("X-GNOME-Autostart-Delay={}\n", self.delay));
        out.push_str("Hidden=false\nNoDisplay=false\n");
        out
    }
}

/// Stable, filesystem-safe file name for `entry`. The readable stem is
/// lossy, so a digest of the full key keeps distinct keys on distinct files.
pub fn file_name(entry: &PinnedEntry) -> String {
    let key = entry.key();
    let stem: String = key
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .take(MAX_STEM_LEN)
        .collect();
    let digest = Sha256::digest(key.as_bytes());
    let tag: String = digest[..DIGEST_BYTES].iter().map(|b| format!("{:02x}", b)).collect();
    format!("{}{}-{}.desktop", FILE_PREFIX, stem, tag)
}

/// Double-quotes an Exec argument when it contains reserved characters.
fn quote_exec_arg(arg: &str) -> String {
    let arg = escape_exec(arg);
    let reserved = |c: char| c.is_whitespace() || "\"'\\><~|&;$*?#()`".contains(c);
    if !arg.contains(reserved) {
        return arg;
    }
    let mut quoted = String::from("\"");
    for c in arg.chars() {
        if matches!(c, '"' | '`' | '$' | '\\') {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted.push('"');
    quoted
}

fn escape_exec(exec: &str) -> String {
    exec.replace('%', "%%")
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum FileOperation {
    Write { file_name: String, contents: String },
    Delete { file_name: String },
}

/// Descriptors for every startup key that still has a source: a pinned
/// entry, or a custom link.
pub fn expected_descriptors(
    entries: &[PinnedEntry],
    startup: &[String],
    custom_links: &[String],
    resolver: &dyn AppResolver,
) -> Vec<StartupDescriptor> {
    startup
        .iter()
        .map(|key| normalize(key))
        .filter(|entry| {
            let live = entries.contains(entry) || (entry.is_link() && custom_links.contains(&entry.identifier));
            if !live {
                warn!("Autostart: skipping orphaned startup entry '{}'", entry.key());
            }
            live
        })
        .map(|entry| StartupDescriptor::for_entry(&entry, resolver))
        .collect()
}

/// Full reconciliation against the current directory contents: write every
/// expected file whose contents differ, delete every owned file that is not
/// expected. An empty result means the directory already converged.
pub fn reconcile(expected: &[StartupDescriptor], existing: &BTreeMap<String, String>) -> BTreeSet<FileOperation> {
    let mut ops = BTreeSet::new();
    let mut wanted = BTreeSet::new();

    for descriptor in expected {
        if !wanted.insert(descriptor.file_name.clone()) {
            warn!("Autostart: '{}' collides with an earlier entry, skipping", descriptor.file_name);
            continue;
        }
        let contents = descriptor.render();
        if existing.get(&descriptor.file_name) != Some(&contents) {
            ops.insert(FileOperation::Write {
                file_name: descriptor.file_name.clone(),
                contents,
            });
        }
    }

    for file_name in existing.keys() {
        if !wanted.contains(file_name) {
            ops.insert(FileOperation::Delete { file_name: file_name.clone() });
        }
    }
    ops
}

pub struct AutostartDir {
    path: PathBuf,
}

impl AutostartDir {
    pub fn new(path: &Path) -> Self {
        Self { path: path.to_path_buf() }
    }

    /// `$XDG_CONFIG_HOME/autostart`
    pub fn user() -> Option<Self> {
        BaseDirs::new().map(|dirs| Self::new(&dirs.config_dir().join("autostart")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Contents of the files owned by this program, keyed by file name.
    pub fn scan(&self) -> io::Result<BTreeMap<String, String>> {
        let mut owned = BTreeMap::new();
        if !self.path.exists() {
            return Ok(owned);
        }
        for entry in fs::read_dir(&self.path)?.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else { continue };
            if !name.starts_with(FILE_PREFIX) || !name.ends_with(".desktop") {
                continue;
            }
            match fs::read_to_string(entry.path()) {
                Ok(content) => {
                    owned.insert(name, content);
                }
                // unreadable files get overwritten or deleted like any other
                Err(_) => {
                    owned.insert(name, String::new());
                }
            }
        }
        Ok(owned)
    }

    /// Applies `ops`, logging and skipping the ones that fail. Returns the
    /// number of operations performed.
    pub fn apply(&self, ops: &BTreeSet<FileOperation>) -> usize {
        if ops.iter().any(|op| matches!(op, FileOperation::Write { .. })) {
            if let Err(e) = fs::create_dir_all(&self.path) {
                warn!("Autostart: cannot create {:?}: {}", self.path, e);
                return 0;
            }
        }

        let mut done = 0;
        for op in ops {
            let result = match op {
                FileOperation::Write { file_name, contents } => fs::write(self.path.join(file_name), contents),
                FileOperation::Delete { file_name } => fs::remove_file(self.path.join(file_name)),
            };
            match result {
                Ok(()) => done += 1,
                Err(e) => warn!("Autostart: {:?} failed: {}", op, e),
            }
        }
        done
    }

    /// Scan, reconcile and apply in one go.
    pub fn sync(&self, expected: &[StartupDescriptor]) -> io::Result<usize> {
        let existing = self.scan()?;
        let ops = reconcile(expected, &existing);
        let done = self.apply(&ops);
        if done > 0 {
            info!("Autostart: {} file operations in {:?}", done, self.path);
        }
        Ok(done)
    }
}

/// Runs reconciliations on a background thread so file I/O never blocks a
/// registry mutation.
pub struct AutostartWorker {
    request_tx: Sender<Vec<StartupDescriptor>>,
}

impl AutostartWorker {
    pub fn spawn(dir: AutostartDir) -> Self {
        let (request_tx, request_rx) = channel::<Vec<StartupDescriptor>>();
        thread::spawn(move || {
            while let Ok(mut expected) = request_rx.recv() {
                // a newer request supersedes any still queued
                while let Ok(newer) = request_rx.try_recv() {
                    expected = newer;
                }
                if let Err(e) = dir.sync(&expected) {
                    warn!("Autostart: reconciliation failed: {}", e);
                }
            }
        });
        Self { request_tx }
    }

    pub fn schedule(&self, expected: Vec<StartupDescriptor>) {
        if self.request_tx.send(expected).is_err() {
            warn!("Autostart: worker is gone, dropping reconciliation");
        }
    }
}
