use serde::Serialize;

pub const LINK_PREFIX: &str = "link://";
const APPLICATION_PREFIX: &str = "application://";
const DESKTOP_SUFFIX: &str = ".desktop";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Application,
    Link,
}

/// A pinned application or link. `identifier` is always in normalized form:
/// a desktop-entry id without suffix for applications, the bare URL for links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PinnedEntry {
    pub kind: EntryKind,
    pub identifier: String,
}

impl PinnedEntry {
    pub fn application(id: &str) -> Self {
        normalize_application(id)
    }

    pub fn link(url: &str) -> Self {
        Self {
            kind: EntryKind::Link,
            identifier: url.to_string(),
        }
    }

    pub fn is_link(&self) -> bool {
        self.kind == EntryKind::Link
    }

    /// The persisted form, as stored in `pinned-apps` and `startup-apps`.
    pub fn key(&self) -> String {
        match self.kind {
            EntryKind::Application => self.identifier.clone(),
            EntryKind::Link => format!("{}{}", LINK_PREFIX, self.identifier),
        }
    }
}

/// Reduces a raw identifier to its canonical entry.
///
/// `link://` wrappers are stripped once and the URL kept verbatim; bare
/// `http(s)://` URLs are treated as links too. Anything else is an application
/// id: `application://` prefixes, directory components of a `.desktop` path
/// and `.desktop` suffixes (any case) are removed until none remain.
/// `normalize(&normalize(x).key()) == normalize(x)`.
pub fn normalize(raw: &str) -> PinnedEntry {
    let mut raw = raw.trim();
    while let Some(rest) = raw.strip_prefix(APPLICATION_PREFIX) {
        raw = rest;
    }
    if let Some(url) = raw.strip_prefix(LINK_PREFIX) {
        return PinnedEntry::link(url.trim());
    }
    if is_web_url(raw) {
        return PinnedEntry::link(raw);
    }
    normalize_application(raw)
}

fn normalize_application(raw: &str) -> PinnedEntry {
    let mut id = raw;
    loop {
        let before = id;
        id = id.trim();
        if let Some(rest) = id.strip_prefix(APPLICATION_PREFIX) {
            id = rest;
        }
        if id.starts_with('/') && has_desktop_suffix(id) {
            id = id.rsplit('/').next().unwrap_or(id);
        }
        if has_desktop_suffix(id) {
            id = &id[..id.len() - DESKTOP_SUFFIX.len()];
        }
        if id == before {
            break;
        }
    }

    PinnedEntry {
        kind: EntryKind::Application,
        identifier: id.to_string(),
    }
}

fn has_desktop_suffix(id: &str) -> bool {
    id.len() >= DESKTOP_SUFFIX.len()
        && id.is_char_boundary(id.len() - DESKTOP_SUFFIX.len())
        && id[id.len() - DESKTOP_SUFFIX.len()..].eq_ignore_ascii_case(DESKTOP_SUFFIX)
}

fn is_web_url(raw: &str) -> bool {
    let lower = raw.get(..8).unwrap_or(raw).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Metadata of an installed application, as read from its desktop entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppDescriptor {
    pub id: String,
    pub name: String,
    pub exec: String,
    pub icon: Option<String>,
    pub terminal: bool,
    pub no_display: bool,
}

impl AppDescriptor {
    pub fn new(id: &str, name: &str, exec: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            exec: exec.to_string(),
            icon: None,
            terminal: false,
            no_display: false,
        }
    }
}
