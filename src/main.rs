mod autostart;
mod config;
mod dbus;
mod error;
mod executor;
mod longpress;
mod matcher;
mod model;
mod notifier;
mod registry;
mod running;
mod shortcuts;
mod sources;
mod state;
mod view;

use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::time::Duration;
use anyhow::{Context, Result, bail};
use calloop::EventLoop;
use calloop::signals::{Signal, Signals};
use calloop::timer::{TimeoutAction, Timer};
use clap::{Parser, Subcommand};
use log::{info, warn};
use crate::autostart::AutostartDir;
use crate::config::{FileStore, SettingsStore, Value, parse_value, schema, settings_path};
use crate::dbus::Request;
use crate::error::RegistryError;
use crate::longpress::LONG_PRESS_THRESHOLD;
use crate::model::{EntryKind, normalize};
use crate::registry::PinnedRegistry;
use crate::shortcuts::GsettingsGrabber;
use crate::sources::desktop::DesktopDatabase;
use crate::state::{AutostartSink, Pinner};

const RUNNING_REFRESH: Duration = Duration::from_secs(2);

#[derive(Parser, Debug)]
#[command(author, version, about = "Pin applications and links for quick access", long_about = None)]
struct Args {
    /// Settings file to use instead of the default location
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Show the pinned entries in order
    List {
        #[arg(long)]
        json: bool,
    },
    /// Search installed applications that are not pinned yet
    Search { query: String },
    /// Pin an application by desktop id
    Pin { id: String },
    /// Pin a web link
    Link { url: String },
    /// Remove a pinned application or link
    Unpin { id: String },
    /// Move a pinned entry to the last position
    MoveToEnd { id: String },
    /// Sort the pinned entries by name once
    Sort,
    /// Mark or unmark an entry for launch at login
    Startup {
        #[command(subcommand)]
        action: StartupAction,
    },
    /// Set the shortcut for a position; an empty string clears it
    Shortcut { position: usize, accelerator: String },
    /// Change a setting
    Set { key: String, value: String },
    /// Prune orphans and reconcile the autostart directory
    Sync,
    /// Launch the entry at a 1-based position
    Launch { position: usize },
    /// Run the service: D-Bus interface, shortcuts and autostart upkeep
    Serve,
}

#[derive(Subcommand, Debug)]
enum StartupAction {
    Enable { id: String },
    Disable { id: String },
}

type CliPinner = Pinner<FileStore, GsettingsGrabber>;

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let path = args.settings.clone().unwrap_or_else(settings_path);

    match args.command {
        Cmd::Serve => serve(&path),
        command => run_once(&path, command),
    }
}

fn load_registry(path: &Path, resolver: Rc<DesktopDatabase>) -> Result<PinnedRegistry<FileStore>> {
    let store = FileStore::open(path).with_context(|| format!("cannot open settings {:?}", path))?;
    Ok(PinnedRegistry::load(store, resolver))
}

fn autostart_dir() -> Result<AutostartDir> {
    AutostartDir::user().context("cannot determine the autostart directory")
}

fn run_once(path: &Path, command: Cmd) -> Result<()> {
    let resolver = Rc::new(DesktopDatabase::load());
    let registry = load_registry(path, resolver)?;
    let grabber = GsettingsGrabber::new(path)?;
    let mut pinner: CliPinner =
        Pinner::new(registry, grabber, AutostartSink::Inline(autostart_dir()?)).without_shortcut_grabs();

    // enabling prunes orphans and reconciles the autostart directory
    pinner.enable();
    let result = execute(&mut pinner, command);
    pinner.disable();

    if result? {
        dbus::notify_reload();
    }
    Ok(())
}

/// Runs one command. Returns whether settings were written.
fn execute(pinner: &mut CliPinner, command: Cmd) -> Result<bool> {
    match command {
        Cmd::List { json } => {
            print_list(pinner, json)?;
            Ok(false)
        }
        Cmd::Search { query } => {
            for app in pinner.search(&query) {
                println!("{}\t{}", app.id, app.name);
            }
            Ok(false)
        }
        Cmd::Launch { position } => {
            if !pinner.launch_position(position) {
                bail!("nothing launched at position {}", position);
            }
            Ok(false)
        }
        Cmd::Pin { id } => {
            let entry = normalize(&id);
            if entry.kind == EntryKind::Application && pinner.registry.resolver().resolve(&entry.identifier).is_none() {
                warn!("'{}' is not an installed application", entry.identifier);
            }
            report(pinner.pin(entry))?;
            Ok(true)
        }
        Cmd::Link { url } => {
            report(pinner.registry.add_link(&url))?;
            Ok(true)
        }
        Cmd::Unpin { id } => {
            if !pinner.registry.unpin(&id) {
                println!("'{}' was not pinned", id);
            }
            Ok(true)
        }
        Cmd::MoveToEnd { id } => Ok(pinner.registry.move_to_end(&id)),
        Cmd::Sort => Ok(pinner.registry.sort_alphabetically()),
        Cmd::Startup { action } => {
            let (id, enabled) = match action {
                StartupAction::Enable { id } => (id, true),
                StartupAction::Disable { id } => (id, false),
            };
            report(pinner.registry.set_launch_at_login(&id, enabled))?;
            Ok(true)
        }
        Cmd::Shortcut { position, accelerator } => {
            pinner.set_shortcut(position, &accelerator)?;
            Ok(true)
        }
        Cmd::Set { key, value } => {
            set_value(pinner, &key, &value)?;
            Ok(true)
        }
        Cmd::Sync => Ok(true),
        Cmd::Serve => bail!("serve cannot run as a one-shot command"),
    }
}

fn report(result: Result<(), RegistryError>) -> Result<()> {
    match result {
        Ok(()) => Ok(()),
        Err(RegistryError::CapacityExceeded { capacity }) => {
            bail!("Maximum number of pinned items reached ({}). Unpin something first.", capacity)
        }
        Err(e) => Err(e.into()),
    }
}

fn set_value(pinner: &mut CliPinner, key: &str, raw: &str) -> Result<()> {
    match (key, parse_value(key, raw)?) {
        (schema::MAX_APPS, Value::Int(capacity)) => {
            let capacity = usize::try_from(capacity).context("max-apps must not be negative")?;
            pinner.registry.set_capacity(capacity)?;
        }
        (schema::SORT_ALPHABETICALLY, Value::Bool(enabled)) => pinner.registry.set_sort_enabled(enabled),
        (schema::PINNED_APPS | schema::STARTUP_APPS | schema::CUSTOM_LINKS, _) => {
            bail!("'{}' is managed through pin, unpin, link and startup", key);
        }
        (k, _) if k.starts_with("shortcut-") => bail!("use the shortcut command to change '{}'", k),
        (k, value) => pinner.registry.store_mut().set(k, value)?,
    }
    Ok(())
}

fn print_list(pinner: &mut CliPinner, json: bool) -> Result<()> {
    pinner.refresh_running();

    let menu = pinner.menu.borrow();
    let panel = pinner.panel.borrow();
    if json {
        let out = serde_json::json!({ "menu": &*menu, "panel": &*panel });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let store = pinner.registry.store();
    for row in &menu.rows {
        let running = panel.slots.iter().any(|s| s.position == row.position && s.running);
        let shortcut = store.get_string(&schema::shortcut_key(row.position));
        println!(
            "{:>2}. {}{}{}{}",
            row.position,
            row.name,
            if running { " [running]" } else { "" },
            if row.launch_at_login { " [login]" } else { "" },
            if shortcut.is_empty() { String::new() } else { format!(" ({})", shortcut) },
        );
        if !row.installed {
            println!("    '{}' is not installed", row.key);
        }
    }
    Ok(())
}

fn serve(path: &Path) -> Result<()> {
    // blocked before any thread is spawned so the mask is inherited
    let signals = Signals::new(&[Signal::SIGINT, Signal::SIGTERM])?;
    let mut event_loop: EventLoop<CliPinner> = EventLoop::try_new()?;
    let handle = event_loop.handle();

    let resolver = Rc::new(DesktopDatabase::load());
    let registry = load_registry(path, resolver.clone())?;
    let dir = autostart_dir()?;
    info!("Settings at {:?}, autostart files in {:?}", registry.store().path(), dir.path());
    let worker = autostart::AutostartWorker::spawn(dir);
    let mut pinner: CliPinner = Pinner::new(registry, GsettingsGrabber::new(path)?, AutostartSink::Background(worker));
    pinner.attach_event_loop(handle.clone(), LONG_PRESS_THRESHOLD);
    pinner.enable();

    let (tx, rx) = calloop::channel::channel::<Request>();
    let _conn = dbus::serve(tx).context("cannot export the D-Bus interface")?;

    let reload_path = path.to_path_buf();
    handle
        .insert_source(rx, move |event, _, pinner: &mut CliPinner| {
            let calloop::channel::Event::Msg(request) = event else { return };
            match request {
                Request::LaunchPosition(position) => {
                    pinner.launch_position(position as usize);
                }
                Request::Press(key) => pinner.press(&key),
                Request::Release(key) => pinner.release(&key),
                Request::Reload => match load_registry(&reload_path, resolver.clone()) {
                    Ok(registry) => pinner.replace_registry(registry),
                    Err(e) => warn!("Reload failed, keeping current state: {:#}", e),
                },
            }
        })
        .map_err(|e| anyhow::anyhow!("cannot listen for D-Bus requests: {}", e.error))?;

    handle
        .insert_source(Timer::immediate(), |_, _, pinner: &mut CliPinner| {
            pinner.refresh_running();
            TimeoutAction::ToDuration(RUNNING_REFRESH)
        })
        .map_err(|e| anyhow::anyhow!("cannot start the running-state timer: {}", e.error))?;

    handle
        .insert_source(signals, |_, _, pinner: &mut CliPinner| {
            pinner.should_exit = true;
        })
        .map_err(|e| anyhow::anyhow!("cannot listen for signals: {}", e.error))?;

    info!("Serving {} on the session bus", dbus::BUS_NAME);
    loop {
        if pinner.should_exit {
            break;
        }
        event_loop.dispatch(None, &mut pinner)?;
    }

    pinner.disable();
    Ok(())
}
