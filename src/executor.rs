use std::os::unix::process::CommandExt;
use std::process::{Command, Stdio};
use anyhow::Result;
use log::{info, warn};
use crate::model::{EntryKind, PinnedEntry};
use crate::sources::AppResolver;

/// Command line for `entry`, or `None` when the application is not installed.
pub fn command_line(entry: &PinnedEntry, resolver: &dyn AppResolver, terminal: &str) -> Option<Vec<String>> {
    match entry.kind {
        EntryKind::Link => Some(vec!["xdg-open".to_string(), entry.identifier.clone()]),
        EntryKind::Application => {
            let app = resolver.resolve(&entry.identifier)?;
            let exec = app.exec.replace("%%", "%");
            let mut argv = Vec::new();
            if app.terminal && !terminal.trim().is_empty() {
                argv.extend(shlex::split(terminal).unwrap_or_default());
            }
            match shlex::split(&exec) {
                Some(parts) => argv.extend(parts),
                None => argv.extend(exec.split_whitespace().map(str::to_string)),
            }
            Some(argv)
        }
    }
}

/// Launches `entry` detached from this process. An application that can no
/// longer be resolved is logged and skipped.
pub fn launch(entry: &PinnedEntry, resolver: &dyn AppResolver, terminal: &str) -> Result<bool> {
    let Some(cmd_parts) = command_line(entry, resolver, terminal) else {
        warn!("Launch: '{}' is not installed", entry.identifier);
        return Ok(false);
    };

    if cmd_parts.is_empty() {
        return Ok(false);
    }

    let mut command = Command::new(&cmd_parts[0]);
    command.args(&cmd_parts[1..])
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null());

    // SAFETY: setsid is async-signal-safe and touches no parent state.
    unsafe {
        command.pre_exec(|| {
            nix::unistd::setsid()?;
            Ok(())
        });
    }

    command.spawn()?;
    info!("Launch: started '{}'", entry.key());
    Ok(true)
}
