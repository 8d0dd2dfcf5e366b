use std::collections::HashSet;
use std::fs;
use std::path::Path;
use log::debug;
use crate::model::AppDescriptor;

/// Snapshot of the executable names of the processes currently running.
#[derive(Debug, Default, Clone)]
pub struct RunningProcesses {
    names: HashSet<String>,
    cmdlines: Vec<String>,
}

impl RunningProcesses {
    pub fn scan() -> Self {
        Self::scan_proc(Path::new("/proc"))
    }

    pub fn scan_proc(proc_root: &Path) -> Self {
        let mut running = Self::default();
        let Ok(read_dir) = fs::read_dir(proc_root) else {
            debug!("Running: {:?} not readable", proc_root);
            return running;
        };

        for entry in read_dir.flatten() {
            let file_name = entry.file_name();
            let Some(pid) = file_name.to_str() else { continue };
            if !pid.chars().all(|c| c.is_ascii_digit()) {
                continue;
            }
            let dir = entry.path();
            if let Ok(comm) = fs::read_to_string(dir.join("comm")) {
                running.names.insert(comm.trim().to_string());
            }
            if let Ok(raw) = fs::read(dir.join("cmdline")) {
                let args: Vec<String> = raw
                    .split(|b| *b == 0)
                    .filter(|a| !a.is_empty())
                    .map(|a| String::from_utf8_lossy(a).into_owned())
                    .collect();
                if let Some(argv0) = args.first() {
                    running.names.insert(basename(argv0).to_string());
                }
                running.cmdlines.push(args.join(" "));
            }
        }
        debug!("Running: {} process names", running.names.len());
        running
    }

    pub fn is_running(&self, app: &AppDescriptor) -> bool {
        let Some(parts) = shlex::split(&app.exec) else { return false };
        let mut args = parts.iter().map(String::as_str).skip_while(|a| *a == "env" || a.contains('='));
        let Some(program) = args.next() else { return false };

        if basename(program) == "flatpak" {
            // flatpak run [options] <app-id>
            return self.cmdlines.iter().any(|c| c.contains(&app.id));
        }
        let name = basename(program);
        // comm is truncated to 15 bytes by the kernel
        let comm: String = name.chars().take(15).collect();
        self.names.contains(name) || self.names.contains(&comm)
    }
}

fn basename(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fake_process(root: &Path, pid: u32, comm: &str, cmdline: &[&str]) {
        let dir = root.join(pid.to_string());
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("comm"), format!("{comm}\n")).unwrap();
        let mut raw = cmdline.join("\0").into_bytes();
        raw.push(0);
        fs::write(dir.join("cmdline"), raw).unwrap();
    }

    #[test]
    fn detects_running_executables() {
        let root = tempfile::tempdir().unwrap();
        fake_process(root.path(), 10, "firefox", &["/usr/lib/firefox/firefox", "-P"]);
        fake_process(root.path(), 11, "bwrap", &["bwrap", "--args", "org.videolan.VLC"]);
        fake_process(root.path(), 12, "gnome-system-mo", &["gnome-system-monitor"]);
        fs::create_dir_all(root.path().join("self")).unwrap();

        let running = RunningProcesses::scan_proc(root.path());
        assert!(running.is_running(&AppDescriptor::new("firefox", "Firefox", "env MOZ_X=1 firefox")));
        assert!(running.is_running(&AppDescriptor::new("org.videolan.VLC", "VLC", "/usr/bin/flatpak run org.videolan.VLC")));
        assert!(running.is_running(&AppDescriptor::new("sysmon", "Monitor", "gnome-system-monitor")));
        assert!(!running.is_running(&AppDescriptor::new("gimp", "GIMP", "gimp-2.10")));
    }
}
