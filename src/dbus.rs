use std::sync::Mutex;
use calloop::channel::Sender;
use log::{debug, warn};
use zbus::interface;

pub const BUS_NAME: &str = "org.gnome.Shell.Extensions.AppPinner";
pub const OBJECT_PATH: &str = "/org/gnome/Shell/Extensions/AppPinner";
pub const INTERFACE: &str = "org.gnome.Shell.Extensions.AppPinner";

/// Calls received on the bus, forwarded to the event loop.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    LaunchPosition(u32),
    Press(String),
    Release(String),
    Reload,
}

pub struct PinnerDbus {
    tx: Mutex<Sender<Request>>,
}

impl PinnerDbus {
    pub fn new(tx: Sender<Request>) -> Self {
        Self { tx: Mutex::new(tx) }
    }

    fn forward(&self, request: Request) {
        match self.tx.lock() {
            Ok(tx) => {
                if tx.send(request).is_err() {
                    warn!("D-Bus: event loop is gone");
                }
            }
            Err(_) => warn!("D-Bus: request channel poisoned"),
        }
    }
}

#[interface(name = "org.gnome.Shell.Extensions.AppPinner")]
impl PinnerDbus {
    /// Launches whatever entry occupies the 1-based `position`.
    fn launch_position(&self, position: u32) {
        debug!("D-Bus: LaunchPosition({})", position);
        self.forward(Request::LaunchPosition(position));
    }

    /// Pointer pressed on a pinned entry; holding it moves the entry to the end.
    fn press(&self, key: String) {
        self.forward(Request::Press(key));
    }

    /// Pointer released; a release before the long-press threshold launches.
    fn release(&self, key: String) {
        self.forward(Request::Release(key));
    }

    /// Re-reads the settings file after an out-of-process change.
    fn reload(&self) {
        self.forward(Request::Reload);
    }
}

/// Claims the bus name and exports the object. The returned connection keeps
/// the service alive.
pub fn serve(tx: Sender<Request>) -> zbus::Result<zbus::blocking::Connection> {
    zbus::blocking::ConnectionBuilder::session()?
        .name(BUS_NAME)?
        .serve_at(OBJECT_PATH, PinnerDbus::new(tx))?
        .build()
}

/// Asks a running service to reload its settings. Failure only means no
/// service is running.
pub fn notify_reload() {
    let result = zbus::blocking::Connection::session().and_then(|conn| {
        conn.call_method(Some(BUS_NAME), OBJECT_PATH, Some(INTERFACE), "Reload", &())
            .map(|_| ())
    });
    if let Err(e) = result {
        debug!("D-Bus: no running service to reload ({})", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn calls_are_forwarded_in_order() {
        let (tx, rx) = calloop::channel::channel();
        let service = PinnerDbus::new(tx);
        service.launch_position(3);
        service.press("firefox".to_string());
        service.release("firefox".to_string());
        service.reload();

        let mut received = Vec::new();
        let mut event_loop: calloop::EventLoop<Vec<Request>> = calloop::EventLoop::try_new().unwrap();
        event_loop
            .handle()
            .insert_source(rx, |event, _, received: &mut Vec<Request>| {
                if let calloop::channel::Event::Msg(request) = event {
                    received.push(request);
                }
            })
            .unwrap();
        event_loop.dispatch(Some(std::time::Duration::from_millis(50)), &mut received).unwrap();

        assert_eq!(
            received,
            vec![
                Request::LaunchPosition(3),
                Request::Press("firefox".to_string()),
                Request::Release("firefox".to_string()),
                Request::Reload,
            ]
        );
    }
}
