use std::collections::HashMap;
use std::time::Duration;
use calloop::timer::{TimeoutAction, Timer};
use calloop::{LoopHandle, RegistrationToken};
use log::{debug, warn};

pub const LONG_PRESS_THRESHOLD: Duration = Duration::from_millis(600);

/// State that owns a `LongPress` tracker and reacts when a press is held past
/// the threshold.
pub trait LongPressTarget: Sized + 'static {
    fn long_press(&mut self) -> Option<&mut LongPress<Self>>;
    fn on_long_press(&mut self, key: &str);
}

/// Cancellable press timers, one per entry key.
pub struct LongPress<D: 'static> {
    handle: LoopHandle<'static, D>,
    threshold: Duration,
    pending: HashMap<String, RegistrationToken>,
}

impl<D: LongPressTarget> LongPress<D> {
    pub fn new(handle: LoopHandle<'static, D>, threshold: Duration) -> Self {
        Self {
            handle,
            threshold,
            pending: HashMap::new(),
        }
    }

    /// Starts the timer for `key`, replacing any timer still pending for it.
    pub fn press(&mut self, key: &str) {
        self.cancel(key);
        let owned = key.to_string();
        let inserted = self.handle.insert_source(Timer::from_duration(self.threshold), move |_, _, data: &mut D| {
            let still_pending = data
                .long_press()
                .is_some_and(|lp| lp.pending.remove(&owned).is_some());
            if still_pending {
                debug!("LongPress: '{}' held", owned);
                data.on_long_press(&owned);
            }
            TimeoutAction::Drop
        });
        match inserted {
            Ok(token) => {
                self.pending.insert(key.to_string(), token);
            }
            Err(e) => warn!("LongPress: cannot arm timer for '{}': {}", key, e.error),
        }
    }

    /// Ends the press. Returns true if the threshold had not elapsed yet,
    /// i.e. the press was a plain click.
    pub fn release(&mut self, key: &str) -> bool {
        self.cancel(key)
    }

    pub fn is_pending(&self, key: &str) -> bool {
        self.pending.contains_key(key)
    }

    /// Cancels every pending timer. Safe to call repeatedly.
    pub fn cancel_all(&mut self) {
        for (_, token) in self.pending.drain() {
            self.handle.remove(token);
        }
    }

    fn cancel(&mut self, key: &str) -> bool {
        match self.pending.remove(key) {
            Some(token) => {
                self.handle.remove(token);
                true
            }
            None => false,
        }
    }
}
