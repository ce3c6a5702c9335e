//! Operating mode and the Active watchdog.
//!
//! Exactly one mode is active at any time; transitions are totally ordered
//! under the controller's lock.  Entering Active arms a single-shot
//! watchdog: after five minutes the mode falls back to Passive on its own,
//! so a controlling UI that vanished without `stop_stream` cannot leave the
//! agent flooding.  A second `start_stream` while already Active does not
//! extend the deadline.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

/// Passive-mode send cadence.
pub const PASSIVE_SEND_INTERVAL: Duration = Duration::from_secs(60);
/// Active-mode collect/send cadence.
pub const ACTIVE_INTERVAL: Duration = Duration::from_secs(1);
/// Hard ceiling on continuous Active operation.
pub const ACTIVE_WATCHDOG: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Passive,
    Active,
}

struct Inner {
    mode: Mode,
    /// Bumped on every Passive->Active transition; a watchdog only fires if
    /// its generation still matches.
    watchdog_gen: u64,
}

pub struct ModeController {
    inner: Mutex<Inner>,
    tx: watch::Sender<Mode>,
}

impl ModeController {
    pub fn new() -> (Arc<Self>, watch::Receiver<Mode>) {
        let (tx, rx) = watch::channel(Mode::Passive);
        (
            Arc::new(ModeController {
                inner: Mutex::new(Inner {
                    mode: Mode::Passive,
                    watchdog_gen: 0,
                }),
                tx,
            }),
            rx,
        )
    }

    pub fn mode(&self) -> Mode {
        match self.inner.lock() {
            Ok(g) => g.mode,
            Err(poisoned) => poisoned.into_inner().mode,
        }
    }

    /// Switch to Active and arm the watchdog.  Returns false when already
    /// Active (the existing watchdog keeps its original deadline).
    pub fn set_active(self: &Arc<Self>) -> bool {
        self.set_active_with_watchdog(ACTIVE_WATCHDOG)
    }

    pub fn set_active_with_watchdog(self: &Arc<Self>, watchdog: Duration) -> bool {
        let generation = {
            let mut inner = match self.inner.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if inner.mode == Mode::Active {
                return false;
            }
            inner.mode = Mode::Active;
            inner.watchdog_gen += 1;
            inner.watchdog_gen
        };
        let _ = self.tx.send(Mode::Active);
        info!("mode -> active (watchdog armed)");

        let controller = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(watchdog).await;
            controller.watchdog_fired(generation);
        });
        true
    }

    /// Switch to Passive.  Returns false when already Passive.
    pub fn set_passive(&self, reason: &str) -> bool {
        {
            let mut inner = match self.inner.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if inner.mode == Mode::Passive {
                return false;
            }
            inner.mode = Mode::Passive;
        }
        let _ = self.tx.send(Mode::Passive);
        info!(reason, "mode -> passive");
        true
    }

    fn watchdog_fired(&self, generation: u64) {
        let reverted = {
            let mut inner = match self.inner.lock() {
                Ok(g) => g,
                Err(poisoned) => poisoned.into_inner(),
            };
            if inner.mode == Mode::Active && inner.watchdog_gen == generation {
                inner.mode = Mode::Passive;
                true
            } else {
                false
            }
        };
        if reverted {
            let _ = self.tx.send(Mode::Passive);
            info!("active watchdog expired, mode -> passive");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
