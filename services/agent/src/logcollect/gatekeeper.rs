//! Severity gate in front of the log buffer.
//!
//! An event is accepted iff its severity meets the configured threshold;
//! troubleshooting mode temporarily admits everything.  Events the agent
//! itself emitted are always dropped -- a self-amplification loop (agent
//! logs an error about shipping logs, ships that error, ...) must be
//! impossible.  Self-detection is pattern-based on a small exclusion set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;

use scribe_protocol::{LogEvent, LogSettings, Severity};

struct GateState {
    threshold: Severity,
    troubleshooting: bool,
}

pub struct Gatekeeper {
    state: RwLock<GateState>,
    exclusions: Vec<String>,
    rejected: AtomicU64,
}

impl Gatekeeper {
    pub fn new(threshold: Severity) -> Self {
        Gatekeeper {
            state: RwLock::new(GateState {
                threshold,
                troubleshooting: false,
            }),
            exclusions: default_exclusions(),
            rejected: AtomicU64::new(0),
        }
    }

    #[cfg(test)]
    fn with_exclusions(threshold: Severity, exclusions: Vec<String>) -> Self {
        Gatekeeper {
            state: RwLock::new(GateState {
                threshold,
                troubleshooting: false,
            }),
            exclusions,
            rejected: AtomicU64::new(0),
        }
    }

    pub fn accept(&self, event: &LogEvent) -> bool {
        if self.is_self_emitted(event) {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            return false;
        }
        let state = match self.state.read() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.troubleshooting {
            return true;
        }
        if event.severity >= state.threshold {
            true
        } else {
            self.rejected.fetch_add(1, Ordering::Relaxed);
            false
        }
    }

    /// Apply refreshed settings in one write.
    pub fn apply(&self, settings: &LogSettings) {
        let mut state = match self.state.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.threshold = settings.severity_threshold;
        state.troubleshooting = settings.troubleshooting;
    }

    pub fn threshold(&self) -> Severity {
        match self.state.read() {
            Ok(g) => g.threshold,
            Err(poisoned) => poisoned.into_inner().threshold,
        }
    }

    pub fn rejected_total(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    fn is_self_emitted(&self, event: &LogEvent) -> bool {
        self.exclusions.iter().any(|pattern| {
            event.source.contains(pattern.as_str()) || event.message.contains(pattern.as_str())
        })
    }
}

/// The agent's own process name plus its well-known log markers.
fn default_exclusions() -> Vec<String> {
    let mut patterns = vec!["scribe_agent".to_owned(), "scribe::".to_owned()];
    if let Ok(exe) = std::env::current_exe() {
        if let Some(name) = exe.file_stem().and_then(|n| n.to_str()) {
            patterns.push(name.to_owned());
        }
    }
    patterns
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
