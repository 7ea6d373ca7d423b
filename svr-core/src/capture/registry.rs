use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::library::ChannelId;

/// Handle to the capture currently writing a channel's stream. Present in
/// the map from `start` until `clear`, even before the process exists.
#[derive(Debug, Default, Clone)]
struct CaptureHandle {
    pid: Option<u32>,
    filename: Option<String>,
    started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default, Clone)]
struct ChannelStatus {
    name: String,
    is_online: bool,
    is_terminating: bool,
    stream_url: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RegistrySnapshot {
    pub channel_id: ChannelId,
    pub name: String,
    pub is_online: bool,
    pub is_terminating: bool,
    pub is_recording: bool,
    pub stream_url: Option<String>,
    pub filename: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
}

/// Concurrency-safe store of ephemeral per-channel capture state. Two
/// independent locks, split by access pattern: status queries are hot and
/// read-mostly, capture-handle mutation is rare. Neither lock is ever held
/// across blocking work, and the two are never held at the same time.
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    captures: Mutex<HashMap<ChannelId, CaptureHandle>>,
    status: Mutex<HashMap<ChannelId, ChannelStatus>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers capture state for the channel. Returns false and changes
    /// nothing if the channel is already registered; a double start is a
    /// benign no-op, not an error.
    pub fn start(&self, id: ChannelId, name: &str) -> bool {
        {
            let mut captures = self.captures.lock().unwrap();
            if captures.contains_key(&id) {
                debug!(channel = name, "capture already registered, skipping start");
                return false;
            }
            captures.insert(id, CaptureHandle::default());
        }
        let mut status = self.status.lock().unwrap();
        let entry = status.entry(id).or_default();
        entry.name = name.to_string();
        entry.is_online = false;
        entry.is_terminating = false;
        entry.stream_url = None;
        true
    }

    pub fn update_process(
        &self,
        id: ChannelId,
        pid: u32,
        filename: &str,
        started_at: DateTime<Utc>,
    ) {
        let mut captures = self.captures.lock().unwrap();
        if let Some(handle) = captures.get_mut(&id) {
            handle.pid = Some(pid);
            handle.filename = Some(filename.to_string());
            handle.started_at = Some(started_at);
        } else {
            warn!(channel = %id, "process update for unregistered channel");
        }
    }

    pub fn mark_online(&self, id: ChannelId, stream_url: &str) {
        let mut status = self.status.lock().unwrap();
        let entry = status.entry(id).or_default();
        entry.is_online = true;
        entry.stream_url = Some(stream_url.to_string());
    }

    pub fn mark_terminating(&self, id: ChannelId) {
        let mut status = self.status.lock().unwrap();
        status.entry(id).or_default().is_terminating = true;
    }

    pub fn is_recording(&self, id: ChannelId) -> bool {
        self.captures.lock().unwrap().contains_key(&id)
    }

    pub fn is_online(&self, id: ChannelId) -> bool {
        self.status
            .lock()
            .unwrap()
            .get(&id)
            .map(|entry| entry.is_online)
            .unwrap_or(false)
    }

    pub fn is_terminating(&self, id: ChannelId) -> bool {
        self.status
            .lock()
            .unwrap()
            .get(&id)
            .map(|entry| entry.is_terminating)
            .unwrap_or(false)
    }

    /// Drops the capture handle and resets the status flags. The channel
    /// name stays behind for logging. Safe to call any number of times.
    pub fn clear(&self, id: ChannelId) {
        self.captures.lock().unwrap().remove(&id);
        let mut status = self.status.lock().unwrap();
        if let Some(entry) = status.get_mut(&id) {
            entry.is_online = false;
            entry.is_terminating = false;
            entry.stream_url = None;
        }
    }

    /// Point-in-time copy for iteration without holding a lock during slow
    /// work (thumbnail sweeps, shutdown).
    pub fn snapshot(&self) -> Vec<RegistrySnapshot> {
        let status: Vec<(ChannelId, ChannelStatus)> = {
            let guard = self.status.lock().unwrap();
            guard.iter().map(|(id, entry)| (*id, entry.clone())).collect()
        };
        let captures = self.captures.lock().unwrap();
        status
            .into_iter()
            .map(|(channel_id, entry)| {
                let handle = captures.get(&channel_id);
                RegistrySnapshot {
                    channel_id,
                    name: entry.name,
                    is_online: entry.is_online,
                    is_terminating: entry.is_terminating,
                    is_recording: handle.is_some(),
                    stream_url: entry.stream_url,
                    filename: handle.and_then(|h| h.filename.clone()),
                    started_at: handle.and_then(|h| h.started_at),
                }
            })
            .collect()
    }

    /// Asks the channel's encoder to stop, flushing its output. Terminating
    /// is flagged first so supervisors stop treating the channel as
    /// startable. Always succeeds: a missing or already-finished process is
    /// not an error, and repeated calls are harmless. The owning session
    /// performs the actual wait and cleanup.
    pub fn terminate(&self, id: ChannelId) {
        self.mark_terminating(id);
        let pid = {
            let captures = self.captures.lock().unwrap();
            captures.get(&id).and_then(|handle| handle.pid)
        };
        match pid {
            Some(pid) => {
                debug!(channel = %id, pid, "interrupting capture process");
                send_interrupt(pid);
            }
            None => debug!(channel = %id, "terminate with no tracked process"),
        }
    }

    pub fn terminate_all(&self) {
        let ids: Vec<ChannelId> = {
            let captures = self.captures.lock().unwrap();
            captures.keys().copied().collect()
        };
        for id in ids {
            self.terminate(id);
        }
    }
}

/// Interrupt, not kill: the encoder traps it and finalizes the container.
/// Delivery failure means the process already exited, which is fine.
#[cfg(unix)]
fn send_interrupt(pid: u32) {
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGINT);
    }
}

#[cfg(not(unix))]
fn send_interrupt(_pid: u32) {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn start_is_idempotent() {
        let registry = ChannelRegistry::new();
        let id = ChannelId(1);
        assert!(registry.start(id, "alpha"));
        assert!(registry.is_recording(id));
        assert!(!registry.start(id, "alpha"));
        assert_eq!(registry.snapshot().len(), 1);
        registry.clear(id);
        assert!(!registry.is_recording(id));
        assert!(registry.start(id, "alpha"));
    }

    #[test]
    fn clear_resets_flags_but_keeps_name() {
        let registry = ChannelRegistry::new();
        let id = ChannelId(7);
        registry.start(id, "beta");
        registry.mark_online(id, "https://example/stream");
        registry.mark_terminating(id);
        registry.clear(id);
        assert!(!registry.is_online(id));
        assert!(!registry.is_terminating(id));
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].name, "beta");
        assert!(snapshot[0].stream_url.is_none());
    }

    #[test]
    fn terminate_twice_is_harmless() {
        let registry = ChannelRegistry::new();
        let id = ChannelId(3);
        registry.start(id, "gamma");
        registry.terminate(id);
        registry.terminate(id);
        assert!(registry.is_terminating(id));
        // no process was ever attached; both calls still succeed
        registry.terminate(ChannelId(99));
    }
}
